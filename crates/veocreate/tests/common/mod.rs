//! Shared fixtures for the integration suite: throwaway signing keys and a
//! minimal template/readme directory, so individual test files don't each
//! reinvent key generation.

use std::fs;
use std::path::{Path, PathBuf};

use rand_core::OsRng;
use rcgen::{CertifiedKey, generate_simple_self_signed};
use rsa::RsaPrivateKey;
use veocreate::{Signer, SigningKeyPair};

pub const AGLS_SCHEMA: &str = "http://www.prov.vic.gov.au/vers/schema/AGLS";
pub const XML_SYNTAX: &str = "http://www.w3.org/2001/XMLSchema";

/// A throwaway self-signed DER certificate, unrelated to any signer's key.
/// Exercises the certificate-chain plumbing without needing a real PKI.
pub fn fixture_chain() -> Vec<Vec<u8>> {
    let CertifiedKey { cert, .. } =
        generate_simple_self_signed(vec!["veocreate.invalid".to_string()]).expect("self-signed cert");
    vec![cert.der().to_vec()]
}

pub fn rsa_signer() -> Signer {
    let key = RsaPrivateKey::new(&mut OsRng, 1024).expect("rsa key");
    Signer::from_parts(SigningKeyPair::Rsa(Box::new(key)), "CN=Integration Test RSA", fixture_chain())
}

pub fn dsa_signer() -> Signer {
    let components = dsa::Components::generate(&mut OsRng, dsa::KeySize::DSA_2048_256);
    let key = dsa::SigningKey::generate(&mut OsRng, components);
    Signer::from_parts(SigningKeyPair::Dsa(Box::new(key)), "CN=Integration Test DSA", fixture_chain())
}

pub fn ecdsa_signer() -> Signer {
    let key = p256::ecdsa::SigningKey::random(&mut OsRng);
    Signer::from_parts(SigningKeyPair::Ecdsa(Box::new(key)), "CN=Integration Test ECDSA", fixture_chain())
}

/// A template/readme directory with one AGLS-ish template, suitable for
/// `add_readme`/`start_xml_mp` fixtures.
pub fn template_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("VEOReadme.txt"), b"This is a VERS V3 VEO.\n").expect("write readme");
    fs::write(
        dir.path().join("agls.tpl"),
        format!("{AGLS_SCHEMA}\t{XML_SYNTAX}\n<dc:title>$$column 1$$</dc:title>\n<dc:date>$$date$$</dc:date>\n"),
    )
    .expect("write template");
    dir
}

pub fn write_content_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir content dir");
    }
    fs::write(&path, bytes).expect("write content file");
    path
}

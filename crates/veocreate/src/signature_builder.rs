//! Hashes a finished manifest and emits its `vers:SignatureBlock` descriptor
//! (spec §4.5).

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha384, Sha512};
use signature::SignatureEncoding;
use signature::hazmat::PrehashSigner;
use time::OffsetDateTime;

use crate::digest::HashAlgorithm;
use crate::error::{VeoError, codes};
use crate::signer::{Signer, SigningKeyPair};
use crate::template::format_timestamp;
use crate::xml_writer::XmlWriter;

pub const SIGNATURE_VERSION: &str = "3.0";

/// The signature algorithm identifiers this system is willing to produce,
/// e.g. `SHA256withRSA`. Any hash/key combination outside this set is fatal.
const PERMITTED_ALGORITHMS: &[&str] = &[
    "SHA1withDSA",
    "SHA1withRSA",
    "SHA224withDSA",
    "SHA224withRSA",
    "SHA256withDSA",
    "SHA256withRSA",
    "SHA256withECDSA",
    "SHA384withRSA",
    "SHA384withECDSA",
    "SHA512withRSA",
    "SHA512withECDSA",
];

/// Validate `manifest_filename`, hash it, sign the digest with `signer`, and
/// write `<preamble>Signature<N>.xml` into `staging_dir`, where `preamble`
/// is derived from `manifest_filename` and `N` is the lowest unused
/// positive integer.
pub fn sign(
    staging_dir: &Path,
    manifest_filename: &str,
    signer: &Signer,
    hash: HashAlgorithm,
    now: OffsetDateTime,
) -> Result<(), VeoError> {
    let preamble = match manifest_filename {
        "VEOContent.xml" => "VEOContentSignature",
        "VEOHistory.xml" => "VEOHistorySignature",
        other => {
            return Err(VeoError::recoverable(
                codes::SIG_BAD_MANIFEST_NAME,
                "signature_builder",
                "sign",
                format!("`{other}` is not a signable manifest"),
            ));
        }
    };

    let algorithm = format!(
        "{}with{}",
        hash.signature_hash_portion(),
        signer.algorithm_label()
    );
    if !PERMITTED_ALGORITHMS.contains(&algorithm.as_str()) {
        return Err(VeoError::fatal(
            codes::SIG_UNSUPPORTED_COMBINATION,
            "signature_builder",
            "sign",
            format!("{algorithm} is not a supported signature algorithm"),
        ));
    }

    let manifest_path = staging_dir.join(manifest_filename);
    let manifest_bytes = std::fs::read(&manifest_path).map_err(|e| {
        VeoError::recoverable(
            codes::SIG_MANIFEST_UNREADABLE,
            "signature_builder",
            "sign",
            format!("cannot read {}: {e}", manifest_path.display()),
        )
    })?;

    let signature_bytes = sign_bytes(&manifest_bytes, &signer.key, hash)?;

    let n = next_signature_number(staging_dir, preamble)?;
    let descriptor_path = staging_dir.join(format!("{preamble}{n}.xml"));
    write_descriptor(
        &descriptor_path,
        &algorithm,
        now,
        &signer.subject_dn,
        &signature_bytes,
        &signer.chain,
    )
}

fn sign_bytes(data: &[u8], key: &SigningKeyPair, hash: HashAlgorithm) -> Result<Vec<u8>, VeoError> {
    let fail = |e: signature::Error| {
        VeoError::fatal(
            codes::SIG_PRIMITIVE_FAILED,
            "signature_builder",
            "sign",
            format!("signing primitive failed: {e}"),
        )
    };
    match key {
        SigningKeyPair::Rsa(private) => {
            use rsa::pkcs1v15::SigningKey;
            match hash {
                HashAlgorithm::Sha1 => {
                    let prehash = Sha1::digest(data);
                    let sk = SigningKey::<Sha1>::new((**private).clone());
                    sk.sign_prehash(&prehash).map(|s| s.to_vec()).map_err(fail)
                }
                HashAlgorithm::Sha256 => {
                    let prehash = Sha256::digest(data);
                    let sk = SigningKey::<Sha256>::new((**private).clone());
                    sk.sign_prehash(&prehash).map(|s| s.to_vec()).map_err(fail)
                }
                HashAlgorithm::Sha384 => {
                    let prehash = Sha384::digest(data);
                    let sk = SigningKey::<Sha384>::new((**private).clone());
                    sk.sign_prehash(&prehash).map(|s| s.to_vec()).map_err(fail)
                }
                HashAlgorithm::Sha512 => {
                    let prehash = Sha512::digest(data);
                    let sk = SigningKey::<Sha512>::new((**private).clone());
                    sk.sign_prehash(&prehash).map(|s| s.to_vec()).map_err(fail)
                }
            }
        }
        SigningKeyPair::Dsa(private) => match hash {
            HashAlgorithm::Sha1 => {
                let prehash = Sha1::digest(data);
                private.sign_prehash(&prehash).map(|s: dsa::Signature| s.to_vec()).map_err(fail)
            }
            HashAlgorithm::Sha256 => {
                let prehash = Sha256::digest(data);
                private.sign_prehash(&prehash).map(|s: dsa::Signature| s.to_vec()).map_err(fail)
            }
            // SHA-384/512 with DSA are not in the permitted set; `sign`
            // already rejected them before reaching this match.
            HashAlgorithm::Sha384 | HashAlgorithm::Sha512 => unreachable!(
                "SHA384/512withDSA is outside PERMITTED_ALGORITHMS and rejected earlier"
            ),
        },
        SigningKeyPair::Ecdsa(private) => match hash {
            HashAlgorithm::Sha256 => {
                let prehash = Sha256::digest(data);
                private
                    .sign_prehash(&prehash)
                    .map(|s: p256::ecdsa::Signature| s.to_vec())
                    .map_err(fail)
            }
            HashAlgorithm::Sha384 => {
                let prehash = Sha384::digest(data);
                private
                    .sign_prehash(&prehash)
                    .map(|s: p256::ecdsa::Signature| s.to_vec())
                    .map_err(fail)
            }
            HashAlgorithm::Sha512 => {
                let prehash = Sha512::digest(data);
                private
                    .sign_prehash(&prehash)
                    .map(|s: p256::ecdsa::Signature| s.to_vec())
                    .map_err(fail)
            }
            HashAlgorithm::Sha1 => {
                unreachable!("SHA1withECDSA is outside PERMITTED_ALGORITHMS and rejected earlier")
            }
        },
    }
}

/// Probe `staging_dir` for the lowest positive integer `N` such that
/// `<preamble><N>.xml` does not already exist.
fn next_signature_number(staging_dir: &Path, preamble: &str) -> Result<u32, VeoError> {
    for n in 1.. {
        let candidate = staging_dir.join(format!("{preamble}{n}.xml"));
        if !candidate.exists() {
            return Ok(n);
        }
        if n == u32::MAX {
            return Err(VeoError::fatal(
                codes::SIG_NUMBERING_EXHAUSTED,
                "signature_builder",
                "sign",
                "exhausted signature file numbering",
            ));
        }
    }
    unreachable!()
}

#[allow(clippy::too_many_arguments)]
fn write_descriptor(
    path: &Path,
    algorithm: &str,
    now: OffsetDateTime,
    subject_dn: &str,
    signature_bytes: &[u8],
    chain: &[Vec<u8>],
) -> Result<(), VeoError> {
    let mut w = XmlWriter::start(path, "vers:SignatureBlock")?;
    w.emit_simple_element("vers:Version", &[], Some(SIGNATURE_VERSION))?;
    w.emit_simple_element("vers:SignatureAlgorithm", &[], Some(algorithm))?;
    w.emit_simple_element("vers:SignatureDateTime", &[], Some(&format_timestamp(now)))?;
    w.emit_simple_element("vers:Signer", &[], Some(subject_dn))?;
    w.emit_simple_element("vers:Signature", &[], Some(&STANDARD.encode(signature_bytes)))?;
    w.emit_complex_open("vers:CertificateChain", &[])?;
    for cert in chain {
        w.emit_simple_element("vers:Certificate", &[], Some(&STANDARD.encode(cert)))?;
    }
    w.emit_complex_close("vers:CertificateChain")?;
    w.end()
}

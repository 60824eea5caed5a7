//! A signer identity: private key, key algorithm label, subject DN, and an
//! ordered certificate chain. Decomposing a PKCS#12 key store into this
//! shape is an external collaborator (spec §1); this crate only consumes
//! already-decomposed signers.

use rsa::RsaPrivateKey;

/// The asymmetric key backing a [`Signer`]. Variant names double as the
/// `RSA`/`DSA`/`ECDSA` algorithm label used to compose signature algorithm
/// identifiers (spec §4.5).
#[derive(Clone)]
pub enum SigningKeyPair {
    Rsa(Box<RsaPrivateKey>),
    Dsa(Box<dsa::SigningKey>),
    Ecdsa(Box<p256::ecdsa::SigningKey>),
}

impl SigningKeyPair {
    pub fn algorithm_label(&self) -> &'static str {
        match self {
            Self::Rsa(_) => "RSA",
            Self::Dsa(_) => "DSA",
            Self::Ecdsa(_) => "ECDSA",
        }
    }
}

/// An identity capable of signing a VEO's manifests: a private key plus the
/// subject DN and certificate chain that get written into the signature
/// descriptor (spec §3, §4.5).
#[derive(Clone)]
pub struct Signer {
    pub key: SigningKeyPair,
    pub subject_dn: String,
    /// DER-encoded certificates, leaf first.
    pub chain: Vec<Vec<u8>>,
}

impl Signer {
    /// Build a signer from an already-decomposed key, DN, and chain. The
    /// PKCS#12 parsing that would normally produce these three values is
    /// explicitly out of scope (spec §1).
    pub fn from_parts(key: SigningKeyPair, subject_dn: impl Into<String>, chain: Vec<Vec<u8>>) -> Self {
        Self {
            key,
            subject_dn: subject_dn.into(),
            chain,
        }
    }

    pub fn algorithm_label(&self) -> &'static str {
        self.key.algorithm_label()
    }
}

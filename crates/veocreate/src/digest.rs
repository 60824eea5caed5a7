//! Streams a source file through a message digest without loading it whole
//! into memory.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use digest::Digest;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::{VeoError, codes};

const BUFFER_SIZE: usize = 1024;

/// The four digest algorithms this system will compute over content files
/// and manifests. `MD2`/`MD5` and anything else are rejected up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Parse the `HASH`/`-ha` token, e.g. `"SHA-256"`.
    pub fn parse(raw: &str) -> Result<Self, VeoError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SHA-1" | "SHA1" => Ok(Self::Sha1),
            "SHA-256" | "SHA256" => Ok(Self::Sha256),
            "SHA-384" | "SHA384" => Ok(Self::Sha384),
            "SHA-512" | "SHA512" => Ok(Self::Sha512),
            "MD2" | "MD5" => Err(VeoError::fatal(
                codes::DIGEST_UNSUPPORTED_ALGORITHM,
                "digest",
                "parse",
                format!("{raw} is explicitly disallowed as a content hash algorithm"),
            )),
            other => Err(VeoError::fatal(
                codes::DIGEST_UNSUPPORTED_ALGORITHM,
                "digest",
                "parse",
                format!("unsupported hash algorithm {other}"),
            )),
        }
    }

    /// The token recorded in `<vers:HashFunctionAlgorithm>`, e.g. `"SHA-256"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// The hash portion of a signature algorithm identifier, e.g. `"SHA256"`
    /// in `SHA256withRSA`.
    pub fn signature_hash_portion(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        }
    }
}

/// Stream `path` through `algo` in fixed-size chunks and return the raw
/// digest bytes.
pub fn hash_file(path: &Path, algo: HashAlgorithm) -> Result<Vec<u8>, VeoError> {
    let mut file = File::open(path).map_err(|e| {
        VeoError::recoverable(
            codes::DIGEST_SOURCE_UNREADABLE,
            "digest",
            "hash_file",
            format!("cannot read {}: {e}", path.display()),
        )
    })?;

    macro_rules! stream {
        ($hasher:expr) => {{
            let mut hasher = $hasher;
            let mut buf = [0u8; BUFFER_SIZE];
            loop {
                let n = file.read(&mut buf).map_err(|e| {
                    VeoError::recoverable(
                        codes::DIGEST_SOURCE_UNREADABLE,
                        "digest",
                        "hash_file",
                        format!("read error on {}: {e}", path.display()),
                    )
                })?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            hasher.finalize().to_vec()
        }};
    }

    Ok(match algo {
        HashAlgorithm::Sha1 => stream!(Sha1::new()),
        HashAlgorithm::Sha256 => stream!(Sha256::new()),
        HashAlgorithm::Sha384 => stream!(Sha384::new()),
        HashAlgorithm::Sha512 => stream!(Sha512::new()),
    })
}

/// Digest a whole in-memory buffer (used to hash finished manifests before
/// signing).
pub fn hash_bytes(data: &[u8], algo: HashAlgorithm) -> Vec<u8> {
    match algo {
        HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
        HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn rejects_md5_and_md2() {
        assert!(HashAlgorithm::parse("MD5").is_err());
        assert!(HashAlgorithm::parse("MD2").is_err());
    }

    #[test]
    fn parses_canonical_names_case_insensitively() {
        assert_eq!(HashAlgorithm::parse("sha-256").unwrap(), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::parse("SHA-512").unwrap(), HashAlgorithm::Sha512);
    }

    #[test]
    fn hashes_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.docx");
        std::fs::write(&path, b"abc").unwrap();
        let digest = hash_file(&path, HashAlgorithm::Sha1).unwrap();
        assert_eq!(STANDARD.encode(digest), "qZk+NkcGgWq6PiVxeFDCbJzQ2J0=");
    }

    #[test]
    fn missing_file_is_recoverable() {
        let err = hash_file(Path::new("/nonexistent/does/not/exist"), HashAlgorithm::Sha256)
            .unwrap_err();
        assert_eq!(err.code, codes::DIGEST_SOURCE_UNREADABLE);
    }
}

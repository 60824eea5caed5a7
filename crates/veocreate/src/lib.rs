//! Builds and digitally signs VERS V3 Electronic Objects (VEOs): streaming
//! XML manifests, per-file digests, RSA/DSA/ECDSA signature descriptors,
//! and a tab-separated control script for batch production.

pub mod assembler;
pub mod batch;
pub mod config;
pub mod content_builder;
pub mod digest;
pub mod error;
pub mod history_builder;
pub mod signature_builder;
pub mod signer;
pub mod template;
pub mod xml_writer;

pub use assembler::{AssemblerState, VeoAssembler};
pub use batch::{BatchOptions, BatchReport, SignerLoader, run_batch};
pub use digest::HashAlgorithm;
pub use error::{Severity, VeoError, VeoResult};
pub use signer::{Signer, SigningKeyPair};

//! Optional `veocreate.toml` defaults. CLI flags always win; this file only
//! fills in values the caller didn't pass explicitly.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::digest::HashAlgorithm;
use crate::error::{VeoError, codes};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub hash_algorithm: Option<String>,
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub encoding: Option<String>,
}

impl FileConfig {
    /// Load `veocreate.toml` from `path` if it exists. A missing file is not
    /// an error; a malformed one is.
    pub fn load(path: &Path) -> Result<Self, VeoError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|e| {
            VeoError::fatal(
                codes::CONFIG_UNREADABLE,
                "config",
                "load",
                format!("cannot read {}: {e}", path.display()),
            )
        })?;
        toml::from_str(&text).map_err(|e| {
            VeoError::fatal(
                codes::CONFIG_MALFORMED,
                "config",
                "load",
                format!("cannot parse {}: {e}", path.display()),
            )
        })
    }

    pub fn resolved_hash(&self) -> Result<Option<HashAlgorithm>, VeoError> {
        self.hash_algorithm.as_deref().map(HashAlgorithm::parse).transpose()
    }
}

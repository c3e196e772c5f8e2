// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GroveError, Result};

/// Environment variable naming a YAML configuration file.
pub const CONFIG_ENV: &str = "GROVE_CONFIG";

pub const DEFAULT_CHUNK_SIZE: usize = 50_000;
pub const DEFAULT_SCRATCH_LABEL: &str = "Query results";
pub const DEFAULT_INDEX_COLUMN: &str = "row_index";

/// Session-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroveConfig {
    /// Rows read and filtered per query step.
    pub chunk_size: usize,
    /// Parent directory for the scratch store's private directory.
    pub scratch_dir: Option<PathBuf>,
    /// Where session records are kept between runs.
    pub session_file: Option<PathBuf>,
    /// Label of the scratch store's root in the tree.
    pub scratch_label: String,
    /// Name given to the row-index column when a query asks for one.
    pub index_column: String,
}

impl Default for GroveConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            scratch_dir: None,
            session_file: None,
            scratch_label: DEFAULT_SCRATCH_LABEL.to_string(),
            index_column: DEFAULT_INDEX_COLUMN.to_string(),
        }
    }
}

impl GroveConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: GroveConfig =
            serde_yaml_ng::from_str(text).map_err(|e| GroveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            GroveError::Config(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    /// Load from `GROVE_CONFIG` when set, otherwise defaults.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(GroveError::Config("chunk_size must be at least 1".into()));
        }
        if self.index_column.is_empty() {
            return Err(GroveError::Config("index_column must not be empty".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = GroveConfig::from_yaml("chunk_size: 128\n").expect("parse");
        assert_eq!(config.chunk_size, 128);
        assert_eq!(config.scratch_label, DEFAULT_SCRATCH_LABEL);
        assert_eq!(config.index_column, DEFAULT_INDEX_COLUMN);
    }

    #[test]
    fn test_rejects_unknown_keys_and_zero_chunk() {
        assert!(matches!(
            GroveConfig::from_yaml("chunk_sise: 10\n"),
            Err(GroveError::Config(_))
        ));
        assert!(matches!(
            GroveConfig::from_yaml("chunk_size: 0\n"),
            Err(GroveError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let file = dir.path().join("grove.yaml");
        std::fs::write(&file, "scratch_label: Results\nsession_file: /tmp/s.txt\n")
            .expect("write");
        let config = GroveConfig::load(&file).expect("load");
        assert_eq!(config.scratch_label, "Results");
        assert_eq!(config.session_file, Some(PathBuf::from("/tmp/s.txt")));
    }
}

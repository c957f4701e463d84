//! Store configuration.
//!
//! A `FileDbConfig` can be built directly, loaded from a TOML file, or
//! overlaid with `FILEDB_*` environment variables. Defaults are chosen so
//! that `FileDbConfig::new("name")` is enough for most callers.

use crate::error::FileDbError;
use crate::logging::LoggingConfig;
use crate::store::SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDbConfig {
    /// Store name; also the directory name under `data_dir`.
    pub name: String,

    /// Requested schema version. Opening with a version above the stored one
    /// triggers the bootstrap/upgrade path.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding the backend databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".filedb")
}

impl FileDbConfig {
    pub fn new(name: impl Into<String>) -> Self {
        FileDbConfig {
            name: name.into(),
            version: default_version(),
            data_dir: default_data_dir(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Filesystem path of the backend database for this store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.name)
    }

    /// Load configuration from a file, with `FILEDB_*` environment variables
    /// taking precedence (e.g. `FILEDB_DATA_DIR`, `FILEDB_LOGGING__LEVEL`).
    pub fn load(path: &Path) -> Result<Self, FileDbError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(config::Environment::with_prefix("FILEDB").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_filled_in() {
        let config = FileDbConfig::new("workspace");
        assert_eq!(config.version, SCHEMA_VERSION);
        assert_eq!(config.store_path(), PathBuf::from(".filedb/workspace"));
    }

    #[test]
    fn test_builder_overrides() {
        let config = FileDbConfig::new("ws")
            .with_data_dir("/tmp/stores")
            .with_version(7);
        assert_eq!(config.version, 7);
        assert_eq!(config.store_path(), PathBuf::from("/tmp/stores/ws"));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filedb.toml");
        fs::write(
            &path,
            r#"
name = "workspace"
data_dir = "/var/lib/filedb"

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = FileDbConfig::load(&path).unwrap();
        assert_eq!(config.name, "workspace");
        assert_eq!(config.version, SCHEMA_VERSION);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/filedb"));
        assert_eq!(config.logging.level, "debug");
    }
}

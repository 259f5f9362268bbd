//! Benchmark configuration.
//!
//! A [`BenchConfig`] is built once at startup and handed by reference to
//! every component. Values are layered: built-in defaults, then an optional
//! TOML file, then command-line overrides applied by the binary.

use crate::error::{BenchError, BenchResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/connections-test?sslmode=disable";
pub const DEFAULT_NUM_LOOPS: usize = 1000;
pub const DEFAULT_NUM_TABLES: usize = 50;
pub const DEFAULT_CONNECT_RETRIES: u32 = 5;

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "connramp.toml";

/// Immutable run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    pub database_url: String,
    /// Ramp ceiling, and the number of connections held.
    pub num_loops: usize,
    /// Number of scratch tables the workload fans out over.
    pub num_tables: usize,
    /// Attempts per connection acquisition.
    pub connect_retries: u32,
    /// One uniform draw of backoff is scaled by this.
    pub backoff_unit: Duration,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            num_loops: DEFAULT_NUM_LOOPS,
            num_tables: DEFAULT_NUM_TABLES,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// On-disk shape of `connramp.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub database_url: Option<String>,
    pub num_loops: Option<usize>,
    pub num_tables: Option<usize>,
    pub connect_retries: Option<u32>,
    pub backoff_unit_secs: Option<f64>,
}

impl FileConfig {
    pub fn from_toml(content: &str) -> BenchResult<Self> {
        toml::from_str(content).map_err(|e| BenchError::Config(e.to_string()))
    }
}

impl BenchConfig {
    /// Apply values from a config file on top of `self`.
    pub fn merge_file(mut self, file: FileConfig) -> BenchResult<Self> {
        if let Some(url) = file.database_url {
            self.database_url = url;
        }
        if let Some(loops) = file.num_loops {
            self.num_loops = loops;
        }
        if let Some(tables) = file.num_tables {
            self.num_tables = tables;
        }
        if let Some(retries) = file.connect_retries {
            self.connect_retries = retries;
        }
        if let Some(secs) = file.backoff_unit_secs {
            self.backoff_unit = Duration::try_from_secs_f64(secs).map_err(|e| {
                BenchError::Config(format!("backoff_unit_secs {secs} is not usable: {e}"))
            })?;
        }
        Ok(self)
    }

    /// Check the invariants the ramp driver relies on.
    pub fn validate(&self) -> BenchResult<()> {
        if self.database_url.trim().is_empty() {
            return Err(BenchError::Config("database_url is empty".into()));
        }
        if self.num_loops == 0 {
            return Err(BenchError::Config("num_loops must be at least 1".into()));
        }
        if self.num_tables == 0 {
            return Err(BenchError::Config("num_tables must be at least 1".into()));
        }
        if self.connect_retries == 0 {
            return Err(BenchError::Config(
                "connect_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Locate a config file: an explicit path wins, then `./connramp.toml`,
/// then `<config_dir>/connramp/config.toml`.
///
/// An explicit path that does not exist is an error; the implicit
/// locations are simply skipped.
pub fn find_config_file(explicit: Option<&Path>) -> BenchResult<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(BenchError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let local = Path::new(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok(Some(local.to_path_buf()));
    }

    Ok(dirs::config_dir()
        .map(|dir| dir.join("connramp").join("config.toml"))
        .filter(|path| path.exists()))
}

/// Build the configuration from defaults and an optional file.
pub fn load(explicit: Option<&Path>) -> BenchResult<BenchConfig> {
    let config = BenchConfig::default();
    match find_config_file(explicit)? {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            config.merge_file(FileConfig::from_toml(&content)?)
        }
        None => Ok(config),
    }
}

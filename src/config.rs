use crate::error::{EtlError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Allowed deviation of batch volume from the previous accepted load, in percent.
    pub volume_tolerance_pct: f64,
    /// When true, a volume-consistency breach aborts the batch instead of loading anyway.
    pub volume_check_fatal: bool,
    /// ISO week 53 collapses to week 52 of the same ISO year.
    pub collapse_week_53: bool,
    /// Data-provider tag written into every fact row.
    pub data_provider: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            volume_tolerance_pct: 20.0,
            volume_check_fatal: false,
            collapse_week_53: true,
            data_provider: "COD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: String,
    pub archive_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "cod_store_data.db".to_string(),
            archive_dir: "archive".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads `config.toml` if present, otherwise falls back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Config::default())
        }
    }
}

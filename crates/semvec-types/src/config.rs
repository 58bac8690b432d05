//! Configuration loading for semvec.
//!
//! Layered precedence: built-in defaults -> config file
//! (~/.config/semvec/config.toml) -> explicit file -> SEMVEC_* env vars.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::TypesError;

/// Inference concurrency and model staging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// Maximum concurrent model invocations. The model runtime is not
    /// efficiently reentrant beyond a small fixed parallelism.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// HuggingFace repository for the default model
    #[serde(default = "default_model_repo")]
    pub model_repo: String,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_model_repo() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            model_repo: default_model_repo(),
        }
    }
}

/// RAM disk staging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RamDiskSettings {
    /// Stage model weights onto a tmpfs volume at startup (opt-in).
    #[serde(default)]
    pub enabled: bool,

    /// Mount point for the tmpfs volume
    #[serde(default = "default_ramdisk_path")]
    pub path: String,

    /// Fraction of available physical memory the volume may claim
    #[serde(default = "default_memory_fraction")]
    pub memory_fraction: f64,

    /// Hard ceiling on the volume size in megabytes
    #[serde(default = "default_ceiling_mb")]
    pub ceiling_mb: u64,

    /// Memory that must remain free for the inference workload, in megabytes
    #[serde(default = "default_inference_reserve_mb")]
    pub inference_reserve_mb: u64,
}

fn default_ramdisk_path() -> String {
    "/mnt/semvec-ramdisk".to_string()
}

fn default_memory_fraction() -> f64 {
    0.25
}

fn default_ceiling_mb() -> u64 {
    16_384
}

fn default_inference_reserve_mb() -> u64 {
    2_048
}

impl Default for RamDiskSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_ramdisk_path(),
            memory_fraction: default_memory_fraction(),
            ceiling_mb: default_ceiling_mb(),
            inference_reserve_mb: default_inference_reserve_mb(),
        }
    }
}

impl RamDiskSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.memory_fraction) {
            return Err(format!(
                "memory_fraction must be 0.0-1.0, got {}",
                self.memory_fraction
            ));
        }
        if self.enabled && self.ceiling_mb == 0 {
            return Err("ceiling_mb must be > 0 when ramdisk is enabled".to_string());
        }
        Ok(())
    }
}

/// Search tuning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Fraction of the corpus forwarded from the coarse stage to refinement
    #[serde(default = "default_filter_pct")]
    pub filter_pct: f64,
}

fn default_filter_pct() -> f64 {
    0.02
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            filter_pct: default_filter_pct(),
        }
    }
}

impl SearchSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.filter_pct) {
            return Err(format!("filter_pct must be 0.0-1.0, got {}", self.filter_pct));
        }
        Ok(())
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB embedding store
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory holding model weight files
    #[serde(default = "default_model_dir")]
    pub model_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Inference settings
    #[serde(default)]
    pub inference: InferenceSettings,

    /// RAM disk settings
    #[serde(default)]
    pub ramdisk: RamDiskSettings,

    /// Search settings
    #[serde(default)]
    pub search: SearchSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "semvec")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_model_dir() -> String {
    ProjectDirs::from("", "", "semvec")
        .map(|p| p.cache_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from("./models"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            model_dir: default_model_dir(),
            log_level: default_log_level(),
            inference: InferenceSettings::default(),
            ramdisk: RamDiskSettings::default(),
            search: SearchSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/semvec/config.toml)
    /// 3. Explicit config file (optional)
    /// 4. Environment variables (SEMVEC_*)
    pub fn load(explicit_config_path: Option<&str>) -> Result<Self, TypesError> {
        let config_dir = ProjectDirs::from("", "", "semvec")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("model_dir", default_model_dir())
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| TypesError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = explicit_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: SEMVEC_DB_PATH, SEMVEC_LOG_LEVEL, SEMVEC_SEARCH_FILTER_PCT, ...
        builder = builder.add_source(
            Environment::with_prefix("SEMVEC")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| TypesError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| TypesError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), TypesError> {
        if self.inference.max_concurrent == 0 {
            return Err(TypesError::Config(
                "inference.max_concurrent must be > 0".to_string(),
            ));
        }
        self.ramdisk.validate().map_err(TypesError::Config)?;
        self.search.validate().map_err(TypesError::Config)?;
        Ok(())
    }

    /// Expand ~ in db_path to the actual home directory.
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Expand ~ in model_dir to the actual home directory.
    pub fn expanded_model_dir(&self) -> PathBuf {
        expand_home(&self.model_dir)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

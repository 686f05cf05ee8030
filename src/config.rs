use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub rewrite: RewriteConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Directory under which each run's scratch directory is created
    /// (system temp dir when unset)
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,

    /// Name prefix for scratch directories and temp files
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scratch_root: None,
            temp_prefix: default_temp_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteConfig {
    /// Record observed sequence sub-ranges per stream
    #[serde(default = "default_true")]
    pub track_flow_ranges: bool,

    /// Take a stream's initial sequence number from its SYN / SYN-ACK
    #[serde(default = "default_true")]
    pub learn_isn_from_syn: bool,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            track_flow_ranges: true,
            learn_isn_from_syn: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Write the mask table diagnostic export
    #[serde(default)]
    pub enabled: bool,

    /// Export destination (defaults to `mask_table.json` in the output dir)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_temp_prefix() -> String {
    "seqmask-".to_string()
}

fn default_true() -> bool {
    true
}

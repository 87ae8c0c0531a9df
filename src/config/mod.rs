//! Configuration management for cisage
//!
//! Handles loading, validation, and environment overrides for the
//! signature-learning engine's tunable policies (matching thresholds,
//! confidence recomputation, storage layout, analysis provider).

use crate::error::{Result, CisageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub extractor: ExtractorConfig,
    pub matcher: MatcherConfig,
    pub confidence: ConfidenceConfig,
    pub analysis: AnalysisConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub patterns: PatternsConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Evidence blobs at or above this size are zstd-compressed
    pub compression_threshold: usize,
}

/// Signature extractor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Upper bound on the feature set used for fuzzy comparison
    pub max_features: usize,
    /// Upper bound on salient lines folded into the fingerprint
    pub max_salient_lines: usize,
    /// Stack frames kept per trace
    pub max_stack_frames: usize,
}

/// Matcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Similarity metric: "dice" or "jaccard"
    pub metric: String,
    /// Minimum fuzzy similarity for a match, in (0, 1]
    pub fuzzy_threshold: f64,
    /// Candidate cap after inverted-index pruning
    pub max_candidates: usize,
}

/// Confidence recomputation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// Confidence never drops below this floor
    pub floor: f64,
    /// Fraction of remaining headroom gained per resolved outcome
    pub success_gain: f64,
    /// Fraction of current confidence lost per unresolved outcome
    pub failure_penalty: f64,
}

/// AI analysis provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub enabled: bool,
    pub provider: String,
    pub api_key_env: String,
    pub model: String,
    /// Logs are truncated to this many characters before analysis
    pub max_log_chars: usize,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub buffer_size: usize,
    pub flush_interval_secs: u64,
}

/// Pattern configuration - optional path to a pattern definition file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternsConfig {
    /// When unset, the built-in pattern set is used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CisageError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CisageError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load from the default path, falling back to defaults when absent
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            let mut config = Self::default();
            config.apply_env_overrides();
            ConfigValidator::validate(&config)?;
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CisageError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| CisageError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: CISAGE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("CISAGE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "MATCHER__FUZZY_THRESHOLD" => {
                self.matcher.fuzzy_threshold =
                    value.parse().map_err(|_| CisageError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as float", value),
                    })?;
            }
            "MATCHER__METRIC" => {
                self.matcher.metric = value.to_string();
            }
            "ANALYSIS__ENABLED" => {
                self.analysis.enabled =
                    value.parse().map_err(|_| CisageError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "ANALYSIS__MODEL" => {
                self.analysis.model = value.to_string();
            }
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CisageError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("cisage").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| CisageError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".cisage"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.cisage"),
                compression_threshold: 1024,
            },
            extractor: ExtractorConfig {
                max_features: 10,
                max_salient_lines: 40,
                max_stack_frames: 5,
            },
            matcher: MatcherConfig {
                metric: "dice".to_string(),
                fuzzy_threshold: 0.7,
                max_candidates: 256,
            },
            confidence: ConfidenceConfig {
                floor: 0.05,
                success_gain: 0.2,
                failure_penalty: 0.3,
            },
            analysis: AnalysisConfig {
                enabled: false,
                provider: "anthropic".to_string(),
                api_key_env: "ANTHROPIC_API_KEY".to_string(),
                model: "claude-3-sonnet".to_string(),
                max_log_chars: 30_000,
            },
            pipeline: PipelineConfig {
                buffer_size: 1024,
                flush_interval_secs: 5,
            },
            patterns: PatternsConfig::default(),
        }
    }
}

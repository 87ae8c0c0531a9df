use crate::config::Config;
use crate::error::{Result, ValidationError, CisageError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_extractor(config, &mut errors);
        Self::validate_matcher(config, &mut errors);
        Self::validate_confidence(config, &mut errors);
        Self::validate_analysis(config, &mut errors);
        Self::validate_pipeline(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CisageError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory path cannot be empty",
            ));
        }
    }

    fn validate_extractor(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.extractor.max_features == 0 {
            errors.push(ValidationError::new(
                "extractor.max_features",
                "Feature cap must be greater than 0",
            ));
        }

        if config.extractor.max_salient_lines == 0 {
            errors.push(ValidationError::new(
                "extractor.max_salient_lines",
                "Salient line cap must be greater than 0",
            ));
        }
    }

    fn validate_matcher(config: &Config, errors: &mut Vec<ValidationError>) {
        let metric = &config.matcher.metric;
        let valid_metrics = ["dice", "jaccard"];
        if !valid_metrics.contains(&metric.as_str()) {
            errors.push(ValidationError::new(
                "matcher.metric",
                format!("Metric must be one of {:?}, got '{}'", valid_metrics, metric),
            ));
        }

        let threshold = config.matcher.fuzzy_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            errors.push(ValidationError::new(
                "matcher.fuzzy_threshold",
                format!("Threshold must be in (0.0, 1.0], got {}", threshold),
            ));
        }

        if config.matcher.max_candidates == 0 {
            errors.push(ValidationError::new(
                "matcher.max_candidates",
                "Candidate cap must be greater than 0",
            ));
        }
    }

    fn validate_confidence(config: &Config, errors: &mut Vec<ValidationError>) {
        let floor = config.confidence.floor;
        if !(0.0..1.0).contains(&floor) {
            errors.push(ValidationError::new(
                "confidence.floor",
                format!("Floor must be in [0.0, 1.0), got {}", floor),
            ));
        }

        let gain = config.confidence.success_gain;
        if !(gain > 0.0 && gain <= 1.0) {
            errors.push(ValidationError::new(
                "confidence.success_gain",
                format!("Success gain must be in (0.0, 1.0], got {}", gain),
            ));
        }

        let penalty = config.confidence.failure_penalty;
        if !(penalty > 0.0 && penalty <= 1.0) {
            errors.push(ValidationError::new(
                "confidence.failure_penalty",
                format!("Failure penalty must be in (0.0, 1.0], got {}", penalty),
            ));
        }
    }

    fn validate_analysis(config: &Config, errors: &mut Vec<ValidationError>) {
        // If analysis is enabled, the API key environment variable must be set
        if config.analysis.enabled {
            let env_var = &config.analysis.api_key_env;
            if let Ok(key) = std::env::var(env_var) {
                if key.is_empty() {
                    errors.push(ValidationError::new(
                        "analysis.api_key_env",
                        format!("Environment variable {} is empty", env_var),
                    ));
                }
            } else {
                errors.push(ValidationError::new(
                    "analysis.api_key_env",
                    format!("Environment variable {} is not set", env_var),
                ));
            }
        }

        let provider = &config.analysis.provider;
        let valid_providers = ["anthropic", "openai", "fallback"];
        if !valid_providers.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "analysis.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        if config.analysis.max_log_chars == 0 {
            errors.push(ValidationError::new(
                "analysis.max_log_chars",
                "Log character cap must be greater than 0",
            ));
        }
    }

    fn validate_pipeline(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.pipeline.buffer_size == 0 {
            errors.push(ValidationError::new(
                "pipeline.buffer_size",
                "Buffer size must be greater than 0",
            ));
        }

        if config.pipeline.flush_interval_secs == 0 {
            errors.push(ValidationError::new(
                "pipeline.flush_interval_secs",
                "Flush interval must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_metric() {
        let mut config = Config::default();
        config.matcher.metric = "cosine".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_threshold() {
        let mut config = Config::default();
        config.matcher.fuzzy_threshold = 1.5;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_errors_accumulate() {
        let mut config = Config::default();
        config.matcher.metric = "cosine".to_string();
        config.matcher.fuzzy_threshold = 0.0;
        config.extractor.max_features = 0;

        match ConfigValidator::validate(&config) {
            Err(CisageError::ConfigValidation { errors }) => {
                assert_eq!(errors.len(), 3);
            }
            other => panic!("Expected validation failure, got {:?}", other.map(|_| ())),
        }
    }
}

//! AI analysis boundary
//!
//! The root-cause analysis call is an external collaborator: this module
//! defines the trait the learning coordinator consumes, the structured
//! verdict it returns, and a fallback provider for running without one.
//! A real LLM-backed provider is supplied by the embedding application.

use crate::store::RemediationEvent;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider not available: {0}")]
    Unavailable(String),

    #[error("Invalid verdict: {0}")]
    InvalidVerdict(String),
}

/// Structured verdict produced by a root-cause analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiVerdict {
    pub root_cause: String,
    pub remediation_steps: Vec<String>,
    /// Coarse category the analysis assigned, when any
    pub error_class: Option<String>,
    /// Self-reported confidence in [0.0, 1.0]
    pub confidence: f64,
}

impl AiVerdict {
    /// Clamp and backfill a verdict so downstream code can rely on it
    pub fn sanitized(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        if self.root_cause.is_empty() {
            self.root_cause = "Unknown failure".to_string();
        }
        if self.remediation_steps.is_empty() {
            self.remediation_steps = vec!["Review the workflow logs manually".to_string()];
        }
        self
    }
}

/// Context handed to the analysis provider alongside the raw log
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub repository: Option<String>,
    pub workflow: Option<String>,
    pub conclusion: Option<String>,
    /// Remediations that worked before for similar failures, most recent
    /// last
    pub prior_remediations: Vec<RemediationEvent>,
}

/// Trait for root-cause analysis providers
///
/// Allows abstraction over different analysis backends (LLM APIs, rule
/// engines, a scripted stub in tests).
pub trait AnalysisProvider: Send + Sync {
    /// Analyze a failure log and produce a structured verdict
    fn analyze(&self, raw_log: &str, context: &AnalysisContext)
        -> Result<AiVerdict, AnalysisError>;

    /// Get the provider name
    fn name(&self) -> &str;
}

/// Fallback provider used when no external analysis is configured
///
/// Produces the low-confidence manual-review verdict so the pipeline and
/// the learning statistics stay intact without an LLM.
pub struct FallbackAnalyzer;

impl AnalysisProvider for FallbackAnalyzer {
    fn analyze(
        &self,
        _raw_log: &str,
        _context: &AnalysisContext,
    ) -> Result<AiVerdict, AnalysisError> {
        Ok(AiVerdict {
            root_cause: "Automated analysis unavailable".to_string(),
            remediation_steps: vec![
                "Review the workflow logs manually".to_string(),
                "Check the workflow configuration".to_string(),
            ],
            error_class: None,
            confidence: 0.1,
        })
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

/// Resolve the provider named in the configuration
///
/// External providers (anthropic, openai) are integrated by the embedding
/// application through the trait; asking this crate for one is an error.
pub fn provider_from_config(
    config: &crate::config::AnalysisConfig,
) -> Result<Box<dyn AnalysisProvider>, AnalysisError> {
    if !config.enabled {
        return Ok(Box::new(FallbackAnalyzer));
    }

    match config.provider.as_str() {
        "fallback" => Ok(Box::new(FallbackAnalyzer)),
        other => Err(AnalysisError::Unavailable(format!(
            "provider '{}' must be supplied by the embedding application",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_verdict() {
        let provider = FallbackAnalyzer;
        let verdict = provider
            .analyze("some log", &AnalysisContext::default())
            .unwrap();

        assert!(verdict.confidence < 0.5);
        assert!(!verdict.remediation_steps.is_empty());
    }

    #[test]
    fn test_sanitize_clamps_confidence() {
        let verdict = AiVerdict {
            root_cause: "x".to_string(),
            remediation_steps: vec!["y".to_string()],
            error_class: None,
            confidence: 3.5,
        }
        .sanitized();

        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn test_sanitize_backfills_empty_verdict() {
        let verdict = AiVerdict {
            root_cause: String::new(),
            remediation_steps: vec![],
            error_class: None,
            confidence: -0.2,
        }
        .sanitized();

        assert_eq!(verdict.confidence, 0.0);
        assert!(!verdict.root_cause.is_empty());
        assert!(!verdict.remediation_steps.is_empty());
    }

    #[test]
    fn test_provider_factory() {
        let mut config = crate::config::Config::default().analysis;
        assert_eq!(provider_from_config(&config).unwrap().name(), "fallback");

        config.enabled = true;
        config.provider = "anthropic".to_string();
        assert!(provider_from_config(&config).is_err());
    }
}

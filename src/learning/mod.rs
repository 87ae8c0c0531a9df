//! Learning coordinator
//!
//! Orchestrates one failure-analysis request end to end: normalize the
//! raw log, extract a signature draft, match it against the store, then
//! either reuse the stored remediation (known) or call the external
//! analysis and register a new signature (novel). Exactly one store
//! upsert happens per call, on either branch.

use crate::analysis::{AiVerdict, AnalysisContext, AnalysisProvider};
use crate::config::Config;
use crate::error::{Result, CisageError};
use crate::matcher::{MatchKind, MatchResult, Matcher};
use crate::normalize::LogNormalizer;
use crate::patterns::PatternRegistry;
use crate::signature::SignatureExtractor;
use crate::store::{
    AnalysisRecord, ErrorSignature, NewRemediation, RemediationEvent, RemediationSource,
    StoreManager,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// The known/novel decision, as an explicit tagged result
#[derive(Debug, Clone)]
pub enum Disposition {
    /// The failure matched a stored signature; its remediation is reused
    Known {
        /// Most recent stored remediation proposal, when the signature
        /// has one
        remediation: Option<RemediationEvent>,
    },
    /// Nothing matched; a fresh analysis verdict was produced and stored
    Novel { verdict: AiVerdict },
}

impl Disposition {
    pub fn is_novel(&self) -> bool {
        matches!(self, Disposition::Novel { .. })
    }
}

/// Result of processing one failure log
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub run_id: Uuid,
    pub signature: ErrorSignature,
    pub match_result: MatchResult,
    pub disposition: Disposition,
    /// The raw log could not be normalized; the outcome is based on a
    /// degenerate empty signature
    pub degraded: bool,
}

impl ProcessOutcome {
    pub fn is_novel(&self) -> bool {
        self.disposition.is_novel()
    }
}

/// Coordinates normalizer, extractor, matcher, and store for one request
/// at a time; safe to share across concurrent requests
pub struct LearningCoordinator {
    normalizer: LogNormalizer,
    extractor: SignatureExtractor,
    matcher: Matcher,
    store: Arc<StoreManager>,
    max_log_chars: usize,
}

impl LearningCoordinator {
    /// Build a coordinator from configuration and a shared store
    pub fn new(config: &Config, store: Arc<StoreManager>) -> Result<Self> {
        let registry = match &config.patterns.file {
            Some(path) => PatternRegistry::from_config_file(path)?,
            None => PatternRegistry::builtin()?,
        };
        let registry = Arc::new(registry);

        Ok(Self {
            normalizer: LogNormalizer::new(registry.clone()),
            extractor: SignatureExtractor::new(registry, config.extractor.clone()),
            matcher: Matcher::from_config(&config.matcher)?,
            store,
            max_log_chars: config.analysis.max_log_chars,
        })
    }

    /// Process one raw failure log
    ///
    /// Store faults abort this call; analysis faults abort only the novel
    /// branch. Normalization and extraction never fail.
    pub fn process(
        &self,
        raw_log: &str,
        ctx: &AnalysisContext,
        analyzer: &dyn AnalysisProvider,
    ) -> Result<ProcessOutcome> {
        let run_id = Uuid::new_v4();

        let normalized = self.normalizer.normalize(raw_log);
        if normalized.degraded {
            tracing::warn!(%run_id, "Log could not be normalized, continuing degraded");
        }

        let draft = self.extractor.extract(&normalized);
        let match_result = self.matcher.match_draft(&draft, &self.store.signatures)?;

        let (signature, disposition) = match match_result.kind {
            MatchKind::Exact | MatchKind::Fuzzy => {
                let fingerprint = match_result.fingerprint.clone().ok_or_else(|| {
                    CisageError::Store("Match result carries no fingerprint".to_string())
                })?;

                // Bump occurrence and recency only; history records
                // proposals and feedback, not sightings
                let signature = self.store.signatures.upsert(
                    &fingerprint,
                    &draft.features,
                    draft.error_class.as_deref(),
                    None,
                    None,
                )?;

                let remediation = signature.latest_remediation().cloned();
                (signature, Disposition::Known { remediation })
            }
            MatchKind::None => {
                // Hand the analysis what has worked before for this class
                let mut ctx = ctx.clone();
                if let Some(class) = &draft.error_class {
                    ctx.prior_remediations =
                        self.store
                            .signatures
                            .successful_remediations(class, 0.5, 3)?;
                }

                let verdict = analyzer
                    .analyze(truncate_chars(raw_log, self.max_log_chars), &ctx)?
                    .sanitized();

                let (evidence_hash, _, _) = self.store.evidence.write(raw_log.as_bytes())?;

                let outcome = NewRemediation {
                    root_cause: verdict.root_cause.clone(),
                    steps: verdict.remediation_steps.clone(),
                    source: RemediationSource::Analysis,
                    reported_confidence: Some(verdict.confidence),
                    resolved: None,
                };

                let error_class = draft
                    .error_class
                    .clone()
                    .or_else(|| verdict.error_class.clone());

                let signature = self.store.signatures.upsert(
                    &draft.fingerprint,
                    &draft.features,
                    error_class.as_deref(),
                    Some(outcome),
                    Some(&evidence_hash),
                )?;

                (signature, Disposition::Novel { verdict })
            }
        };

        self.store.signatures.insert_analysis(&AnalysisRecord {
            run_id: run_id.to_string(),
            repository: ctx.repository.clone(),
            workflow: ctx.workflow.clone(),
            fingerprint: signature.fingerprint.clone(),
            disposition: disposition_label(&match_result).to_string(),
            score: match_result.score,
            created_at: Utc::now(),
        })?;

        tracing::info!(
            %run_id,
            fingerprint = %signature.fingerprint,
            kind = match_result.kind.as_str(),
            score = match_result.score,
            occurrences = signature.occurrence_count,
            "Processed failure log"
        );

        Ok(ProcessOutcome {
            run_id,
            signature,
            match_result,
            disposition,
            degraded: normalized.degraded,
        })
    }

    /// Record operator feedback on a stored remediation
    pub fn record_feedback(
        &self,
        fingerprint: &str,
        resolved: bool,
        notes: Option<&str>,
    ) -> Result<ErrorSignature> {
        self.store
            .signatures
            .record_feedback(fingerprint, resolved, notes)
    }

    /// Shared store handle
    pub fn store(&self) -> &StoreManager {
        &self.store
    }
}

fn disposition_label(match_result: &MatchResult) -> &'static str {
    match match_result.kind {
        MatchKind::Exact => "known_exact",
        MatchKind::Fuzzy => "known_fuzzy",
        MatchKind::None => "novel",
    }
}

/// Truncate on a char boundary
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Test provider that counts invocations
    struct CountingAnalyzer {
        calls: AtomicUsize,
    }

    impl CountingAnalyzer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AnalysisProvider for CountingAnalyzer {
        fn analyze(
            &self,
            _raw_log: &str,
            _context: &AnalysisContext,
        ) -> std::result::Result<AiVerdict, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AiVerdict {
                root_cause: "flaky dependency mirror".to_string(),
                remediation_steps: vec!["retry with the primary registry".to_string()],
                error_class: Some("dependency".to_string()),
                confidence: 0.8,
            })
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn coordinator() -> (TempDir, LearningCoordinator) {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::default();
        let store = Arc::new(
            StoreManager::new(
                temp_dir.path().to_path_buf(),
                config.storage.compression_threshold,
                config.confidence.clone(),
            )
            .unwrap(),
        );
        let coordinator = LearningCoordinator::new(&config, store).unwrap();
        (temp_dir, coordinator)
    }

    #[test]
    fn test_novel_then_known() {
        let (_dir, coordinator) = coordinator();
        let analyzer = CountingAnalyzer::new();
        let ctx = AnalysisContext::default();

        let raw = "##[error]NullPointerException in step X";

        let first = coordinator.process(raw, &ctx, &analyzer).unwrap();
        assert!(first.is_novel());
        assert_eq!(first.signature.occurrence_count, 1);
        assert_eq!(analyzer.call_count(), 1);

        let second = coordinator.process(raw, &ctx, &analyzer).unwrap();
        assert!(!second.is_novel());
        assert_eq!(second.match_result.kind, MatchKind::Exact);
        assert_eq!(second.signature.occurrence_count, 2);
        // Known branch reuses the stored verdict, no new analysis call
        assert_eq!(analyzer.call_count(), 1);
    }

    #[test]
    fn test_known_branch_reuses_remediation() {
        let (_dir, coordinator) = coordinator();
        let analyzer = CountingAnalyzer::new();
        let ctx = AnalysisContext::default();

        let raw = "##[error]connection refused: registry";
        coordinator.process(raw, &ctx, &analyzer).unwrap();
        let outcome = coordinator.process(raw, &ctx, &analyzer).unwrap();

        match outcome.disposition {
            Disposition::Known { remediation } => {
                let event = remediation.expect("stored remediation");
                assert_eq!(event.root_cause, "flaky dependency mirror");
            }
            Disposition::Novel { .. } => panic!("expected known disposition"),
        }
    }

    #[test]
    fn test_degraded_log_flows_through() {
        let (_dir, coordinator) = coordinator();
        let analyzer = CountingAnalyzer::new();

        let outcome = coordinator
            .process("PK\u{3}\u{4}\0\0binary", &AnalysisContext::default(), &analyzer)
            .unwrap();

        assert!(outcome.degraded);
        assert!(outcome.is_novel());
        assert_eq!(outcome.signature.occurrence_count, 1);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}

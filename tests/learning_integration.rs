//! End-to-end learning scenarios: normalize -> extract -> match -> store

use cisage::analysis::{AiVerdict, AnalysisContext, AnalysisError, AnalysisProvider};
use cisage::config::Config;
use cisage::learning::{Disposition, LearningCoordinator};
use cisage::matcher::MatchKind;
use cisage::store::StoreManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Scripted provider that counts how often the novel branch invokes it
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
    ) -> Result<AiVerdict, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AiVerdict {
            root_cause: "null dereference in deploy step".to_string(),
            remediation_steps: vec![
                "Guard the deploy target lookup".to_string(),
                "Re-run the workflow".to_string(),
            ],
            error_class: None,
            confidence: 0.85,
        })
    }

    fn name(&self) -> &str {
        "counting"
    }
}

fn setup() -> (TempDir, LearningCoordinator, Arc<StoreManager>) {
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
    let coordinator = LearningCoordinator::new(&config, store.clone()).unwrap();
    (temp_dir, coordinator, store)
}

#[test]
fn scenario_novel_log_registers_signature() {
    let (_dir, coordinator, store) = setup();
    let analyzer = CountingAnalyzer::new();
    let ctx = AnalysisContext::default();

    let outcome = coordinator
        .process("NullPointerException in step X", &ctx, &analyzer)
        .unwrap();

    assert!(outcome.is_novel());
    assert_eq!(outcome.match_result.kind, MatchKind::None);
    assert_eq!(outcome.signature.occurrence_count, 1);
    assert_eq!(analyzer.call_count(), 1);

    let stats = store.stats().unwrap();
    assert_eq!(stats.signature_count, 1);
}

#[test]
fn scenario_recurrence_is_exact_without_new_analysis() {
    let (_dir, coordinator, store) = setup();
    let analyzer = CountingAnalyzer::new();
    let ctx = AnalysisContext::default();

    let raw = "NullPointerException in step X";
    coordinator.process(raw, &ctx, &analyzer).unwrap();
    let second = coordinator.process(raw, &ctx, &analyzer).unwrap();

    assert!(!second.is_novel());
    assert_eq!(second.match_result.kind, MatchKind::Exact);
    assert!((second.match_result.score - 1.0).abs() < 1e-9);
    assert_eq!(second.signature.occurrence_count, 2);

    // The cost-saving behavior the learning system exists for
    assert_eq!(analyzer.call_count(), 1);

    let stats = store.stats().unwrap();
    assert_eq!(stats.signature_count, 1);
    assert_eq!(stats.analysis_count, 2);
}

#[test]
fn scenario_noise_variants_match_exactly() {
    let (_dir, coordinator, _store) = setup();
    let analyzer = CountingAnalyzer::new();
    let ctx = AnalysisContext::default();

    let a = "2024-03-01T10:00:00.000Z ##[error]TimeoutException in step deploy at /home/runner/work/app/deploy.sh";
    let b = "2025-12-24T23:59:59.999Z ##[error]TimeoutException in step deploy at /tmp/agent-7/work/app/deploy.sh";

    let first = coordinator.process(a, &ctx, &analyzer).unwrap();
    let second = coordinator.process(b, &ctx, &analyzer).unwrap();

    assert_eq!(second.match_result.kind, MatchKind::Exact);
    assert_eq!(first.signature.fingerprint, second.signature.fingerprint);
    assert_eq!(second.signature.occurrence_count, 2);
    assert_eq!(analyzer.call_count(), 1);
}

#[test]
fn scenario_similar_trace_matches_fuzzily() {
    let (_dir, coordinator, _store) = setup();
    let analyzer = CountingAnalyzer::new();
    let ctx = AnalysisContext::default();

    // Ten distinct salient lines; the second log shares eight of them
    let base: Vec<String> = (0..10)
        .map(|i| format!("##[error]failure mode alpha{}", i))
        .collect();
    let log_a = base.join("\n");

    let mut variant = base[..8].to_vec();
    variant.push("##[error]failure mode beta0".to_string());
    variant.push("##[error]failure mode beta1".to_string());
    let log_b = variant.join("\n");

    let first = coordinator.process(&log_a, &ctx, &analyzer).unwrap();
    assert!(first.is_novel());

    let second = coordinator.process(&log_b, &ctx, &analyzer).unwrap();

    assert_eq!(second.match_result.kind, MatchKind::Fuzzy);
    assert!((second.match_result.score - 0.8).abs() < 1e-6);
    assert_eq!(
        second.match_result.fingerprint.as_deref(),
        Some(first.signature.fingerprint.as_str())
    );

    // Reuses the prior remediation instead of re-analyzing
    assert_eq!(analyzer.call_count(), 1);
    match second.disposition {
        Disposition::Known { remediation } => {
            let event = remediation.expect("stored remediation");
            assert_eq!(event.root_cause, "null dereference in deploy step");
        }
        Disposition::Novel { .. } => panic!("expected known disposition"),
    }
}

#[test]
fn different_root_causes_stay_separate() {
    let (_dir, coordinator, store) = setup();
    let analyzer = CountingAnalyzer::new();
    let ctx = AnalysisContext::default();

    coordinator
        .process("##[error]OutOfMemoryError in step test", &ctx, &analyzer)
        .unwrap();
    let second = coordinator
        .process("##[error]permission denied: /etc/hosts", &ctx, &analyzer)
        .unwrap();

    assert!(second.is_novel());
    assert_eq!(store.stats().unwrap().signature_count, 2);
    assert_eq!(analyzer.call_count(), 2);
}

#[test]
fn feedback_moves_confidence_monotonically() {
    let (_dir, coordinator, store) = setup();
    let analyzer = CountingAnalyzer::new();
    let ctx = AnalysisContext::default();

    let outcome = coordinator
        .process("##[error]flaky integration test", &ctx, &analyzer)
        .unwrap();
    let fingerprint = outcome.signature.fingerprint.clone();
    let initial = outcome.signature.confidence;

    let after_success = store
        .signatures
        .record_feedback(&fingerprint, true, None)
        .unwrap();
    assert!(after_success.confidence >= initial);

    let after_failure = store
        .signatures
        .record_feedback(&fingerprint, false, Some("recurred after fix"))
        .unwrap();
    assert!(after_failure.confidence <= after_success.confidence);
    assert!(after_failure.confidence >= 0.05);

    // History is append-only: analysis entry plus both feedback entries
    assert_eq!(after_failure.remediation_history.len(), 3);
}

#[test]
fn evidence_blob_round_trips() {
    let (_dir, coordinator, store) = setup();
    let analyzer = CountingAnalyzer::new();
    let ctx = AnalysisContext::default();

    let raw = "##[error]disk quota exceeded while caching toolchain";
    let outcome = coordinator.process(raw, &ctx, &analyzer).unwrap();

    let hash = outcome.signature.evidence_hash.expect("evidence stored");
    let stored = store.evidence.read(&hash).unwrap();
    assert_eq!(stored, raw.as_bytes());
}

#[test]
fn journal_records_every_process_call() {
    let (_dir, coordinator, store) = setup();
    let analyzer = CountingAnalyzer::new();
    let ctx = AnalysisContext {
        repository: Some("octo/app".to_string()),
        workflow: Some("ci".to_string()),
        conclusion: Some("failure".to_string()),
        prior_remediations: Vec::new(),
    };

    let raw = "##[error]assertion failed: expected 2, found 3";
    coordinator.process(raw, &ctx, &analyzer).unwrap();
    coordinator.process(raw, &ctx, &analyzer).unwrap();

    let records = store
        .signatures
        .recent_analyses(Some("octo/app"), 10)
        .unwrap();
    assert_eq!(records.len(), 2);

    let dispositions: Vec<&str> = records.iter().map(|r| r.disposition.as_str()).collect();
    assert!(dispositions.contains(&"novel"));
    assert!(dispositions.contains(&"known_exact"));
}

#[test]
fn degraded_input_flows_end_to_end() {
    let (_dir, coordinator, store) = setup();
    let analyzer = CountingAnalyzer::new();
    let ctx = AnalysisContext::default();

    let outcome = coordinator
        .process("\u{1}\u{2}\0\u{3}garbled", &ctx, &analyzer)
        .unwrap();

    assert!(outcome.degraded);
    assert_eq!(outcome.signature.occurrence_count, 1);
    assert_eq!(store.stats().unwrap().signature_count, 1);

    // Repeated binary garbage converges on the same degenerate signature
    let again = coordinator
        .process("\u{4}\0\u{5}different garbage", &ctx, &analyzer)
        .unwrap();
    assert_eq!(again.signature.fingerprint, outcome.signature.fingerprint);
    assert_eq!(again.signature.occurrence_count, 2);
}

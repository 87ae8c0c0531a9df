//! Concurrency properties of the signature store
//!
//! Concurrent upserts for the same fingerprint must compose: no lost
//! occurrence increments, no lost history entries. Upserts for different
//! fingerprints must proceed independently.

use cisage::config::ConfidenceConfig;
use cisage::store::{NewRemediation, RemediationSource, SignatureStore};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn test_store(temp_dir: &TempDir) -> Arc<SignatureStore> {
    let db_path = temp_dir.path().join("test.db");
    Arc::new(
        SignatureStore::new(
            &db_path,
            ConfidenceConfig {
                floor: 0.05,
                success_gain: 0.2,
                failure_penalty: 0.3,
            },
        )
        .unwrap(),
    )
}

fn verdict(tag: usize) -> NewRemediation {
    NewRemediation {
        root_cause: format!("root cause variant {}", tag),
        steps: vec![format!("step for variant {}", tag)],
        source: RemediationSource::Analysis,
        reported_confidence: Some(0.7),
        resolved: None,
    }
}

#[test]
fn concurrent_upserts_same_fingerprint_compose() {
    const WRITERS: usize = 16;

    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    let features: Vec<String> = vec!["err:shared failure".to_string()];

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = store.clone();
            let features = features.clone();
            thread::spawn(move || {
                store
                    .upsert("shared-fp", &features, None, Some(verdict(i)), None)
                    .unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let signature = store.get("shared-fp").unwrap().unwrap();

    // No lost increments
    assert_eq!(signature.occurrence_count, WRITERS as u64);

    // Exactly one history entry per upsert, in a valid interleaving:
    // sequence numbers are dense and strictly increasing
    assert_eq!(signature.remediation_history.len(), WRITERS);
    for (i, event) in signature.remediation_history.iter().enumerate() {
        assert_eq!(event.seq, i as u64 + 1);
    }

    // Every writer's entry made it in
    let mut causes: Vec<&str> = signature
        .remediation_history
        .iter()
        .map(|e| e.root_cause.as_str())
        .collect();
    causes.sort();
    causes.dedup();
    assert_eq!(causes.len(), WRITERS);
}

#[test]
fn concurrent_upserts_different_fingerprints_are_independent() {
    const KEYS: usize = 8;

    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);

    let handles: Vec<_> = (0..KEYS)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                let fingerprint = format!("fp-{}", i);
                let features = vec![format!("err:failure {}", i)];
                for _ in 0..4 {
                    store
                        .upsert(&fingerprint, &features, None, Some(verdict(i)), None)
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let signatures = store.all().unwrap();
    assert_eq!(signatures.len(), KEYS);
    for signature in signatures {
        assert_eq!(signature.occurrence_count, 4);
        assert_eq!(signature.remediation_history.len(), 4);
    }
}

#[test]
fn concurrent_feedback_and_upserts_keep_history_consistent() {
    let temp_dir = TempDir::new().unwrap();
    let store = test_store(&temp_dir);
    let features = vec!["err:flaky".to_string()];

    store
        .upsert("fp", &features, None, Some(verdict(0)), None)
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let features = features.clone();
            thread::spawn(move || {
                if i % 2 == 0 {
                    store.upsert("fp", &features, None, None, None).unwrap();
                } else {
                    store.record_feedback("fp", i % 4 == 1, None).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let signature = store.get("fp").unwrap().unwrap();

    // 1 initial + 4 bump-only upserts
    assert_eq!(signature.occurrence_count, 5);
    // 1 analysis entry + 4 feedback entries
    assert_eq!(signature.remediation_history.len(), 5);
    // Confidence stays inside the contract bounds
    assert!(signature.confidence >= 0.05);
    assert!(signature.confidence <= 1.0);
}

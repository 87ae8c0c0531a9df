//! Signature store
//!
//! Persistent, fingerprint-keyed knowledge base of error signatures with
//! occurrence counts, an append-only remediation history, and a derived
//! confidence score. Backed by SQLite plus a content-addressed evidence
//! area for the raw logs signatures were learned from.

pub mod database;
pub mod evidence;

use crate::config::ConfidenceConfig;
use crate::error::{Result, CisageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use database::{SignatureStore, StoreStats};
pub use evidence::EvidenceStore;

/// A persisted error signature
///
/// Owned exclusively by the store; other components hold read-only copies
/// scoped to a single analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSignature {
    /// Stable content hash, the store's primary key
    pub fingerprint: String,
    /// Ordered salient tokens used for fuzzy comparison
    pub features: Vec<String>,
    /// Coarse error category, when detected
    pub error_class: Option<String>,
    /// Times this fingerprint has been seen; at least 1 once persisted
    pub occurrence_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Append-only audit trail, oldest first
    pub remediation_history: Vec<RemediationEvent>,
    /// Derived reliability score in [floor, 1.0]; recomputed, never set
    pub confidence: f64,
    /// Content address of the raw log this signature was learned from
    pub evidence_hash: Option<String>,
}

impl ErrorSignature {
    /// Most recent remediation proposal, if any
    pub fn latest_remediation(&self) -> Option<&RemediationEvent> {
        self.remediation_history
            .iter()
            .rev()
            .find(|e| e.source == RemediationSource::Analysis)
    }
}

/// Where a remediation history entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemediationSource {
    /// Produced by the AI analysis collaborator on the novel branch
    Analysis,
    /// Recorded by an operator reporting remediation effectiveness
    Feedback,
}

impl RemediationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationSource::Analysis => "analysis",
            RemediationSource::Feedback => "feedback",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "analysis" => Ok(RemediationSource::Analysis),
            "feedback" => Ok(RemediationSource::Feedback),
            other => Err(CisageError::Store(format!(
                "Unknown remediation source: {}",
                other
            ))),
        }
    }
}

/// One entry in a signature's remediation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationEvent {
    /// Per-fingerprint insertion order, starting at 1
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub root_cause: String,
    pub steps: Vec<String>,
    pub source: RemediationSource,
    /// Confidence the analysis reported for its own verdict; absent on
    /// feedback entries
    pub reported_confidence: Option<f64>,
    /// Whether the remediation resolved the failure; None until feedback
    pub resolved: Option<bool>,
}

/// New history entry handed to `upsert` / `record_feedback`
#[derive(Debug, Clone)]
pub struct NewRemediation {
    pub root_cause: String,
    pub steps: Vec<String>,
    pub source: RemediationSource,
    pub reported_confidence: Option<f64>,
    pub resolved: Option<bool>,
}

/// One row of the analysis journal (one per coordinator `process` call)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub run_id: String,
    pub repository: Option<String>,
    pub workflow: Option<String>,
    pub fingerprint: String,
    pub disposition: String,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

/// Recompute a signature's confidence from its history
///
/// Starts from the first analysis verdict's reported confidence (clamped
/// to [floor, 1.0]), then folds feedback in insertion order: a resolved
/// outcome gains a fraction of the remaining headroom, an unresolved one
/// loses a fraction of the current value, never dropping below the floor.
pub fn recompute_confidence(events: &[RemediationEvent], policy: &ConfidenceConfig) -> f64 {
    let base = events
        .iter()
        .find(|e| e.source == RemediationSource::Analysis)
        .and_then(|e| e.reported_confidence)
        .unwrap_or(0.5);

    let mut confidence = base.clamp(policy.floor, 1.0);

    for event in events {
        match event.resolved {
            Some(true) => {
                confidence += (1.0 - confidence) * policy.success_gain;
            }
            Some(false) => {
                confidence = (confidence - confidence * policy.failure_penalty).max(policy.floor);
            }
            None => {}
        }
    }

    confidence.clamp(policy.floor, 1.0)
}

/// Storage manager coordinating the signature database and evidence blobs
pub struct StoreManager {
    pub signatures: SignatureStore,
    pub evidence: EvidenceStore,
    base_path: PathBuf,
}

impl StoreManager {
    /// Create a new storage manager rooted at `base_path`
    pub fn new(
        base_path: PathBuf,
        compression_threshold: usize,
        confidence: ConfidenceConfig,
    ) -> Result<Self> {
        let store_dir = base_path.join("store");

        std::fs::create_dir_all(&store_dir).map_err(|e| CisageError::Io {
            source: e,
            context: format!("Failed to create store directory: {}", store_dir.display()),
        })?;

        let evidence = EvidenceStore::new(store_dir.clone(), compression_threshold)?;

        let db_path = store_dir.join("db.sqlite");
        let signatures = SignatureStore::new(&db_path, confidence)?;

        Ok(Self {
            signatures,
            evidence,
            base_path,
        })
    }

    /// Root data directory
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    /// Combined store statistics
    pub fn stats(&self) -> Result<StoreStats> {
        self.signatures.stats()
    }
}

//! Signature matching
//!
//! Finds the best existing signature for a freshly extracted draft: exact
//! fingerprint lookup first, then a fuzzy pass over feature sets with a
//! configurable similarity metric and threshold. An inverted index over
//! feature tokens prunes the fuzzy candidate set before full scoring.

use crate::config::MatcherConfig;
use crate::error::{Result, CisageError};
use crate::signature::SignatureDraft;
use crate::store::{ErrorSignature, SignatureStore};
use ahash::{HashMap, HashMapExt};
use serde::{Deserialize, Serialize};

const SCORE_EPSILON: f64 = 1e-9;

/// How a draft related to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Same fingerprint already stored
    Exact,
    /// Feature similarity above the configured threshold
    Fuzzy,
    /// Nothing close enough
    None,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Fuzzy => "fuzzy",
            MatchKind::None => "none",
        }
    }
}

/// Transient match outcome; never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    /// Fingerprint of the matched stored signature, when any
    pub fingerprint: Option<String>,
    pub kind: MatchKind,
    pub score: f64,
}

impl MatchResult {
    fn none() -> Self {
        Self {
            fingerprint: None,
            kind: MatchKind::None,
            score: 0.0,
        }
    }
}

/// Feature-set similarity metric
///
/// Both options are symmetric and yield 1.0 only for identical sets.
/// Dice is the default: it scores an 8-of-10 token overlap at 0.8 where
/// Jaccard scores it 0.67, which fits the "same root cause, slightly
/// different trace" band the fuzzy pass exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityMetric {
    Dice,
    Jaccard,
}

impl SimilarityMetric {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "dice" => Ok(SimilarityMetric::Dice),
            "jaccard" => Ok(SimilarityMetric::Jaccard),
            other => Err(CisageError::Config(format!(
                "Unknown similarity metric: {}",
                other
            ))),
        }
    }

    /// Score two feature sets in [0.0, 1.0]
    ///
    /// Empty sets score 0.0; the matcher never treats an empty draft as
    /// similar to anything.
    pub fn score(&self, a: &[String], b: &[String]) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        let set_a: std::collections::HashSet<&str> = a.iter().map(|s| s.as_str()).collect();
        let set_b: std::collections::HashSet<&str> = b.iter().map(|s| s.as_str()).collect();

        let intersection = set_a.intersection(&set_b).count() as f64;

        match self {
            SimilarityMetric::Dice => {
                2.0 * intersection / (set_a.len() + set_b.len()) as f64
            }
            SimilarityMetric::Jaccard => {
                let union = set_a.union(&set_b).count() as f64;
                intersection / union
            }
        }
    }
}

/// Signature matcher with configured metric and threshold
pub struct Matcher {
    metric: SimilarityMetric,
    fuzzy_threshold: f64,
    max_candidates: usize,
}

impl Matcher {
    pub fn from_config(config: &MatcherConfig) -> Result<Self> {
        Ok(Self {
            metric: SimilarityMetric::from_name(&config.metric)?,
            fuzzy_threshold: config.fuzzy_threshold,
            max_candidates: config.max_candidates,
        })
    }

    /// Match a draft against the store
    pub fn match_draft(&self, draft: &SignatureDraft, store: &SignatureStore) -> Result<MatchResult> {
        // Exact lookup short-circuits the fuzzy scan
        if store.get(&draft.fingerprint)?.is_some() {
            return Ok(MatchResult {
                fingerprint: Some(draft.fingerprint.clone()),
                kind: MatchKind::Exact,
                score: 1.0,
            });
        }

        if draft.features.is_empty() {
            return Ok(MatchResult::none());
        }

        let signatures = store.all()?;
        Ok(self.best_fuzzy(draft, &signatures))
    }

    /// Fuzzy pass over already-loaded signatures
    ///
    /// Ties on score prefer the higher stored confidence, then the more
    /// recent last_seen.
    pub fn best_fuzzy(&self, draft: &SignatureDraft, signatures: &[ErrorSignature]) -> MatchResult {
        if draft.features.is_empty() || signatures.is_empty() {
            return MatchResult::none();
        }

        // Inverted index: feature token -> signature positions. Candidates
        // must share at least one token with the draft.
        let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
        for (pos, signature) in signatures.iter().enumerate() {
            for feature in &signature.features {
                index.entry(feature.as_str()).or_default().push(pos);
            }
        }

        let mut seen = vec![false; signatures.len()];
        let mut candidates = Vec::new();
        for feature in &draft.features {
            if let Some(positions) = index.get(feature.as_str()) {
                for &pos in positions {
                    if !seen[pos] {
                        seen[pos] = true;
                        candidates.push(pos);
                    }
                }
            }
        }
        candidates.truncate(self.max_candidates);

        let mut best: Option<(&ErrorSignature, f64)> = None;
        for pos in candidates {
            let candidate = &signatures[pos];
            let score = self.metric.score(&draft.features, &candidate.features);

            let replace = match best {
                None => true,
                Some((current, best_score)) => {
                    if score > best_score + SCORE_EPSILON {
                        true
                    } else if (score - best_score).abs() <= SCORE_EPSILON {
                        candidate.confidence > current.confidence
                            || (candidate.confidence == current.confidence
                                && candidate.last_seen > current.last_seen)
                    } else {
                        false
                    }
                }
            };

            if replace {
                best = Some((candidate, score));
            }
        }

        match best {
            Some((signature, score)) if score >= self.fuzzy_threshold => MatchResult {
                fingerprint: Some(signature.fingerprint.clone()),
                kind: MatchKind::Fuzzy,
                score,
            },
            _ => MatchResult::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn matcher(metric: &str, threshold: f64) -> Matcher {
        Matcher::from_config(&MatcherConfig {
            metric: metric.to_string(),
            fuzzy_threshold: threshold,
            max_candidates: 256,
        })
        .unwrap()
    }

    fn signature(fingerprint: &str, features: &[&str], confidence: f64) -> ErrorSignature {
        ErrorSignature {
            fingerprint: fingerprint.to_string(),
            features: features.iter().map(|s| s.to_string()).collect(),
            error_class: None,
            occurrence_count: 1,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            remediation_history: vec![],
            confidence,
            evidence_hash: None,
        }
    }

    fn draft(features: &[&str]) -> SignatureDraft {
        SignatureDraft {
            fingerprint: "draft-fp".to_string(),
            features: features.iter().map(|s| s.to_string()).collect(),
            error_class: None,
        }
    }

    #[test]
    fn test_dice_identical_sets_score_one() {
        let metric = SimilarityMetric::Dice;
        let a = vec!["x".to_string(), "y".to_string()];
        assert!((metric.score(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dice_is_symmetric() {
        let metric = SimilarityMetric::Dice;
        let a = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let b = vec!["y".to_string(), "z".to_string(), "w".to_string()];
        assert_eq!(metric.score(&a, &b), metric.score(&b, &a));
    }

    #[test]
    fn test_dice_partial_overlap() {
        let metric = SimilarityMetric::Dice;
        let a: Vec<String> = (0..10).map(|i| format!("t{}", i)).collect();
        let b: Vec<String> = (2..12).map(|i| format!("t{}", i)).collect();

        // 8 shared of 10+10 -> 0.8
        assert!((metric.score(&a, &b) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_jaccard_is_stricter() {
        let metric = SimilarityMetric::Jaccard;
        let a: Vec<String> = (0..10).map(|i| format!("t{}", i)).collect();
        let b: Vec<String> = (2..12).map(|i| format!("t{}", i)).collect();

        // 8 shared of 12 union -> 0.667
        assert!((metric.score(&a, &b) - 8.0 / 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_features_score_zero() {
        let metric = SimilarityMetric::Dice;
        assert_eq!(metric.score(&[], &[]), 0.0);
        assert_eq!(metric.score(&["x".to_string()], &[]), 0.0);
    }

    #[test]
    fn test_unknown_metric_rejected() {
        assert!(SimilarityMetric::from_name("cosine").is_err());
    }

    #[test]
    fn test_fuzzy_above_threshold() {
        let m = matcher("dice", 0.7);
        let features: Vec<&str> = vec!["t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7", "t8", "t9"];
        let shifted: Vec<&str> = vec!["t2", "t3", "t4", "t5", "t6", "t7", "t8", "t9", "u0", "u1"];

        let signatures = vec![signature("stored", &features, 0.5)];
        let result = m.best_fuzzy(&draft(&shifted), &signatures);

        assert_eq!(result.kind, MatchKind::Fuzzy);
        assert!((result.score - 0.8).abs() < 1e-9);
        assert_eq!(result.fingerprint.as_deref(), Some("stored"));
    }

    #[test]
    fn test_fuzzy_below_threshold_is_none() {
        let m = matcher("dice", 0.7);
        let signatures = vec![signature("stored", &["a", "b", "c", "d"], 0.5)];

        let result = m.best_fuzzy(&draft(&["a", "x", "y", "z"]), &signatures);

        assert_eq!(result.kind, MatchKind::None);
        assert_eq!(result.score, 0.0);
        assert!(result.fingerprint.is_none());
    }

    #[test]
    fn test_empty_store_is_none() {
        let m = matcher("dice", 0.7);
        let result = m.best_fuzzy(&draft(&["a"]), &[]);
        assert_eq!(result.kind, MatchKind::None);
    }

    #[test]
    fn test_empty_draft_is_none() {
        let m = matcher("dice", 0.7);
        let signatures = vec![signature("stored", &["a"], 0.5)];
        let result = m.best_fuzzy(&draft(&[]), &signatures);
        assert_eq!(result.kind, MatchKind::None);
    }

    #[test]
    fn test_tie_break_prefers_confidence() {
        let m = matcher("dice", 0.5);
        let signatures = vec![
            signature("low-conf", &["a", "b"], 0.2),
            signature("high-conf", &["a", "b"], 0.9),
        ];

        let result = m.best_fuzzy(&draft(&["a", "b"]), &signatures);
        assert_eq!(result.fingerprint.as_deref(), Some("high-conf"));
    }

    #[test]
    fn test_tie_break_prefers_recency() {
        let m = matcher("dice", 0.5);
        let mut older = signature("older", &["a", "b"], 0.5);
        older.last_seen = Utc::now() - Duration::hours(2);
        let newer = signature("newer", &["a", "b"], 0.5);

        let result = m.best_fuzzy(&draft(&["a", "b"]), &[older, newer]);
        assert_eq!(result.fingerprint.as_deref(), Some("newer"));
    }

    #[test]
    fn test_candidates_without_shared_tokens_skipped() {
        let m = matcher("dice", 0.1);
        let signatures = vec![signature("unrelated", &["p", "q"], 0.9)];

        let result = m.best_fuzzy(&draft(&["a", "b"]), &signatures);
        assert_eq!(result.kind, MatchKind::None);
    }
}

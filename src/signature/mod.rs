//! Signature extraction
//!
//! Reduces a normalized log to the structurally significant lines and
//! derives a stable fingerprint plus a bounded feature set from them. The
//! fingerprint is the store's primary key; the features feed the fuzzy
//! matcher and survive hash collisions.

use crate::config::ExtractorConfig;
use crate::normalize::NormalizedLog;
use crate::patterns::{PatternRegistry, SalienceKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Cap on a single feature token, to bound comparison cost
const MAX_FEATURE_LEN: usize = 120;

/// Draft signature produced by extraction, before the store assigns
/// occurrence metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureDraft {
    /// Stable content hash of the salient-line sequence (32 hex chars)
    pub fingerprint: String,
    /// Ordered, deduplicated salient tokens used for fuzzy comparison
    pub features: Vec<String>,
    /// Coarse error category, when one could be detected
    pub error_class: Option<String>,
}

/// Signature extractor over a shared pattern registry
pub struct SignatureExtractor {
    registry: Arc<PatternRegistry>,
    config: ExtractorConfig,
}

impl SignatureExtractor {
    pub fn new(registry: Arc<PatternRegistry>, config: ExtractorConfig) -> Self {
        Self { registry, config }
    }

    /// Extract a signature draft from a normalized log
    ///
    /// Deterministic: the same normalized text always yields the same
    /// fingerprint and feature sequence.
    pub fn extract(&self, log: &NormalizedLog) -> SignatureDraft {
        let salient = self.salient_lines(log);

        // No salient structure found: hash the whole normalized text so
        // unrecognized formats still differentiate
        let fingerprint = if salient.is_empty() {
            hash_content(&log.text)
        } else {
            let joined = salient
                .iter()
                .map(|(_, line)| line.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            hash_content(&joined)
        };

        let error_class = self.registry.classify(&log.text);
        let features = self.features(&salient, error_class.as_deref());

        SignatureDraft {
            fingerprint,
            features,
            error_class,
        }
    }

    /// Filter the log down to salient lines, preserving order
    ///
    /// Stack frames are capped separately so a deep trace cannot crowd out
    /// the error and exit lines.
    fn salient_lines(&self, log: &NormalizedLog) -> Vec<(SalienceKind, String)> {
        let mut lines = Vec::new();
        let mut frames = 0usize;

        for line in log.text.lines() {
            if lines.len() >= self.config.max_salient_lines {
                break;
            }

            let Some(kind) = self.registry.salience_of(line) else {
                continue;
            };

            if kind == SalienceKind::Frame {
                if frames >= self.config.max_stack_frames {
                    continue;
                }
                frames += 1;
            }

            lines.push((kind, collapse_whitespace(line)));
        }

        lines
    }

    /// Build the bounded feature set: error class first, then salient
    /// tokens prefixed by kind, deduplicated in order of first appearance
    fn features(
        &self,
        salient: &[(SalienceKind, String)],
        error_class: Option<&str>,
    ) -> Vec<String> {
        let mut features = Vec::new();

        if let Some(class) = error_class {
            features.push(format!("class:{}", class));
        }

        for (kind, line) in salient {
            if features.len() >= self.config.max_features {
                break;
            }

            let prefix = match kind {
                SalienceKind::Error => "err",
                SalienceKind::Frame => "frame",
                SalienceKind::Exit => "exit",
            };

            let mut token = format!("{}:{}", prefix, line.trim());
            token.truncate(MAX_FEATURE_LEN);

            if !features.contains(&token) {
                features.push(token);
            }
        }

        features.truncate(self.config.max_features);
        features
    }
}

/// Stable content hash, 32 hex chars of BLAKE3
pub fn hash_content(content: &str) -> String {
    let hash = blake3::hash(content.as_bytes());
    format!("{:.32}", hash.to_hex())
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Log normalization
//!
//! Turns a raw CI failure log into a canonical text form with run-to-run
//! noise (timestamps, run IDs, paths, ANSI escapes) stripped out. Pure and
//! infallible: unparseable input degrades to an empty normalized log
//! flagged as such, it never errors.

use crate::patterns::PatternRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Detected log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// GitHub Actions runner output (per-line timestamps, ##[..] markers)
    GithubActions,
    /// Anything else
    Generic,
}

/// Canonical normalized form of one failure log
///
/// Derived, never persisted standalone; lives for one analysis request.
#[derive(Debug, Clone)]
pub struct NormalizedLog {
    pub text: String,
    pub format: LogFormat,
    /// True when the raw input could not be normalized (binary/garbage);
    /// the pipeline continues with empty text rather than aborting
    pub degraded: bool,
}

impl NormalizedLog {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Format-specific preparation pass, selected by content detection
trait FormatPass: Send + Sync {
    fn format(&self) -> LogFormat;
    fn matches(&self, raw: &str) -> bool;
    /// Strip format-level framing before the shared scrub pass
    fn prepare(&self, raw: &str) -> String;
}

/// GitHub Actions runner logs: leading per-line ISO timestamps and
/// ##[group]/##[endgroup]/##[debug] framing
struct GithubActionsPass;

impl FormatPass for GithubActionsPass {
    fn format(&self) -> LogFormat {
        LogFormat::GithubActions
    }

    fn matches(&self, raw: &str) -> bool {
        raw.contains("##[") || (raw.contains("Run ") && raw.contains("shell: "))
    }

    fn prepare(&self, raw: &str) -> String {
        raw.lines()
            .filter(|line| {
                let trimmed = line.trim_start();
                // Grouping and debug framing carries no failure semantics
                let framing = trimmed.contains("##[group]")
                    || trimmed.contains("##[endgroup]")
                    || trimmed.contains("##[debug]")
                    || trimmed.contains("##[section]");
                !framing
            })
            .map(strip_leading_timestamp)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Fallback pass for unrecognized formats
struct GenericPass;

impl FormatPass for GenericPass {
    fn format(&self) -> LogFormat {
        LogFormat::Generic
    }

    fn matches(&self, _raw: &str) -> bool {
        true
    }

    fn prepare(&self, raw: &str) -> String {
        raw.to_string()
    }
}

/// Drop the `2024-03-01T12:34:56.789Z ` prefix the Actions runner puts on
/// every line
fn strip_leading_timestamp(line: &str) -> &str {
    let bytes = line.as_bytes();
    if bytes.len() > 20 && bytes[4] == b'-' && bytes[7] == b'-' && bytes[10] == b'T' {
        if let Some(pos) = line.find(' ') {
            return &line[pos + 1..];
        }
    }
    line
}

/// Log normalizer: format detection plus registry-driven scrubbing
pub struct LogNormalizer {
    registry: Arc<PatternRegistry>,
    passes: Vec<Box<dyn FormatPass>>,
}

impl LogNormalizer {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self {
            registry,
            passes: vec![Box::new(GithubActionsPass), Box::new(GenericPass)],
        }
    }

    /// Normalize a raw failure log. Deterministic and infallible.
    pub fn normalize(&self, raw: &str) -> NormalizedLog {
        if Self::is_garbage(raw) {
            return NormalizedLog {
                text: String::new(),
                format: LogFormat::Generic,
                degraded: true,
            };
        }

        // First matching pass wins; GenericPass matches everything
        let pass = self
            .passes
            .iter()
            .find(|p| p.matches(raw))
            .unwrap_or(&self.passes[1]);

        let prepared = pass.prepare(raw);

        let text = prepared
            .lines()
            .map(|line| self.registry.scrub(line).trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n");

        NormalizedLog {
            text,
            format: pass.format(),
            degraded: false,
        }
    }

    /// Binary or otherwise unparseable input
    fn is_garbage(raw: &str) -> bool {
        if raw.is_empty() {
            return false;
        }
        if raw.contains('\0') {
            return true;
        }
        let control = raw
            .chars()
            .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\u{1b}'))
            .count();
        control * 10 > raw.chars().count() * 3
    }
}

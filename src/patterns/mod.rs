//! Pattern registry for configuration-driven log scrubbing and salience
//!
//! This module provides:
//! - Pre-compiled normalization patterns that strip run-to-run noise
//!   (timestamps, run IDs, paths, ANSI escapes) from failure logs
//! - Salience patterns that pick out the structurally significant lines
//!   (error lines, stack frames, final command/exit lines)
//! - Error-class patterns that map a normalized log to a coarse category

use crate::error::{Result, CisageError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Normalization pattern for scrubbing volatile content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationPattern {
    pub name: String,
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub priority: u8,
}

/// Kind of salient line a pattern selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalienceKind {
    /// Error/exception/panic line
    Error,
    /// Stack trace frame
    Frame,
    /// Final command invocation or exit status line
    Exit,
}

/// Salience pattern configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaliencePattern {
    pub name: String,
    pub pattern: String,
    pub kind: SalienceKind,
}

/// Error-class pattern configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorClassPattern {
    pub class: String,
    pub pattern: String,
}

/// Patterns configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternsFileConfig {
    #[serde(default)]
    pub normalization: Vec<NormalizationPattern>,
    #[serde(default)]
    pub salience: Vec<SaliencePattern>,
    #[serde(default)]
    pub error_class: Vec<ErrorClassPattern>,
}

/// Compiled normalization pattern
#[derive(Debug, Clone)]
pub struct CompiledNormalizationPattern {
    pub name: String,
    pub regex: Regex,
    pub replacement: String,
    pub priority: u8,
}

/// Compiled salience pattern
#[derive(Debug, Clone)]
pub struct CompiledSaliencePattern {
    pub name: String,
    pub regex: Regex,
    pub kind: SalienceKind,
}

/// Compiled error-class pattern
#[derive(Debug, Clone)]
pub struct CompiledClassPattern {
    pub class: String,
    pub regex: Regex,
}

/// Pattern registry with all pre-compiled patterns
#[derive(Clone)]
pub struct PatternRegistry {
    /// Scrub patterns, sorted by priority
    pub normalization: Vec<CompiledNormalizationPattern>,
    /// Salient-line selectors
    pub salience: Vec<CompiledSaliencePattern>,
    /// Error-class selectors, declaration order is match order
    pub classes: Vec<CompiledClassPattern>,
}

impl PatternRegistry {
    /// Load pattern registry from a TOML configuration file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CisageError::Io {
            source: e,
            context: format!("Failed to read patterns config: {:?}", path),
        })?;
        let config: PatternsFileConfig = toml::from_str(&content)?;
        Self::from_config(config)
    }

    /// Build pattern registry from a parsed configuration
    pub fn from_config(config: PatternsFileConfig) -> Result<Self> {
        let mut normalization: Vec<CompiledNormalizationPattern> = config
            .normalization
            .iter()
            .map(|np| {
                Regex::new(&np.pattern)
                    .map(|r| CompiledNormalizationPattern {
                        name: np.name.clone(),
                        regex: r,
                        replacement: np.replacement.clone(),
                        priority: np.priority,
                    })
                    .map_err(|e| {
                        CisageError::Config(format!(
                            "Invalid normalization pattern '{}': {}",
                            np.name, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        normalization.sort_by_key(|p| p.priority);

        let salience: Vec<CompiledSaliencePattern> = config
            .salience
            .iter()
            .map(|sp| {
                Regex::new(&sp.pattern)
                    .map(|r| CompiledSaliencePattern {
                        name: sp.name.clone(),
                        regex: r,
                        kind: sp.kind,
                    })
                    .map_err(|e| {
                        CisageError::Config(format!(
                            "Invalid salience pattern '{}': {}",
                            sp.name, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let classes: Vec<CompiledClassPattern> = config
            .error_class
            .iter()
            .map(|cp| {
                Regex::new(&cp.pattern)
                    .map(|r| CompiledClassPattern {
                        class: cp.class.clone(),
                        regex: r,
                    })
                    .map_err(|e| {
                        CisageError::Config(format!(
                            "Invalid error-class pattern '{}': {}",
                            cp.class, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            normalization,
            salience,
            classes,
        })
    }

    /// Build the registry from the built-in default pattern set
    pub fn builtin() -> Result<Self> {
        Self::from_config(PatternsFileConfig::default())
    }

    /// Scrub volatile content from a line
    pub fn scrub(&self, line: &str) -> String {
        let mut result = line.to_string();
        for pattern in &self.normalization {
            result = pattern
                .regex
                .replace_all(&result, pattern.replacement.as_str())
                .to_string();
        }
        result
    }

    /// Classify a line's salience, if any
    ///
    /// The first matching pattern wins; patterns are checked in declaration
    /// order so error selectors take precedence over frame selectors.
    pub fn salience_of(&self, line: &str) -> Option<SalienceKind> {
        self.salience
            .iter()
            .find(|p| p.regex.is_match(line))
            .map(|p| p.kind)
    }

    /// Map normalized text to a coarse error class
    pub fn classify(&self, text: &str) -> Option<String> {
        self.classes
            .iter()
            .find(|p| p.regex.is_match(text))
            .map(|p| p.class.clone())
    }
}

impl Default for PatternsFileConfig {
    fn default() -> Self {
        fn norm(name: &str, pattern: &str, replacement: &str, priority: u8) -> NormalizationPattern {
            NormalizationPattern {
                name: name.to_string(),
                pattern: pattern.to_string(),
                replacement: replacement.to_string(),
                priority,
            }
        }
        fn sal(name: &str, pattern: &str, kind: SalienceKind) -> SaliencePattern {
            SaliencePattern {
                name: name.to_string(),
                pattern: pattern.to_string(),
                kind,
            }
        }
        fn class(class: &str, pattern: &str) -> ErrorClassPattern {
            ErrorClassPattern {
                class: class.to_string(),
                pattern: pattern.to_string(),
            }
        }

        Self {
            normalization: vec![
                norm("ansi_escape", r"\x1b\[[0-9;]*[A-Za-z]", "", 1),
                norm(
                    "iso_timestamp",
                    r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
                    "<ts>",
                    2,
                ),
                norm(
                    "uuid",
                    r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b",
                    "<id>",
                    3,
                ),
                norm("long_hex_id", r"\b[0-9a-f]{12,64}\b", "<id>", 4),
                norm("hex_address", r"\b0x[0-9a-fA-F]+\b", "<addr>", 5),
                norm("epoch_timestamp", r"\b1[0-9]{9,12}\b", "<ts>", 6),
                // Absolute unix path: collapse the directory prefix, keep the
                // file name so relative structure survives
                norm("abs_path", r"(?:/[\w.@+~-]+){2,}/", "<path>/", 7),
                norm(
                    "win_path",
                    r"\b[A-Za-z]:(?:\\[\w.@+~-]+){2,}\\",
                    "<path>/",
                    8,
                ),
                norm("line_col", r":\d+:\d+\b", ":<line>:<col>", 9),
                norm("line_ref", r"\bline \d+\b", "line <n>", 10),
                norm("duration", r"\b\d+(?:\.\d+)?(?:ms|s)\b", "<dur>", 11),
            ],
            salience: vec![
                sal("gha_error", r"##\[error\]", SalienceKind::Error),
                sal("cargo_error", r"^error(\[E\d+\])?:", SalienceKind::Error),
                sal(
                    "generic_error",
                    r"(?i)\b(error|exception|failed|failure|fatal|panic(?:ked)?|traceback|assertion failed)\b",
                    SalienceKind::Error,
                ),
                sal("npm_error", r"npm ERR!", SalienceKind::Error),
                sal(
                    "camel_exception",
                    r"\b[A-Z]\w*(Exception|Error)\b",
                    SalienceKind::Error,
                ),
                sal("js_frame", r"^\s+at\s+\S+", SalienceKind::Frame),
                sal("py_frame", r#"^\s*File "[^"]+", line"#, SalienceKind::Frame),
                sal("rust_frame", r"^\s+\d+:\s+\S+", SalienceKind::Frame),
                sal("rustc_span", r"^\s*-->\s+\S+", SalienceKind::Frame),
                sal(
                    "exit_code",
                    r"(?i)(process completed with exit code \d+|exited? with (code|status) \d+)",
                    SalienceKind::Exit,
                ),
                sal("gha_command", r"##\[command\]", SalienceKind::Exit),
            ],
            error_class: vec![
                class(
                    "dependency",
                    r"(?i)(could not resolve dependenc|no matching (version|distribution)|unresolved import|cannot find (crate|module|package)|npm ERR! 404|ModuleNotFoundError)",
                ),
                class(
                    "permission",
                    r"(?i)(permission denied|EACCES|access is denied|operation not permitted)",
                ),
                class("timeout", r"(?i)(timed? ?out|deadline exceeded)"),
                class(
                    "network",
                    r"(?i)(connection (refused|reset)|ECONNREFUSED|network is unreachable|getaddrinfo)",
                ),
                class(
                    "resource",
                    r"(?i)(out of memory|OOM|no space left on device|disk quota exceeded|ENOSPC)",
                ),
                class(
                    "syntax",
                    r"(?i)(SyntaxError|parse error|unexpected token|expected .+, found)",
                ),
                class(
                    "configuration",
                    r"(?i)(missing (required )?(field|key)|invalid configuration|unknown option)",
                ),
                class(
                    "environment",
                    r"(?i)(command not found|not recognized as an internal|No such file or directory|environment variable .+ (is )?not set)",
                ),
            ],
        }
    }
}

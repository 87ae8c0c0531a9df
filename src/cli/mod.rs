//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cisage",
    version,
    about = "CI failure triage engine that learns error signatures",
    long_about = "Cisage ingests GitHub Actions failure logs, fingerprints the underlying error, \
                  and matches it against a growing library of known signatures so remediation \
                  guidance learned once can be reused instead of re-analyzed."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/cisage/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze one failure log and report the known/novel decision
    Analyze {
        /// Path to the failure log ("-" reads stdin)
        log: PathBuf,

        /// Repository the run belongs to (owner/repo)
        #[arg(short, long)]
        repo: Option<String>,

        /// Workflow name
        #[arg(short, long)]
        workflow: Option<String>,

        /// Show the outcome in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Record whether a stored remediation resolved the failure
    Feedback {
        /// Fingerprint of the signature the remediation belongs to
        fingerprint: String,

        /// The remediation resolved the failure
        #[arg(long, conflicts_with = "unresolved")]
        resolved: bool,

        /// The remediation did not resolve the failure
        #[arg(long)]
        unresolved: bool,

        /// Free-form notes stored with the feedback
        #[arg(long)]
        notes: Option<String>,
    },

    /// Show signature store statistics
    Stats {
        /// Show statistics in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show recent analysis journal entries
    History {
        /// Filter by repository (owner/repo)
        #[arg(short, long)]
        repo: Option<String>,

        /// Maximum number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Show entries in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Print the configuration file path
    Path,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::try_parse_from(["cisage", "analyze", "build.log", "--repo", "octo/app"])
            .unwrap();

        match cli.command {
            Commands::Analyze { log, repo, .. } => {
                assert_eq!(log, PathBuf::from("build.log"));
                assert_eq!(repo.as_deref(), Some("octo/app"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_feedback_flags_conflict() {
        let result = Cli::try_parse_from([
            "cisage",
            "feedback",
            "abc123",
            "--resolved",
            "--unresolved",
        ]);
        assert!(result.is_err());
    }
}

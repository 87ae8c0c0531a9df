use cisage::analysis::{provider_from_config, AnalysisContext};
use cisage::cli::{Cli, Commands, ConfigAction};
use cisage::config::{Config, ConfigValidator};
use cisage::error::{Result, CisageError};
use cisage::learning::{Disposition, LearningCoordinator};
use cisage::store::StoreManager;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Analyze {
            log,
            repo,
            workflow,
            json,
        } => {
            cmd_analyze(cli.config, &log, repo, workflow, json)?;
        }
        Commands::Feedback {
            fingerprint,
            resolved,
            unresolved,
            notes,
        } => {
            cmd_feedback(cli.config, &fingerprint, resolved, unresolved, notes)?;
        }
        Commands::Stats { json } => {
            cmd_stats(cli.config, json)?;
        }
        Commands::History { repo, limit, json } => {
            cmd_history(cli.config, repo, limit, json)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_filter = if verbose { "cisage=debug" } else { "cisage=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(p) => Config::load(&p),
        None => Config::load_or_default(),
    }
}

fn open_store(config: &Config) -> Result<Arc<StoreManager>> {
    let data_dir = expand_tilde(&config.storage.data_dir)?;
    Ok(Arc::new(StoreManager::new(
        data_dir,
        config.storage.compression_threshold,
        config.confidence.clone(),
    )?))
}

fn expand_tilde(path: &Path) -> Result<PathBuf> {
    if let Ok(stripped) = path.strip_prefix("~") {
        let home = dirs::home_dir()
            .ok_or_else(|| CisageError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

fn read_log(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| CisageError::Io {
                source: e,
                context: "Failed to read log from stdin".to_string(),
            })?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(path).map_err(|e| CisageError::Io {
            source: e,
            context: format!("Failed to read log file: {}", path.display()),
        })
    }
}

fn cmd_analyze(
    config_path: Option<PathBuf>,
    log: &Path,
    repo: Option<String>,
    workflow: Option<String>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let raw_log = read_log(log)?;

    let store = open_store(&config)?;
    let coordinator = LearningCoordinator::new(&config, store)?;
    let analyzer = provider_from_config(&config.analysis)?;

    let ctx = AnalysisContext {
        repository: repo,
        workflow,
        conclusion: Some("failure".to_string()),
        prior_remediations: Vec::new(),
    };

    let outcome = coordinator.process(&raw_log, &ctx, analyzer.as_ref())?;

    if json {
        let value = serde_json::json!({
            "run_id": outcome.run_id.to_string(),
            "fingerprint": outcome.signature.fingerprint,
            "match": outcome.match_result,
            "novel": outcome.is_novel(),
            "degraded": outcome.degraded,
            "occurrence_count": outcome.signature.occurrence_count,
            "confidence": outcome.signature.confidence,
            "error_class": outcome.signature.error_class,
        });
        println!("{}", serde_json::to_string_pretty(&value).map_err(|e| CisageError::Json {
            source: e,
            context: "Failed to serialize analyze output".to_string(),
        })?);
        return Ok(());
    }

    println!("Fingerprint:  {}", outcome.signature.fingerprint);
    println!(
        "Match:        {} (score {:.2})",
        outcome.match_result.kind.as_str(),
        outcome.match_result.score
    );
    println!("Occurrences:  {}", outcome.signature.occurrence_count);
    println!("Confidence:   {:.2}", outcome.signature.confidence);
    if let Some(class) = &outcome.signature.error_class {
        println!("Error class:  {}", class);
    }
    if outcome.degraded {
        println!("Note:         log could not be normalized (degraded input)");
    }

    match &outcome.disposition {
        Disposition::Novel { verdict } => {
            println!("\nNovel failure - fresh analysis:");
            println!("  Root cause: {}", verdict.root_cause);
            for (i, step) in verdict.remediation_steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
        }
        Disposition::Known { remediation } => {
            println!("\nKnown failure - reusing stored remediation:");
            match remediation {
                Some(event) => {
                    println!("  Root cause: {}", event.root_cause);
                    for (i, step) in event.steps.iter().enumerate() {
                        println!("  {}. {}", i + 1, step);
                    }
                }
                None => println!("  (no stored remediation yet)"),
            }
        }
    }

    Ok(())
}

fn cmd_feedback(
    config_path: Option<PathBuf>,
    fingerprint: &str,
    resolved: bool,
    unresolved: bool,
    notes: Option<String>,
) -> Result<()> {
    if resolved == unresolved {
        return Err(CisageError::Config(
            "Pass exactly one of --resolved or --unresolved".to_string(),
        ));
    }

    let config = load_config(config_path)?;
    let store = open_store(&config)?;

    let signature = store
        .signatures
        .record_feedback(fingerprint, resolved, notes.as_deref())?;

    println!(
        "Recorded {} outcome for {} (confidence now {:.2}, {} history entries)",
        if resolved { "resolved" } else { "unresolved" },
        signature.fingerprint,
        signature.confidence,
        signature.remediation_history.len()
    );

    Ok(())
}

fn cmd_stats(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;

    let stats = store.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats).map_err(|e| CisageError::Json {
            source: e,
            context: "Failed to serialize stats".to_string(),
        })?);
        return Ok(());
    }

    println!("Signatures:        {}", stats.signature_count);
    println!("Analyses:          {}", stats.analysis_count);
    println!("History entries:   {}", stats.event_count);
    if !stats.class_distribution.is_empty() {
        println!("Error classes:");
        for (class, count) in &stats.class_distribution {
            println!("  {:<16} {}", class, count);
        }
    }

    Ok(())
}

fn cmd_history(
    config_path: Option<PathBuf>,
    repo: Option<String>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;

    let records = store.signatures.recent_analyses(repo.as_deref(), limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records).map_err(|e| CisageError::Json {
            source: e,
            context: "Failed to serialize history".to_string(),
        })?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No analyses recorded yet");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {:<12} score {:.2}  {}  {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.disposition,
            record.score,
            record.repository.as_deref().unwrap_or("-"),
            record.fingerprint
        );
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(p) => p,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("Configuration is valid: {}", path.display());
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(p) => p,
                None => Config::default_path()?,
            };
            if path.exists() && !force {
                return Err(CisageError::Config(format!(
                    "Config already exists at {} (use --force to overwrite)",
                    path.display()
                )));
            }
            let config = Config::default();
            config.save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Path => {
            let path = match config_path {
                Some(p) => p,
                None => Config::default_path()?,
            };
            println!("{}", path.display());
        }
    }

    Ok(())
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Filewarden CLI
//!
//! Each command runs a scan session in-process and acts on its results.

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use filewarden::actions::{DuplicateCheck, OperationSummary, OrganizeOptions, QuarantineAction};
use filewarden::audit::JsonlAuditSink;
use filewarden::classifier::Category;
use filewarden::features::{FeatureExtractor, FsFeatureExtractor};
use filewarden::report::{export_csv, load_training_csv, ScanReport};
use filewarden::rules::{Rule, RuleSet};
use filewarden::{AppConfig, Engine, Result, ScanOptions, ScanState, ThreatVerdict, WardenError};

/// Filewarden CLI - scan, classify, organize and quarantine files
#[derive(Parser, Debug)]
#[command(name = "filewarden")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Scan, classify and safely organize, delete or quarantine files", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "filewarden.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Rule selection shared by `scan` and `delete`
#[derive(clap::Args, Debug, Clone, Default)]
struct RuleArgs {
    /// Built-in rule template (temp_files, old_downloads, small_files, old_logs)
    #[arg(long)]
    template: Vec<String>,

    /// Extensions to match (without the dot)
    #[arg(long = "ext")]
    extensions: Vec<String>,

    /// Match files modified more than N days before the scan
    #[arg(long)]
    older_than: Option<u32>,

    /// Match files modified less than N days before the scan
    #[arg(long)]
    newer_than: Option<u32>,

    /// Match files smaller than N bytes
    #[arg(long)]
    smaller_than: Option<u64>,

    /// Match files larger than N bytes
    #[arg(long)]
    larger_than: Option<u64>,
}

impl RuleArgs {
    fn to_rule_set(&self) -> Result<RuleSet> {
        let mut groups = Vec::new();
        for name in &self.template {
            let template = RuleSet::template(name).ok_or_else(|| {
                WardenError::Config(format!(
                    "Unknown rule template '{}' (known: {})",
                    name,
                    RuleSet::template_names().join(", ")
                ))
            })?;
            groups.extend(template.groups);
        }

        let custom = Rule {
            extensions: self.extensions.clone(),
            older_than_days: self.older_than,
            newer_than_days: self.newer_than,
            size_below_bytes: self.smaller_than,
            size_above_bytes: self.larger_than,
            min_entropy: None,
        };
        if !custom.is_empty() {
            groups.push(custom);
        }
        Ok(RuleSet::new(groups))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a directory and report categories and threats
    Scan {
        /// Directory to scan
        root: PathBuf,

        /// Only scan the top level
        #[arg(long)]
        no_recursive: bool,

        /// Use only the extension table for categories
        #[arg(long)]
        no_ml: bool,

        /// Skip threat assessment
        #[arg(long)]
        no_threats: bool,

        /// Stop after this many files
        #[arg(long)]
        max_files: Option<usize>,

        /// Write every record to a CSV file
        #[arg(long)]
        export: Option<PathBuf>,

        /// Quarantine files at or above the configured verdict
        #[arg(long)]
        quarantine: bool,

        #[command(flatten)]
        rules: RuleArgs,
    },

    /// Sort scanned files into category folders
    Organize {
        /// Directory to scan
        root: PathBuf,

        /// Destination base (overrides config)
        #[arg(short, long)]
        dest: Option<PathBuf>,

        /// Actually move files (default is a dry run)
        #[arg(long)]
        apply: bool,

        /// Add a YYYY-MM folder below each category
        #[arg(long)]
        dated: bool,

        /// Compare content hashes as well as sizes for duplicates
        #[arg(long)]
        hash_duplicates: bool,

        /// Only organize these categories
        #[arg(long)]
        category: Vec<Category>,
    },

    /// Delete files matching rules (dry run unless --apply --yes)
    Delete {
        /// Directory to search
        root: PathBuf,

        #[command(flatten)]
        rules: RuleArgs,

        /// Delete for real
        #[arg(long)]
        apply: bool,

        /// Confirm permanent deletion
        #[arg(long)]
        yes: bool,
    },

    /// Quarantine management
    Quarantine {
        #[command(subcommand)]
        action: QuarantineCommands,
    },

    /// Classify a single file
    Classify {
        /// File to classify
        path: PathBuf,
    },

    /// Train the category model
    Train {
        /// Directory to learn from, labelled by the extension table
        #[arg(required_unless_present = "csv")]
        root: Option<PathBuf>,

        /// Labelled scan export to learn from instead
        #[arg(long, conflicts_with = "root")]
        csv: Option<PathBuf>,
    },

    /// Show recent scans
    History {
        /// Number of scans to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show model, quarantine and collaborator status
    Status,

    /// Show the audit log
    Audit {
        /// Only events from this session or operation
        #[arg(long)]
        session: Option<String>,

        /// Number of most recent events to show (0 for all)
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum QuarantineCommands {
    /// List quarantined files
    List,

    /// Move a quarantined file back to its original location
    Restore {
        /// Quarantine record id
        id: String,
    },

    /// Permanently delete a quarantined file
    Delete {
        /// Quarantine record id
        id: String,
    },

    /// Quarantined files per threat name
    Summary,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "filewarden.json")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load(&cli.config)?;
    let json = cli.format == "json";

    match cli.command {
        Commands::Config { action } => run_config_command(config, action, &cli.config),
        Commands::Classify { path } => run_classify(config, &path, json),
        Commands::Audit { session, limit } => run_audit(&config, session.as_deref(), limit, json),
        command => {
            let engine = Engine::from_config(config)?;
            match command {
                Commands::Scan { root, no_recursive, no_ml, no_threats, max_files, export, quarantine, rules } => {
                    let options = ScanOptions {
                        recursive: !no_recursive,
                        rules: rules.to_rule_set()?,
                        use_ml: !no_ml,
                        threat_scan: !no_threats,
                        max_files,
                        ..ScanOptions::default()
                    };
                    run_scan(&engine, &root, options, export.as_deref(), quarantine, json, cli.quiet).await
                }
                Commands::Organize { root, dest, apply, dated, hash_duplicates, category } => {
                    let base = dest.unwrap_or_else(|| PathBuf::from(&engine.config().organize.destination_base));
                    let options = OrganizeOptions {
                        dated_folders: dated || engine.config().organize.dated_folders,
                        duplicate_check: if hash_duplicates {
                            DuplicateCheck::SizeAndHash
                        } else {
                            engine.config().organize.duplicate_check
                        },
                        categories: category,
                    };
                    run_organize(&engine, &root, &base, &options, apply, json, cli.quiet).await
                }
                Commands::Delete { root, rules, apply, yes } => {
                    run_delete(&engine, &root, &rules.to_rule_set()?, apply, yes, json).await
                }
                Commands::Quarantine { action } => run_quarantine_command(&engine, action, json),
                Commands::Train { root, csv } => run_train(&engine, root, csv, json, cli.quiet).await,
                Commands::History { limit } => run_history(&engine, limit, json),
                Commands::Status => run_status(&engine, json),
                Commands::Config { .. } | Commands::Classify { .. } | Commands::Audit { .. } => Ok(()),
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Start a scan and wait for it, cancelling on Ctrl-C
async fn scan_to_end(engine: &Engine, root: &Path, options: ScanOptions, quiet: bool) -> Result<String> {
    let session_id = engine.start_scan(root, options)?;
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    ticker.tick().await;

    loop {
        tokio::select! {
            state = engine.wait(&session_id) => {
                let state = state?;
                if state == ScanState::Failed {
                    let session = engine.session(&session_id)?;
                    return Err(WardenError::InvalidState(format!(
                        "scan failed: {}",
                        session.fatal_error().unwrap_or_default()
                    )));
                }
                return Ok(session_id);
            }
            _ = ticker.tick() => {
                if !quiet {
                    let progress = engine.get_progress(&session_id)?;
                    info!("{} files, {} bytes, {} failures", progress.files_seen, progress.bytes_seen, progress.failures);
                }
            }
            _ = signal::ctrl_c() => {
                warn!("Interrupted, cancelling scan");
                engine.cancel_scan(&session_id)?;
            }
        }
    }
}

fn print_report(report: &ScanReport) {
    println!("Scan {} of {} ({})", report.session_id, report.root, report.state);
    println!("  Files: {} ({} bytes) in {:.1}s", report.files, report.bytes, report.duration_secs);
    println!("  Model-classified: {}", report.model_classified);
    if report.rule_matches > 0 {
        println!("  Rule matches: {}", report.rule_matches);
    }
    println!("\nCategories:");
    for c in &report.categories {
        println!("  {:<14} {:>7} files {:>12} bytes", c.category.dir_name(), c.files, c.bytes);
    }
    if !report.threats.is_empty() {
        println!("\nThreats:");
        for (verdict, count) in &report.threats {
            println!("  {:<10} {}", verdict.to_string(), count);
        }
    }
    if !report.failures.is_empty() {
        println!("\nFailures ({}):", report.failures.len());
        for failure in report.failures.iter().take(20) {
            println!("  {}: {}", failure.path.display(), failure.error);
        }
    }
}

fn print_summary(title: &str, summary: &OperationSummary) {
    let mode = if summary.dry_run { " (dry run)" } else { "" };
    println!("{}{}", title, mode);
    for outcome in &summary.outcomes {
        match &outcome.destination {
            Some(dest) => println!("  [{}] {} -> {}", outcome.kind.as_str(), outcome.path.display(), dest.display()),
            None => println!("  [{}] {} {}", outcome.kind.as_str(), outcome.path.display(), outcome.details.join("; ")),
        }
    }
    println!(
        "\n{} succeeded, {} skipped, {} failed, {} bytes",
        summary.succeeded, summary.skipped, summary.failed, summary.bytes_affected
    );
}

async fn run_scan(
    engine: &Engine,
    root: &Path,
    options: ScanOptions,
    export: Option<&Path>,
    quarantine: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let session_id = scan_to_end(engine, root, options, quiet).await?;

    if let Some(path) = export {
        let records = engine.get_results(&session_id)?;
        export_csv(&records, path)?;
        info!("Exported {} records to {:?}", records.len(), path);
    }

    let quarantined = if quarantine {
        Some(engine.quarantine_session(&session_id, None)?)
    } else {
        None
    };

    let report = engine.report(&session_id)?;
    if json {
        print_json(&serde_json::json!({ "report": report, "quarantine": quarantined }))?;
    } else {
        print_report(&report);
        if let Some(summary) = &quarantined {
            println!();
            print_summary("Quarantine", summary);
        }
    }
    Ok(())
}

async fn run_organize(
    engine: &Engine,
    root: &Path,
    base: &Path,
    options: &OrganizeOptions,
    apply: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let scan = ScanOptions {
        threat_scan: false,
        ..ScanOptions::default()
    };
    let session_id = scan_to_end(engine, root, scan, quiet).await?;

    let summary = if apply {
        engine.apply_organize(&session_id, base, options)?
    } else {
        engine.plan_organize(&session_id, base, options)?
    };

    if json {
        print_json(&summary)
    } else {
        print_summary(&format!("Organize into {}", base.display()), &summary);
        Ok(())
    }
}

async fn run_delete(
    engine: &Engine,
    root: &Path,
    rules: &RuleSet,
    apply: bool,
    yes: bool,
    json: bool,
) -> Result<()> {
    if rules.is_empty() {
        return Err(WardenError::Config(
            "No delete rules given; use --template or --ext/--older-than/...".to_string(),
        ));
    }

    let summary = if apply {
        if !yes {
            eprintln!("Permanent deletion needs --yes as well as --apply");
        }
        engine.apply_delete(root, rules, yes).await?
    } else {
        engine.plan_delete(root, rules).await?
    };

    if json {
        print_json(&summary)
    } else {
        print_summary(&format!("Delete under {}", root.display()), &summary);
        Ok(())
    }
}

fn run_quarantine_command(engine: &Engine, action: QuarantineCommands, json: bool) -> Result<()> {
    match action {
        QuarantineCommands::List => {
            let records = engine.list_quarantine()?;
            if json {
                return print_json(&records);
            }
            println!("Quarantine ({} files):", records.len());
            for r in records {
                println!(
                    "  {} {} [{} via {}] {} {}",
                    r.id,
                    r.quarantined_at.format("%Y-%m-%d %H:%M"),
                    r.verdict,
                    r.detection_method,
                    r.original_path.display(),
                    r.threat_name.as_deref().unwrap_or("")
                );
            }
        }
        QuarantineCommands::Restore { id } => {
            let record = engine.quarantine_action(&id, QuarantineAction::Restore)?;
            if json {
                return print_json(&record);
            }
            println!("Restored {}", record.original_path.display());
        }
        QuarantineCommands::Delete { id } => {
            let record = engine.quarantine_action(&id, QuarantineAction::Delete)?;
            if json {
                return print_json(&record);
            }
            println!("Deleted quarantined copy of {}", record.original_path.display());
        }
        QuarantineCommands::Summary => {
            let summary = engine.threat_summary()?;
            if json {
                return print_json(&summary);
            }
            for (name, count) in summary {
                println!("  {:<40} {}", name, count);
            }
        }
    }
    Ok(())
}

fn run_classify(config: AppConfig, path: &Path, json: bool) -> Result<()> {
    let extractor = FsFeatureExtractor::new(config.scan.sample_bytes);
    let file = extractor.extract(path, Utc::now())?;
    let engine = Engine::from_config(config)?;
    let classification = engine.classify(&file.features);

    if json {
        return print_json(&serde_json::json!({
            "path": path,
            "features": file.features,
            "classification": classification,
        }));
    }
    println!(
        "{}: {} ({:.0}%, {})",
        path.display(),
        classification.category,
        classification.confidence * 100.0,
        classification.method
    );
    Ok(())
}

fn run_audit(config: &AppConfig, session: Option<&str>, limit: usize, json: bool) -> Result<()> {
    let log = JsonlAuditSink::new(PathBuf::from(&config.audit.path));
    let mut events = match session {
        Some(id) => log.for_session(id)?,
        None => log.get_recent(if limit == 0 { usize::MAX } else { limit })?,
    };
    if session.is_some() && limit > 0 && events.len() > limit {
        events.drain(..events.len() - limit);
    }

    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No audit events in {}", log.path().display());
        return Ok(());
    }
    for event in &events {
        println!(
            "{} {:<38} {:<10} {:<24} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.session_id,
            event.action,
            event.outcome,
            event.file_path.display()
        );
    }
    Ok(())
}

async fn run_train(
    engine: &Engine,
    root: Option<PathBuf>,
    csv: Option<PathBuf>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let samples = match (csv, root) {
        (Some(csv), _) => load_training_csv(&csv, Utc::now())?,
        (None, Some(root)) => {
            let options = ScanOptions {
                use_ml: false,
                threat_scan: false,
                ..ScanOptions::default()
            };
            let session_id = scan_to_end(engine, &root, options, quiet).await?;
            engine.training_samples(&session_id)?
        }
        (None, None) => {
            return Err(WardenError::Config("train needs a directory or --csv".to_string()));
        }
    };

    let info = engine.train(&samples)?;
    if json {
        return print_json(&info);
    }
    println!(
        "Trained {} on {} samples ({} classes), training accuracy {:.1}%",
        info.kind,
        info.samples,
        info.classes.len(),
        info.training_accuracy * 100.0
    );
    println!("Saved to {}", engine.config().classifier.model_path);
    Ok(())
}

fn run_history(engine: &Engine, limit: usize, json: bool) -> Result<()> {
    let scans = engine.scan_history(limit)?;
    if json {
        return print_json(&scans);
    }
    println!("Recent scans ({}):", scans.len());
    for s in scans {
        println!(
            "  {} {} {} [{}] {} files, {} failures",
            s.finished_at.format("%Y-%m-%d %H:%M"),
            s.session_id,
            s.root,
            s.state,
            s.files,
            s.failures
        );
    }
    Ok(())
}

fn run_status(engine: &Engine, json: bool) -> Result<()> {
    let config = engine.config();
    let model = engine.model_info();
    let quarantined = engine.list_quarantine()?.len();

    if json {
        return print_json(&serde_json::json!({
            "model": model,
            "quarantined": quarantined,
            "threat_scanning": config.threat.enabled,
            "virustotal": config.threat.virustotal.api_key.is_some(),
            "heuristic": config.threat.heuristic,
        }));
    }

    println!("Filewarden v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");
    match model {
        Some(info) => println!(
            "Model: {} ({} samples, {} classes)",
            info.kind,
            info.samples,
            info.classes.len()
        ),
        None => println!("Model: none (extension table only)"),
    }
    println!("Quarantined files: {}", quarantined);
    if config.threat.enabled {
        println!(
            "Threats: ClamAV {}:{}{}, VirusTotal {}",
            config.threat.clamav.host,
            config.threat.clamav.port,
            if config.threat.clamav.enabled { "" } else { " (disabled)" },
            if config.threat.virustotal.api_key.is_some() { "configured" } else { "not configured" }
        );
        if config.threat.heuristic {
            println!("  Anomaly heuristic: above {:.2}", config.threat.anomaly_threshold);
        }
        println!("  Quarantine at: {}", config.threat.quarantine_at);
    } else {
        println!("Threats: disabled");
    }
    Ok(())
}

fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output, force } => {
            if output.exists() && !force {
                return Err(WardenError::Config(format!(
                    "{:?} already exists. Use --force to overwrite",
                    output
                )));
            }
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Database: {}", config.database.path);
            println!("  Quarantine: {}", config.quarantine.directory);
            println!("  Model: {}", config.classifier.model_path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_scan_command() {
        let cli = Cli::try_parse_from([
            "filewarden", "scan", "/tmp/data", "--no-threats", "--template", "temp_files"
        ]).unwrap();

        match cli.command {
            Commands::Scan { root, no_threats, rules, .. } => {
                assert!(no_threats);
                assert_eq!(root, PathBuf::from("/tmp/data"));
                assert_eq!(rules.to_rule_set().unwrap().groups.len(), 1);
            }
            _ => panic!("Expected Scan command"),
        }
    }

    #[test]
    fn test_cli_audit_command() {
        let cli = Cli::try_parse_from(["filewarden", "audit", "--session", "abc", "-n", "5"]).unwrap();
        match cli.command {
            Commands::Audit { session, limit } => {
                assert_eq!(session.as_deref(), Some("abc"));
                assert_eq!(limit, 5);
            }
            _ => panic!("Expected Audit command"),
        }
    }

    #[test]
    fn test_cli_organize_defaults_to_dry_run() {
        let cli = Cli::try_parse_from([
            "filewarden", "organize", "/tmp/data", "--category", "images"
        ]).unwrap();

        match cli.command {
            Commands::Organize { apply, category, .. } => {
                assert!(!apply);
                assert_eq!(category, vec![Category::Images]);
            }
            _ => panic!("Expected Organize command"),
        }
    }

    #[test]
    fn test_rule_args_combine_templates_and_custom() {
        let args = RuleArgs {
            template: vec!["old_logs".into()],
            extensions: vec!["bak".into()],
            older_than: Some(30),
            ..RuleArgs::default()
        };
        let rules = args.to_rule_set().unwrap();
        assert_eq!(rules.groups.len(), 2);
        assert_eq!(rules.groups[1].older_than_days, Some(30));

        let bad = RuleArgs { template: vec!["nope".into()], ..RuleArgs::default() };
        assert!(bad.to_rule_set().is_err());
    }

    #[test]
    fn test_cli_train_requires_source() {
        assert!(Cli::try_parse_from(["filewarden", "train"]).is_err());
        assert!(Cli::try_parse_from(["filewarden", "train", "--csv", "scan.csv"]).is_ok());
    }
}

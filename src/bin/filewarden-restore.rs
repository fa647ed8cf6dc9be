// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Filewarden Restore Utility
//!
//! Moves quarantined files back to where they were found.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use filewarden::actions::{Quarantine, QuarantineRecord};
use filewarden::db::Database;
use filewarden::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "filewarden-restore")]
#[command(version)]
#[command(about = "Restore files from the Filewarden quarantine")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "filewarden.json")]
    config: PathBuf,

    /// Restore this record only
    #[arg(long, conflicts_with_all = ["session", "count"])]
    id: Option<String>,

    /// Restore records from this scan session
    #[arg(long)]
    session: Option<String>,

    /// Number of records to restore, newest first (0 for all)
    #[arg(short = 'n', long, default_value = "1")]
    count: usize,

    /// Dry run - show what would be restored without doing it
    #[arg(long)]
    dry_run: bool,

    /// List quarantined files
    #[arg(long)]
    list: bool,
}

fn select(records: Vec<QuarantineRecord>, args: &Args) -> anyhow::Result<Vec<QuarantineRecord>> {
    if let Some(id) = &args.id {
        let found: Vec<_> = records.into_iter().filter(|r| &r.id == id).collect();
        if found.is_empty() {
            bail!("No quarantine record {}", id);
        }
        return Ok(found);
    }

    let mut records: Vec<_> = records
        .into_iter()
        .filter(|r| match &args.session {
            Some(session) => r.session_id.as_deref() == Some(session.as_str()),
            None => true,
        })
        .collect();
    if args.count > 0 {
        records.truncate(args.count);
    }
    Ok(records)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {:?}", args.config))?;
    let db = Database::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path))?;
    let quarantine = Quarantine::new(config.quarantine_dir(), Arc::new(db));

    let records = quarantine.list()?;
    if records.is_empty() {
        println!("Quarantine is empty.");
        return Ok(());
    }

    if args.list {
        println!("Quarantine ({} entries):", records.len());
        println!("{:-<80}", "");
        for (i, r) in records.iter().enumerate() {
            println!(
                "{:3}. [{}] {} ({}, {})",
                i + 1,
                r.quarantined_at.format("%Y-%m-%d %H:%M:%S"),
                r.original_path.display(),
                r.verdict,
                r.detection_method
            );
            println!("     id: {}  threat: {}", r.id, r.threat_name.as_deref().unwrap_or("-"));
        }
        return Ok(());
    }

    let selected = select(records, &args)?;
    println!(
        "{}Restoring {} file(s)...",
        if args.dry_run { "[DRY RUN] " } else { "" },
        selected.len()
    );

    let mut restored = 0;
    let mut failed = 0;

    for record in &selected {
        if record.original_path.exists() {
            eprintln!("  Skip: {} (original path already exists)", record.original_path.display());
            failed += 1;
            continue;
        }

        if args.dry_run {
            println!(
                "  Would restore: {} -> {}",
                record.quarantine_path.display(),
                record.original_path.display()
            );
            continue;
        }

        match quarantine.restore(&record.id) {
            Ok(_) => {
                println!("  Restored: {}", record.original_path.display());
                restored += 1;
            }
            Err(e) => {
                eprintln!("  Failed: {} ({})", record.original_path.display(), e);
                failed += 1;
            }
        }
    }

    println!();
    if args.dry_run {
        println!("Dry run complete. {} file(s) would be restored.", selected.len() - failed);
    } else {
        println!("Done. {} restored, {} failed/skipped.", restored, failed);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use filewarden::{DetectionMethod, ThreatVerdict};

    fn record(id: &str, session: &str) -> QuarantineRecord {
        QuarantineRecord {
            id: id.to_string(),
            original_path: PathBuf::from(format!("/data/{}", id)),
            quarantine_path: PathBuf::from(format!("/q/{}", id)),
            size: 1,
            content_hash: String::new(),
            detection_method: DetectionMethod::Clamav,
            verdict: ThreatVerdict::High,
            threat_name: None,
            session_id: Some(session.to_string()),
            quarantined_at: Utc::now(),
        }
    }

    #[test]
    fn test_select_by_session_and_count() {
        let records = vec![record("a", "s1"), record("b", "s2"), record("c", "s1")];
        let args = Args::try_parse_from(["filewarden-restore", "--session", "s1", "-n", "0"]).unwrap();
        let picked = select(records.clone(), &args).unwrap();
        assert_eq!(picked.len(), 2);

        let args = Args::try_parse_from(["filewarden-restore"]).unwrap();
        assert_eq!(select(records.clone(), &args).unwrap()[0].id, "a");

        let args = Args::try_parse_from(["filewarden-restore", "--id", "zzz"]).unwrap();
        assert!(select(records, &args).is_err());
    }
}

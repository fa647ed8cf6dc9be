// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Scan orchestration
//!
//! Traversal is sequential; extraction, classification and threat assessment
//! for each file run on a bounded pool. Results come back through an ordered
//! buffer, so the record list follows traversal order regardless of which
//! worker finishes first.

pub mod admission;
pub mod progress;
pub mod session;
pub mod walk;

use futures_util::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::classifier::Classifier;
use crate::features::FeatureExtractor;
use crate::record::FileRecord;
use crate::threat::ThreatAssessor;
use crate::WardenError;

pub use admission::{Admission, OperationPermit};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use session::{ScanFailure, ScanOptions, ScanSession, ScanState};
pub use walk::{validate_root, WalkEvent, WalkFilter, WalkOptions};

/// Collaborators a scan runs with. The classifier carries the model
/// snapshot taken when the session started.
#[derive(Clone)]
pub struct ScanContext {
    pub extractor: Arc<dyn FeatureExtractor>,
    pub classifier: Classifier,
    pub assessor: Arc<dyn ThreatAssessor>,
    pub audit: Arc<dyn AuditSink>,
    pub filter: Arc<WalkFilter>,
    pub workers: usize,
    pub follow_symlinks: bool,
}

enum FileOutcome {
    Record(Box<FileRecord>),
    Failed(ScanFailure),
    Skipped,
}

/// Drive one session to a terminal state. The final state is published and
/// the permit released under the admission lock, so a waiter that wakes on
/// the terminal state can start the next operation straight away.
pub async fn run(session: Arc<ScanSession>, ctx: ScanContext, permit: OperationPermit) {
    session.begin();
    info!("Scan {} started at {:?}", session.id(), session.root());
    ctx.audit.record(&AuditEvent::new(
        session.id(),
        session.root(),
        "scan",
        "started",
    ));

    let (tx, rx) = mpsc::channel::<WalkEvent>(ctx.workers.max(1) * 4);
    let walker = {
        let session = Arc::clone(&session);
        let filter = Arc::clone(&ctx.filter);
        let options = WalkOptions {
            recursive: session.options().recursive,
            follow_symlinks: ctx.follow_symlinks,
            max_files: session.options().max_files,
        };
        tokio::task::spawn_blocking(move || {
            walk::walk(
                session.root(),
                options,
                &filter,
                session.cancel_token(),
                |event| tx.blocking_send(event).is_ok(),
            );
        })
    };

    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    });

    let workers = ctx.workers.max(1);
    let outcomes = events
        .map(|event| {
            let session = Arc::clone(&session);
            let ctx = ctx.clone();
            async move { handle_event(event, &session, &ctx).await }
        })
        .buffered(workers);
    futures_util::pin_mut!(outcomes);

    while let Some(outcome) = outcomes.next().await {
        match outcome {
            FileOutcome::Record(record) => session.push_record(*record),
            FileOutcome::Failed(failure) => session.push_failure(failure),
            FileOutcome::Skipped => {}
        }
    }

    if let Err(e) = walker.await {
        error!("Walker task for scan {} panicked: {}", session.id(), e);
        session.set_fatal(format!("walker task failed: {}", e));
    }
    check_root(&session);

    let final_state = if session.fatal_error().is_some() {
        ScanState::Failed
    } else if session.is_cancelled() {
        ScanState::Cancelled
    } else {
        ScanState::Completed
    };

    let snapshot = session.snapshot();
    info!(
        "Scan {} {}: {} files, {} bytes, {} failures in {:.2}s",
        session.id(),
        final_state,
        snapshot.files_seen,
        snapshot.bytes_seen,
        snapshot.failures,
        snapshot.elapsed_secs
    );
    ctx.audit.record(&AuditEvent::new(
        session.id(),
        session.root(),
        "scan",
        &final_state.to_string(),
    ));

    permit.release_with(|| session.finish(final_state));
}

/// A root that vanished mid-scan fails the session instead of leaving a
/// trail of per-file errors
fn check_root(session: &ScanSession) {
    if session.fatal_error().is_some() || session.root().is_dir() {
        return;
    }
    let error = WardenError::InvalidRoot {
        path: session.root().to_path_buf(),
        reason: "root disappeared during the scan".to_string(),
    };
    error!("Scan {}: {}", session.id(), error);
    session.set_fatal(error.to_string());
    session.cancel();
}

async fn handle_event(event: WalkEvent, session: &ScanSession, ctx: &ScanContext) -> FileOutcome {
    match event {
        WalkEvent::File(path) => {
            if session.is_cancelled() {
                return FileOutcome::Skipped;
            }
            match process_file(path.clone(), session, ctx).await {
                Ok(record) => {
                    session.progress().record_file(record.size);
                    FileOutcome::Record(Box::new(record))
                }
                Err(e) => {
                    warn!("Skipping {:?}: {}", path, e);
                    session.progress().record_failure();
                    check_root(session);
                    FileOutcome::Failed(ScanFailure {
                        path,
                        error: e.to_string(),
                    })
                }
            }
        }
        WalkEvent::EntryError { path, error } => {
            warn!("Skipping {:?}: {}", path, error);
            session.progress().record_failure();
            check_root(session);
            FileOutcome::Failed(ScanFailure {
                path,
                error: error.to_string(),
            })
        }
        WalkEvent::RootError(error) => {
            session.set_fatal(error.to_string());
            FileOutcome::Skipped
        }
    }
}

async fn process_file(
    path: PathBuf,
    session: &ScanSession,
    ctx: &ScanContext,
) -> crate::Result<FileRecord> {
    let extractor = Arc::clone(&ctx.extractor);
    let reference = session.started_at();
    let extracted = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&path, reference))
            .await
            .map_err(|e| WardenError::InvalidState(format!("extraction task failed: {}", e)))??
    };

    let classification = if session.options().use_ml {
        ctx.classifier.predict(&extracted.features)
    } else {
        crate::classifier::Classification::heuristic(&extracted.features)
    };

    let mut record = FileRecord::new(&extracted, classification);

    if session.options().threat_scan && ctx.assessor.is_enabled() {
        let assessment = ctx.assessor.assess(&path, &extracted.features).await?;
        if assessment.verdict > crate::threat::ThreatVerdict::None {
            debug!("{:?} assessed as {}", path, assessment.verdict);
        }
        record.apply_threat(assessment);
    }

    record.rule_match = session.options().rules.matches(&record, reference);
    Ok(record)
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! The engine call surface
//!
//! [`Engine`] owns the admission guard, the model snapshot and the retained
//! sessions. Scans run as spawned tasks; callers poll progress or await
//! [`Engine::wait`].

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actions::{
    ActionExecutor, OperationSummary, OrganizeOptions, Quarantine, QuarantineAction,
    QuarantineRecord, QuarantineStore,
};
use crate::audit::{AuditSink, FanoutAuditSink, JsonlAuditSink, TracingAuditSink};
use crate::classifier::{
    CategoryModel, CentroidModel, Classification, Classifier, FileModelSource, LabeledSample,
    ModelInfo, ModelSource,
};
use crate::config::AppConfig;
use crate::db::{Database, ScanHistoryEntry};
use crate::features::{in_temp_folder, FeatureExtractor, FeatureVector, FsFeatureExtractor, MimeClass};
use crate::record::{FileRecord, RecordStatus};
use crate::report::ScanReport;
use crate::rules::RuleSet;
use crate::scan::{
    self, validate_root, Admission, ProgressSnapshot, ScanContext, ScanFailure, ScanOptions,
    ScanSession, ScanState, WalkEvent, WalkFilter, WalkOptions,
};
use crate::threat::{CompositeAssessor, ThreatAssessor, ThreatVerdict};
use crate::{Result, WardenError};

/// Assembles an [`Engine`], substituting collaborators where given
pub struct EngineBuilder {
    config: AppConfig,
    extractor: Option<Arc<dyn FeatureExtractor>>,
    assessor: Option<Arc<dyn ThreatAssessor>>,
    audit: Option<Arc<dyn AuditSink>>,
    store: Option<Arc<dyn QuarantineStore>>,
    model_source: Option<Arc<dyn ModelSource>>,
    history: Option<Database>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            extractor: None,
            assessor: None,
            audit: None,
            store: None,
            model_source: None,
            history: None,
        }
    }

    pub fn extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn assessor(mut self, assessor: Arc<dyn ThreatAssessor>) -> Self {
        self.assessor = Some(assessor);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn quarantine_store(mut self, store: Arc<dyn QuarantineStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn model_source(mut self, source: Arc<dyn ModelSource>) -> Self {
        self.model_source = Some(source);
        self
    }

    /// Database used for the quarantine store and scan history
    pub fn database(mut self, db: Database) -> Self {
        if self.store.is_none() {
            self.store = Some(Arc::new(db.clone()));
        }
        self.history = Some(db);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let mut history = self.history;
        let store: Arc<dyn QuarantineStore> = match self.store {
            Some(store) => store,
            None => {
                let db = Database::open(&config.database.path)?;
                history = Some(db.clone());
                Arc::new(db)
            }
        };

        let extractor = self
            .extractor
            .unwrap_or_else(|| Arc::new(FsFeatureExtractor::new(config.scan.sample_bytes)));
        let assessor = match self.assessor {
            Some(assessor) => assessor,
            None => CompositeAssessor::from_config(&config.threat)?,
        };
        let audit = self.audit.unwrap_or_else(|| {
            Arc::new(FanoutAuditSink::new(vec![
                Arc::new(JsonlAuditSink::new(PathBuf::from(&config.audit.path))),
                Arc::new(TracingAuditSink),
            ]))
        });
        let model_source = self.model_source.or_else(|| {
            config
                .classifier
                .use_ml
                .then(|| Arc::new(FileModelSource::new(&config.classifier.model_path)) as Arc<dyn ModelSource>)
        });

        let filter = Arc::new(WalkFilter::new(
            &config.scan.deny_prefixes,
            &config.scan.exclude_patterns,
        )?);
        let quarantine = Quarantine::new(config.quarantine_dir(), store);
        let executor = ActionExecutor::new(Arc::clone(&audit), quarantine);

        let engine = Engine {
            config,
            extractor,
            assessor,
            audit,
            executor,
            model_source,
            model: RwLock::new(None),
            history,
            filter,
            admission: Admission::new(),
            sessions: RwLock::new(HashMap::new()),
        };

        if let Err(e) = engine.reload_model() {
            warn!("No classification model loaded: {}", e);
        }
        Ok(engine)
    }
}

pub struct Engine {
    config: AppConfig,
    extractor: Arc<dyn FeatureExtractor>,
    assessor: Arc<dyn ThreatAssessor>,
    audit: Arc<dyn AuditSink>,
    executor: ActionExecutor,
    model_source: Option<Arc<dyn ModelSource>>,
    model: RwLock<Option<Arc<dyn CategoryModel>>>,
    history: Option<Database>,
    filter: Arc<WalkFilter>,
    admission: Admission,
    sessions: RwLock<HashMap<String, Arc<ScanSession>>>,
}

impl Engine {
    /// Engine with every collaborator built from `config`
    pub fn from_config(config: AppConfig) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: AppConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn classifier(&self, use_ml: bool) -> Classifier {
        let model = if use_ml && self.config.classifier.use_ml {
            self.model.read().unwrap_or_else(PoisonError::into_inner).clone()
        } else {
            None
        };
        Classifier::new(model, self.config.classifier.confidence_threshold)
    }

    // --- scanning ---

    /// Start a scan of `root`. Must be called inside a Tokio runtime.
    pub fn start_scan(&self, root: impl AsRef<Path>, options: ScanOptions) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let permit = self.admission.try_acquire(&id)?;
        let root = validate_root(root.as_ref(), &self.filter)?;

        let session = Arc::new(ScanSession::new(id.clone(), root, options));
        let ctx = ScanContext {
            extractor: Arc::clone(&self.extractor),
            classifier: self.classifier(session.options().use_ml),
            assessor: Arc::clone(&self.assessor),
            audit: Arc::clone(&self.audit),
            filter: Arc::clone(&self.filter),
            workers: self.config.scan.workers,
            follow_symlinks: self.config.scan.follow_symlinks,
        };

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::clone(&session));

        let history = self.history.clone();
        tokio::spawn(async move {
            scan::run(Arc::clone(&session), ctx, permit).await;
            if let Some(db) = history {
                let entry = ScanReport::from_session(&session).history_entry();
                if let Err(e) = db.insert_scan(&entry) {
                    warn!("Scan history not saved for {}: {}", session.id(), e);
                }
            }
        });

        Ok(id)
    }

    pub fn session(&self, session_id: &str) -> Result<Arc<ScanSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .ok_or_else(|| WardenError::SessionNotFound(session_id.to_string()))
    }

    pub fn get_progress(&self, session_id: &str) -> Result<ProgressSnapshot> {
        Ok(self.session(session_id)?.snapshot())
    }

    /// Records in traversal order; partial while the scan is running
    pub fn get_results(&self, session_id: &str) -> Result<Vec<FileRecord>> {
        Ok(self.session(session_id)?.records())
    }

    pub fn get_failures(&self, session_id: &str) -> Result<Vec<ScanFailure>> {
        Ok(self.session(session_id)?.failures())
    }

    pub fn report(&self, session_id: &str) -> Result<ScanReport> {
        Ok(ScanReport::from_session(&*self.session(session_id)?))
    }

    pub fn cancel_scan(&self, session_id: &str) -> Result<()> {
        let session = self.session(session_id)?;
        info!("Cancelling scan {}", session_id);
        session.cancel();
        Ok(())
    }

    /// Wait for a session to reach a terminal state
    pub async fn wait(&self, session_id: &str) -> Result<ScanState> {
        let session = self.session(session_id)?;
        Ok(session.wait().await)
    }

    pub fn scan_history(&self, limit: usize) -> Result<Vec<ScanHistoryEntry>> {
        match &self.history {
            Some(db) => db.recent_scans(limit),
            None => Ok(Vec::new()),
        }
    }

    fn finished_session(&self, session_id: &str) -> Result<Arc<ScanSession>> {
        let session = self.session(session_id)?;
        if !session.state().is_finished() {
            return Err(WardenError::InvalidState(format!(
                "session {} is still {}",
                session_id,
                session.state()
            )));
        }
        Ok(session)
    }

    // --- organize ---

    /// Dry-run organize of a finished session's records
    pub fn plan_organize(
        &self,
        session_id: &str,
        destination_base: impl AsRef<Path>,
        options: &OrganizeOptions,
    ) -> Result<OperationSummary> {
        self.organize(session_id, destination_base.as_ref(), options, true)
    }

    pub fn apply_organize(
        &self,
        session_id: &str,
        destination_base: impl AsRef<Path>,
        options: &OrganizeOptions,
    ) -> Result<OperationSummary> {
        self.organize(session_id, destination_base.as_ref(), options, false)
    }

    fn organize(
        &self,
        session_id: &str,
        base: &Path,
        options: &OrganizeOptions,
        dry_run: bool,
    ) -> Result<OperationSummary> {
        let session = self.finished_session(session_id)?;
        let _permit = self.admission.try_acquire(&format!("organize-{}", session_id))?;
        let mut records = session.records_mut();
        Ok(self
            .executor
            .organize(session_id, &mut records, base, options, dry_run))
    }

    // --- delete ---

    /// Files under `root` that `rules` would delete, with reasons
    pub async fn plan_delete(&self, root: impl AsRef<Path>, rules: &RuleSet) -> Result<OperationSummary> {
        self.delete(root.as_ref(), rules, true).await
    }

    /// Permanently delete matching files. `confirm` must be true.
    pub async fn apply_delete(
        &self,
        root: impl AsRef<Path>,
        rules: &RuleSet,
        confirm: bool,
    ) -> Result<OperationSummary> {
        if !confirm {
            return Err(WardenError::InvalidState(
                "permanent delete requires explicit confirmation".to_string(),
            ));
        }
        self.delete(root.as_ref(), rules, false).await
    }

    async fn delete(&self, root: &Path, rules: &RuleSet, dry_run: bool) -> Result<OperationSummary> {
        let operation_id = format!("delete-{}", Uuid::new_v4());
        let _permit = self.admission.try_acquire(&operation_id)?;
        let root = validate_root(root, &self.filter)?;

        if rules.is_empty() {
            warn!("Delete called with an empty rule set; nothing matches");
            return Ok(OperationSummary::new(dry_run));
        }

        let reference = Utc::now();
        let (mut records, failures) = self.collect_records(root, reference).await?;
        let mut summary = self
            .executor
            .delete(&operation_id, &mut records, rules, reference, dry_run);
        summary.failed += failures;
        Ok(summary)
    }

    /// Walk `root` and extract records without threat checks
    async fn collect_records(
        &self,
        root: PathBuf,
        reference: DateTime<Utc>,
    ) -> Result<(Vec<FileRecord>, usize)> {
        let extractor = Arc::clone(&self.extractor);
        let filter = Arc::clone(&self.filter);
        let follow_symlinks = self.config.scan.follow_symlinks;

        tokio::task::spawn_blocking(move || {
            let mut records = Vec::new();
            let mut failures = 0usize;
            let mut fatal = None;
            let options = WalkOptions {
                recursive: true,
                follow_symlinks,
                max_files: None,
            };
            scan::walk::walk(&root, options, &filter, &CancellationToken::new(), |event| {
                match event {
                    WalkEvent::File(path) => match extractor.extract(&path, reference) {
                        Ok(file) => records.push(FileRecord::new(
                            &file,
                            Classification::heuristic(&file.features),
                        )),
                        Err(e) => {
                            warn!("Skipping {:?}: {}", path, e);
                            failures += 1;
                        }
                    },
                    WalkEvent::EntryError { path, error } => {
                        warn!("Skipping {:?}: {}", path, error);
                        failures += 1;
                    }
                    WalkEvent::RootError(error) => fatal = Some(error),
                }
                true
            });
            match fatal {
                Some(error) => Err(error),
                None => Ok((records, failures)),
            }
        })
        .await
        .map_err(|e| WardenError::InvalidState(format!("walk task failed: {}", e)))?
    }

    // --- quarantine ---

    /// Quarantine every record of a finished session at or above
    /// `min_verdict` (default: the configured level)
    pub fn quarantine_session(
        &self,
        session_id: &str,
        min_verdict: Option<ThreatVerdict>,
    ) -> Result<OperationSummary> {
        let level = min_verdict.unwrap_or(self.config.threat.quarantine_at);
        if level == ThreatVerdict::None {
            return Err(WardenError::InvalidState(
                "refusing to quarantine files with no threat verdict".to_string(),
            ));
        }

        let session = self.finished_session(session_id)?;
        let _permit = self.admission.try_acquire(&format!("quarantine-{}", session_id))?;
        let mut records = session.records_mut();

        let mut summary = OperationSummary::new(false);
        for record in records.iter_mut().filter(|r| r.threat >= level) {
            summary.push(self.executor.quarantine_record(session_id, record));
        }
        info!(
            "Quarantined {} files from session {} ({} failed)",
            summary.succeeded, session_id, summary.failed
        );
        Ok(summary)
    }

    /// Quarantine one recorded file of a finished session by path
    pub fn quarantine_path(&self, session_id: &str, path: &Path) -> Result<QuarantineRecord> {
        let session = self.finished_session(session_id)?;
        let _permit = self.admission.try_acquire(&format!("quarantine-{}", session_id))?;
        let mut records = session.records_mut();
        let record = records
            .iter_mut()
            .find(|r| r.path == path)
            .ok_or_else(|| WardenError::RecordNotFound(path.display().to_string()))?;

        self.executor.quarantine_entry(session_id, record)
    }

    /// Restore or permanently delete a quarantined file
    pub fn quarantine_action(&self, record_id: &str, action: QuarantineAction) -> Result<QuarantineRecord> {
        let _permit = self.admission.try_acquire(&format!("quarantine-{}", record_id))?;
        let record = self.executor.quarantine_action(record_id, action)?;

        if action == QuarantineAction::Restore {
            if let Some(session_id) = &record.session_id {
                if let Ok(session) = self.session(session_id) {
                    let mut records = session.records_mut();
                    if let Some(entry) = records.iter_mut().find(|r| {
                        r.path == record.original_path && r.status == RecordStatus::Quarantined
                    }) {
                        entry.restore(record.original_path.clone());
                    }
                }
            }
        }
        Ok(record)
    }

    pub fn list_quarantine(&self) -> Result<Vec<QuarantineRecord>> {
        self.executor.quarantine().list()
    }

    pub fn threat_summary(&self) -> Result<BTreeMap<String, usize>> {
        self.executor.quarantine().threat_summary()
    }

    // --- classification ---

    /// Classify with the current model snapshot
    pub fn classify(&self, features: &FeatureVector) -> Classification {
        self.classifier(true).predict(features)
    }

    /// Reload from the model source; running sessions keep their snapshot
    pub fn reload_model(&self) -> Result<Option<ModelInfo>> {
        let Some(source) = &self.model_source else {
            return Ok(None);
        };
        let model = source.load_model()?;
        let info = model.as_ref().map(|m| m.info());
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = model;
        Ok(info)
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|m| m.info())
    }

    /// Fit a model, save it to the configured path and make it current
    pub fn train(&self, samples: &[LabeledSample]) -> Result<ModelInfo> {
        let model = CentroidModel::fit(samples)?;
        model.save(Path::new(&self.config.classifier.model_path))?;
        let info = model.info();
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(model));
        Ok(info)
    }

    /// Labelled samples from a finished session, labelled by the extension table
    pub fn training_samples(&self, session_id: &str) -> Result<Vec<LabeledSample>> {
        let session = self.finished_session(session_id)?;
        let reference = session.started_at();
        let samples = session
            .records()
            .iter()
            .map(|r| {
                LabeledSample::self_labeled(FeatureVector {
                    size: r.size,
                    extension: r.extension.clone(),
                    entropy: r.entropy,
                    mime: MimeClass::guess(&r.path),
                    age_days: r.age_days(reference),
                    path_depth: r.path.components().count(),
                    in_temp_folder: in_temp_folder(&r.path),
                })
            })
            .collect();
        Ok(samples)
    }
}

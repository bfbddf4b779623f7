use crate::{
    aggregator::SharedResults,
    cleanup::TextCleanup,
    config::Config,
    document::{Document, DocumentEntry, DocumentId, ExtractionState},
    engine::{EngineDiag, EngineHandle, Progress, types::LABEL_STARTING},
    error::{Error, Result},
    registry::SharedRegistry,
    router::{self, Strategy},
};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Starting,
    Running,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveMode {
    /// Keep an already produced result in the export basket.
    EntryOnly,
    EntryAndResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub done: usize,
    pub failed: usize,
}

pub struct BatchOrchestrator {
    registry: SharedRegistry,
    results: SharedResults,
    // Held for the whole run; recognition is never issued concurrently.
    engine: tokio::sync::Mutex<EngineHandle>,
    language: String,
    separator: String,
    cleanup: TextCleanup,
    state: Mutex<RunState>,
    progress: watch::Sender<Progress>,
}

impl BatchOrchestrator {
    pub fn new(cfg: &Config, engine: EngineHandle) -> Result<Self> {
        let (progress, _) = watch::channel(Progress::idle());
        Ok(Self {
            registry: SharedRegistry::new(),
            results: SharedResults::new(),
            engine: tokio::sync::Mutex::new(engine),
            language: cfg.engine.language.clone(),
            separator: cfg.export.separator.clone(),
            cleanup: TextCleanup::new(&cfg.cleanup)?,
            state: Mutex::new(RunState::Idle),
            progress,
        })
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn results(&self) -> &SharedResults {
        &self.results
    }

    pub fn state(&self) -> RunState {
        *self.lock_state()
    }

    pub fn progress(&self) -> Progress {
        self.progress.borrow().clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn submit(&self, document: Document) -> DocumentId {
        let name = document.name.clone();
        let digest = document.digest.clone();
        let id = self.registry.add(document);
        info!(%id, %name, %digest, "document submitted");
        id
    }

    /// Returns whether an entry was removed. A no-op for unknown identities.
    pub fn remove_document(&self, id: DocumentId, mode: RemoveMode) -> bool {
        let removed = self.registry.remove(id).is_some();
        if mode == RemoveMode::EntryAndResult {
            self.results.remove(id);
        }
        removed
    }

    pub fn remove_result(&self, id: DocumentId) -> bool {
        self.results.remove(id).is_some()
    }

    pub fn entries(&self) -> Vec<DocumentEntry> {
        self.registry.list()
    }

    pub fn export_all(&self) -> Result<Vec<u8>> {
        self.results.export_all(&self.separator)
    }

    /// Runs one batch over the live registry.
    ///
    /// Every entry present when the run starts is extracted again, whatever
    /// its state, and the previous results are dropped. Entries added while
    /// the run is going are picked up if still pending when reached, removed
    /// entries are skipped. A failing document is recorded on its entry and
    /// the batch moves on.
    pub async fn start(&self) -> Result<RunSummary> {
        self.claim()?;
        self.run_claimed().await
    }

    /// Claims the run synchronously so a spawned batch cannot lose a race
    /// with another `start`. Dropping the returned run unpolled releases it.
    pub fn begin(self: &Arc<Self>) -> Result<ClaimedRun> {
        self.claim()?;
        Ok(ClaimedRun {
            orchestrator: Arc::clone(self),
            started: false,
        })
    }

    fn claim(&self) -> Result<()> {
        let mut state = self.lock_state();
        if !matches!(*state, RunState::Idle | RunState::Failed) {
            return Err(Error::AlreadyRunning);
        }
        *state = RunState::Starting;
        Ok(())
    }

    async fn run_claimed(&self) -> Result<RunSummary> {
        let mut reset = StateReset::armed(&self.state, &self.registry);

        self.publish(Progress::new(0.0, LABEL_STARTING));
        info!("batch starting entries={}", self.registry.len());

        let mut engine = self.engine.lock().await;
        if let Err(err) = self.prepare_engine(&mut engine).await {
            error!("engine unavailable, batch aborted: {err}");
            reset.finish(RunState::Failed);
            return Err(err);
        }
        self.set_state(RunState::Running);

        let cutoff = self.registry.last_id();
        self.results.clear();

        let mut summary = RunSummary::default();
        let mut cursor = None;

        while let Some(entry) = self.registry.next_for_run(cursor, cutoff) {
            cursor = Some(entry.id);
            if !self.registry.set_state(entry.id, ExtractionState::Extracting) {
                continue;
            }
            reset.in_flight = Some(entry.id);
            summary.attempted += 1;

            let doc = &entry.document;
            info!(id = %entry.id, name = %doc.name, kind = %doc.kind, "extracting");

            let progress = &self.progress;
            let publish = move |p: Progress| {
                progress.send_replace(p);
            };
            match self.extract_with(&mut engine, doc, publish).await {
                Ok(text) => {
                    if !self.registry.set_state(entry.id, ExtractionState::Done) {
                        debug!(id = %entry.id, "entry removed during extraction; result kept");
                    }
                    self.results.put(entry.id, text);
                    summary.done += 1;
                }
                Err(err) => {
                    warn!(id = %entry.id, name = %doc.name, "extraction failed: {err}");
                    self.registry
                        .set_state(entry.id, ExtractionState::Failed(err.to_string()));
                    summary.failed += 1;
                }
            }
            reset.in_flight = None;
        }

        reset.finish(RunState::Idle);
        info!(
            attempted = summary.attempted,
            done = summary.done,
            failed = summary.failed,
            "batch finished"
        );
        Ok(summary)
    }

    /// Extracts a single document outside the registry.
    ///
    /// Recognition is refused while a batch holds the engine. Its progress is
    /// not published, the progress channel belongs to the batch.
    pub async fn extract_one(&self, document: &Document) -> Result<String> {
        match router::classify(document)? {
            Strategy::DirectText => router::extract_direct(document).await,
            Strategy::Recognition => {
                let mut engine = match self.engine.try_lock() {
                    Ok(engine) => engine,
                    Err(_) if self.batch_active() => return Err(Error::AlreadyRunning),
                    // Another single-document job; wait for it.
                    Err(_) => self.engine.lock().await,
                };
                if self.batch_active() {
                    return Err(Error::AlreadyRunning);
                }
                self.prepare_engine(&mut engine).await?;
                self.recognize(&mut engine, document, |_: Progress| {}).await
            }
        }
    }

    /// Releases the engine. Waits for a running batch to finish first.
    pub async fn shutdown(&self) -> Result<()> {
        let mut engine = self.engine.lock().await;
        engine.terminate().await
    }

    pub async fn doctor(&self) -> Result<EngineDiag> {
        let engine = self.engine.lock().await;
        engine.doctor().await
    }

    async fn prepare_engine(&self, engine: &mut EngineHandle) -> Result<()> {
        engine.load().await?;
        engine.configure_language(&self.language).await
    }

    async fn extract_with<F>(
        &self,
        engine: &mut EngineHandle,
        document: &Document,
        on_progress: F,
    ) -> Result<String>
    where
        F: Fn(Progress) + Send + Sync,
    {
        match router::classify(document)? {
            Strategy::DirectText => router::extract_direct(document).await,
            Strategy::Recognition => self.recognize(engine, document, on_progress).await,
        }
    }

    async fn recognize<F>(
        &self,
        engine: &mut EngineHandle,
        document: &Document,
        on_progress: F,
    ) -> Result<String>
    where
        F: Fn(Progress) + Send + Sync,
    {
        let text = engine.recognize(document.content(), on_progress).await?;
        Ok(self.cleanup.apply(&text))
    }

    fn batch_active(&self) -> bool {
        matches!(self.state(), RunState::Starting | RunState::Running)
    }

    fn publish(&self, progress: Progress) {
        self.progress.send_replace(progress);
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: RunState) {
        *self.lock_state() = next;
    }
}

/// A batch claimed by [`BatchOrchestrator::begin`], ready to be spawned.
pub struct ClaimedRun {
    orchestrator: Arc<BatchOrchestrator>,
    started: bool,
}

impl ClaimedRun {
    pub async fn run(mut self) -> Result<RunSummary> {
        self.started = true;
        self.orchestrator.run_claimed().await
    }
}

impl Drop for ClaimedRun {
    fn drop(&mut self) {
        if !self.started {
            self.orchestrator.set_state(RunState::Idle);
        }
    }
}

/// Puts the run state back to `Idle` if a run is dropped before finishing,
/// and the entry being extracted back to `Pending`.
struct StateReset<'a> {
    state: &'a Mutex<RunState>,
    registry: &'a SharedRegistry,
    in_flight: Option<DocumentId>,
    armed: bool,
}

impl<'a> StateReset<'a> {
    fn armed(state: &'a Mutex<RunState>, registry: &'a SharedRegistry) -> Self {
        Self {
            state,
            registry,
            in_flight: None,
            armed: true,
        }
    }

    fn finish(&mut self, next: RunState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
        self.armed = false;
    }
}

impl Drop for StateReset<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(id) = self.in_flight.take() {
            self.registry.set_state(id, ExtractionState::Pending);
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = RunState::Idle;
    }
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pipeline_core::{
    update, AttemptOutcome, ChapterRef, Effect, Job, JobKey, MangaRef, Msg, QueueEvent,
    QueueState,
};
use pipeline_logging::{pipeline_debug, pipeline_info, pipeline_warn};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::export::{export_job, ExportError, ExportSummary};
use crate::fetch::{PageFetcher, PageProgress, ProgressSink};
use crate::filename::chapter_dir;
use crate::library::LibraryNotifier;
use crate::net::ClientFactory;
use crate::snapshot::{QueueStore, SnapshotWriter};
use crate::source::SourceRegistry;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("the download engine must be created inside a tokio runtime")]
    NoRuntime,
}

#[derive(Debug, Clone)]
struct EngineSettings {
    download_root: PathBuf,
    export_dir: PathBuf,
    retry_base_delay: Duration,
    fail_fast_permanent: bool,
}

/// Queue state and the cancellation handle of every queued or active job,
/// always changed together under one lock.
struct Shared {
    state: QueueState,
    handles: HashMap<JobKey, CancellationToken>,
}

struct EngineInner {
    shared: Mutex<Shared>,
    /// Set while a job is claimed and executing.
    processing: AtomicBool,
    /// Numbers snapshots in the order they were taken.
    snapshot_version: AtomicU64,
    snapshots: Arc<SnapshotWriter>,
    sources: Arc<SourceRegistry>,
    fetcher: PageFetcher,
    library: Arc<dyn LibraryNotifier>,
    events: broadcast::Sender<QueueEvent>,
    settings: EngineSettings,
    runtime: Handle,
}

/// Single-flight chapter download queue.
///
/// Every transition goes through [`pipeline_core::update`]; this type executes the
/// returned effects. At most one job downloads at a time and the queue is
/// persisted after every change.
#[derive(Clone)]
pub struct DownloadEngine {
    inner: Arc<EngineInner>,
}

impl DownloadEngine {
    /// Build the engine and restore the persisted queue. Restored jobs wait for
    /// the first [`process_next`](Self::process_next), enqueue or resume.
    pub fn new(
        config: &PipelineConfig,
        sources: Arc<SourceRegistry>,
        factory: Arc<ClientFactory>,
        library: Arc<dyn LibraryNotifier>,
    ) -> Result<Self, EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = Self {
            inner: Arc::new(EngineInner {
                shared: Mutex::new(Shared {
                    state: QueueState::with_max_attempts(config.max_attempts),
                    handles: HashMap::new(),
                }),
                processing: AtomicBool::new(false),
                snapshot_version: AtomicU64::new(0),
                snapshots: Arc::new(SnapshotWriter::new(QueueStore::new(config.snapshot_path()))),
                sources,
                fetcher: PageFetcher::new(factory, config.page_concurrency, config.page_timeout()),
                library,
                events,
                settings: EngineSettings {
                    download_root: config.download_root.clone(),
                    export_dir: config.export_dir.clone(),
                    retry_base_delay: config.retry_base_delay(),
                    fail_fast_permanent: config.fail_fast_permanent,
                },
                runtime,
            }),
        };

        if let Some(snapshot) = engine.inner.snapshots.store().load() {
            let effects = engine.apply(Msg::Restore(snapshot));
            engine.run_effects(
                effects
                    .into_iter()
                    .filter(|effect| *effect != Effect::ProcessNext)
                    .collect(),
            );
            pipeline_info!("Restored {} job(s) from snapshot", engine.jobs().len());
        }
        Ok(engine)
    }

    /// Queue a chapter. Returns `false` if it is already queued or downloading.
    pub fn enqueue(&self, manga: MangaRef, chapter: ChapterRef) -> bool {
        let label = format!("{} / {}", manga.title, chapter.name);
        let effects = self.apply(Msg::Enqueue { manga, chapter });
        let accepted = !effects.is_empty();
        if accepted {
            pipeline_info!("Queued {}", label);
        } else {
            pipeline_debug!("Ignoring duplicate enqueue of {}", label);
        }
        self.run_effects(effects);
        accepted
    }

    /// Claim and launch the next queued job unless one is running or the queue is paused.
    /// Never waits for the download itself.
    pub fn process_next(&self) {
        loop {
            if self
                .inner
                .processing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            let effects = self.apply(Msg::ClaimNext);
            if effects.iter().any(|effect| matches!(effect, Effect::Launch(_))) {
                self.run_effects(effects);
                return;
            }
            self.inner.processing.store(false, Ordering::SeqCst);
            // A job may have been enqueued between the claim and the release.
            if !self.lock().state.can_claim() {
                return;
            }
        }
    }

    pub fn pause(&self) {
        pipeline_info!("Pausing downloads");
        let effects = self.apply(Msg::Pause);
        self.run_effects(effects);
    }

    pub fn resume(&self) {
        pipeline_info!("Resuming downloads");
        let effects = self.apply(Msg::Resume);
        self.run_effects(effects);
    }

    /// Cancel a queued or active job, or remove a finished one from history.
    pub fn cancel(&self, key: &JobKey) -> bool {
        let effects = self.apply(Msg::Cancel { key: key.clone() });
        let found = !effects.is_empty();
        self.run_effects(effects);
        found
    }

    pub fn clear_history(&self) {
        let effects = self.apply(Msg::ClearHistory);
        self.run_effects(effects);
    }

    /// Copy of every job: history, then the active job, then the queue.
    pub fn jobs(&self) -> Vec<Job> {
        self.lock().state.jobs()
    }

    pub fn job(&self, key: &JobKey) -> Option<Job> {
        self.lock().state.find(key).cloned()
    }

    pub fn is_downloading(&self) -> bool {
        self.lock().state.active().is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().state.is_paused()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Package a completed chapter as a `.cbz` in the export folder.
    pub async fn export_cbz(&self, key: &JobKey) -> Result<ExportSummary, ExportError> {
        let job = self
            .job(key)
            .ok_or_else(|| ExportError::UnknownJob(key.to_string()))?;
        let root = self.inner.settings.download_root.clone();
        let export_dir = self.inner.settings.export_dir.clone();
        tokio::task::spawn_blocking(move || export_job(&job, &root, &export_dir))
            .await
            .map_err(|err| ExportError::Io(std::io::Error::other(err.to_string())))?
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one transition. Handle effects are applied under the same lock;
    /// the rest are returned for the caller to execute.
    fn apply(&self, msg: Msg) -> Vec<Effect> {
        let mut shared = self.lock();
        let state = std::mem::take(&mut shared.state);
        let (state, effects) = update(state, msg);
        shared.state = state;

        let mut deferred = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                Effect::CancelHandle(key) => {
                    if let Some(token) = shared.handles.get(&key) {
                        token.cancel();
                    }
                }
                Effect::RenewHandle(key) => {
                    if let Some(stale) = shared.handles.insert(key, CancellationToken::new()) {
                        stale.cancel();
                    }
                }
                Effect::DropHandle(key) => {
                    shared.handles.remove(&key);
                }
                other => deferred.push(other),
            }
        }
        deferred
    }

    fn handle_for(&self, key: &JobKey) -> CancellationToken {
        self.lock()
            .handles
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Persist => self.persist(),
                Effect::Launch(job) => {
                    let token = self.handle_for(&job.key());
                    let engine = self.clone();
                    self.inner.runtime.spawn(async move {
                        engine.execute(job, token).await;
                    });
                }
                Effect::Notify(event) => {
                    // No subscribers is fine.
                    let _ = self.inner.events.send(event);
                }
                Effect::ChapterDownloaded(job) => {
                    let library = self.inner.library.clone();
                    self.inner.runtime.spawn(async move {
                        if let Err(err) = library.chapter_downloaded(&job).await {
                            pipeline_warn!("Library update for {} failed: {}", job.key(), err);
                        }
                    });
                }
                Effect::ProcessNext => self.process_next(),
                // Retry delays are driven by `execute`; handles by `apply`.
                Effect::Retry { .. }
                | Effect::CancelHandle(_)
                | Effect::RenewHandle(_)
                | Effect::DropHandle(_) => {}
            }
        }
    }

    /// Snapshot under the state lock, write on the blocking pool.
    fn persist(&self) {
        let (version, snapshot) = {
            let shared = self.lock();
            let version = self.inner.snapshot_version.fetch_add(1, Ordering::SeqCst) + 1;
            (version, shared.state.snapshot())
        };
        let snapshots = self.inner.snapshots.clone();
        self.inner.runtime.spawn_blocking(move || {
            snapshots.write(version, &snapshot);
        });
    }

    async fn execute(&self, job: Job, token: CancellationToken) {
        let key = job.key();
        pipeline_info!("Downloading {} / {}", job.manga.title, job.chapter.name);
        loop {
            let outcome = if token.is_cancelled() {
                AttemptOutcome::Interrupted
            } else {
                self.attempt(&job, &token).await
            };
            let effects = self.apply(Msg::AttemptFinished {
                key: key.clone(),
                outcome,
            });
            let retry = effects.iter().find_map(|effect| match effect {
                Effect::Retry { attempt, .. } => Some(*attempt),
                _ => None,
            });
            self.run_effects(effects);

            let Some(attempt) = retry else {
                break;
            };
            let delay = self.inner.settings.retry_base_delay * attempt;
            pipeline_info!("Retrying {} in {:?} (after attempt {})", key, delay, attempt);
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let effects = self.apply(Msg::Finalize { key: key.clone() });
        if let Some(done) = self.job(&key) {
            pipeline_info!("Chapter {} finished as {}", key, done.status);
        }
        self.inner.processing.store(false, Ordering::SeqCst);
        self.run_effects(effects);
    }

    async fn attempt(&self, job: &Job, token: &CancellationToken) -> AttemptOutcome {
        let Some(source) = self.inner.sources.get(job.manga.source_id) else {
            return self.failed(format!("unknown source {}", job.manga.source_id), true);
        };

        let pages = tokio::select! {
            _ = token.cancelled() => return AttemptOutcome::Interrupted,
            pages = source.fetch_page_list(&job.chapter.url) => pages,
        };
        let pages = match pages {
            Ok(pages) => pages,
            Err(err) => {
                let permanent = err.is_permanent();
                return self.failed(format!("page list: {err}"), permanent);
            }
        };
        if pages.is_empty() {
            return self.failed("source returned no pages", true);
        }

        let dir = chapter_dir(&self.inner.settings.download_root, job);
        let referer = referer_for(source.base_url(), &job.chapter.url);
        let sink = Arc::new(EngineProgressSink {
            engine: self.clone(),
            key: job.key(),
        });
        let report = match self
            .inner
            .fetcher
            .download_pages(&pages, &dir, Some(&referer), token, sink)
            .await
        {
            Ok(report) => report,
            Err(err) => return self.failed(err.to_string(), false),
        };

        if report.cancelled || token.is_cancelled() {
            return AttemptOutcome::Interrupted;
        }
        if report.failed > 0 {
            let permanent = report.permanent == report.failed;
            return self.failed(
                format!("{} of {} pages failed", report.failed, report.total),
                permanent,
            );
        }
        AttemptOutcome::Succeeded
    }

    fn failed(&self, message: impl Into<String>, permanent: bool) -> AttemptOutcome {
        let message = message.into();
        pipeline_warn!("Download attempt failed: {}", message);
        AttemptOutcome::Failed {
            message,
            permanent: permanent && self.inner.settings.fail_fast_permanent,
        }
    }
}

struct EngineProgressSink {
    engine: DownloadEngine,
    key: JobKey,
}

impl ProgressSink for EngineProgressSink {
    fn emit(&self, progress: PageProgress) {
        pipeline_debug!("{}: {}/{} pages", self.key, progress.completed, progress.total);
        let effects = self.engine.apply(Msg::Progress {
            key: self.key.clone(),
            completed: progress.completed,
            total: progress.total,
        });
        self.engine.run_effects(effects);
    }
}

/// Absolute chapter URLs are their own referer; relative ones hang off the source.
fn referer_for(base_url: &str, chapter_url: &str) -> String {
    if chapter_url.starts_with("http://") || chapter_url.starts_with("https://") {
        return chapter_url.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        chapter_url.trim_start_matches('/')
    )
}

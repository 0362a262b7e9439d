use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pipeline_core::{
    Chapter, ChapterRef, Job, JobKey, JobStatus, Manga, MangaListing, MangaRef, QueueEvent,
    QueueSnapshot,
};
use pipeline_engine::{
    chapter_dir, ClientFactory, ClientSettings, DownloadEngine, FailureKind, FetchError,
    LibraryError, LibraryNotifier, PipelineConfig, ProxySwitch, QueueStore, Source, SourceError,
    SourceRegistry,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FakeSource {
    base_url: String,
    pages: Mutex<Result<Vec<String>, SourceError>>,
    page_list_calls: AtomicUsize,
}

impl FakeSource {
    fn new(base_url: String, pages: Result<Vec<String>, SourceError>) -> Self {
        Self {
            base_url,
            pages: Mutex::new(pages),
            page_list_calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.page_list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for FakeSource {
    fn id(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "Fake"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_popular(&self, _page: u32) -> Result<MangaListing, SourceError> {
        Ok(MangaListing::default())
    }

    async fn fetch_search(&self, _query: &str, _page: u32) -> Result<MangaListing, SourceError> {
        Ok(MangaListing::default())
    }

    async fn fetch_details(&self, manga_url: &str) -> Result<Manga, SourceError> {
        Err(SourceError::NotFound(manga_url.to_string()))
    }

    async fn fetch_chapter_list(&self, _manga_url: &str) -> Result<Vec<Chapter>, SourceError> {
        Ok(Vec::new())
    }

    async fn fetch_page_list(&self, _chapter_url: &str) -> Result<Vec<String>, SourceError> {
        self.page_list_calls.fetch_add(1, Ordering::SeqCst);
        self.pages.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct CountingLibrary {
    notified: Mutex<Vec<String>>,
}

#[async_trait]
impl LibraryNotifier for CountingLibrary {
    async fn chapter_downloaded(&self, job: &Job) -> Result<(), LibraryError> {
        self.notified.lock().unwrap().push(job.chapter.url.clone());
        Ok(())
    }
}

struct Harness {
    engine: DownloadEngine,
    source: Arc<FakeSource>,
    library: Arc<CountingLibrary>,
    config: PipelineConfig,
}

fn config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        download_root: root.join("downloads"),
        export_dir: root.join("exports"),
        retry_base_delay_ms: 10,
        page_timeout_secs: 5,
        ..PipelineConfig::default()
    }
}

fn harness(root: &Path, base_url: String, pages: Result<Vec<String>, SourceError>) -> Harness {
    pipeline_logging::initialize_for_tests();
    let config = config(root);
    let source = Arc::new(FakeSource::new(base_url, pages));
    let registry = Arc::new(SourceRegistry::new(config.cache_ttl()));
    registry.register(source.clone());
    let factory = ClientFactory::new(ClientSettings::default(), Arc::new(ProxySwitch::default()))
        .expect("client factory");
    let library = Arc::new(CountingLibrary::default());
    let engine =
        DownloadEngine::new(&config, registry, Arc::new(factory), library.clone()).expect("engine");
    Harness {
        engine,
        source,
        library,
        config,
    }
}

fn manga() -> MangaRef {
    MangaRef {
        source_id: 1,
        url: "/manga/one".to_string(),
        title: "One".to_string(),
    }
}

fn chapter(n: u32) -> ChapterRef {
    ChapterRef {
        url: format!("/chapter/{n}"),
        name: format!("Chapter {n}"),
    }
}

fn key(n: u32) -> JobKey {
    JobKey {
        manga_url: manga().url,
        chapter_url: chapter(n).url,
    }
}

async fn page_server(delay_ms: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"page".to_vec())
                .set_delay(Duration::from_millis(delay_ms)),
        )
        .mount(&server)
        .await;
    server
}

fn pages(server: &MockServer, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{}/img/{i}.png", server.uri()))
        .collect()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

async fn wait_for_terminal(engine: &DownloadEngine, key: &JobKey) -> Job {
    wait_until(|| {
        !engine.is_downloading()
            && engine
                .job(key)
                .is_some_and(|job| job.status.is_terminal())
    })
    .await;
    engine.job(key).expect("job present")
}

fn statuses_for(events: &mut tokio::sync::broadcast::Receiver<QueueEvent>, key: &JobKey) -> Vec<JobStatus> {
    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::StatusChanged { key: changed, status } = event {
            if &changed == key {
                statuses.push(status);
            }
        }
    }
    statuses
}

#[tokio::test]
async fn five_page_chapter_downloads_to_completion() {
    let root = tempfile::tempdir().unwrap();
    let server = page_server(0).await;
    let h = harness(root.path(), server.uri(), Ok(pages(&server, 5)));
    let mut events = h.engine.subscribe();

    assert!(h.engine.enqueue(manga(), chapter(1)));
    let job = wait_for_terminal(&h.engine, &key(1)).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    let dir = chapter_dir(&h.config.download_root, &job);
    for i in 0..5 {
        assert!(dir.join(format!("{i:03}.png")).is_file());
    }
    assert_eq!(
        statuses_for(&mut events, &key(1)),
        vec![JobStatus::Downloading, JobStatus::Completed]
    );
    wait_until(|| h.library.notified.lock().unwrap().len() == 1).await;

    let summary = h.engine.export_cbz(&key(1)).await.expect("export");
    assert_eq!(summary.pages, 5);
    assert!(summary.archive.starts_with(&h.config.export_dir));
}

#[tokio::test]
async fn duplicate_enqueue_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let server = page_server(300).await;
    let h = harness(root.path(), server.uri(), Ok(pages(&server, 2)));

    assert!(h.engine.enqueue(manga(), chapter(1)));
    assert!(!h.engine.enqueue(manga(), chapter(1)));
    assert_eq!(h.engine.jobs().len(), 1);
    wait_for_terminal(&h.engine, &key(1)).await;
}

#[tokio::test]
async fn failing_chapter_stops_after_three_attempts() {
    let root = tempfile::tempdir().unwrap();
    let server = page_server(0).await;
    let failure = SourceError::Fetch(FetchError::new(FailureKind::HttpStatus(500), "boom"));
    let h = harness(root.path(), server.uri(), Err(failure));
    let mut events = h.engine.subscribe();

    h.engine.enqueue(manga(), chapter(1));
    let job = wait_for_terminal(&h.engine, &key(1)).await;

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.retry_count, 3);
    assert!(job.error.is_some());
    assert_eq!(h.source.calls(), 3);
    assert_eq!(
        statuses_for(&mut events, &key(1)),
        vec![
            JobStatus::Downloading,
            JobStatus::Retrying { attempt: 1, max: 3 },
            JobStatus::Retrying { attempt: 2, max: 3 },
            JobStatus::Error,
        ]
    );
    assert!(h.library.notified.lock().unwrap().is_empty());
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let root = tempfile::tempdir().unwrap();
    let server = page_server(0).await;
    let h = harness(root.path(), server.uri(), Ok(Vec::new()));

    h.engine.enqueue(manga(), chapter(1));
    let job = wait_for_terminal(&h.engine, &key(1)).await;

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_chapter_downloads_at_a_time() {
    let root = tempfile::tempdir().unwrap();
    let server = page_server(40).await;
    let h = harness(root.path(), server.uri(), Ok(pages(&server, 2)));

    let mut enqueues = tokio::task::JoinSet::new();
    for n in 1..=4 {
        let engine = h.engine.clone();
        enqueues.spawn(async move { engine.enqueue(manga(), chapter(n)) });
    }
    while let Some(accepted) = enqueues.join_next().await {
        assert!(accepted.unwrap());
    }

    let engine = h.engine.clone();
    tokio::time::timeout(Duration::from_secs(10), async move {
        loop {
            let jobs = engine.jobs();
            let running = jobs.iter().filter(|job| job.status.is_running()).count();
            assert!(running <= 1, "{running} jobs running at once");
            if jobs.len() == 4 && jobs.iter().all(|job| job.status == JobStatus::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("all chapters completed");
}

#[tokio::test]
async fn interrupted_download_is_restored_as_queued_and_resumes() {
    let root = tempfile::tempdir().unwrap();
    let server = page_server(0).await;
    let store = QueueStore::new(config(root.path()).snapshot_path());
    let mut active = Job::new(manga(), chapter(7));
    active.status = JobStatus::Downloading;
    active.progress = 60;
    store.save(&QueueSnapshot {
        active: Some(active),
        ..QueueSnapshot::default()
    });

    let h = harness(root.path(), server.uri(), Ok(pages(&server, 3)));
    let jobs = h.engine.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Queued);
    assert!(!h.engine.is_downloading());

    h.engine.process_next();
    let job = wait_for_terminal(&h.engine, &key(7)).await;
    assert_eq!(job.status, JobStatus::Completed);

    wait_until(|| {
        store.load().is_some_and(|snapshot| {
            snapshot.active.is_none()
                && snapshot
                    .history
                    .first()
                    .is_some_and(|job| job.status == JobStatus::Completed)
        })
    })
    .await;
}

#[tokio::test]
async fn paused_job_returns_to_queue_and_finishes_after_resume() {
    let root = tempfile::tempdir().unwrap();
    let server = page_server(300).await;
    let h = harness(root.path(), server.uri(), Ok(pages(&server, 2)));

    h.engine.enqueue(manga(), chapter(1));
    wait_until(|| h.engine.is_downloading()).await;

    h.engine.pause();
    wait_until(|| !h.engine.is_downloading()).await;
    assert_eq!(h.engine.job(&key(1)).unwrap().status, JobStatus::Paused);
    assert!(h.engine.is_paused());

    h.engine.resume();
    let job = wait_for_terminal(&h.engine, &key(1)).await;
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn cancelling_active_job_moves_it_to_history() {
    let root = tempfile::tempdir().unwrap();
    let server = page_server(500).await;
    let h = harness(root.path(), server.uri(), Ok(pages(&server, 2)));

    h.engine.enqueue(manga(), chapter(1));
    h.engine.enqueue(manga(), chapter(2));
    wait_until(|| h.engine.is_downloading()).await;

    assert!(h.engine.cancel(&key(1)));
    // History comes first in the job list.
    wait_until(|| {
        h.engine
            .jobs()
            .first()
            .is_some_and(|job| job.has_key(&key(1)) && job.status == JobStatus::Cancelled)
    })
    .await;

    let next = wait_for_terminal(&h.engine, &key(2)).await;
    assert_eq!(next.status, JobStatus::Completed);

    // Cancelling a finished job removes it.
    assert!(h.engine.cancel(&key(1)));
    assert!(h.engine.job(&key(1)).is_none());
    h.engine.clear_history();
    assert!(h.engine.jobs().is_empty());
}

#[tokio::test]
async fn failed_page_retries_the_chapter_and_fetches_only_missing_pages() {
    let root = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/1.png"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"page".to_vec()))
        .mount(&server)
        .await;
    let h = harness(root.path(), server.uri(), Ok(pages(&server, 3)));
    let mut events = h.engine.subscribe();

    h.engine.enqueue(manga(), chapter(1));
    let job = wait_for_terminal(&h.engine, &key(1)).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 1);
    assert_eq!(h.source.calls(), 2);
    assert_eq!(
        statuses_for(&mut events, &key(1)),
        vec![
            JobStatus::Downloading,
            JobStatus::Retrying { attempt: 1, max: 3 },
            JobStatus::Completed,
        ]
    );

    let mut fetched: Vec<String> = server
        .received_requests()
        .await
        .expect("request recording")
        .iter()
        .map(|request| request.url.path().to_string())
        .collect();
    fetched.sort();
    assert_eq!(
        fetched,
        vec!["/img/0.png", "/img/1.png", "/img/1.png", "/img/2.png"]
    );
}

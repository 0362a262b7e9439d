use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pipeline_logging::{pipeline_debug, pipeline_info, pipeline_warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::filename::page_filename;
use crate::limiter::ConcurrencyLimiter;
use crate::net::ClientFactory;
use crate::persist::{ensure_output_dir, AtomicFileWriter, PersistError};
use crate::types::{map_reqwest_error, FailureKind, FetchError};

/// Upper bound for a single page image.
const MAX_PAGE_BYTES: u64 = 50 * 1024 * 1024;

/// One page to download. Source URLs may carry per-request headers after a pipe:
/// `https://cdn/p1.jpg|Referer=https://site/&User-Agent=Foo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    pub index: usize,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub filename: String,
}

impl PageTask {
    pub fn parse(index: usize, raw: &str) -> Self {
        let (url, headers) = match raw.split_once('|') {
            Some((url, overrides)) => (url.trim(), parse_overrides(overrides)),
            None => (raw.trim(), Vec::new()),
        };
        Self {
            index,
            filename: page_filename(index, url),
            url: url.to_string(),
            headers,
        }
    }

    fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => pipeline_debug!("Ignoring malformed header override {}={}", name, value),
            }
        }
        map
    }
}

fn parse_overrides(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageProgress {
    pub completed: usize,
    pub total: usize,
}

impl PageProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.completed.min(self.total) * 100 / self.total) as u8
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, progress: PageProgress);
}

/// Outcome of one pass over a chapter's pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterReport {
    pub total: usize,
    /// Pages present on disk after the pass, including skipped ones.
    pub completed: usize,
    /// Pages that already existed and were not fetched.
    pub skipped: usize,
    pub failed: usize,
    /// Failures another attempt cannot fix (e.g. 404).
    pub permanent: usize,
    pub cancelled: bool,
}

impl ChapterReport {
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failed == 0 && self.completed == self.total
    }
}

enum PageOutcome {
    Saved,
    Failed(FetchError),
    Cancelled,
}

struct PassCounters {
    total: usize,
    completed: AtomicUsize,
    sink: Arc<dyn ProgressSink>,
}

impl PassCounters {
    fn page_done(&self) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.emit(PageProgress {
            completed,
            total: self.total,
        });
    }
}

/// Downloads a chapter's pages into a directory with bounded parallelism.
#[derive(Clone)]
pub struct PageFetcher {
    factory: Arc<ClientFactory>,
    limiter: ConcurrencyLimiter,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(factory: Arc<ClientFactory>, concurrency: usize, timeout: Duration) -> Self {
        Self {
            factory,
            limiter: ConcurrencyLimiter::new(concurrency),
            timeout,
        }
    }

    /// Fetch every page not yet on disk. Page failures never cancel siblings;
    /// they are counted in the report.
    pub async fn download_pages(
        &self,
        pages: &[String],
        dir: &Path,
        referer: Option<&str>,
        cancel: &CancellationToken,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<ChapterReport, PersistError> {
        ensure_output_dir(dir)?;

        let counters = Arc::new(PassCounters {
            total: pages.len(),
            completed: AtomicUsize::new(0),
            sink,
        });
        let mut report = ChapterReport {
            total: pages.len(),
            ..ChapterReport::default()
        };

        let mut tasks = JoinSet::new();
        for (index, raw) in pages.iter().enumerate() {
            let task = PageTask::parse(index, raw);
            if dir.join(&task.filename).exists() {
                report.skipped += 1;
                counters.page_done();
                continue;
            }

            let fetcher = self.clone();
            let dir = dir.to_path_buf();
            let referer = referer.map(str::to_string);
            let cancel = cancel.clone();
            let counters = counters.clone();
            tasks.spawn(async move {
                let outcome = fetcher
                    .limiter
                    .run(async {
                        if cancel.is_cancelled() {
                            return PageOutcome::Cancelled;
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => PageOutcome::Cancelled,
                            result = fetcher.fetch_page(&task, &dir, referer.as_deref()) => match result {
                                Ok(()) => PageOutcome::Saved,
                                Err(err) => PageOutcome::Failed(err),
                            },
                        }
                    })
                    .await;
                match &outcome {
                    PageOutcome::Saved => counters.page_done(),
                    PageOutcome::Failed(err) => {
                        pipeline_warn!("Page {} ({}) failed: {}", task.index, task.url, err)
                    }
                    PageOutcome::Cancelled => {}
                }
                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(PageOutcome::Saved) => {}
                Ok(PageOutcome::Failed(err)) => {
                    report.failed += 1;
                    if err.is_permanent() {
                        report.permanent += 1;
                    }
                }
                Ok(PageOutcome::Cancelled) => report.cancelled = true,
                Err(err) => {
                    pipeline_warn!("Page task aborted: {}", err);
                    report.failed += 1;
                }
            }
        }

        report.completed = counters.completed.load(Ordering::SeqCst);
        pipeline_info!(
            "Pages in {}: {}/{} done ({} skipped, {} failed)",
            dir.display(),
            report.completed,
            report.total,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    async fn fetch_page(
        &self,
        task: &PageTask,
        dir: &Path,
        referer: Option<&str>,
    ) -> Result<(), FetchError> {
        let mut request = self.factory.get(&task.url)?.timeout(self.timeout);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }
        // Overrides replace the defaults above, user agent included.
        request = request.headers(task.header_map());

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                format!("{status} for {}", task.url),
            ));
        }
        if response.content_length().is_some_and(|len| len > MAX_PAGE_BYTES) {
            return Err(too_large());
        }
        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            if (bytes.len() + chunk.len()) as u64 > MAX_PAGE_BYTES {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }

        let writer = AtomicFileWriter::new(PathBuf::from(dir));
        let filename = task.filename.clone();
        tokio::task::spawn_blocking(move || writer.write(&filename, &bytes))
            .await
            .map_err(|err| FetchError::new(FailureKind::Io, err.to_string()))?
            .map_err(|err| FetchError::new(FailureKind::Io, err.to_string()))?;
        pipeline_debug!("Saved page {} as {}", task.index, task.filename);
        Ok(())
    }
}

fn too_large() -> FetchError {
    FetchError::new(
        FailureKind::TooLarge {
            max_bytes: MAX_PAGE_BYTES,
        },
        "page exceeds size limit",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pipe_suffix_becomes_header_overrides() {
        let task = PageTask::parse(
            4,
            "https://cdn.example/ch1/05.png?x=1|Referer=https://site.example/&User-Agent=Foo/1",
        );
        assert_eq!(task.url, "https://cdn.example/ch1/05.png?x=1");
        assert_eq!(task.filename, "004.png");
        assert_eq!(
            task.headers,
            vec![
                ("Referer".to_string(), "https://site.example/".to_string()),
                ("User-Agent".to_string(), "Foo/1".to_string()),
            ]
        );
        assert_eq!(task.header_map().len(), 2);
    }

    #[test]
    fn plain_url_has_no_overrides() {
        let task = PageTask::parse(0, "https://cdn.example/a");
        assert!(task.headers.is_empty());
        assert_eq!(task.filename, "000.jpg");
    }

    #[test]
    fn progress_percent_is_floored() {
        assert_eq!(PageProgress { completed: 1, total: 3 }.percent(), 33);
        assert_eq!(PageProgress { completed: 0, total: 0 }.percent(), 100);
    }
}

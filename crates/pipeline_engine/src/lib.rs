//! Pipeline engine: network clients, page downloads, persistence and the queue runtime.
pub mod browser;
mod cache;
#[cfg(feature = "chrome")]
mod chrome;
mod config;
mod engine;
mod escalation;
mod export;
mod fetch;
mod filename;
mod library;
mod limiter;
pub mod net;
mod persist;
mod snapshot;
mod source;
mod types;

pub use browser::{
    contains_challenge, BrowserAutomation, BrowserError, BrowserSettings, BrowserTokens,
    NoBrowser, DEFAULT_CHALLENGE_MARKERS,
};
pub use cache::{popular_key, search_key, source_segment, SourceCache, DEFAULT_CACHE_TTL};
#[cfg(feature = "chrome")]
pub use chrome::ChromeBrowser;
pub use config::PipelineConfig;
pub use engine::{DownloadEngine, EngineError};
pub use escalation::{EscalationSettings, FetchEscalationChain, FetchTier, Fetched};
pub use export::{export_chapter_cbz, export_job, ExportError, ExportSummary};
pub use fetch::{ChapterReport, PageFetcher, PageProgress, PageTask, ProgressSink};
pub use filename::{archive_filename, chapter_dir, page_filename, safe_path_component};
pub use library::{LibraryError, LibraryNotifier, NoopLibrary};
pub use limiter::ConcurrencyLimiter;
pub use net::{
    ClientFactory, ClientSettings, DohResolver, ProxyState, ProxySwitch, Resolution, ResolveError,
    ResolvedVia,
};
pub use persist::{ensure_output_dir, is_partial_file, AtomicFileWriter, PersistError};
pub use snapshot::QueueStore;
pub use source::{Source, SourceError, SourceRegistry, Verifiable};
pub use types::{FailureKind, FetchError};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pipeline_logging::{pipeline_info, pipeline_warn};
use serde::{Deserialize, Serialize};

use crate::browser::{BrowserSettings, DEFAULT_CHALLENGE_MARKERS};
use crate::cache::DEFAULT_CACHE_TTL;
use crate::escalation::EscalationSettings;
use crate::net::{ClientSettings, DEFAULT_DOH_PROVIDERS, DEFAULT_USER_AGENT};

/// Everything tunable about the pipeline, loaded from a RON file.
/// Missing fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of `{root}/{source}/{manga}/{chapter}/` page directories.
    pub download_root: PathBuf,
    /// Where `.cbz` archives are written.
    pub export_dir: PathBuf,
    /// Queue snapshot file name, relative to `download_root`.
    pub snapshot_filename: String,
    pub page_concurrency: usize,
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `n * retry_base_delay_ms`.
    pub retry_base_delay_ms: u64,
    /// Skip remaining attempts for failures a retry cannot fix.
    pub fail_fast_permanent: bool,
    pub page_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    pub accept_invalid_certs: bool,
    pub doh_providers: Vec<String>,
    pub doh_timeout_secs: u64,
    pub proxy_address: String,
    pub proxy_port: u16,
    pub browser_navigation_timeout_secs: u64,
    pub browser_selector_timeout_secs: u64,
    pub challenge_poll_retries: u32,
    pub challenge_poll_delay_secs: u64,
    pub challenge_markers: Vec<String>,
    pub cache_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from("./downloads"),
            export_dir: PathBuf::from("./exports"),
            snapshot_filename: ".download_queue.ron".to_string(),
            page_concurrency: 4,
            max_attempts: pipeline_core::MAX_ATTEMPTS,
            retry_base_delay_ms: 2000,
            fail_fast_permanent: true,
            page_timeout_secs: 30,
            request_timeout_secs: 15,
            connect_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_invalid_certs: true,
            doh_providers: DEFAULT_DOH_PROVIDERS.iter().map(|p| p.to_string()).collect(),
            doh_timeout_secs: 3,
            proxy_address: "127.0.0.1".to_string(),
            proxy_port: 9050,
            browser_navigation_timeout_secs: 60,
            browser_selector_timeout_secs: 10,
            challenge_poll_retries: 3,
            challenge_poll_delay_secs: 5,
            challenge_markers: DEFAULT_CHALLENGE_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
        }
    }
}

impl PipelineConfig {
    /// Read `path`; a missing file yields defaults, and so does a malformed one (with a warning).
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                pipeline_info!("No config at {}; using defaults", path.display());
                return Self::default();
            }
            Err(err) => {
                pipeline_warn!("Failed to read config {}: {}", path.display(), err);
                return Self::default();
            }
        };
        match ron::from_str::<Self>(&text) {
            Ok(config) => config,
            Err(err) => {
                pipeline_warn!("Failed to parse config {}: {}", path.display(), err);
                Self::default()
            }
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.download_root.join(&self.snapshot_filename)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: self.user_agent.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
            doh_providers: self.doh_providers.clone(),
            doh_timeout: Duration::from_secs(self.doh_timeout_secs),
        }
    }

    pub fn escalation_settings(&self) -> EscalationSettings {
        EscalationSettings {
            challenge_markers: self.challenge_markers.clone(),
        }
    }

    pub fn browser_settings(&self) -> BrowserSettings {
        BrowserSettings {
            challenge_markers: self.challenge_markers.clone(),
            poll_retries: self.challenge_poll_retries,
            poll_delay: Duration::from_secs(self.challenge_poll_delay_secs),
            navigation_timeout: Duration::from_secs(self.browser_navigation_timeout_secs),
            selector_timeout: Duration::from_secs(self.browser_selector_timeout_secs),
        }
    }
}

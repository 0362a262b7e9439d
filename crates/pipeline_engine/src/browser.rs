use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Body fragments that identify an anti-bot interstitial.
pub const DEFAULT_CHALLENGE_MARKERS: &[&str] = &["Just a moment", "Enable JavaScript"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BrowserTokens {
    pub user_agent: String,
    pub cookies: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowserError {
    #[error("browser automation is not available")]
    Unavailable,
    #[error("browser failed to start: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("challenge still present after {attempts} checks")]
    ChallengeUnsolved { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowserSettings {
    pub challenge_markers: Vec<String>,
    pub poll_retries: u32,
    pub poll_delay: Duration,
    pub navigation_timeout: Duration,
    pub selector_timeout: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            challenge_markers: DEFAULT_CHALLENGE_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            poll_retries: 3,
            poll_delay: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(60),
            selector_timeout: Duration::from_secs(10),
        }
    }
}

/// A real browser the pipeline can borrow: one instance per process,
/// started and shut down explicitly by whoever owns it.
#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    async fn start(&self) -> Result<(), BrowserError>;

    /// Open `url`, wait out any challenge page, and harvest user agent and cookies.
    async fn get_tokens(&self, url: &str) -> Result<BrowserTokens, BrowserError>;

    /// Rendered page body. A selector that never appears is not an error:
    /// whatever content is present when the wait times out is returned.
    async fn get_content(&self, url: &str, wait_for: Option<&str>) -> Result<String, BrowserError>;

    async fn shutdown(&self);
}

/// Stand-in used when no browser is configured; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBrowser;

#[async_trait]
impl BrowserAutomation for NoBrowser {
    async fn start(&self) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn get_tokens(&self, _url: &str) -> Result<BrowserTokens, BrowserError> {
        Err(BrowserError::Unavailable)
    }

    async fn get_content(&self, _url: &str, _wait_for: Option<&str>) -> Result<String, BrowserError> {
        Err(BrowserError::Unavailable)
    }

    async fn shutdown(&self) {}
}

pub fn contains_challenge<S: AsRef<str>>(body: &str, markers: &[S]) -> bool {
    markers
        .iter()
        .any(|marker| !marker.as_ref().is_empty() && body.contains(marker.as_ref()))
}

/// Runs `step` on a freshly opened resource, releasing it if the step fails.
#[cfg_attr(not(feature = "chrome"), allow(dead_code))]
pub(crate) fn release_on_error<T, E>(
    resource: T,
    step: impl FnOnce(&T) -> Result<(), E>,
    release: impl FnOnce(&T),
) -> Result<T, E> {
    match step(&resource) {
        Ok(()) => Ok(resource),
        Err(err) => {
            release(&resource);
            Err(err)
        }
    }
}

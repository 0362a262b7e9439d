use std::sync::Arc;

use pipeline_logging::{pipeline_debug, pipeline_info, pipeline_warn};
use reqwest::header::REFERER;

use crate::browser::{contains_challenge, BrowserAutomation, DEFAULT_CHALLENGE_MARKERS};
use crate::net::ClientFactory;
use crate::types::{map_reqwest_error, FailureKind, FetchError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationSettings {
    /// A successful body containing any of these is treated as blocked.
    pub challenge_markers: Vec<String>,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            challenge_markers: DEFAULT_CHALLENGE_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

/// Which strategy produced the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTier {
    Direct,
    /// Direct request retried after browser tokens were installed.
    Refreshed,
    Browser,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub body: String,
    pub tier: FetchTier,
}

/// Text fetching for one source: a plain request first, then a retry with
/// browser-harvested tokens, then a full browser render. Each tier runs at most once per call.
pub struct FetchEscalationChain {
    factory: Arc<ClientFactory>,
    browser: Arc<dyn BrowserAutomation>,
    base_url: String,
    settings: EscalationSettings,
}

impl FetchEscalationChain {
    pub fn new(
        factory: Arc<ClientFactory>,
        browser: Arc<dyn BrowserAutomation>,
        base_url: impl Into<String>,
        settings: EscalationSettings,
    ) -> Self {
        Self {
            factory,
            browser,
            base_url: base_url.into(),
            settings,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn factory(&self) -> &Arc<ClientFactory> {
        &self.factory
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_detailed(url).await.map(|fetched| fetched.body)
    }

    pub async fn fetch_detailed(&self, url: &str) -> Result<Fetched, FetchError> {
        match self.direct(url).await {
            Ok(body) => {
                return Ok(Fetched {
                    body,
                    tier: FetchTier::Direct,
                })
            }
            Err(err) => pipeline_warn!("Direct fetch of {} failed: {}", url, err),
        }

        match self.browser.get_tokens(&self.base_url).await {
            Ok(tokens) => {
                if let Err(err) = self.factory.install_tokens(&self.base_url, &tokens) {
                    pipeline_warn!("Could not install tokens for {}: {}", self.base_url, err);
                } else {
                    pipeline_info!("Refreshed browser tokens for {}", self.base_url);
                    match self.direct(url).await {
                        Ok(body) => {
                            return Ok(Fetched {
                                body,
                                tier: FetchTier::Refreshed,
                            })
                        }
                        Err(err) => pipeline_warn!("Fetch of {} with fresh tokens failed: {}", url, err),
                    }
                }
            }
            Err(err) => pipeline_warn!("Token refresh for {} failed: {}", self.base_url, err),
        }

        pipeline_info!("Falling back to browser fetch for {}", url);
        self.render(url, None).await.map(|body| Fetched {
            body,
            tier: FetchTier::Browser,
        })
    }

    /// Skip straight to the browser, waiting up to the selector timeout for `selector`.
    pub async fn fetch_with_selector(&self, url: &str, selector: &str) -> Result<String, FetchError> {
        self.render(url, Some(selector)).await
    }

    async fn direct(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .factory
            .get(url)?
            .header(REFERER, self.base_url.as_str())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let body = response.text().await.map_err(map_reqwest_error)?;
        if contains_challenge(&body, &self.settings.challenge_markers) {
            return Err(FetchError::new(
                FailureKind::Blocked,
                format!("challenge page returned for {url}"),
            ));
        }
        pipeline_debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(body)
    }

    async fn render(&self, url: &str, selector: Option<&str>) -> Result<String, FetchError> {
        self.browser
            .get_content(url, selector)
            .await
            .map_err(|err| FetchError::new(FailureKind::Browser, err.to_string()))
    }
}

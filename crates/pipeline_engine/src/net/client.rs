use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use pipeline_logging::{pipeline_debug, pipeline_info};
use reqwest::cookie::Jar;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, UPGRADE_INSECURE_REQUESTS,
    USER_AGENT,
};
use reqwest::RequestBuilder;
use url::Url;

use crate::browser::BrowserTokens;
use crate::net::proxy::ProxyState;
use crate::net::resolve::{DohResolver, DEFAULT_DOH_PROVIDERS};
use crate::types::{FailureKind, FetchError};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub accept_invalid_certs: bool,
    pub doh_providers: Vec<String>,
    pub doh_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_invalid_certs: true,
            doh_providers: DEFAULT_DOH_PROVIDERS.iter().map(|p| p.to_string()).collect(),
            doh_timeout: Duration::from_secs(3),
        }
    }
}

struct CachedClient {
    proxied: bool,
    client: reqwest::Client,
}

/// Hands out an HTTP client matching the proxy's current state.
///
/// The client is rebuilt only when the proxy's running flag differs from the one
/// the cached client was built with. The cookie jar and any user agent harvested
/// from a browser live here, so they survive rebuilds.
pub struct ClientFactory {
    settings: ClientSettings,
    proxy: Arc<dyn ProxyState>,
    resolver: Arc<DohResolver>,
    jar: Arc<Jar>,
    session_agent: RwLock<Option<String>>,
    current: Mutex<Option<CachedClient>>,
    builds: AtomicUsize,
}

impl ClientFactory {
    pub fn new(settings: ClientSettings, proxy: Arc<dyn ProxyState>) -> Result<Self, FetchError> {
        let resolver = DohResolver::new(settings.doh_providers.clone(), settings.doh_timeout)
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            settings,
            proxy,
            resolver: Arc::new(resolver),
            jar: Arc::new(Jar::default()),
            session_agent: RwLock::new(None),
            current: Mutex::new(None),
            builds: AtomicUsize::new(0),
        })
    }

    pub fn client(&self) -> Result<reqwest::Client, FetchError> {
        let proxied = self.proxy.is_running();
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cached) = current.as_ref() {
            if cached.proxied == proxied {
                return Ok(cached.client.clone());
            }
        }

        let client = self.build(proxied)?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        if proxied {
            pipeline_info!("HTTP client now routed through {}", self.proxy.socks_url());
        } else {
            pipeline_info!("HTTP client now connecting directly with DoH resolution");
        }
        *current = Some(CachedClient {
            proxied,
            client: client.clone(),
        });
        Ok(client)
    }

    /// How many clients have been built so far.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Harvested browser user agent, or the configured default.
    pub fn user_agent(&self) -> String {
        self.session_agent
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .unwrap_or_else(|| self.settings.user_agent.clone())
    }

    /// GET request carrying the session user agent and cookies.
    pub fn get(&self, url: &str) -> Result<RequestBuilder, FetchError> {
        let parsed =
            Url::parse(url).map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let client = self.client()?;
        Ok(client.get(parsed).header(USER_AGENT, self.user_agent()))
    }

    /// Install browser-harvested tokens for `base_url`.
    pub fn install_tokens(&self, base_url: &str, tokens: &BrowserTokens) -> Result<(), FetchError> {
        let url = Url::parse(base_url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        for (name, value) in &tokens.cookies {
            self.jar
                .add_cookie_str(&format!("{name}={value}; Path=/"), &url);
        }
        if !tokens.user_agent.trim().is_empty() {
            let mut agent = self
                .session_agent
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *agent = Some(tokens.user_agent.clone());
        }
        pipeline_debug!(
            "Installed {} cookie(s) for {}",
            tokens.cookies.len(),
            url.host_str().unwrap_or_default()
        );
        Ok(())
    }

    fn build(&self, proxied: bool) -> Result<reqwest::Client, FetchError> {
        let builder = reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .danger_accept_invalid_certs(self.settings.accept_invalid_certs)
            .cookie_provider(self.jar.clone())
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .default_headers(browser_headers());

        let builder = if proxied {
            let proxy = reqwest::Proxy::all(self.proxy.socks_url())
                .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
            builder.proxy(proxy)
        } else {
            builder.no_proxy().dns_resolver(self.resolver.clone())
        };

        builder
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers
}

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use pipeline_logging::{pipeline_debug, pipeline_warn};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_DOH_PROVIDERS: &[&str] = &[
    "https://cloudflare-dns.com/dns-query",
    "https://dns.google/resolve",
];

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("could not build DoH client: {0}")]
    Client(String),
    #[error("no address found for {host}")]
    NotFound { host: String },
    #[error("system resolver failed for {host}: {source}")]
    System {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

/// Which strategy produced an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedVia {
    Literal,
    Doh(String),
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub addrs: Vec<IpAddr>,
    pub via: ResolvedVia,
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    data: String,
}

/// DNS-over-HTTPS resolution with ordered providers and a system-resolver fallback.
#[derive(Debug, Clone)]
pub struct DohResolver {
    http: reqwest::Client,
    providers: Vec<String>,
}

impl DohResolver {
    pub fn new(providers: Vec<String>, timeout: Duration) -> Result<Self, ResolveError> {
        // Uses the platform resolver to reach the providers themselves.
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|err| ResolveError::Client(err.to_string()))?;
        Ok(Self { http, providers })
    }

    pub async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        self.lookup_detailed(host).await.map(|resolution| resolution.addrs)
    }

    pub async fn lookup_detailed(&self, host: &str) -> Result<Resolution, ResolveError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(Resolution {
                addrs: vec![ip],
                via: ResolvedVia::Literal,
            });
        }

        for provider in &self.providers {
            match self.query(provider, host).await {
                Some(ip) => {
                    pipeline_debug!("Resolved {} to {} via {}", host, ip, provider);
                    return Ok(Resolution {
                        addrs: vec![ip],
                        via: ResolvedVia::Doh(provider.clone()),
                    });
                }
                None => pipeline_debug!("DoH provider {} had no answer for {}", provider, host),
            }
        }

        pipeline_warn!("All DoH providers failed for {}; using system resolver", host);
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|source| ResolveError::System {
                host: host.to_string(),
                source,
            })?
            .map(|addr| addr.ip())
            .collect();
        if addrs.is_empty() {
            return Err(ResolveError::NotFound {
                host: host.to_string(),
            });
        }
        Ok(Resolution {
            addrs,
            via: ResolvedVia::System,
        })
    }

    async fn query(&self, provider: &str, host: &str) -> Option<IpAddr> {
        let url = url::Url::parse_with_params(provider, &[("name", host), ("type", "A")]).ok()?;
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/dns-json")
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let bytes = response.bytes().await.ok()?;
        let body: DohResponse = serde_json::from_slice(&bytes).ok()?;
        // CNAME records carry host names in `data`; skip to the first address.
        body.answer
            .iter()
            .find_map(|answer| answer.data.trim().parse::<IpAddr>().ok())
    }
}

impl Resolve for DohResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs = resolver.lookup(&host).await?;
            let addrs: Addrs = Box::new(addrs.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}

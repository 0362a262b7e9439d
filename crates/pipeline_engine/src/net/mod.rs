//! Proxy-aware HTTP clients and DNS-over-HTTPS resolution.
mod client;
mod proxy;
mod resolve;

pub use client::{ClientFactory, ClientSettings, DEFAULT_USER_AGENT};
pub use proxy::{ProxyState, ProxySwitch};
pub use resolve::{DohResolver, Resolution, ResolveError, ResolvedVia, DEFAULT_DOH_PROVIDERS};

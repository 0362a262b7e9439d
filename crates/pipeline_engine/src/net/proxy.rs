use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Read-only view of an external SOCKS proxy.
pub trait ProxyState: Send + Sync {
    fn is_running(&self) -> bool;
    fn address(&self) -> String;
    fn port(&self) -> u16;

    fn socks_url(&self) -> String {
        format!("socks5h://{}:{}", self.address(), self.port())
    }
}

/// In-process proxy state that an embedder flips when its proxy comes up or goes down.
#[derive(Debug)]
pub struct ProxySwitch {
    running: AtomicBool,
    endpoint: RwLock<(String, u16)>,
}

impl ProxySwitch {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            running: AtomicBool::new(false),
            endpoint: RwLock::new((address.into(), port)),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_endpoint(&self, address: impl Into<String>, port: u16) {
        let mut endpoint = self
            .endpoint
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *endpoint = (address.into(), port);
    }

    fn endpoint(&self) -> (String, u16) {
        self.endpoint
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for ProxySwitch {
    fn default() -> Self {
        Self::new("127.0.0.1", 9050)
    }
}

impl ProxyState for ProxySwitch {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn address(&self) -> String {
        self.endpoint().0
    }

    fn port(&self) -> u16 {
        self.endpoint().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socks_url_uses_remote_resolution() {
        let proxy = ProxySwitch::new("10.0.0.2", 1080);
        assert_eq!(proxy.socks_url(), "socks5h://10.0.0.2:1080");
        assert!(!proxy.is_running());
        proxy.set_running(true);
        proxy.set_endpoint("localhost", 9150);
        assert!(proxy.is_running());
        assert_eq!(proxy.socks_url(), "socks5h://localhost:9150");
    }
}

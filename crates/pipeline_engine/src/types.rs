use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Failures that another attempt cannot fix.
    pub fn is_permanent(&self) -> bool {
        self.kind.is_permanent()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    /// The response was an anti-bot interstitial instead of content.
    Blocked,
    TooLarge { max_bytes: u64 },
    Browser,
    Io,
}

impl FailureKind {
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FailureKind::InvalidUrl | FailureKind::HttpStatus(404) | FailureKind::HttpStatus(410)
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Blocked => write!(f, "blocked by anti-bot challenge"),
            FailureKind::TooLarge { max_bytes } => write!(f, "response larger than {max_bytes} bytes"),
            FailureKind::Browser => write!(f, "browser fetch failed"),
            FailureKind::Io => write!(f, "io error"),
        }
    }
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_builder() {
        return FetchError::new(FailureKind::InvalidUrl, err.to_string());
    }
    if let Some(status) = err.status() {
        return FetchError::new(FailureKind::HttpStatus(status.as_u16()), err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

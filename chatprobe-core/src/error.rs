use thiserror::Error;

/// Core error type for chatprobe.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
///
/// Every variant except `Validation`, `Io` and `Other` is a transport failure:
/// the request never produced a body the decoder could look at.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited by {endpoint}")]
    RateLimited {
        endpoint: String,
        retry_after: Option<u64>,
    },

    #[error("endpoint unavailable: {endpoint}")]
    Unavailable { endpoint: String },

    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("upstream error from {endpoint}: {code} {message}")]
    Upstream {
        endpoint: String,
        code: String,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProbeError {
    /// True for connection, timeout and HTTP status failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Unavailable { .. }
                | Self::Timeout { .. }
                | Self::Upstream { .. }
        )
    }

    /// Short machine-friendly label, recorded as `error_kind` on check reports and spans.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Upstream { .. } => "upstream",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, ProbeError>;

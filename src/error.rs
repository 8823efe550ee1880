use std::fmt;

/// Error taxonomy for the proxy. Only `Config` terminates the process (at
/// startup, via `anyhow` propagation out of `main`); every other variant is
/// converted to an HTTP response and logged at an operational level — no
/// error escapes a request handler unhandled.
#[derive(Debug)]
#[allow(dead_code)]
pub enum ProxyError {
    Config(String),
    UpstreamConnect(String),
    UpstreamTimeout,
    Serialization(String),
    Deserialization(String),
    Internal(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Config(msg) => write!(f, "config error: {}", msg),
            ProxyError::UpstreamConnect(msg) => write!(f, "upstream connect error: {}", msg),
            ProxyError::UpstreamTimeout => write!(f, "upstream timeout"),
            ProxyError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            ProxyError::Deserialization(msg) => write!(f, "deserialization error: {}", msg),
            ProxyError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {}

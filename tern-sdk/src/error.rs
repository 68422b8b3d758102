//! Error types for the engine.

use crate::codec::CodecError;

/// Errors surfaced to the owning application.
///
/// Configuration and transport errors end the current session. Protocol
/// negotiation failures never show up here; they are logged and the
/// handshake continues without the failed feature.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("bad config file: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("secure transport requested but no TLS crypto provider is compiled in")]
    TlsUnavailable,
    #[error("TLS handshake with {host} failed: {reason}")]
    Tls { host: String, reason: String },
    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },
    #[error("transport cannot be upgraded in place")]
    UpgradeUnsupported,
    #[error("connection closed by peer")]
    Disconnected,
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error ended the transport (the caller should `reset`
    /// and reconnect).
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Disconnected
                | Error::NotConnected
                | Error::Io(_)
                | Error::Codec(_)
                | Error::Tls { .. }
                | Error::UpgradeUnsupported
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Crate-wide error type. Session loops translate every fallible step into
//! one of these instead of panicking; only the caller decides whether an
//! error is session-fatal (see spec §7 — handled per call site, not here).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    ContentMux(#[from] ContentMuxError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no such player")]
    NoSuchPlayer,
    #[error("wrong password")]
    WrongPasswd,
    #[error("auth backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ContentMuxError {
    #[error("pool '{0}' timed out")]
    Timeout(String),
    #[error("pool '{0}' handshake failed: {1}")]
    Handshake(String, String),
    #[error("pool '{0}' unreachable: {1}")]
    Unreachable(String, String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

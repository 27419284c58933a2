use std::path::PathBuf;
use thiserror::Error;

/// Errores de la capa de caché.
///
/// Only [`CacheError::BlobWrite`] ever crosses the store boundary: metadata
/// persistence problems are logged and swallowed inside the store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("could not write cached blob {path}: {source}")]
    BlobWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt cache state in {path}: {reason}")]
    CorruptState { path: PathBuf, reason: String },
}

/// Fallos al consultar el servicio externo de búsqueda/resolución.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("lookup failed: {0}")]
    Transient(String),

    #[error("nothing found for '{0}'")]
    NotFound(String),

    #[error("lookup timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("lookup tool unavailable: {0}")]
    Unavailable(String),
}

impl ResolveError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transient(format!("request timed out: {err}"))
        } else {
            Self::Transient(err.to_string())
        }
    }
}

/// Control channel delivery failures. Never surfaced to callers as `Err`,
/// only reported inside [`crate::audio::control::Delivery::Failed`].
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("control channel not connected: {0}")]
    NotConnected(String),

    #[error("control channel closed")]
    Closed,

    #[error("control channel timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("control channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("control channel protocol error: {0}")]
    Protocol(String),
}

/// Errores visibles del coordinador de reproducción.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("could not resolve a playable source: {0}")]
    Resolution(#[from] ResolveError),

    #[error("could not launch the player: {0}")]
    Launch(String),

    #[error("request for '{0}' was superseded by a newer one")]
    Superseded(String),
}

impl PlaybackError {
    /// Status line for the UI. Failures never go further than this.
    pub fn user_message(&self) -> &'static str {
        match self {
            PlaybackError::Resolution(ResolveError::NotFound(_)) => "could not find anything",
            PlaybackError::Resolution(_) | PlaybackError::Launch(_) => "could not start playback",
            PlaybackError::Superseded(_) => "playback request replaced",
        }
    }
}

//! Error types for engine tracking

use thiserror::Error;

/// Failure reported by a [`RemoteHostClient`](crate::client::RemoteHostClient)
#[derive(Debug, Error)]
pub enum ClientError {
    /// The referenced object (usually an image during creation) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Timeout, refused connection, protocol error...
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

impl ClientError {
    pub fn transport(message: impl Into<String>) -> Self {
        ClientError::Transport(anyhow::anyhow!(message.into()))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// Errors surfaced by [`Engine`](crate::engine::Engine) operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("cannot resolve engine address {addr}: {reason}")]
    AddressResolution { addr: String, reason: String },

    #[error("unsupported engine: {0}")]
    UnsupportedHost(String),

    #[error(transparent)]
    Remote(#[from] ClientError),

    #[error("{0} already registered")]
    DuplicateRegistration(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("engine is not connected")]
    NotConnected,

    #[error("engine is already connected")]
    AlreadyConnected,
}

impl HostError {
    /// True for remote "not found" as well as local cache misses
    pub fn is_not_found(&self) -> bool {
        match self {
            HostError::NotFound(_) => true,
            HostError::Remote(e) => e.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

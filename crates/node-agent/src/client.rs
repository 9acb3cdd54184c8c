//! Boundary to the remote container engine
//!
//! The wire protocol lives elsewhere; the engine tracker only talks to these
//! traits so any HTTP/RPC client (or a test double) can be plugged in.

use crate::error::ClientError;
use crate::models::{
    ContainerConfig, ContainerDetail, ContainerSummary, HostInfo, ImageDelete, ImageSummary,
    PushEvent,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Credentials used when pulling from a private registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub email: String,
    pub server_address: String,
}

/// Certificate locations for a mutually authenticated connection
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub ca_cert_path: PathBuf,
    pub client_cert_path: PathBuf,
    pub client_key_path: PathBuf,
}

/// Settings handed to a [`HostConnector`] when opening a client
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound for every single request sent to the engine
    pub request_timeout: Duration,
    pub tls: Option<TlsConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            tls: None,
        }
    }
}

/// Client for one remote container engine
#[async_trait]
pub trait RemoteHostClient: Send + Sync {
    async fn info(&self) -> ClientResult<HostInfo>;

    /// List containers. `filters` is the engine's JSON filter document,
    /// e.g. `{"id":["abc"]}`.
    async fn list_containers(
        &self,
        all: bool,
        size: bool,
        filters: Option<String>,
    ) -> ClientResult<Vec<ContainerSummary>>;

    async fn inspect_container(&self, id: &str) -> ClientResult<ContainerDetail>;

    /// Create a container and return its id. Fails with
    /// [`ClientError::NotFound`] when the image is missing.
    async fn create_container(
        &self,
        config: &ContainerConfig,
        name: Option<&str>,
    ) -> ClientResult<String>;

    async fn remove_container(&self, id: &str, force: bool, volumes: bool) -> ClientResult<()>;

    async fn list_images(&self) -> ClientResult<Vec<ImageSummary>>;

    async fn remove_image(&self, id: &str) -> ClientResult<Vec<ImageDelete>>;

    async fn pull_image(&self, reference: &str, auth: Option<&AuthConfig>) -> ClientResult<()>;

    /// Start streaming push events. Events flow until
    /// [`unsubscribe_events`](Self::unsubscribe_events) is called or the
    /// connection breaks, at which point the receiver is closed.
    async fn subscribe_events(&self) -> ClientResult<mpsc::Receiver<PushEvent>>;

    async fn unsubscribe_events(&self) -> ClientResult<()>;
}

/// Opens clients for engine addresses
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn open(
        &self,
        addr: &str,
        transport: &TransportConfig,
    ) -> ClientResult<Arc<dyn RemoteHostClient>>;
}

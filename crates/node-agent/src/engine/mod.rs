//! Tracking of a single remote container engine
//!
//! An [`Engine`] keeps a live mirror of one host's containers and images,
//! classifies the host as healthy or not and forwards lifecycle events to an
//! upward [`EventHandler`].
//!
//! All mutable state (identity, capacity, health and the entity cache) sits
//! behind one `RwLock`. The lock is only ever held for in-memory work: every
//! call to the engine happens with no lock held, so a slow host never blocks
//! readers.

mod events;
mod lifecycle;
mod monitor;
mod reconcile;
mod resources;


pub use events::{Event, EventHandler, EventStatus};
pub use resources::{native_cpu_shares, normalize_cpu_shares, with_overcommit};

use crate::cache::{Container, EntityCache, Image};
use crate::client::{HostConnector, RemoteHostClient, TlsConfig, TransportConfig};
use crate::config::EngineConfig;
use crate::error::{HostError, Result};
use crate::health::HealthStatus;
use crate::observability::{EngineMetrics, StructuredLogger};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Everything guarded by the engine lock
#[derive(Debug, Default)]
struct EngineState {
    id: String,
    name: String,
    ip: String,
    cpus: i64,
    memory: i64,
    labels: HashMap<String, String>,
    health: HealthStatus,
    cache: EntityCache,
}

#[derive(Default)]
struct BackgroundTasks {
    monitor: Option<JoinHandle<()>>,
    events: Option<JoinHandle<()>>,
}

/// A remote container engine and its cached state
pub struct Engine {
    me: Weak<Engine>,
    addr: String,
    config: EngineConfig,
    /// Overcommit ratio ×100
    overcommit_ratio: i64,
    state: RwLock<EngineState>,
    client: RwLock<Option<Arc<dyn RemoteHostClient>>>,
    event_handler: OnceLock<Arc<dyn EventHandler>>,
    refresh_signal: Arc<Notify>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<BackgroundTasks>,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl Engine {
    /// Create a disconnected engine for `addr` (`host:port`)
    pub fn new(addr: impl Into<String>, config: EngineConfig) -> Arc<Self> {
        let addr = addr.into();
        let (shutdown, _) = broadcast::channel(1);

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            overcommit_ratio: config.overcommit_scaled(),
            config,
            state: RwLock::new(EngineState::default()),
            client: RwLock::new(None),
            event_handler: OnceLock::new(),
            refresh_signal: Arc::new(Notify::new()),
            shutdown,
            tasks: Mutex::new(BackgroundTasks::default()),
            metrics: EngineMetrics::new(addr.clone()),
            logger: StructuredLogger::new(addr.clone()),
            addr,
        })
    }

    /// Resolve the engine address, open a client and start tracking.
    ///
    /// See [`connect_client`](Self::connect_client) for the sequencing.
    pub async fn connect(
        &self,
        connector: &dyn HostConnector,
        tls: Option<TlsConfig>,
    ) -> Result<()> {
        if self.is_connected().await {
            return Err(HostError::AlreadyConnected);
        }
        let ip = resolve_ipv4(&self.addr).await?;

        let transport = TransportConfig {
            request_timeout: self.config.request_timeout(),
            tls,
        };
        let client = connector.open(&self.addr, &transport).await?;

        self.attach(client, Some(ip)).await
    }

    /// Start tracking through an already opened client.
    ///
    /// Specs, containers and images are fetched first; if any of these fails
    /// the client is discarded and nothing is left running. Only then are the
    /// refresh loop and the push event stream started.
    pub async fn connect_client(&self, client: Arc<dyn RemoteHostClient>) -> Result<()> {
        self.attach(client, None).await
    }

    /// The resolved address is only recorded once the engine is tracked
    async fn attach(&self, client: Arc<dyn RemoteHostClient>, ip: Option<IpAddr>) -> Result<()> {
        {
            let mut slot = self.client.write().await;
            if slot.is_some() {
                return Err(HostError::AlreadyConnected);
            }
            *slot = Some(client);
        }

        if let Err(e) = self.initial_sync().await {
            *self.client.write().await = None;
            return Err(e);
        }

        let (id, name, cpus, memory) = {
            let mut state = self.state.write().await;
            if let Some(ip) = ip {
                state.ip = ip.to_string();
            }
            state.health = HealthStatus::Healthy;
            (state.id.clone(), state.name.clone(), state.cpus, state.memory)
        };
        self.metrics.set_healthy(true);

        self.start_monitor().await;
        if let Err(e) = self.start_event_stream().await {
            warn!(engine = %self.addr, error = %e, "Unable to subscribe to engine events");
        }

        self.logger.log_connected(&id, &name, cpus, memory);
        self.emit_event(EventStatus::EngineConnect).await;
        Ok(())
    }

    async fn initial_sync(&self) -> Result<()> {
        if let Err(e) = self.update_specs().await {
            self.logger.log_connect_failed("specs", &e);
            return Err(e);
        }
        if let Err(e) = self.refresh_containers(true).await {
            self.logger.log_connect_failed("containers", &e);
            return Err(e);
        }
        if let Err(e) = self.refresh_images().await {
            self.logger.log_connect_failed("images", &e);
            return Err(e);
        }
        Ok(())
    }

    /// Stop the refresh loop and the event stream and drop the client.
    ///
    /// Cached state stays queryable. Dropping the last `Arc<Engine>` has the
    /// same effect on the background tasks.
    pub async fn disconnect(&self) {
        let _ = self.shutdown.send(());

        {
            let mut tasks = self.tasks.lock().await;
            if let Some(handle) = tasks.events.take() {
                handle.abort();
            }
            if let Some(handle) = tasks.monitor.take() {
                handle.abort();
            }
        }

        if let Some(client) = self.client.write().await.take() {
            if let Err(e) = client.unsubscribe_events().await {
                debug!(engine = %self.addr, error = %e, "Unsubscribe on teardown failed");
            }
        }

        self.logger.log_disconnected();
    }

    /// Gather engine specs (identity, CPU, memory, labels)
    pub(crate) async fn update_specs(&self) -> Result<()> {
        let client = self.client().await?;
        let info = client.info().await?;

        if info.ncpu <= 0 || info.mem_total <= 0 {
            return Err(HostError::UnsupportedHost(format!(
                "cannot get resources for {}, make sure it is a container engine and not a cluster manager",
                self.addr
            )));
        }

        // Engines too old to report an id are not supported
        if info.id.is_empty() {
            return Err(HostError::UnsupportedHost(format!(
                "{} runs an engine version that does not report its id, please upgrade",
                self.addr
            )));
        }

        let mut labels = HashMap::from([
            ("storagedriver".to_string(), info.driver.clone()),
            ("executiondriver".to_string(), info.execution_driver.clone()),
            ("kernelversion".to_string(), info.kernel_version.clone()),
            ("operatingsystem".to_string(), info.operating_system.clone()),
        ]);
        for label in &info.labels {
            let (key, value) = label.split_once('=').unwrap_or((label.as_str(), ""));
            labels.insert(key.to_string(), value.to_string());
        }

        let mut state = self.state.write().await;
        state.id = info.id;
        state.name = info.name;
        state.cpus = info.ncpu;
        state.memory = info.mem_total;
        state.labels = labels;
        Ok(())
    }

    async fn client(&self) -> Result<Arc<dyn RemoteHostClient>> {
        self.client.read().await.clone().ok_or(HostError::NotConnected)
    }

    async fn start_monitor(&self) {
        let refresh_loop = monitor::RefreshLoop::new(
            self.me.clone(),
            self.refresh_signal.clone(),
            self.shutdown.subscribe(),
            self.config.refresh_period(),
        );
        let handle = tokio::spawn(refresh_loop.run());

        if let Some(previous) = self.tasks.lock().await.monitor.replace(handle) {
            previous.abort();
        }
    }

    /// Address the engine was created with (`host:port`)
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Tracking settings of this engine
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolved IPv4 address, empty until connected through [`connect`](Self::connect)
    pub async fn ip(&self) -> String {
        self.state.read().await.ip.clone()
    }

    /// Engine id as reported by the host
    pub async fn id(&self) -> String {
        self.state.read().await.id.clone()
    }

    /// Engine host name
    pub async fn name(&self) -> String {
        self.state.read().await.name.clone()
    }

    /// Physical CPU count
    pub async fn cpus(&self) -> i64 {
        self.state.read().await.cpus
    }

    /// Physical memory in bytes
    pub async fn memory(&self) -> i64 {
        self.state.read().await.memory
    }

    /// Driver and host labels
    pub async fn labels(&self) -> HashMap<String, String> {
        self.state.read().await.labels.clone()
    }

    /// Outcome of the last refresh cycle
    pub async fn health(&self) -> HealthStatus {
        self.state.read().await.health
    }

    /// Whether the last refresh cycle succeeded
    pub async fn is_healthy(&self) -> bool {
        self.health().await.is_healthy()
    }

    /// Whether a client is attached
    pub async fn is_connected(&self) -> bool {
        self.client.read().await.is_some()
    }

    /// Snapshot of all cached containers
    pub async fn containers(&self) -> Vec<Container> {
        self.state.read().await.cache.container_snapshot()
    }

    /// Find a container by id, id prefix or name
    pub async fn container(&self, id_or_name: &str) -> Option<Container> {
        let state = self.state.read().await;
        state.cache.find_container(id_or_name, &state.id, &state.name)
    }

    /// Snapshot of all cached images
    pub async fn images(&self) -> Vec<Image> {
        self.state.read().await.cache.images.clone()
    }

    /// Find an image by id, reference or digest
    pub async fn image(&self, id_or_name: &str) -> Option<Image> {
        self.state.read().await.cache.find_image(id_or_name)
    }

    /// Inject a container into the cache without contacting the engine
    pub async fn add_container(&self, container: Container) -> Result<()> {
        let mut state = self.state.write().await;
        if state.cache.containers.contains_key(container.id()) {
            return Err(HostError::DuplicateRegistration(format!(
                "container {}",
                container.id()
            )));
        }
        state
            .cache
            .containers
            .insert(container.id().to_string(), container);
        Ok(())
    }

    /// Inject an image into the cache without contacting the engine
    pub async fn add_image(&self, image: Image) {
        self.state.write().await.cache.images.push(image);
    }

    /// Drop a container from the cache without contacting the engine
    pub async fn remove_container(&self, id: &str) -> Result<Container> {
        self.state
            .write()
            .await
            .cache
            .containers
            .remove(id)
            .ok_or_else(|| HostError::NotFound(format!("container {id}")))
    }

    /// Wipe all cached containers
    pub async fn cleanup_containers(&self) {
        self.state.write().await.cache.containers.clear();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("addr", &self.addr)
            .field("overcommit_ratio", &self.overcommit_ratio)
            .finish_non_exhaustive()
    }
}

/// Resolve the host part of `host:port` to an IPv4 address
async fn resolve_ipv4(addr: &str) -> Result<IpAddr> {
    let resolution_error = |reason: String| HostError::AddressResolution {
        addr: addr.to_string(),
        reason,
    };

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| resolution_error("missing port".to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(resolution_error("missing host".to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| resolution_error(format!("invalid port {port:?}")))?;

    let mut candidates = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| resolution_error(e.to_string()))?;

    candidates
        .find(|candidate| candidate.is_ipv4())
        .map(|candidate| candidate.ip())
        .ok_or_else(|| resolution_error("no IPv4 address".to_string()))
}

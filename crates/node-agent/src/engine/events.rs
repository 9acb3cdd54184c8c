//! Push event dispatch and upward event forwarding

use super::Engine;
use crate::error::{HostError, Result};
use crate::models::PushEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Origin stamped on events synthesized by the agent itself
const AGENT_ORIGIN: &str = "node-agent";

/// Kind of an engine event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventStatus {
    Pull,
    Untag,
    Delete,
    Start,
    Die,
    Create,
    Destroy,
    Stop,
    Kill,
    Pause,
    Unpause,
    Restart,
    Oom,
    EngineConnect,
    EngineDisconnect,
    EngineReconnect,
    Other(String),
}

impl EventStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EventStatus::Pull => "pull",
            EventStatus::Untag => "untag",
            EventStatus::Delete => "delete",
            EventStatus::Start => "start",
            EventStatus::Die => "die",
            EventStatus::Create => "create",
            EventStatus::Destroy => "destroy",
            EventStatus::Stop => "stop",
            EventStatus::Kill => "kill",
            EventStatus::Pause => "pause",
            EventStatus::Unpause => "unpause",
            EventStatus::Restart => "restart",
            EventStatus::Oom => "oom",
            EventStatus::EngineConnect => "engine_connect",
            EventStatus::EngineDisconnect => "engine_disconnect",
            EventStatus::EngineReconnect => "engine_reconnect",
            EventStatus::Other(status) => status,
        }
    }
}

impl From<&str> for EventStatus {
    fn from(status: &str) -> Self {
        match status {
            "pull" => EventStatus::Pull,
            "untag" => EventStatus::Untag,
            "delete" => EventStatus::Delete,
            "start" => EventStatus::Start,
            "die" => EventStatus::Die,
            "create" => EventStatus::Create,
            "destroy" => EventStatus::Destroy,
            "stop" => EventStatus::Stop,
            "kill" => EventStatus::Kill,
            "pause" => EventStatus::Pause,
            "unpause" => EventStatus::Unpause,
            "restart" => EventStatus::Restart,
            "oom" => EventStatus::Oom,
            "engine_connect" => EventStatus::EngineConnect,
            "engine_disconnect" => EventStatus::EngineDisconnect,
            "engine_reconnect" => EventStatus::EngineReconnect,
            other => EventStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event forwarded to the cluster layer
#[derive(Clone)]
pub struct Event {
    pub status: EventStatus,
    pub engine: Arc<Engine>,
    pub from: String,
    pub time: DateTime<Utc>,
    /// Original push payload, `None` for synthesized engine events
    pub payload: Option<PushEvent>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("status", &self.status)
            .field("engine", &self.engine.addr())
            .field("from", &self.from)
            .field("time", &self.time)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Receives events from an engine. Implemented by the cluster layer.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event);
}

/// Drains a push event subscription into the engine
pub(crate) struct EventDispatcher {
    engine: Weak<Engine>,
    events: mpsc::Receiver<PushEvent>,
    shutdown: broadcast::Receiver<()>,
}

impl EventDispatcher {
    pub(crate) fn new(
        engine: Weak<Engine>,
        events: mpsc::Receiver<PushEvent>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            engine,
            events,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let event = tokio::select! {
                event = self.events.recv() => event,
                // Fires on disconnect, and with Closed once the engine is dropped
                _ = self.shutdown.recv() => None,
            };
            let Some(event) = event else {
                break;
            };

            let Some(engine) = self.engine.upgrade() else {
                break;
            };
            engine.handle_push_event(event).await;
        }
        debug!("Engine event stream closed");
    }
}

impl Engine {
    /// Register the upward event handler. Only one may ever be set.
    pub fn register_event_handler(&self, handler: Arc<dyn EventHandler>) -> Result<()> {
        self.event_handler
            .set(handler)
            .map_err(|_| HostError::DuplicateRegistration("event handler".to_string()))
    }

    /// Subscribe to push events and start dispatching them, replacing any
    /// previous dispatcher.
    pub(crate) async fn start_event_stream(&self) -> Result<()> {
        let client = self.client().await?;
        let events = client.subscribe_events().await?;

        let dispatcher =
            EventDispatcher::new(self.me.clone(), events, self.shutdown.subscribe());
        let handle = tokio::spawn(dispatcher.run());

        if let Some(previous) = self.tasks.lock().await.events.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Drop the current subscription and open a new one
    pub(crate) async fn restart_event_stream(&self) {
        match self.client().await {
            Ok(client) => {
                if let Err(e) = client.unsubscribe_events().await {
                    debug!(engine = %self.addr, error = %e, "Unsubscribe failed");
                }
            }
            Err(_) => return,
        }

        if let Err(e) = self.start_event_stream().await {
            warn!(engine = %self.addr, error = %e, "Unable to resubscribe to engine events");
        }
    }

    /// Reconcile the cache for a push event, then forward it upward
    pub(crate) async fn handle_push_event(&self, event: PushEvent) {
        let status = EventStatus::from(event.status.as_str());
        self.metrics.inc_push_events(status.as_str());

        let result = match status {
            // Image events leave containers untouched
            EventStatus::Pull | EventStatus::Untag | EventStatus::Delete => {
                self.refresh_images().await
            }
            // Network settings change on start/stop, which needs an inspect
            EventStatus::Start | EventStatus::Die => self.refresh_container(&event.id, true).await,
            _ => self.refresh_container(&event.id, false).await,
        };
        if let Err(e) = result {
            warn!(
                engine = %self.addr,
                status = %status,
                id = %event.id,
                error = %e,
                "Unable to reconcile after engine event"
            );
        }

        let time = DateTime::from_timestamp(event.time, 0).unwrap_or_else(Utc::now);
        let from = event.from.clone();
        self.forward(status, from, time, Some(event)).await;
    }

    /// Emit a synthesized engine event
    pub(crate) async fn emit_event(&self, status: EventStatus) {
        self.forward(status, AGENT_ORIGIN.to_string(), Utc::now(), None)
            .await;
    }

    async fn forward(
        &self,
        status: EventStatus,
        from: String,
        time: DateTime<Utc>,
        payload: Option<PushEvent>,
    ) {
        let Some(handler) = self.event_handler.get() else {
            return;
        };
        let Some(engine) = self.me.upgrade() else {
            return;
        };

        let event = Event {
            status,
            engine,
            from,
            time,
            payload,
        };
        handler.handle(&event).await;
    }
}

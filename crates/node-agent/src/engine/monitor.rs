//! Engine refresh loop
//!
//! One task per connected engine periodically reconciles the cache and
//! derives the engine's health from the outcome. It wakes on a timer or on
//! demand, and stops when the engine is dropped or disconnected.

use super::{Engine, EventStatus};
use crate::health::HealthTransition;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

pub(crate) struct RefreshLoop {
    engine: Weak<Engine>,
    signal: Arc<Notify>,
    shutdown: broadcast::Receiver<()>,
    period: Duration,
}

impl RefreshLoop {
    pub(crate) fn new(
        engine: Weak<Engine>,
        signal: Arc<Notify>,
        shutdown: broadcast::Receiver<()>,
        period: Duration,
    ) -> Self {
        Self {
            engine,
            signal,
            shutdown,
            period,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            period_secs = self.period.as_secs(),
            "Starting engine refresh loop"
        );

        loop {
            tokio::select! {
                _ = self.signal.notified() => {}
                _ = tokio::time::sleep(self.period) => {}
                // Fires on disconnect, and with Closed once the engine is dropped
                _ = self.shutdown.recv() => break,
            }

            let Some(engine) = self.engine.upgrade() else {
                break;
            };
            engine.health_check().await;
        }

        debug!("Engine refresh loop stopped");
    }
}

impl Engine {
    /// Ask the refresh loop to run now. Never blocks; requests made while a
    /// refresh is pending collapse into one.
    pub fn refresh_containers_async(&self) {
        self.refresh_signal.notify_one();
    }

    /// One refresh cycle: soft container refresh, image refresh, then update
    /// the health flag and react to transitions.
    pub(crate) async fn health_check(&self) {
        let result = match self.refresh_containers(false).await {
            Ok(()) => self.refresh_images().await,
            Err(e) => Err(e),
        };

        let (transition, id, name) = {
            let mut state = self.state.write().await;
            let (next, transition) = state.health.observe(result.is_ok());
            state.health = next;
            (transition, state.id.clone(), state.name.clone())
        };
        self.metrics.set_healthy(result.is_ok());

        match (transition, result) {
            (Some(HealthTransition::Lost), Err(e)) => {
                self.logger.log_health_lost(&id, &name, &e);
                self.emit_event(EventStatus::EngineDisconnect).await;
            }
            (None, Err(e)) => {
                debug!(engine = %self.addr, error = %e, "Engine still unreachable");
            }
            (Some(HealthTransition::Recovered), Ok(())) => {
                self.logger.log_health_recovered(&id, &name);
                // The subscription may have died during the outage
                self.restart_event_stream().await;
                self.emit_event(EventStatus::EngineReconnect).await;
                if let Err(e) = self.update_specs().await {
                    warn!(engine = %self.addr, error = %e, "Update engine specs failed");
                }
            }
            _ => {}
        }
    }
}

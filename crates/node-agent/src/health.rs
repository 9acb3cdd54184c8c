//! Engine health classification
//!
//! An engine is either reachable or not. Only edges between the two states
//! produce a [`HealthTransition`], so callers emit exactly one event per
//! outage no matter how many refresh cycles it spans.

use serde::{Deserialize, Serialize};

/// Health status of an engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Last refresh cycle succeeded
    #[default]
    Healthy,
    /// Last refresh cycle failed; cached state is stale but still served
    Unhealthy,
}

/// Edge between two health states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// Healthy -> Unhealthy
    Lost,
    /// Unhealthy -> Healthy
    Recovered,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Fold the outcome of one refresh cycle into the status
    pub fn observe(self, refresh_ok: bool) -> (HealthStatus, Option<HealthTransition>) {
        match (self, refresh_ok) {
            (HealthStatus::Healthy, false) => {
                (HealthStatus::Unhealthy, Some(HealthTransition::Lost))
            }
            (HealthStatus::Unhealthy, true) => {
                (HealthStatus::Healthy, Some(HealthTransition::Recovered))
            }
            (status, _) => (status, None),
        }
    }
}

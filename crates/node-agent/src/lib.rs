//! Agent library for tracking remote container engines
//!
//! This crate provides the per-host half of a cluster manager:
//! - A live mirror of each engine's containers and images
//! - Health tracking through a periodic refresh loop
//! - CPU and memory accounting with overcommit
//! - Forwarding of engine events to the cluster layer
//! - Metrics and structured logging

pub mod cache;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;

pub use cache::{Container, EntityCache, Image};
pub use client::{AuthConfig, HostConnector, RemoteHostClient, TlsConfig, TransportConfig};
pub use config::EngineConfig;
pub use engine::{Engine, Event, EventHandler, EventStatus};
pub use error::{ClientError, HostError, Result};
pub use health::{HealthStatus, HealthTransition};
pub use models::*;
pub use observability::{init_tracing, EngineMetrics, StructuredLogger};

//! Merging fresh engine listings into the entity cache

use super::resources::normalize_cpu_shares;
use super::Engine;
use crate::cache::{Container, Image};
use crate::client::RemoteHostClient;
use crate::error::Result;
use crate::models::ContainerSummary;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

impl Engine {
    /// Refresh the list and status of all containers, stopped ones included.
    ///
    /// With `full` every container is inspected; otherwise only containers
    /// never seen before are. A container that fails to merge is logged and
    /// keeps its previous record (if any) rather than failing the refresh.
    /// The new map replaces the old one in a single write.
    pub async fn refresh_containers(&self, full: bool) -> Result<()> {
        let start = Instant::now();
        let client = self.client().await?;

        let listed = match client.list_containers(true, false, None).await {
            Ok(listed) => listed,
            Err(e) => {
                self.metrics.inc_refresh_errors("containers");
                return Err(e.into());
            }
        };

        let mut merged = HashMap::with_capacity(listed.len());
        for summary in listed {
            let id = summary.id.clone();
            match self.update_container(&client, summary, full).await {
                Ok(container) => {
                    merged.insert(id, container);
                }
                Err(e) => {
                    warn!(
                        engine = %self.addr,
                        container_id = %id,
                        error = %e,
                        "Unable to update state of container"
                    );
                    if let Some(previous) = self.state.read().await.cache.containers.get(&id) {
                        merged.insert(id, previous.clone());
                    }
                }
            }
        }

        let count = merged.len();
        {
            let mut state = self.state.write().await;
            state.cache.containers = merged;
            debug!(engine = %self.addr, id = %state.id, containers = count, "Updated engine state");
        }

        self.metrics.set_containers(count);
        self.metrics
            .observe_refresh("containers", start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Refresh a single container. If `full`, it is inspected.
    ///
    /// No match means the container is gone and it is dropped from the cache.
    /// More than one match is unexpected and triggers a full refresh instead.
    pub async fn refresh_container(&self, id: &str, full: bool) -> Result<()> {
        let client = self.client().await?;
        let filters = serde_json::json!({ "id": [id] }).to_string();
        let mut listed = client.list_containers(true, false, Some(filters)).await?;

        if listed.len() > 1 {
            debug!(
                engine = %self.addr,
                container_id = %id,
                matches = listed.len(),
                "Ambiguous container refresh, refreshing all containers"
            );
            return self.refresh_containers(full).await;
        }

        let Some(summary) = listed.pop() else {
            let count = {
                let mut state = self.state.write().await;
                state.cache.containers.remove(id);
                state.cache.containers.len()
            };
            self.metrics.set_containers(count);
            return Ok(());
        };

        let container = self.update_container(&client, summary, full).await?;
        let count = {
            let mut state = self.state.write().await;
            state
                .cache
                .containers
                .insert(container.id().to_string(), container);
            state.cache.containers.len()
        };
        self.metrics.set_containers(count);
        Ok(())
    }

    /// Merge one listing record with what the cache already knows.
    ///
    /// The lock is released before inspecting. Two concurrent merges of the
    /// same container may both inspect it; whichever is written last wins,
    /// which is harmless since both hold a complete record.
    pub(crate) async fn update_container(
        &self,
        client: &Arc<dyn RemoteHostClient>,
        summary: ContainerSummary,
        full: bool,
    ) -> Result<Container> {
        let (mut container, full, cpus) = {
            let state = self.state.read().await;
            match state.cache.containers.get(&summary.id) {
                Some(current) => (current.clone(), full, state.cpus),
                // Never seen before: always inspect once
                None => (Container::new(summary.clone()), true, state.cpus),
            }
        };

        if full {
            let mut info = client.inspect_container(&summary.id).await?;
            info.config.cpu_shares = normalize_cpu_shares(info.config.cpu_shares, cpus);
            container.info = Some(info);
        }

        container.summary = summary;
        Ok(container)
    }

    /// Replace the cached image list with a fresh listing
    pub async fn refresh_images(&self) -> Result<()> {
        let start = Instant::now();
        let client = self.client().await?;

        let images: Vec<Image> = match client.list_images().await {
            Ok(images) => images.into_iter().map(Image::new).collect(),
            Err(e) => {
                self.metrics.inc_refresh_errors("images");
                return Err(e.into());
            }
        };

        let count = images.len();
        self.state.write().await.cache.images = images;

        self.metrics.set_images(count);
        self.metrics.observe_refresh("images", start.elapsed().as_secs_f64());
        Ok(())
    }
}

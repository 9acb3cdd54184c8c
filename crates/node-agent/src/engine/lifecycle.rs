//! Container creation and destruction, image pulls

use super::resources::native_cpu_shares;
use super::Engine;
use crate::cache::{has_tag, Container, Image};
use crate::client::AuthConfig;
use crate::error::{HostError, Result};
use crate::models::{ContainerConfig, ImageDelete};
use tracing::{info, warn};

impl Engine {
    /// Create a new container.
    ///
    /// `config.cpu_shares` is in normalized shares and converted to the
    /// engine's native unit before the request. When the image is missing and
    /// `pull_image` is set, the image is pulled and creation retried once.
    pub async fn create(
        &self,
        config: &ContainerConfig,
        name: Option<&str>,
        pull_image: bool,
    ) -> Result<Container> {
        let client = self.client().await?;

        let mut native = config.clone();
        native.cpu_shares = native_cpu_shares(config.cpu_shares, self.cpus().await);

        let id = match client.create_container(&native, name).await {
            Ok(id) => id,
            Err(e) if e.is_not_found() && pull_image => {
                info!(engine = %self.addr, image = %native.image, "Image not found, pulling");
                self.pull(&native.image).await?;
                client.create_container(&native, name).await?
            }
            Err(e) => return Err(e.into()),
        };

        // Register the container immediately rather than waiting for the
        // next refresh cycle
        self.refresh_container(&id, true).await?;

        self.container(&id)
            .await
            .ok_or_else(|| HostError::NotFound(format!("container {id}")))
    }

    /// Destroy a container, removing its volumes too
    pub async fn destroy(&self, container: &Container, force: bool) -> Result<()> {
        let client = self.client().await?;
        client.remove_container(container.id(), force, true).await?;

        // Drop it from the cache now, the push event may take a while
        let count = {
            let mut state = self.state.write().await;
            state.cache.containers.remove(container.id());
            state.cache.containers.len()
        };
        self.metrics.set_containers(count);
        Ok(())
    }

    /// Pull an image, defaulting to the `latest` tag
    pub async fn pull(&self, image: &str) -> Result<()> {
        self.pull_with_auth(image, None).await
    }

    /// Pull an image with registry credentials
    pub async fn pull_with_auth(&self, image: &str, auth: Option<&AuthConfig>) -> Result<()> {
        let client = self.client().await?;

        let reference = if has_tag(image) {
            image.to_string()
        } else {
            format!("{image}:latest")
        };
        client.pull_image(&reference, auth).await?;

        if let Err(e) = self.refresh_images().await {
            warn!(engine = %self.addr, image = %reference, error = %e, "Image refresh after pull failed");
        }
        Ok(())
    }

    /// Delete an image from the engine
    pub async fn remove_image(&self, image: &Image) -> Result<Vec<ImageDelete>> {
        let client = self.client().await?;
        Ok(client.remove_image(image.id()).await?)
    }
}

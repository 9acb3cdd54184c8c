//! In-memory mirror of one engine's containers and images
//!
//! The cache itself holds no lock: it lives inside the engine's state behind
//! a single `RwLock`. Readers copy out, full refreshes build a fresh map and
//! swap it in.

use crate::models::{ContainerDetail, ContainerSummary, ImageSummary};
use std::collections::HashMap;

/// A container known to an engine
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    /// Latest listing record
    pub summary: ContainerSummary,
    /// Latest inspect record, CPU shares normalized to the engine's core count
    pub info: Option<ContainerDetail>,
}

impl Container {
    pub fn new(summary: ContainerSummary) -> Self {
        Self {
            summary,
            info: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.summary.id
    }

    pub fn names(&self) -> &[String] {
        &self.summary.names
    }

    /// Reserved CPU in normalized shares, 0 if never inspected
    pub fn cpu_shares(&self) -> i64 {
        self.info.as_ref().map_or(0, |info| info.config.cpu_shares)
    }

    /// Reserved memory in bytes, 0 if never inspected
    pub fn memory(&self) -> i64 {
        self.info.as_ref().map_or(0, |info| info.config.memory)
    }

    /// Match an id prefix, or a name as `name`, `/name`, `<engine><name>` or
    /// `<engine>/name` where `<engine>` is the engine id or name.
    pub fn matches(&self, query: &str, engine_id: &str, engine_name: &str) -> bool {
        if query.is_empty() {
            return false;
        }

        if self.summary.id.starts_with(query) {
            return true;
        }

        self.summary.names.iter().any(|name| {
            let bare = name.trim_start_matches('/');
            if bare.is_empty() {
                return false;
            }
            let slashed = format!("/{bare}");

            bare == query.trim_start_matches('/')
                || [engine_id, engine_name]
                    .iter()
                    .filter(|prefix| !prefix.is_empty())
                    .any(|prefix| {
                        query
                            .strip_prefix(*prefix)
                            .is_some_and(|rest| rest == bare || rest == slashed)
                    })
        })
    }
}

/// An image present on an engine
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub summary: ImageSummary,
}

impl Image {
    pub fn new(summary: ImageSummary) -> Self {
        Self { summary }
    }

    pub fn id(&self) -> &str {
        &self.summary.id
    }

    /// Match an id (or id prefix, with or without `sha256:`), a `repo:tag`,
    /// a bare `repo` standing for `repo:latest`, or a digest.
    pub fn matches(&self, query: &str) -> bool {
        if query.is_empty() {
            return false;
        }

        let id = &self.summary.id;
        if id.starts_with(query) {
            return true;
        }
        if let Some(hex) = id.strip_prefix("sha256:") {
            if hex.starts_with(query) {
                return true;
            }
        }

        let with_tag = if has_tag(query) {
            query.to_string()
        } else {
            format!("{query}:latest")
        };
        if self.summary.repo_tags.iter().any(|tag| tag == query || *tag == with_tag) {
            return true;
        }

        self.summary.repo_digests.iter().any(|digest| digest == query)
    }
}

/// Whether an image reference carries a tag or a digest. Only the last path
/// segment counts, so a registry port (`host:5000/app`) is not a tag.
pub(crate) fn has_tag(reference: &str) -> bool {
    let last = reference.rsplit('/').next().unwrap_or(reference);
    last.contains(':') || last.contains('@')
}

/// Containers by id plus the image list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityCache {
    pub containers: HashMap<String, Container>,
    pub images: Vec<Image>,
}

impl EntityCache {
    pub fn container_snapshot(&self) -> Vec<Container> {
        self.containers.values().cloned().collect()
    }

    pub fn find_container(
        &self,
        query: &str,
        engine_id: &str,
        engine_name: &str,
    ) -> Option<Container> {
        if query.is_empty() {
            return None;
        }
        // An exact id wins over any prefix or name match
        if let Some(container) = self.containers.get(query) {
            return Some(container.clone());
        }
        self.containers
            .values()
            .find(|c| c.matches(query, engine_id, engine_name))
            .cloned()
    }

    pub fn find_image(&self, query: &str) -> Option<Image> {
        self.images.iter().find(|image| image.matches(query)).cloned()
    }

    pub fn used_cpus(&self) -> i64 {
        self.containers.values().map(Container::cpu_shares).sum()
    }

    pub fn used_memory(&self) -> i64 {
        self.containers.values().map(Container::memory).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerConfig;

    fn container(id: &str, name: &str) -> Container {
        Container::new(ContainerSummary {
            id: id.to_string(),
            names: vec![format!("/{name}")],
            ..Default::default()
        })
    }

    fn image(id: &str, tags: &[&str]) -> Image {
        Image::new(ImageSummary {
            id: id.to_string(),
            repo_tags: tags.iter().map(|t| t.to_string()).collect(),
            repo_digests: vec!["redis@sha256:feed".to_string()],
            ..Default::default()
        })
    }

    #[test]
    fn test_container_lookup_forms() {
        let c = container("abc123", "web");

        for query in ["abc", "abc123", "web", "/web", "node1web", "node1/web", "abc123web"] {
            assert!(c.matches(query, "abc123", "node1"), "query {query:?}");
        }
        for query in ["", "xyz", "we", "node2web", "node1"] {
            assert!(!c.matches(query, "abc123", "node1"), "query {query:?}");
        }
    }

    #[test]
    fn test_container_lookup_without_leading_slash() {
        let c = Container::new(ContainerSummary {
            id: "def456".to_string(),
            names: vec!["db".to_string()],
            ..Default::default()
        });

        assert!(c.matches("db", "", "node1"));
        assert!(c.matches("/db", "", "node1"));
        assert!(c.matches("node1db", "", "node1"));
        // Empty engine id must not turn every name into a match
        assert!(!c.matches("xdb", "", "node1"));
    }

    #[test]
    fn test_container_resources_default_to_zero() {
        let mut c = container("abc", "web");
        assert_eq!(c.cpu_shares(), 0);
        assert_eq!(c.memory(), 0);

        c.info = Some(ContainerDetail {
            id: "abc".to_string(),
            config: ContainerConfig {
                cpu_shares: 512,
                memory: 1024,
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(c.cpu_shares(), 512);
        assert_eq!(c.memory(), 1024);
    }

    #[test]
    fn test_image_matches() {
        let img = image("sha256:0123abcd", &["redis:7", "redis:latest"]);

        assert!(img.matches("sha256:0123"));
        assert!(img.matches("0123ab"));
        assert!(img.matches("redis:7"));
        assert!(img.matches("redis"));
        assert!(img.matches("redis@sha256:feed"));
        assert!(!img.matches(""));
        assert!(!img.matches("redis:6"));
        assert!(!img.matches("nginx"));
    }

    #[test]
    fn test_has_tag_ignores_registry_port() {
        assert!(has_tag("redis:7"));
        assert!(has_tag("registry:5000/app:1.0"));
        assert!(has_tag("app@sha256:feed"));
        assert!(!has_tag("redis"));
        assert!(!has_tag("registry:5000/app"));
    }

    #[test]
    fn test_find_container_prefers_exact_id() {
        let mut cache = EntityCache::default();
        cache.containers.insert("abc".to_string(), container("abc", "one"));
        cache.containers.insert("abcdef".to_string(), container("abcdef", "two"));

        let found = cache.find_container("abc", "", "").unwrap();
        assert_eq!(found.id(), "abc");
        assert!(cache.find_container("", "", "").is_none());
    }
}

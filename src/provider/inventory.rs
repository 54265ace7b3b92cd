//! File-backed node inventory.
//!
//! Nodes are kept in memory and, when a path is configured, mirrored to a
//! JSON file after every change:
//!
//! ```json
//! {
//!   "nodes": [
//!     { "id": "3f2a9c1e", "hostname": "web-1", "group": "web", "tags": ["web"],
//!       "created_at": "2026-10-19T08:00:00Z" }
//!   ]
//! }
//! ```

use async_trait::async_trait;
use muster_common::{AdminUser, GroupSpec, Node};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CreateOptions, NodeProvider};
use crate::errors::ProviderError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    nodes: Vec<Node>,
}

pub struct InventoryProvider {
    path: Option<PathBuf>,
    nodes: Mutex<Vec<Node>>,
}

impl InventoryProvider {
    /// An inventory that lives only as long as the provider.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            nodes: Mutex::new(Vec::new()),
        }
    }

    /// Seed an in-memory inventory with existing nodes.
    pub fn with_nodes(nodes: Vec<Node>) -> Self {
        Self {
            path: None,
            nodes: Mutex::new(nodes),
        }
    }

    /// Open the inventory at `path`; a missing file is an empty inventory.
    pub fn open(path: &Path) -> Result<Self, ProviderError> {
        let nodes = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|source| ProviderError::Inventory {
                    path: path.to_path_buf(),
                    source,
                })?;
            serde_json::from_str::<InventoryFile>(&content)?.nodes
        } else {
            Vec::new()
        };

        debug!(path = %path.display(), nodes = nodes.len(), "Opened inventory");

        Ok(Self {
            path: Some(path.to_path_buf()),
            nodes: Mutex::new(nodes),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, nodes: &[Node]) -> Result<(), ProviderError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| ProviderError::Inventory {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let file = InventoryFile {
            nodes: nodes.to_vec(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(path, content).await.map_err(io_err)?;
        Ok(())
    }
}

/// Lowest unused positive suffix for `prefix-N` hostnames.
fn next_index(nodes: &[Node], prefix: &str) -> usize {
    let marker = format!("{}-", prefix);
    nodes
        .iter()
        .filter_map(|n| n.hostname.strip_prefix(&marker))
        .filter_map(|suffix| suffix.parse::<usize>().ok())
        .max()
        .map_or(1, |max| max + 1)
}

#[async_trait]
impl NodeProvider for InventoryProvider {
    async fn list_nodes(&self) -> Result<Vec<Node>, ProviderError> {
        Ok(self.nodes.lock().await.clone())
    }

    async fn create_nodes(
        &self,
        group: &GroupSpec,
        admin_user: &AdminUser,
        count: usize,
        options: &CreateOptions,
    ) -> Result<Vec<Node>, ProviderError> {
        let mut nodes = self.nodes.lock().await;
        let prefix = options
            .hostname_prefix
            .clone()
            .unwrap_or_else(|| group.name.clone());
        let start = next_index(&nodes, &prefix);

        let mut tags = group.node_tags.clone();
        tags.extend(options.tags.iter().cloned());

        let created: Vec<Node> = (0..count)
            .map(|i| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                let hostname = format!("{}-{}", prefix, start + i);
                Node::new(&id[..12], &hostname, &group.name).with_tags(tags.clone())
            })
            .collect();

        let mut next = nodes.clone();
        next.extend(created.iter().cloned());
        self.persist(&next).await?;
        *nodes = next;

        info!(
            group = %group.name,
            count,
            admin = %admin_user.username,
            "Created nodes"
        );
        Ok(created)
    }

    async fn destroy_nodes(&self, doomed: &[Node]) -> Result<(), ProviderError> {
        let mut nodes = self.nodes.lock().await;
        let ids: HashSet<&str> = doomed.iter().map(|n| n.id.as_str()).collect();

        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !nodes.iter().any(|n| n.id == **id))
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ProviderError::DestroyFailed {
                nodes: missing,
                message: "not in inventory".to_string(),
            });
        }

        let next: Vec<Node> = nodes
            .iter()
            .filter(|n| !ids.contains(n.id.as_str()))
            .cloned()
            .collect();
        self.persist(&next).await?;
        *nodes = next;

        info!(count = doomed.len(), "Destroyed nodes");
        Ok(())
    }
}

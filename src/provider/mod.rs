//! Node provider seam.
//!
//! A `NodeProvider` owns the node population: it lists, creates and destroys
//! nodes, and may run group-level setup and teardown. The engine only talks
//! to providers through this trait; `InventoryProvider` is the implementation
//! the `muster` binary uses.

mod inventory;

pub use inventory::InventoryProvider;

use async_trait::async_trait;
use muster_common::{AdminUser, GroupSpec, Node};
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

/// Provider-independent options for node creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Hostname prefix; the group name when unset
    #[serde(default)]
    pub hostname_prefix: Option<String>,
    /// Tags added to every created node on top of the group's own
    #[serde(default)]
    pub tags: Vec<String>,
}

#[async_trait]
pub trait NodeProvider: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>, ProviderError>;

    async fn create_nodes(
        &self,
        group: &GroupSpec,
        admin_user: &AdminUser,
        count: usize,
        options: &CreateOptions,
    ) -> Result<Vec<Node>, ProviderError>;

    async fn destroy_nodes(&self, nodes: &[Node]) -> Result<(), ProviderError>;

    /// Group-level setup run before a group's first node is created.
    async fn create_group(&self, _group: &GroupSpec) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Group-level teardown run after a group's last node is destroyed.
    async fn destroy_group(&self, _group: &GroupSpec) -> Result<(), ProviderError> {
        Ok(())
    }
}

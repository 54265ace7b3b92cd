//! Node lifecycle driver.
//!
//! Turns the reconciler's additions and removals into provider calls. Every
//! group is handled concurrently and independently: one group's failure is
//! recorded and never stops another group's work.

use futures::future::join_all;
use muster_common::{AdminUser, GroupSpec, Node, Target};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{GroupFailure, LifecycleError, ProviderError};
use crate::provider::{CreateOptions, NodeProvider};
use crate::reconcile::{GroupAddition, GroupRemoval};

/// Targets created across all groups plus any per-group failures.
#[derive(Debug, Default)]
pub struct CreateOutcome {
    pub targets: Vec<Target>,
    pub failures: Vec<GroupFailure>,
}

impl CreateOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn first_error(&self) -> Option<&GroupFailure> {
        self.failures.first()
    }

    /// Split into the created targets and the combined failure, if any.
    pub fn into_parts(self) -> (Vec<Target>, Option<LifecycleError>) {
        (self.targets, aggregate(self.failures))
    }
}

/// Nodes destroyed for one group.
#[derive(Debug, Clone)]
pub struct RemovedNodes {
    pub group: String,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Default)]
pub struct RemoveOutcome {
    pub removed: Vec<RemovedNodes>,
    pub failures: Vec<GroupFailure>,
}

impl RemoveOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn removed_nodes(&self) -> impl Iterator<Item = &Node> {
        self.removed.iter().flat_map(|r| r.nodes.iter())
    }

    pub fn into_parts(self) -> (Vec<RemovedNodes>, Option<LifecycleError>) {
        (self.removed, aggregate(self.failures))
    }
}

/// Outcome of group-level provider hooks.
#[derive(Debug, Default)]
pub struct GroupOpOutcome {
    pub succeeded: Vec<String>,
    pub failures: Vec<GroupFailure>,
}

impl GroupOpOutcome {
    pub fn into_error(self) -> Option<LifecycleError> {
        aggregate(self.failures)
    }
}

fn aggregate(failures: Vec<GroupFailure>) -> Option<LifecycleError> {
    if failures.is_empty() {
        None
    } else {
        Some(LifecycleError::Aggregate { failures })
    }
}

/// Group-level provider hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupOp {
    Create,
    Destroy,
}

impl fmt::Display for GroupOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GroupOp::Create => "create-group",
            GroupOp::Destroy => "destroy-group",
        })
    }
}

pub struct NodeLifecycleDriver {
    provider: Arc<dyn NodeProvider>,
    admin_user: AdminUser,
    create_options: CreateOptions,
}

impl NodeLifecycleDriver {
    pub fn new(provider: Arc<dyn NodeProvider>, admin_user: AdminUser) -> Self {
        Self {
            provider,
            admin_user,
            create_options: CreateOptions::default(),
        }
    }

    pub fn with_create_options(mut self, options: CreateOptions) -> Self {
        self.create_options = options;
        self
    }

    /// Create the requested number of nodes for every group.
    pub async fn create_group_nodes(&self, additions: &[GroupAddition]) -> CreateOutcome {
        let requests = additions.iter().map(|addition| async move {
            let created = self
                .provider
                .create_nodes(
                    &addition.group,
                    &self.admin_user,
                    addition.count,
                    &self.create_options,
                )
                .await;
            (&addition.group, created)
        });

        let mut outcome = CreateOutcome::default();
        for (group, created) in join_all(requests).await {
            match created {
                Ok(nodes) => {
                    info!(group = %group.name, count = nodes.len(), "Group nodes created");
                    outcome
                        .targets
                        .extend(nodes.into_iter().map(|node| bind_created(group, node)));
                }
                Err(error) => {
                    warn!(group = %group.name, %error, "Group node creation failed");
                    outcome.failures.push(GroupFailure {
                        group: group.name.clone(),
                        error,
                    });
                }
            }
        }
        outcome
    }

    /// Destroy the selected nodes of every group.
    pub async fn remove_group_nodes(&self, removals: &[GroupRemoval]) -> RemoveOutcome {
        let requests = removals
            .iter()
            .filter(|r| !r.targets.is_empty())
            .map(|removal| async move {
                let nodes: Vec<Node> = removal.targets.iter().map(|t| t.node.clone()).collect();
                let result = self.provider.destroy_nodes(&nodes).await;
                (removal, nodes, result)
            });

        let mut outcome = RemoveOutcome::default();
        for (removal, nodes, result) in join_all(requests).await {
            match result {
                Ok(()) => {
                    info!(
                        group = %removal.group.name,
                        count = nodes.len(),
                        all = removal.all,
                        "Group nodes removed"
                    );
                    outcome.removed.push(RemovedNodes {
                        group: removal.group.name.clone(),
                        nodes,
                    });
                }
                Err(error) => {
                    warn!(group = %removal.group.name, %error, "Group node removal failed");
                    outcome.failures.push(GroupFailure {
                        group: removal.group.name.clone(),
                        error,
                    });
                }
            }
        }
        outcome
    }

    /// Run the provider's group setup for groups gaining their first nodes.
    pub async fn create_groups(&self, groups: &[GroupSpec]) -> GroupOpOutcome {
        self.group_op(groups, GroupOp::Create).await
    }

    /// Run the provider's group teardown for groups losing their last nodes.
    pub async fn destroy_groups(&self, groups: &[GroupSpec]) -> GroupOpOutcome {
        self.group_op(groups, GroupOp::Destroy).await
    }

    async fn group_op(&self, groups: &[GroupSpec], operation: GroupOp) -> GroupOpOutcome {
        let requests = groups.iter().map(|group| async move {
            let result = match operation {
                GroupOp::Create => self.provider.create_group(group).await,
                GroupOp::Destroy => self.provider.destroy_group(group).await,
            };
            (group, result)
        });

        let mut outcome = GroupOpOutcome::default();
        for (group, result) in join_all(requests).await {
            match result {
                Ok(()) => outcome.succeeded.push(group.name.clone()),
                Err(error) => {
                    warn!(group = %group.name, %operation, %error, "Group operation failed");
                    outcome.failures.push(GroupFailure {
                        group: group.name.clone(),
                        error: match error {
                            e @ ProviderError::GroupOperationFailed { .. } => e,
                            other => ProviderError::GroupOperationFailed {
                                operation: operation.to_string(),
                                group: group.name.clone(),
                                message: other.to_string(),
                            },
                        },
                    });
                }
            }
        }
        outcome
    }
}

/// Bind a freshly created node; it always carries its group's name.
fn bind_created(group: &GroupSpec, mut node: Node) -> Target {
    node.group = group.name.clone();
    group.bind(node)
}

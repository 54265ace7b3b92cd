//! Node-count reconciliation.
//!
//! Diffs the declared group sizes against the targets a provider reports and
//! decides which groups and nodes to create or remove. Everything here is
//! pure: the same inputs always produce the same plan.

use muster_common::{GroupSpec, Node, Target};
use std::fmt;
use tracing::debug;

use crate::errors::ReconcileError;

/// Desired versus actual size of one group.
#[derive(Debug, Clone)]
pub struct GroupDelta {
    pub group: GroupSpec,
    pub actual: usize,
    pub target: usize,
    /// `target - actual`
    pub delta: i64,
}

impl GroupDelta {
    pub fn new(group: GroupSpec, actual: usize, target: usize) -> Self {
        Self {
            group,
            actual,
            target,
            delta: target as i64 - actual as i64,
        }
    }
}

/// Targets selected for removal from one group.
#[derive(Debug, Clone)]
pub struct GroupRemoval {
    pub group: GroupSpec,
    pub targets: Vec<Target>,
    /// The group is being emptied
    pub all: bool,
}

/// Nodes to create for one group.
#[derive(Debug, Clone)]
pub struct GroupAddition {
    pub group: GroupSpec,
    pub count: usize,
}

/// Compute the delta for every group.
pub fn group_deltas(
    targets: &[Target],
    groups: &[GroupSpec],
) -> Result<Vec<GroupDelta>, ReconcileError> {
    groups
        .iter()
        .map(|group| {
            let count = group.count.ok_or_else(|| ReconcileError::MissingCount {
                group: group.name.clone(),
            })?;
            let actual = targets.iter().filter(|t| group.matches(&t.node)).count();
            Ok(GroupDelta::new(group.clone(), actual, count))
        })
        .collect()
}

/// Groups going from no members to some.
pub fn groups_to_create(deltas: &[GroupDelta]) -> Vec<GroupSpec> {
    deltas
        .iter()
        .filter(|d| d.actual == 0 && d.target > 0)
        .map(|d| d.group.clone())
        .collect()
}

/// Groups going from some members to none.
pub fn groups_to_remove(deltas: &[GroupDelta]) -> Vec<GroupSpec> {
    deltas
        .iter()
        .filter(|d| d.target == 0 && d.actual > 0)
        .map(|d| d.group.clone())
        .collect()
}

/// Select surplus targets for every shrinking group.
///
/// Selection takes the first matching targets in input order, so repeated
/// calls with the same input select the same targets.
pub fn nodes_to_remove(targets: &[Target], deltas: &[GroupDelta]) -> Vec<GroupRemoval> {
    deltas
        .iter()
        .filter(|d| d.delta < 0)
        .map(|d| {
            let surplus = d.delta.unsigned_abs() as usize;
            let selected: Vec<Target> = targets
                .iter()
                .filter(|t| d.group.matches(&t.node))
                .take(surplus)
                .cloned()
                .collect();
            GroupRemoval {
                group: d.group.clone(),
                targets: selected,
                all: d.target == 0,
            }
        })
        .collect()
}

/// Node counts to create for every growing group.
pub fn nodes_to_add(deltas: &[GroupDelta]) -> Vec<GroupAddition> {
    deltas
        .iter()
        .filter(|d| d.delta > 0)
        .map(|d| GroupAddition {
            group: d.group.clone(),
            count: d.delta as usize,
        })
        .collect()
}

/// Bind provider nodes to the first group (in declaration order) whose
/// filter accepts them. Nodes no group claims are left out.
pub fn targets_for(nodes: Vec<Node>, groups: &[GroupSpec]) -> Vec<Target> {
    nodes
        .into_iter()
        .filter_map(|node| match groups.iter().find(|g| g.matches(&node)) {
            Some(group) => Some(group.bind(node)),
            None => {
                debug!(node = %node.id, hostname = %node.hostname, "Node matches no group");
                None
            }
        })
        .collect()
}

/// One reconciliation pass over a target set.
#[derive(Debug, Clone)]
pub struct ConvergePlan {
    pub deltas: Vec<GroupDelta>,
    pub groups_to_create: Vec<GroupSpec>,
    pub groups_to_remove: Vec<GroupSpec>,
    pub removals: Vec<GroupRemoval>,
    pub additions: Vec<GroupAddition>,
}

impl ConvergePlan {
    pub fn compute(targets: &[Target], groups: &[GroupSpec]) -> Result<Self, ReconcileError> {
        let deltas = group_deltas(targets, groups)?;
        Ok(Self {
            groups_to_create: groups_to_create(&deltas),
            groups_to_remove: groups_to_remove(&deltas),
            removals: nodes_to_remove(targets, &deltas),
            additions: nodes_to_add(&deltas),
            deltas,
        })
    }

    /// True when the node population already matches.
    pub fn is_noop(&self) -> bool {
        self.deltas.iter().all(|d| d.delta == 0)
    }

    /// Ids of every target selected for removal.
    pub fn removed_target_ids(&self) -> Vec<&str> {
        self.removals
            .iter()
            .flat_map(|r| r.targets.iter().map(Target::id))
            .collect()
    }
}

impl fmt::Display for ConvergePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<20} {:>8} {:>8} {:>8}", "GROUP", "ACTUAL", "TARGET", "DELTA")?;
        for d in &self.deltas {
            writeln!(
                f,
                "{:<20} {:>8} {:>8} {:>+8}",
                d.group.name, d.actual, d.target, d.delta
            )?;
        }
        for g in &self.groups_to_create {
            writeln!(f, "create group {}", g.name)?;
        }
        for r in &self.removals {
            let ids: Vec<&str> = r.targets.iter().map(Target::id).collect();
            writeln!(f, "remove from {}: {}", r.group.name, ids.join(", "))?;
        }
        for a in &self.additions {
            writeln!(f, "add to {}: {} node(s)", a.group.name, a.count)?;
        }
        for g in &self.groups_to_remove {
            writeln!(f, "destroy group {}", g.name)?;
        }
        Ok(())
    }
}

use serde::Serialize;
use std::collections::BTreeMap;

use crate::node::Node;
use crate::phase::PhaseDef;

/// A node bound to its resolved group configuration.
///
/// Targets are read-only during a run. Deriving a new target set (after node
/// creation, say) builds new values rather than mutating these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    pub group_name: String,
    pub node: Node,
    pub phases: BTreeMap<String, PhaseDef>,
    pub default_phases: Vec<String>,
    pub roles: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

impl Target {
    /// Target id; the id of the bound node.
    pub fn id(&self) -> &str {
        &self.node.id
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseDef> {
        self.phases.get(name)
    }

    pub fn has_phase(&self, name: &str) -> bool {
        self.phases.contains_key(name)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::node::Node;
use crate::phase::PhaseDef;
use crate::target::Target;

/// Membership predicate deciding whether a node belongs to a group.
pub type NodeFilter = Arc<dyn Fn(&Node) -> bool + Send + Sync>;

/// Desired state for a named set of targets.
#[derive(Clone)]
pub struct GroupSpec {
    pub name: String,
    /// Desired size; required for reconciliation
    pub count: Option<usize>,
    /// Tags applied to nodes created for this group
    pub node_tags: Vec<String>,
    pub phases: BTreeMap<String, PhaseDef>,
    pub default_phases: Vec<String>,
    pub roles: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    node_filter: NodeFilter,
}

impl GroupSpec {
    /// Create a group whose members are the nodes created for it.
    pub fn new(name: &str) -> Self {
        let group = name.to_string();
        Self {
            name: name.to_string(),
            count: None,
            node_tags: Vec::new(),
            phases: BTreeMap::new(),
            default_phases: Vec::new(),
            roles: Vec::new(),
            metadata: BTreeMap::new(),
            node_filter: Arc::new(move |node: &Node| node.group == group),
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_node_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Node) -> bool + Send + Sync + 'static,
    {
        self.node_filter = Arc::new(filter);
        self
    }

    pub fn with_node_tags(mut self, tags: Vec<String>) -> Self {
        self.node_tags = tags;
        self
    }

    pub fn with_phase(mut self, phase: PhaseDef) -> Self {
        self.phases.insert(phase.name.clone(), phase);
        self
    }

    pub fn with_default_phases(mut self, phases: Vec<String>) -> Self {
        self.default_phases = phases;
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Whether `node` is a member of this group.
    pub fn matches(&self, node: &Node) -> bool {
        (self.node_filter)(node)
    }

    /// Bind a node to this group.
    pub fn bind(&self, node: Node) -> Target {
        Target {
            group_name: self.name.clone(),
            node,
            phases: self.phases.clone(),
            default_phases: self.default_phases.clone(),
            roles: self.roles.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl fmt::Debug for GroupSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupSpec")
            .field("name", &self.name)
            .field("count", &self.count)
            .field("node_tags", &self.node_tags)
            .field("phases", &self.phases.keys().collect::<Vec<_>>())
            .field("default_phases", &self.default_phases)
            .finish_non_exhaustive()
    }
}

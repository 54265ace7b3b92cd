use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A compute node as reported by a node provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Provider-unique identifier; also the target id once bound to a group
    pub id: String,
    pub hostname: String,
    /// Group the node was created for
    pub group: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: &str, hostname: &str, group: &str) -> Self {
        Self {
            id: id.to_string(),
            hostname: hostname.to_string(),
            group: group.to_string(),
            tags: Vec::new(),
            primary_ip: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_primary_ip(mut self, ip: &str) -> Self {
        self.primary_ip = Some(ip.to_string());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// The administrative user a provider installs on new nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUser {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_path: Option<PathBuf>,
}

impl AdminUser {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            public_key_path: None,
        }
    }
}

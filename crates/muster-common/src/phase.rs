//! Phase identity and declaration.
//!
//! Phases form a tree: a phase may run sub-phases, and a target's position in
//! that tree is a `PhasePath` from the root. Barrier cohorts are defined in
//! terms of the parent path, so the ancestor relation lives here rather than
//! being rebuilt from raw slices at each call site.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered path of phase-name segments. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhasePath(Vec<String>);

impl PhasePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The innermost segment, `None` at the root.
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// The enclosing path, `None` at the root.
    pub fn parent(&self) -> Option<PhasePath> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn child(&self, segment: &str) -> PhasePath {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    /// True if `self` is `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &PhasePath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// True if `other` lies strictly inside the subtree rooted at `self`.
    pub fn is_ancestor_of(&self, other: &PhasePath) -> bool {
        other.0.len() > self.0.len() && self.is_prefix_of(other)
    }
}

impl fmt::Display for PhasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0.join("/"))
        }
    }
}

/// A phase as declared by a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDef {
    pub name: String,
    /// Opaque to the engine; interpreted by the phase executor
    #[serde(default)]
    pub commands: Vec<String>,
    /// Middleware tag selecting phase-scoped pre/post hooks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleware: Option<String>,
    /// Whether per-target executions meet at a barrier on phase exit
    #[serde(default)]
    pub synchronized: bool,
}

impl PhaseDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            commands: Vec::new(),
            middleware: None,
            synchronized: false,
        }
    }

    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_middleware(mut self, tag: &str) -> Self {
        self.middleware = Some(tag.to_string());
        self
    }

    pub fn synchronized(mut self) -> Self {
        self.synchronized = true;
        self
    }
}

//! Configuration for muster.
//!
//! Settings are read from `.muster/muster.toml` (or the file named by
//! `--config` / `MUSTER_CONFIG`) and layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [admin]
//! username = "admin"
//! public_key_path = "~/.ssh/id_ed25519.pub"
//!
//! [provider]
//! inventory = ".muster/inventory.json"
//!
//! [executor]
//! shell = "sh"
//! action_timeout_secs = 300
//!
//! [converge]
//! phases = ["configure"]
//! timeout_secs = 0
//!
//! [[groups]]
//! name = "web"
//! count = 2
//! tags = ["web"]
//! default_phases = ["configure"]
//!
//! [groups.phases.configure]
//! commands = ["echo configuring $MUSTER_NODE_HOSTNAME"]
//! synchronized = true
//! ```

use anyhow::{Context, Result};
use muster_common::{AdminUser, GroupSpec, PhaseDef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::provider::CreateOptions;

pub const MUSTER_DIR: &str = ".muster";
pub const CONFIG_FILE: &str = "muster.toml";

/// Environment variable overriding the admin username.
pub const ENV_ADMIN_USER: &str = "MUSTER_ADMIN_USER";
/// Environment variable overriding the executor shell.
pub const ENV_SHELL: &str = "MUSTER_SHELL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSection {
    #[serde(default = "default_admin_username")]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_path: Option<PathBuf>,
}

fn default_admin_username() -> String {
    "admin".to_string()
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            username: default_admin_username(),
            public_key_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    /// Inventory file, relative to the project directory
    #[serde(default = "default_inventory")]
    pub inventory: PathBuf,
    /// Hostname prefix for created nodes; the group name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname_prefix: Option<String>,
    /// Tags added to every created node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_inventory() -> PathBuf {
    Path::new(MUSTER_DIR).join("inventory.json")
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            inventory: default_inventory(),
            hostname_prefix: None,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
}

fn default_action_timeout() -> u64 {
    300
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            shell: None,
            action_timeout_secs: default_action_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvergeSection {
    /// Phases run after bootstrap; empty means each group's defaults
    #[serde(default)]
    pub phases: Vec<String>,
    /// How long `muster converge` waits for the run; 0 waits forever
    #[serde(default)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseSection {
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleware: Option<String>,
    #[serde(default)]
    pub synchronized: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupSection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub default_phases: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseSection>,
}

impl GroupSection {
    pub fn to_spec(&self) -> GroupSpec {
        let mut spec = GroupSpec::new(&self.name)
            .with_node_tags(self.tags.clone())
            .with_default_phases(self.default_phases.clone())
            .with_roles(self.roles.clone());
        if let Some(count) = self.count {
            spec = spec.with_count(count);
        }
        for (key, value) in &self.metadata {
            spec = spec.with_metadata(key, value);
        }
        for (name, section) in &self.phases {
            let mut def = PhaseDef::new(name).with_commands(section.commands.clone());
            if let Some(tag) = &section.middleware {
                def = def.with_middleware(tag);
            }
            if section.synchronized {
                def = def.synchronized();
            }
            spec = spec.with_phase(def);
        }
        spec
    }
}

/// The complete muster.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MusterToml {
    #[serde(default)]
    pub admin: AdminSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub converge: ConvergeSection,
    #[serde(default)]
    pub groups: Vec<GroupSection>,
}

/// Starter configuration written by `muster config init`.
pub const SAMPLE_CONFIG: &str = r#"# muster configuration

[admin]
username = "admin"

[provider]
inventory = ".muster/inventory.json"

[executor]
shell = "sh"
action_timeout_secs = 300

[converge]
timeout_secs = 0

[[groups]]
name = "web"
count = 2
tags = ["web"]
default_phases = ["configure"]

[groups.phases.bootstrap]
commands = ["echo bootstrapping $MUSTER_NODE_HOSTNAME"]

[groups.phases.configure]
commands = ["echo configuring $MUSTER_NODE_HOSTNAME"]
synchronized = true

[[groups]]
name = "db"
count = 1
tags = ["db"]
default_phases = ["configure"]

[groups.phases.configure]
commands = ["echo configuring $MUSTER_NODE_HOSTNAME"]
"#;

impl MusterToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse muster.toml")
    }

    /// Load `path`, or the default configuration if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize muster.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn group(&self, name: &str) -> Option<&GroupSection> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();

        for group in &self.groups {
            if group.name.trim().is_empty() {
                warnings.push("Group with an empty name".to_string());
                continue;
            }
            if !seen.insert(group.name.as_str()) {
                warnings.push(format!("Group '{}' is declared more than once", group.name));
            }
            if group.count.is_none() {
                warnings.push(format!(
                    "Group '{}' has no count; converge will refuse to run",
                    group.name
                ));
            }
            for phase in &group.default_phases {
                if !group.phases.contains_key(phase) {
                    warnings.push(format!(
                        "Group '{}' lists default phase '{}' but does not declare it",
                        group.name, phase
                    ));
                }
            }
            for (name, phase) in &group.phases {
                if phase.commands.is_empty() {
                    warnings.push(format!(
                        "Phase '{}' of group '{}' has no commands",
                        name, group.name
                    ));
                }
            }
        }

        for phase in &self.converge.phases {
            if !self.groups.iter().any(|g| g.phases.contains_key(phase)) {
                warnings.push(format!(
                    "Converge phase '{}' is not declared by any group",
                    phase
                ));
            }
        }

        if self.executor.action_timeout_secs == 0 {
            warnings.push("executor.action_timeout_secs is 0; every action will time out".into());
        }

        warnings
    }
}

/// Check if a pattern matches a group name.
/// Supports simple glob patterns:
/// - `*` matches any sequence of characters
/// - `?` matches any single character
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();
    glob_match(&pattern, &name)
}

fn glob_match(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => {
            // consecutive stars behave like one
            let rest = rest.iter().position(|c| *c != '*').map_or(&[][..], |i| &rest[i..]);
            if rest.is_empty() {
                return true;
            }
            (0..=text.len()).any(|i| glob_match(rest, &text[i..]))
        }
        Some(('?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

/// Resolved configuration: the file plus environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct MusterConfig {
    pub project_dir: PathBuf,
    /// The file the configuration was read from (it may not exist)
    pub config_path: PathBuf,
    pub toml: MusterToml,
    admin_override: Option<String>,
    shell_override: Option<String>,
}

impl MusterConfig {
    /// Load the configuration for `project_dir`, reading overrides from the
    /// process environment.
    pub fn load(project_dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory: {}", project_dir.display()))?;
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Self::default_config_path(&project_dir));
        let toml = MusterToml::load_or_default(&config_path)?;

        Ok(Self::from_toml(project_dir, config_path, toml).with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_toml(project_dir: PathBuf, config_path: PathBuf, toml: MusterToml) -> Self {
        Self {
            project_dir,
            config_path,
            toml,
            admin_override: None,
            shell_override: None,
        }
    }

    /// Apply environment overrides from `lookup`.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        self.admin_override = lookup(ENV_ADMIN_USER).filter(|v| !v.is_empty());
        self.shell_override = lookup(ENV_SHELL).filter(|v| !v.is_empty());
        self
    }

    pub fn default_config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(MUSTER_DIR).join(CONFIG_FILE)
    }

    pub fn muster_dir(&self) -> PathBuf {
        self.project_dir.join(MUSTER_DIR)
    }

    pub fn group_specs(&self) -> Vec<GroupSpec> {
        self.toml.groups.iter().map(GroupSection::to_spec).collect()
    }

    /// Groups whose name matches any of `patterns`; every group when empty.
    pub fn select_groups(&self, patterns: &[String]) -> Vec<GroupSpec> {
        self.toml
            .groups
            .iter()
            .filter(|g| patterns.is_empty() || patterns.iter().any(|p| pattern_matches(p, &g.name)))
            .map(GroupSection::to_spec)
            .collect()
    }

    /// Admin user (env → file).
    pub fn admin_user(&self) -> AdminUser {
        let username = self
            .admin_override
            .as_deref()
            .unwrap_or(&self.toml.admin.username);
        AdminUser {
            username: username.to_string(),
            public_key_path: self.toml.admin.public_key_path.clone(),
        }
    }

    pub fn inventory_path(&self) -> PathBuf {
        let path = &self.toml.provider.inventory;
        if path.is_absolute() {
            path.clone()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn create_options(&self) -> CreateOptions {
        CreateOptions {
            hostname_prefix: self.toml.provider.hostname_prefix.clone(),
            tags: self.toml.provider.tags.clone(),
        }
    }

    /// Executor shell (env → file → `sh`).
    pub fn shell(&self) -> String {
        self.shell_override
            .clone()
            .or_else(|| self.toml.executor.shell.clone())
            .unwrap_or_else(|| "sh".to_string())
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.executor.action_timeout_secs)
    }

    /// How long to wait for a converge (CLI → file); `None` waits forever.
    pub fn converge_timeout(&self, cli_secs: Option<u64>) -> Option<Duration> {
        let secs = cli_secs.unwrap_or(self.toml.converge.timeout_secs);
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    /// Phases to run after bootstrap (CLI → file).
    pub fn converge_phases(&self, cli_phases: &[String]) -> Vec<String> {
        if cli_phases.is_empty() {
            self.toml.converge.phases.clone()
        } else {
            cli_phases.to_vec()
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(toml: MusterToml) -> MusterConfig {
        MusterConfig::from_toml(PathBuf::from("/srv/app"), PathBuf::from("/srv/app/.muster/muster.toml"), toml)
    }

    #[test]
    fn test_sample_config_parses_cleanly() {
        let toml = MusterToml::parse(SAMPLE_CONFIG).unwrap();
        assert_eq!(toml.groups.len(), 2);
        assert!(toml.validate().is_empty(), "{:?}", toml.validate());

        let web = toml.group("web").unwrap().to_spec();
        assert_eq!(web.count, Some(2));
        assert!(web.phases["configure"].synchronized);
        assert_eq!(web.default_phases, vec!["configure"]);
        assert_eq!(web.node_tags, vec!["web"]);
    }

    #[test]
    fn test_defaults_for_empty_file() {
        let toml = MusterToml::parse("").unwrap();
        assert_eq!(toml.admin.username, "admin");
        assert_eq!(toml.executor.action_timeout_secs, 300);
        assert_eq!(toml.provider.inventory, PathBuf::from(".muster/inventory.json"));
        assert!(toml.groups.is_empty());
    }

    #[test]
    fn test_group_section_to_spec() {
        let content = r#"
[[groups]]
name = "db"
count = 1
roles = ["primary"]
metadata = { region = "eu-west" }

[groups.phases.migrate]
commands = ["./migrate.sh"]
middleware = "maintenance"
"#;
        let toml = MusterToml::parse(content).unwrap();
        let spec = toml.groups[0].to_spec();
        assert_eq!(spec.roles, vec!["primary"]);
        assert_eq!(spec.metadata["region"], "eu-west");
        let migrate = &spec.phases["migrate"];
        assert_eq!(migrate.commands, vec!["./migrate.sh"]);
        assert_eq!(migrate.middleware.as_deref(), Some("maintenance"));
        assert!(!migrate.synchronized);
    }

    #[test]
    fn test_validate_reports_problems() {
        let content = r#"
[converge]
phases = ["deploy"]

[[groups]]
name = "web"
default_phases = ["configure"]

[groups.phases.bootstrap]
commands = []

[[groups]]
name = "web"
count = 1
"#;
        let warnings = MusterToml::parse(content).unwrap().validate();
        assert_eq!(warnings.len(), 5, "{:?}", warnings);
        assert!(warnings.iter().any(|w| w.contains("no count")));
        assert!(warnings.iter().any(|w| w.contains("more than once")));
        assert!(warnings.iter().any(|w| w.contains("default phase 'configure'")));
        assert!(warnings.iter().any(|w| w.contains("has no commands")));
        assert!(warnings.iter().any(|w| w.contains("'deploy'")));
    }

    #[test]
    fn test_parse_error_has_context() {
        let err = MusterToml::parse("[[groups]]\ncount = 1\n").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse muster.toml"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("muster.toml");
        let toml = MusterToml::parse(SAMPLE_CONFIG).unwrap();
        toml.save(&path).unwrap();

        let loaded = MusterToml::load(&path).unwrap();
        assert_eq!(loaded.groups.len(), 2);
        assert_eq!(loaded.groups[0].phases.len(), 2);
        assert!(loaded.groups[0].phases["configure"].synchronized);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let toml = MusterToml::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert!(toml.groups.is_empty());
    }

    #[test]
    fn test_muster_config_load_uses_default_location() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(MUSTER_DIR)).unwrap();
        std::fs::write(
            dir.path().join(MUSTER_DIR).join(CONFIG_FILE),
            SAMPLE_CONFIG,
        )
        .unwrap();

        let config = MusterConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.group_specs().len(), 2);
        assert!(config.inventory_path().starts_with(&config.project_dir));
        assert!(config.inventory_path().ends_with(".muster/inventory.json"));
    }

    #[test]
    fn test_env_overrides_file() {
        let toml = MusterToml::parse(
            r#"
[admin]
username = "ops"

[executor]
shell = "bash"
"#,
        )
        .unwrap();

        let plain = config(toml.clone()).with_env(|_| None);
        assert_eq!(plain.admin_user().username, "ops");
        assert_eq!(plain.shell(), "bash");

        let overridden = config(toml).with_env(|key| match key {
            ENV_ADMIN_USER => Some("root".to_string()),
            ENV_SHELL => Some("zsh".to_string()),
            _ => None,
        });
        assert_eq!(overridden.admin_user().username, "root");
        assert_eq!(overridden.shell(), "zsh");
    }

    #[test]
    fn test_cli_overrides_file() {
        let toml = MusterToml::parse(
            r#"
[converge]
phases = ["configure"]
timeout_secs = 60
"#,
        )
        .unwrap();
        let config = config(toml);

        assert_eq!(config.converge_timeout(None), Some(Duration::from_secs(60)));
        assert_eq!(config.converge_timeout(Some(5)), Some(Duration::from_secs(5)));
        assert_eq!(config.converge_timeout(Some(0)), None);
        assert_eq!(config.converge_phases(&[]), vec!["configure"]);
        assert_eq!(config.converge_phases(&["deploy".to_string()]), vec!["deploy"]);
        assert_eq!(config.shell(), "sh");
    }

    #[test]
    fn test_select_groups_by_pattern() {
        let config = config(MusterToml::parse(SAMPLE_CONFIG).unwrap());
        let names = |patterns: &[&str]| -> Vec<String> {
            let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
            config.select_groups(&patterns).into_iter().map(|g| g.name).collect()
        };
        assert_eq!(names(&[]), vec!["web", "db"]);
        assert_eq!(names(&["w*"]), vec!["web"]);
        assert_eq!(names(&["?b", "web"]), vec!["web", "db"]);
        assert!(names(&["cache"]).is_empty());
    }

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("web", "web"));
        assert!(!pattern_matches("web", "webs"));
        assert!(pattern_matches("web-*", "web-eu"));
        assert!(pattern_matches("*-eu", "web-eu"));
        assert!(pattern_matches("db-*-replica", "db-eu-replica"));
        assert!(pattern_matches("db-**", "db-x"));
        assert!(!pattern_matches("db-*-replica", "db-replica"));
        assert!(pattern_matches("web-0?", "web-01"));
        assert!(pattern_matches("WEB", "web"));
        assert!(pattern_matches("*", "café"));
    }
}

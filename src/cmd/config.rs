//! Configuration view and validation commands - `muster config`.

use anyhow::{Context, Result};
use muster::config::{MusterConfig, MusterToml, SAMPLE_CONFIG};
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    config_file: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = config_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| MusterConfig::default_config_path(project_dir));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Muster Configuration");
            println!("====================");
            println!();

            if !config_path.exists() {
                println!("No muster.toml found at {}", config_path.display());
                println!();
                println!("Run 'muster config init' to create one.");
                println!();
                return Ok(());
            }

            println!("Config file: {}", config_path.display());
            println!();

            let config = MusterConfig::load(project_dir, Some(&config_path))?;
            let toml = &config.toml;

            println!("[admin]");
            println!("  username = \"{}\"", toml.admin.username);
            if let Some(key) = &toml.admin.public_key_path {
                println!("  public_key_path = \"{}\"", key.display());
            }
            println!();

            println!("[executor]");
            println!("  action_timeout_secs = {}", toml.executor.action_timeout_secs);
            println!();

            for group in &toml.groups {
                println!("[group {}]", group.name);
                match group.count {
                    Some(count) => println!("  count = {}", count),
                    None => println!("  count = (unset)"),
                }
                if !group.default_phases.is_empty() {
                    println!("  default_phases = {:?}", group.default_phases);
                }
                for (name, phase) in &group.phases {
                    let mut flags = Vec::new();
                    if phase.synchronized {
                        flags.push("synchronized".to_string());
                    }
                    if let Some(tag) = &phase.middleware {
                        flags.push(format!("middleware={}", tag));
                    }
                    println!(
                        "  phase {}: {} command(s) {}",
                        name,
                        phase.commands.len(),
                        flags.join(" ")
                    );
                }
                println!();
            }

            println!("Effective values (with env/CLI overrides):");
            println!("  admin = \"{}\"", config.admin_user().username);
            println!("  shell = \"{}\"", config.shell());
            println!("  inventory = \"{}\"", config.inventory_path().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No muster.toml found at {}.", config_path.display());
                return Ok(());
            }

            let toml = MusterToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("muster.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&config_path, SAMPLE_CONFIG)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;

            println!("Created muster.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [admin] username, public_key_path");
            println!("  - [[groups]] name, count, default_phases");
            println!("  - [groups.phases.<name>] commands, synchronized, middleware");
            println!();
        }
    }

    Ok(())
}

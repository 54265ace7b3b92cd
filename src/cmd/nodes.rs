//! Inventory listing - `muster nodes`.

use anyhow::{Context, Result};
use muster::config::MusterConfig;
use muster::provider::{InventoryProvider, NodeProvider};
use std::process::ExitCode;

pub async fn cmd_nodes(config: &MusterConfig, json: bool) -> Result<ExitCode> {
    let path = config.inventory_path();
    let provider = InventoryProvider::open(&path)
        .with_context(|| format!("Failed to open inventory at {}", path.display()))?;
    let nodes = provider.list_nodes().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(ExitCode::SUCCESS);
    }

    if nodes.is_empty() {
        println!("No nodes in {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{:<14} {:<16} {:<12} {:<16} TAGS",
        "ID", "HOSTNAME", "GROUP", "IP"
    );
    for node in &nodes {
        println!(
            "{:<14} {:<16} {:<12} {:<16} {}",
            node.id,
            node.hostname,
            node.group,
            node.primary_ip.as_deref().unwrap_or("-"),
            node.tags.join(",")
        );
    }
    println!();
    println!("{} node(s)", nodes.len());
    Ok(ExitCode::SUCCESS)
}

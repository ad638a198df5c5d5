//! Terraform plan connector.
//!
//! Reads the JSON produced by `terraform show -json <planfile>` and turns
//! every entry of `resource_changes` into one item keyed by resource
//! address. The canonical text describes the planned operation, so an
//! address whose operation changes between plans is re-embedded.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use change_indexer_core::models::Item;

use crate::config::Config;

#[derive(Debug, Deserialize)]
struct PlanJson {
    #[serde(default)]
    resource_changes: Vec<ResourceChange>,
}

#[derive(Debug, Deserialize)]
struct ResourceChange {
    address: Option<String>,
    #[serde(rename = "type")]
    resource_type: Option<String>,
    name: Option<String>,
    #[serde(default)]
    change: ChangeBody,
}

#[derive(Debug, Deserialize, Default)]
struct ChangeBody {
    #[serde(default)]
    actions: Vec<String>,
}

/// Collapse Terraform's action list into one operation name.
pub fn operation(actions: &[String]) -> String {
    let actions: Vec<&str> = actions.iter().map(String::as_str).collect();
    match actions.as_slice() {
        [] => "no-op".to_string(),
        ["create"] => "create".to_string(),
        ["delete"] => "delete".to_string(),
        ["update"] => "update".to_string(),
        ["create", "delete"] | ["delete", "create"] => "replace".to_string(),
        other => other.join(","),
    }
}

fn summarize_change(change: &ResourceChange, resource_type: &str) -> Item {
    let address = change.address.as_deref().unwrap_or("unknown");
    let name = change.name.as_deref().unwrap_or("unknown");
    let op = operation(&change.change.actions);

    let text = format!(
        "Resource type: {rtype}. Name: {name}. Operation: {op}. Address: {address}. \
         Details: Terraform will {op} {rtype} '{name}' at address '{address}'.",
        rtype = resource_type,
    );

    Item::new(address, text)
        .with_metadata("address", address)
        .with_metadata("type", resource_type)
        .with_metadata("name", name)
        .with_metadata("operation", op)
}

/// Parse plan JSON into items, in plan order.
pub fn items_from_plan(json: &str, skip_no_op: bool) -> Result<Vec<Item>> {
    let plan: PlanJson = serde_json::from_str(json).context("Invalid Terraform plan JSON")?;

    let mut items = Vec::new();
    let mut breakdown: BTreeMap<String, usize> = BTreeMap::new();
    for change in &plan.resource_changes {
        let Some(resource_type) = change.resource_type.as_deref() else {
            continue;
        };
        let item = summarize_change(change, resource_type);
        let op = item.metadata["operation"].to_string();
        if skip_no_op && op == "no-op" {
            continue;
        }
        *breakdown.entry(op).or_default() += 1;
        items.push(item);
    }

    info!(resources = items.len(), operations = ?breakdown, "parsed terraform plan");
    Ok(items)
}

/// Read the plan from `input`, falling back to `connectors.terraform.plan_path`.
pub fn scan_terraform(config: &Config, input: Option<&Path>) -> Result<Vec<Item>> {
    let tf_config = config.connectors.terraform.clone().unwrap_or_default();
    let path = input
        .map(Path::to_path_buf)
        .or(tf_config.plan_path)
        .ok_or_else(|| {
            anyhow::anyhow!("No Terraform plan given: pass --input or set connectors.terraform.plan_path")
        })?;

    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read Terraform plan: {}", path.display()))?;
    items_from_plan(&json, tf_config.skip_no_op)
}

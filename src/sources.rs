//! Connector dispatch and the `chix sources` status table.

use std::path::Path;

use anyhow::{bail, Result};

use change_indexer_core::models::Item;

use crate::config::Config;
use crate::{connector_fs, connector_jsonl, connector_terraform};

pub const CONNECTORS: &[&str] = &["filesystem", "terraform", "jsonl"];

/// Produce the current item set for `connector`.
///
/// `input` overrides the connector's configured file for `terraform` and
/// `jsonl`; the filesystem connector ignores it.
pub fn scan_connector(config: &Config, connector: &str, input: Option<&Path>) -> Result<Vec<Item>> {
    match connector {
        "filesystem" => connector_fs::scan_filesystem(config),
        "terraform" => connector_terraform::scan_terraform(config, input),
        "jsonl" => connector_jsonl::scan_jsonl(config, input),
        _ => bail!(
            "Unknown connector: '{}'. Available: {}",
            connector,
            CONNECTORS.join(", ")
        ),
    }
}

fn file_status(path: Option<&Path>) -> (&'static str, bool) {
    match path {
        Some(p) if p.exists() => ("OK", true),
        Some(_) => ("MISSING", false),
        None => ("NOT CONFIGURED", false),
    }
}

/// Status of each connector as `(name, status, healthy)`.
pub fn connector_status(config: &Config) -> Vec<(&'static str, &'static str, bool)> {
    let fs = file_status(config.connectors.filesystem.as_ref().map(|c| c.root.as_path()));
    let tf = file_status(
        config
            .connectors
            .terraform
            .as_ref()
            .and_then(|c| c.plan_path.as_deref()),
    );
    let jsonl = file_status(
        config
            .connectors
            .jsonl
            .as_ref()
            .and_then(|c| c.path.as_deref()),
    );
    vec![
        ("filesystem", fs.0, fs.1),
        ("terraform", tf.0, tf.1),
        ("jsonl", jsonl.0, jsonl.1),
    ]
}

pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<16} {:<16} HEALTHY", "CONNECTOR", "STATUS");
    for (name, status, healthy) in connector_status(config) {
        println!("{:<16} {:<16} {}", name, status, healthy);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilesystemConnectorConfig, TerraformConnectorConfig};
    use tempfile::TempDir;

    #[test]
    fn status_reflects_configuration() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.connectors.filesystem = Some(FilesystemConnectorConfig {
            root: tmp.path().to_path_buf(),
            include_globs: vec![],
            exclude_globs: vec![],
            follow_symlinks: false,
        });
        config.connectors.terraform = Some(TerraformConnectorConfig {
            plan_path: Some(tmp.path().join("plan.json")),
            skip_no_op: false,
        });

        let status = connector_status(&config);
        assert_eq!(status[0], ("filesystem", "OK", true));
        assert_eq!(status[1], ("terraform", "MISSING", false));
        assert_eq!(status[2], ("jsonl", "NOT CONFIGURED", false));
    }

    #[test]
    fn unknown_connector() {
        let err = scan_connector(&Config::minimal(), "slack", None).unwrap_err();
        assert!(err.to_string().contains("filesystem, terraform, jsonl"));
    }
}

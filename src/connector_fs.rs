//! Filesystem connector: one item per matching file under a root.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use change_indexer_core::models::Item;

use crate::config::Config;

pub fn scan_filesystem(config: &Config) -> Result<Vec<Item>> {
    let fs_config = config
        .connectors
        .filesystem
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Filesystem connector not configured"))?;

    let root = &fs_config.root;
    if !root.exists() {
        bail!(
            "Filesystem connector root does not exist: {}",
            root.display()
        );
    }

    let include_set = build_globset(&fs_config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(fs_config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut items = Vec::new();

    let walker = WalkDir::new(root).follow_links(fs_config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        if let Some(item) = file_to_item(path, &rel_str)? {
            items.push(item);
        }
    }

    // Sort for deterministic ordering
    items.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(root = %root.display(), count = items.len(), "scanned filesystem");

    Ok(items)
}

fn file_to_item(path: &Path, relative_path: &str) -> Result<Option<Item>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let body = match String::from_utf8(bytes) {
        Ok(body) => body,
        Err(_) => {
            warn!(path = relative_path, "skipping non-UTF-8 file");
            return Ok(None);
        }
    };

    let title = extract_title(&body).unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    });
    let absolute = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());

    Ok(Some(
        Item::new(relative_path, body)
            .with_metadata("path", relative_path)
            .with_metadata("title", title)
            .with_metadata("url", format!("file://{}", absolute.display())),
    ))
}

/// First Markdown `# ` heading, if any.
fn extract_title(body: &str) -> Option<String> {
    body.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilesystemConnectorConfig;
    use change_indexer_core::models::MetadataValue;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> Config {
        let mut config = Config::minimal();
        config.connectors.filesystem = Some(FilesystemConnectorConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".into()],
            exclude_globs: vec!["drafts/**".into()],
            follow_symlinks: false,
        });
        config
    }

    #[test]
    fn scans_matching_files_in_order() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("docs/runbooks")).unwrap();
        std::fs::create_dir_all(root.join("drafts")).unwrap();
        std::fs::write(root.join("docs/runbooks/deploy.md"), "# Deploying\n\nSteps.").unwrap();
        std::fs::write(root.join("README.md"), "no heading here").unwrap();
        std::fs::write(root.join("notes.txt"), "ignored").unwrap();
        std::fs::write(root.join("drafts/wip.md"), "# WIP").unwrap();
        std::fs::write(root.join("binary.md"), [0xff, 0xfe, 0x00]).unwrap();

        let items = scan_filesystem(&config_for(root)).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["README.md", "docs/runbooks/deploy.md"]);

        assert_eq!(
            items[1].metadata["title"],
            MetadataValue::Text("Deploying".into())
        );
        assert_eq!(
            items[0].metadata["title"],
            MetadataValue::Text("README.md".into())
        );
        assert_eq!(items[1].canonical_text, "# Deploying\n\nSteps.");
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp.path().join("nope"));
        assert!(scan_filesystem(&config).is_err());
    }
}

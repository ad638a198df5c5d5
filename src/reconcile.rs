//! Reconciliation run orchestration.
//!
//! Coordinates one pass: connector → empty-text filter → state snapshot →
//! [`build_plan`] → [`apply_plan`] → report. Run-level problems (bad
//! input ids, an unreadable state store) abort before anything is
//! written; item-level problems end up in the [`RunReport`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, warn};

use change_indexer_core::error::IndexerError;
use change_indexer_core::models::Item;
use change_indexer_core::plan::{build_plan, validate_ids, ChangeKind, PlanOptions, ReconcilePlan};

use crate::apply::{apply_plan, ApplyContext, RunReport};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::progress::{ProgressMode, RunProgressEvent};
use crate::sources::scan_connector;
use crate::stores;

/// CLI flags for `chix run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub full: bool,
    pub dry_run: bool,
    pub concurrency: Option<usize>,
    pub progress: ProgressMode,
}

/// Drop items with no indexable text. Returns the kept items and the
/// number dropped.
pub fn drop_empty_items(items: Vec<Item>) -> (Vec<Item>, usize) {
    let before = items.len();
    let kept: Vec<Item> = items
        .into_iter()
        .filter(|item| {
            let keep = !item.canonical_text.trim().is_empty();
            if !keep {
                warn!(item = %item.id, "skipping item with empty text");
            }
            keep
        })
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Classify `items` against the current state.
pub async fn plan_items(
    items: Vec<Item>,
    ctx: &ApplyContext,
    options: &PlanOptions,
) -> Result<ReconcilePlan, IndexerError> {
    let snapshot = ctx.state.list_all().await?;
    build_plan(items, &snapshot, options)
}

/// One full reconciliation of `items` against the stores in `ctx`.
///
/// Ids are checked over the whole input before empty-text items are
/// dropped.
pub async fn reconcile(
    items: Vec<Item>,
    ctx: &ApplyContext,
    options: &PlanOptions,
) -> Result<RunReport, IndexerError> {
    validate_ids(&items)?;
    let (items, skipped_empty) = drop_empty_items(items);
    let plan = plan_items(items, ctx, options).await?;
    log_plan(&plan);
    let mut report = apply_plan(ctx, plan).await;
    report.skipped_empty = skipped_empty;
    Ok(report)
}

fn log_plan(plan: &ReconcilePlan) {
    info!(
        new = plan.count_kind(ChangeKind::New),
        modified = plan.count_kind(ChangeKind::Modified),
        metadata_only = plan.to_upsert_metadata_only.len(),
        unchanged = plan.unchanged.len(),
        delete = plan.to_delete.len(),
        "plan built"
    );
}

fn plan_options(config: &Config, full: bool) -> PlanOptions {
    PlanOptions {
        reembed_on_metadata_change: config.apply.reembed_on_metadata_change,
        force_reembed: full,
    }
}

fn print_ids(label: &str, ids: &[&str]) {
    println!("  {}: {}", label, ids.len());
    for id in ids {
        println!("    {}", id);
    }
}

pub fn print_plan(connector: &str, plan: &ReconcilePlan) {
    println!("plan {}", connector);
    let new: Vec<&str> = plan
        .to_embed
        .iter()
        .filter(|t| t.kind == ChangeKind::New)
        .map(|t| t.item.id.as_str())
        .collect();
    let modified: Vec<&str> = plan
        .to_embed
        .iter()
        .filter(|t| t.kind == ChangeKind::Modified)
        .map(|t| t.item.id.as_str())
        .collect();
    print_ids("new", &new);
    print_ids("modified", &modified);
    print_ids("metadata-only", &plan.metadata_ids());
    println!("  unchanged: {}", plan.unchanged.len());
    let delete: Vec<&str> = plan.to_delete.iter().map(String::as_str).collect();
    print_ids("delete", &delete);
}

pub fn print_report(connector: &str, report: &RunReport) {
    println!("run {}", connector);
    println!("  processed: {}", report.processed());
    println!("  embedded: {}", report.embedded.len());
    println!("  metadata updated: {}", report.metadata_updated.len());
    println!("  deleted: {}", report.deleted.len());
    println!("  unchanged: {}", report.unchanged);
    if report.skipped_empty > 0 {
        println!("  skipped (empty text): {}", report.skipped_empty);
    }
    println!("  failed: {}", report.failures.len());
    for failure in &report.failures {
        println!("    {} [{}]: {}", failure.id, failure.stage, failure.reason);
    }
    if !report.has_failures() {
        println!("ok");
    }
}

/// `chix plan`: scan and classify only. Never writes state or index.
pub async fn run_plan(config: &Config, connector: &str, input: Option<&Path>, full: bool) -> Result<()> {
    let items = scan_connector(config, connector, input)?;
    validate_ids(&items)?;
    let (items, skipped) = drop_empty_items(items);
    let (state, pool) = stores::open_state_only(config).await?;
    let snapshot = state.list_all().await?;
    let plan = build_plan(items, &snapshot, &plan_options(config, full))?;

    print_plan(connector, &plan);
    if skipped > 0 {
        println!("  skipped (empty text): {}", skipped);
    }
    if let Some(pool) = pool {
        pool.close().await;
    }
    Ok(())
}

/// `chix run`: the full pipeline. Returns the report so the caller can
/// choose the exit status.
pub async fn run_reconcile(
    config: &Config,
    connector: &str,
    input: Option<&Path>,
    options: &RunOptions,
) -> Result<RunReport> {
    if options.dry_run {
        run_plan(config, connector, input, options.full).await?;
        println!("(dry-run: nothing applied)");
        return Ok(RunReport::default());
    }

    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled; set [embedding] provider before running");
    }

    let progress = options.progress.reporter();
    progress.report(RunProgressEvent::Scanning {
        connector: connector.to_string(),
    });
    let items = scan_connector(config, connector, input)?;
    info!(connector, items = items.len(), "scanned");

    let provider = create_provider(&config.embedding)?;
    let stores = stores::open(config).await?;

    let ctx = ApplyContext {
        provider,
        index: Arc::clone(&stores.index),
        state: Arc::clone(&stores.state),
        retry: config.retry,
        concurrency: options.concurrency.unwrap_or(config.apply.concurrency),
        batch_size: config.embedding.batch_size,
        progress,
        connector: connector.to_string(),
    };

    let result = reconcile(items, &ctx, &plan_options(config, options.full)).await;
    drop(ctx);
    stores.close().await;

    let report = result?;
    print_report(connector, &report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_dropped() {
        let items = vec![
            Item::new("a", "text"),
            Item::new("b", "   \n\t"),
            Item::new("c", ""),
        ];
        let (kept, dropped) = drop_empty_items(items);
        assert_eq!(dropped, 2);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
    }
}

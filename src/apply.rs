//! Apply phase: carry out a [`ReconcilePlan`] against the stores.
//!
//! Embeds are grouped into chunks of `embedding.batch_size` texts, one
//! provider request per chunk; metadata updates and deletes are single
//! actions. Every chunk or action runs on its own tokio task, gated by a
//! semaphore with `apply.concurrency` permits. A task touches only its own
//! ids, and writes state for an id only after the index write for that id
//! succeeded, so an interrupted run is finished by simply running again.
//!
//! | Action | Steps |
//! |--------|-------|
//! | embed | batch embed (per item on failure) → check dims → index upsert → state set |
//! | metadata-only | index metadata merge → state set |
//! | delete | index delete → state delete |

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use change_indexer_core::embedding::{check_dims, EmbeddingProvider};
use change_indexer_core::error::IndexerError;
use change_indexer_core::models::{IndexRecord, StateEntry};
use change_indexer_core::plan::{EmbedTask, MetadataTask, ReconcilePlan};
use change_indexer_core::retry::RetryPolicy;
use change_indexer_core::store::{IndexStore, StateStore};

use crate::progress::{RunProgressEvent, RunProgressReporter};
use crate::retry::with_retry;

/// Everything an apply worker needs, shared across tasks.
#[derive(Clone)]
pub struct ApplyContext {
    pub provider: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn IndexStore>,
    pub state: Arc<dyn StateStore>,
    pub retry: RetryPolicy,
    pub concurrency: usize,
    /// Texts per embedding request.
    pub batch_size: usize,
    pub progress: Arc<dyn RunProgressReporter>,
    pub connector: String,
}

/// Where in an item's pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Embed,
    IndexWrite,
    StateWrite,
    Task,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Embed => "embed",
            Stage::IndexWrite => "index write",
            Stage::StateWrite => "state write",
            Stage::Task => "task",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub id: String,
    pub stage: Stage,
    pub reason: String,
}

/// Per-item outcomes of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub embedded: Vec<String>,
    pub metadata_updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
    pub skipped_empty: usize,
    pub failures: Vec<ItemFailure>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Items the run looked at, including unchanged ones and deletions.
    pub fn processed(&self) -> usize {
        self.embedded.len()
            + self.metadata_updated.len()
            + self.deleted.len()
            + self.unchanged
            + self.failures.len()
    }
}

/// One spawned unit of work. Embeds are grouped so each chunk costs a
/// single provider request.
enum Job {
    Embed(Vec<EmbedTask>),
    Metadata(MetadataTask),
    Delete(String),
}

impl Job {
    fn ids(&self) -> Vec<String> {
        match self {
            Job::Embed(tasks) => tasks.iter().map(|t| t.item.id.clone()).collect(),
            Job::Metadata(t) => vec![t.item.id.clone()],
            Job::Delete(id) => vec![id.clone()],
        }
    }
}

enum Done {
    Embedded(String),
    MetadataUpdated(String),
    Deleted(String),
}

type Outcome = Result<Done, ItemFailure>;

/// Shared settled/failed counters behind the progress reporter.
#[derive(Clone)]
struct Tally {
    settled: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    total: u64,
}

impl Tally {
    fn settle(&self, ctx: &ApplyContext, outcome: &Outcome) {
        let n = self.settled.fetch_add(1, Ordering::SeqCst) + 1;
        let failed = if outcome.is_err() {
            self.failed.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.failed.load(Ordering::SeqCst)
        };
        ctx.progress.report(RunProgressEvent::Applying {
            connector: ctx.connector.clone(),
            n,
            total: self.total,
            failed,
        });
    }
}

fn fail(id: &str, stage: Stage, e: IndexerError) -> ItemFailure {
    warn!(item = id, stage = %stage, error = %e, "item failed");
    ItemFailure {
        id: id.to_string(),
        stage,
        reason: e.to_string(),
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Embed a chunk with one batched request. If the batch fails and holds
/// more than one text, each text is retried on its own so one bad input
/// does not sink its neighbours.
async fn embed_chunk(ctx: &ApplyContext, tasks: &[EmbedTask]) -> Vec<Result<Vec<f32>, IndexerError>> {
    let texts: Vec<&str> = tasks.iter().map(|t| t.item.canonical_text.as_str()).collect();
    let label = match tasks {
        [only] => only.item.id.clone(),
        _ => format!("{} items from {}", tasks.len(), tasks[0].item.id),
    };
    let provider = ctx.provider.clone();

    let batch = with_retry(&ctx.retry, "embed", &label, || provider.embed_batch(&texts))
        .await
        .and_then(|vectors| {
            if vectors.len() == texts.len() {
                Ok(vectors)
            } else {
                Err(IndexerError::embedding_permanent(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )))
            }
        });

    match batch {
        Ok(vectors) => vectors.into_iter().map(Ok).collect(),
        Err(e) if texts.len() == 1 => vec![Err(e)],
        Err(e) => {
            warn!(batch = %label, error = %e, "batch embed failed, embedding items one by one");
            let mut results = Vec::with_capacity(tasks.len());
            for task in tasks {
                let text = task.item.canonical_text.as_str();
                results.push(
                    with_retry(&ctx.retry, "embed", &task.item.id, || provider.embed(text)).await,
                );
            }
            results
        }
    }
}

/// Write one embedded item: dims check, index upsert, then state.
async fn store_embedded(
    ctx: &ApplyContext,
    task: EmbedTask,
    embedding: Result<Vec<f32>, IndexerError>,
) -> Outcome {
    let id = task.item.id.as_str();
    let embedding = embedding.map_err(|e| fail(id, Stage::Embed, e))?;
    check_dims(&embedding, ctx.provider.dims()).map_err(|e| fail(id, Stage::Embed, e))?;

    let record = IndexRecord {
        id: task.item.id.clone(),
        canonical_text: task.item.canonical_text.clone(),
        metadata: task.item.metadata.clone(),
        fingerprint: task.fingerprint.clone(),
        embedding,
    };
    with_retry(&ctx.retry, "index upsert", id, || ctx.index.upsert(&record))
        .await
        .map_err(|e| fail(id, Stage::IndexWrite, e))?;

    let entry = StateEntry {
        fingerprint: task.fingerprint,
        metadata_fingerprint: Some(task.metadata_fingerprint),
        updated_at: now(),
    };
    ctx.state
        .set(id, &entry)
        .await
        .map_err(|e| fail(id, Stage::StateWrite, e))?;

    debug!(item = id, kind = ?task.kind, "embedded");
    Ok(Done::Embedded(task.item.id))
}

async fn apply_embed_chunk(ctx: &ApplyContext, tasks: Vec<EmbedTask>, tally: &Tally) -> Vec<Outcome> {
    let embeddings = embed_chunk(ctx, &tasks).await;
    let mut outcomes = Vec::with_capacity(tasks.len());
    for (task, embedding) in tasks.into_iter().zip(embeddings) {
        let outcome = store_embedded(ctx, task, embedding).await;
        tally.settle(ctx, &outcome);
        outcomes.push(outcome);
    }
    outcomes
}

async fn apply_metadata(ctx: &ApplyContext, task: MetadataTask) -> Outcome {
    let id = task.item.id.as_str();
    with_retry(&ctx.retry, "index metadata update", id, || {
        ctx.index
            .upsert_metadata(id, &task.item.metadata, &task.fingerprint)
    })
    .await
    .map_err(|e| fail(id, Stage::IndexWrite, e))?;

    let entry = StateEntry {
        fingerprint: task.fingerprint.clone(),
        metadata_fingerprint: Some(task.metadata_fingerprint.clone()),
        updated_at: now(),
    };
    ctx.state
        .set(id, &entry)
        .await
        .map_err(|e| fail(id, Stage::StateWrite, e))?;

    debug!(item = id, "metadata updated");
    Ok(Done::MetadataUpdated(task.item.id))
}

async fn apply_delete(ctx: &ApplyContext, id: String) -> Outcome {
    with_retry(&ctx.retry, "index delete", &id, || ctx.index.delete(&id))
        .await
        .map_err(|e| fail(&id, Stage::IndexWrite, e))?;
    ctx.state
        .delete(&id)
        .await
        .map_err(|e| fail(&id, Stage::StateWrite, e))?;

    debug!(item = %id, "deleted");
    Ok(Done::Deleted(id))
}

/// Apply every action in `plan` and collect the outcomes.
///
/// Embeds go out in chunks of `batch_size`; every other action is its own
/// task. Item failures never abort the run; they are returned in the
/// report. Report lists follow plan order regardless of completion order.
pub async fn apply_plan(ctx: &ApplyContext, plan: ReconcilePlan) -> RunReport {
    let mut report = RunReport {
        unchanged: plan.unchanged.len(),
        ..RunReport::default()
    };

    let tally = Tally {
        settled: Arc::new(AtomicU64::new(0)),
        failed: Arc::new(AtomicU64::new(0)),
        total: plan.action_count() as u64,
    };

    let batch_size = ctx.batch_size.max(1);
    let mut jobs: Vec<Job> = Vec::new();
    let mut embeds = plan.to_embed.into_iter().peekable();
    while embeds.peek().is_some() {
        jobs.push(Job::Embed(embeds.by_ref().take(batch_size).collect()));
    }
    jobs.extend(plan.to_upsert_metadata_only.into_iter().map(Job::Metadata));
    jobs.extend(plan.to_delete.into_iter().map(Job::Delete));

    let semaphore = Arc::new(Semaphore::new(ctx.concurrency.max(1)));
    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let ids = job.ids();
        let sem = semaphore.clone();
        let ctx = ctx.clone();
        let tally = tally.clone();

        let handle = tokio::spawn(async move {
            let _permit = match sem.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    return job
                        .ids()
                        .into_iter()
                        .map(|id| {
                            Err(ItemFailure {
                                id,
                                stage: Stage::Task,
                                reason: "apply semaphore closed".to_string(),
                            })
                        })
                        .collect::<Vec<Outcome>>()
                }
            };

            match job {
                Job::Embed(tasks) => apply_embed_chunk(&ctx, tasks, &tally).await,
                Job::Metadata(task) => {
                    let outcome = apply_metadata(&ctx, task).await;
                    tally.settle(&ctx, &outcome);
                    vec![outcome]
                }
                Job::Delete(id) => {
                    let outcome = apply_delete(&ctx, id).await;
                    tally.settle(&ctx, &outcome);
                    vec![outcome]
                }
            }
        });
        handles.push((ids, handle));
    }

    for (ids, handle) in handles {
        match handle.await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    match outcome {
                        Ok(Done::Embedded(id)) => report.embedded.push(id),
                        Ok(Done::MetadataUpdated(id)) => report.metadata_updated.push(id),
                        Ok(Done::Deleted(id)) => report.deleted.push(id),
                        Err(failure) => report.failures.push(failure),
                    }
                }
            }
            Err(join_err) => {
                for id in ids {
                    report.failures.push(ItemFailure {
                        id,
                        stage: Stage::Task,
                        reason: format!("apply task panicked: {}", join_err),
                    });
                }
            }
        }
    }

    report
}

//! Reconciliation planning.
//!
//! [`build_plan`] classifies the current input set against a snapshot of
//! the state store. It is a pure function: the same items, snapshot, and
//! options always produce the same plan, and nothing is read or written
//! outside its arguments.
//!
//! # Classification
//!
//! | Snapshot entry | Content fingerprint | Metadata fingerprint | Result |
//! |----------------|---------------------|----------------------|--------|
//! | absent | — | — | `to_embed` ([`ChangeKind::New`]) |
//! | present | differs | — | `to_embed` ([`ChangeKind::Modified`]) |
//! | present | matches | differs / unrecorded | `to_upsert_metadata_only` |
//! | present | matches | matches | `unchanged` |
//! | present, item gone | — | — | `to_delete` |

use std::collections::{BTreeSet, HashSet};

use crate::error::{IndexerError, Result};
use crate::fingerprint::{fingerprint, metadata_fingerprint, Fingerprint};
use crate::models::{Item, StateSnapshot};

/// Why an item needs a new embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Modified,
}

/// An item that needs an embedding call and a full index write.
#[derive(Debug, Clone)]
pub struct EmbedTask {
    pub item: Item,
    pub kind: ChangeKind,
    pub fingerprint: Fingerprint,
    pub metadata_fingerprint: Fingerprint,
}

/// An item whose text is unchanged but whose metadata must be rewritten.
#[derive(Debug, Clone)]
pub struct MetadataTask {
    pub item: Item,
    pub fingerprint: Fingerprint,
    pub metadata_fingerprint: Fingerprint,
}

/// Knobs that change classification.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Treat a metadata-only change as a content change.
    pub reembed_on_metadata_change: bool,
    /// Re-embed every current item regardless of state.
    pub force_reembed: bool,
}

/// The minimal set of actions that brings the index in line with the input.
///
/// The four lists are disjoint and together cover the union of current
/// and previously indexed ids.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub to_embed: Vec<EmbedTask>,
    pub to_upsert_metadata_only: Vec<MetadataTask>,
    pub unchanged: Vec<String>,
    pub to_delete: Vec<String>,
}

impl ReconcilePlan {
    /// True when applying the plan would make no external calls.
    pub fn is_noop(&self) -> bool {
        self.to_embed.is_empty() && self.to_upsert_metadata_only.is_empty() && self.to_delete.is_empty()
    }

    /// Number of actions that need network calls.
    pub fn action_count(&self) -> usize {
        self.to_embed.len() + self.to_upsert_metadata_only.len() + self.to_delete.len()
    }

    pub fn embed_ids(&self) -> Vec<&str> {
        self.to_embed.iter().map(|t| t.item.id.as_str()).collect()
    }

    pub fn metadata_ids(&self) -> Vec<&str> {
        self.to_upsert_metadata_only
            .iter()
            .map(|t| t.item.id.as_str())
            .collect()
    }

    pub fn count_kind(&self, kind: ChangeKind) -> usize {
        self.to_embed.iter().filter(|t| t.kind == kind).count()
    }
}

/// Reject empty and duplicate ids.
///
/// [`build_plan`] calls this itself; callers that filter the input first
/// must call it on the unfiltered set so a dropped copy cannot hide a
/// duplicate.
pub fn validate_ids(items: &[Item]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(items.len());
    for (pos, item) in items.iter().enumerate() {
        if item.id.is_empty() {
            return Err(IndexerError::EmptyItemId(pos));
        }
        if !seen.insert(item.id.as_str()) {
            return Err(IndexerError::DuplicateItem(item.id.clone()));
        }
    }
    Ok(())
}

/// Classify `items` against `snapshot`.
///
/// # Errors
///
/// [`IndexerError::EmptyItemId`] or [`IndexerError::DuplicateItem`] if the
/// input set is malformed. No partial plan is returned.
pub fn build_plan(
    items: Vec<Item>,
    snapshot: &StateSnapshot,
    options: &PlanOptions,
) -> Result<ReconcilePlan> {
    validate_ids(&items)?;

    let current: BTreeSet<String> = items.iter().map(|i| i.id.clone()).collect();
    let mut plan = ReconcilePlan::default();

    for item in items {
        let fp = fingerprint(&item.canonical_text);
        let meta_fp = metadata_fingerprint(&item.metadata);

        let prior = match snapshot.get(&item.id) {
            None => {
                plan.to_embed.push(EmbedTask {
                    item,
                    kind: ChangeKind::New,
                    fingerprint: fp,
                    metadata_fingerprint: meta_fp,
                });
                continue;
            }
            Some(entry) => entry,
        };

        let content_changed = prior.fingerprint != fp;
        let metadata_changed = prior.metadata_fingerprint.as_ref() != Some(&meta_fp);

        if options.force_reembed
            || content_changed
            || (metadata_changed && options.reembed_on_metadata_change)
        {
            plan.to_embed.push(EmbedTask {
                item,
                kind: ChangeKind::Modified,
                fingerprint: fp,
                metadata_fingerprint: meta_fp,
            });
        } else if metadata_changed {
            plan.to_upsert_metadata_only.push(MetadataTask {
                item,
                fingerprint: fp,
                metadata_fingerprint: meta_fp,
            });
        } else {
            plan.unchanged.push(item.id);
        }
    }

    // BTreeMap iteration keeps this sorted.
    plan.to_delete = snapshot
        .keys()
        .filter(|id| !current.contains(*id))
        .cloned()
        .collect();

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StateEntry;

    fn entry_for(item: &Item) -> StateEntry {
        StateEntry {
            fingerprint: fingerprint(&item.canonical_text),
            metadata_fingerprint: Some(metadata_fingerprint(&item.metadata)),
            updated_at: 0,
        }
    }

    fn snapshot_of(items: &[Item]) -> StateSnapshot {
        items.iter().map(|i| (i.id.clone(), entry_for(i))).collect()
    }

    fn scenario_items() -> Vec<Item> {
        vec![
            Item::new("aws_instance.web[0]", "update web"),
            Item::new("aws_s3_bucket.logs", "create logs"),
        ]
    }

    #[test]
    fn scenario_empty_state_embeds_everything() {
        let plan = build_plan(scenario_items(), &StateSnapshot::new(), &PlanOptions::default())
            .unwrap();
        assert_eq!(plan.embed_ids(), vec!["aws_instance.web[0]", "aws_s3_bucket.logs"]);
        assert!(plan.to_embed.iter().all(|t| t.kind == ChangeKind::New));
        assert!(plan.to_delete.is_empty());
        assert!(plan.unchanged.is_empty());
    }

    #[test]
    fn scenario_matching_state_is_unchanged() {
        let items = scenario_items();
        let snapshot = snapshot_of(&items);
        let plan = build_plan(items, &snapshot, &PlanOptions::default()).unwrap();
        assert!(plan.to_embed.is_empty());
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged, vec!["aws_instance.web[0]", "aws_s3_bucket.logs"]);
    }

    #[test]
    fn scenario_text_change_is_modified() {
        let snapshot = snapshot_of(&scenario_items());
        let items = vec![
            Item::new("aws_instance.web[0]", "update web"),
            Item::new("aws_s3_bucket.logs", "create logs v2"),
        ];
        let plan = build_plan(items, &snapshot, &PlanOptions::default()).unwrap();
        assert_eq!(plan.embed_ids(), vec!["aws_s3_bucket.logs"]);
        assert_eq!(plan.to_embed[0].kind, ChangeKind::Modified);
        assert_eq!(plan.unchanged, vec!["aws_instance.web[0]"]);
    }

    #[test]
    fn scenario_missing_item_is_deleted() {
        let snapshot = snapshot_of(&scenario_items());
        let items = vec![Item::new("aws_s3_bucket.logs", "create logs")];
        let plan = build_plan(items, &snapshot, &PlanOptions::default()).unwrap();
        assert_eq!(plan.to_delete, vec!["aws_instance.web[0]"]);
        assert_eq!(plan.unchanged, vec!["aws_s3_bucket.logs"]);
    }

    #[test]
    fn scenario_duplicate_ids_fail() {
        let items = vec![
            Item::new("aws_s3_bucket.logs", "create logs"),
            Item::new("aws_s3_bucket.logs", "create logs again"),
        ];
        let err = build_plan(items, &StateSnapshot::new(), &PlanOptions::default()).unwrap_err();
        match err {
            IndexerError::DuplicateItem(id) => assert_eq!(id, "aws_s3_bucket.logs"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_id_fails() {
        let items = vec![Item::new("a", "x"), Item::new("", "y")];
        let err = build_plan(items, &StateSnapshot::new(), &PlanOptions::default()).unwrap_err();
        assert!(matches!(err, IndexerError::EmptyItemId(1)));
    }

    #[test]
    fn metadata_only_change() {
        let original = Item::new("page-1", "body").with_metadata("title", "Old");
        let snapshot = snapshot_of(&[original]);
        let renamed = Item::new("page-1", "body").with_metadata("title", "New");

        let plan = build_plan(vec![renamed.clone()], &snapshot, &PlanOptions::default()).unwrap();
        assert!(plan.to_embed.is_empty());
        assert_eq!(plan.metadata_ids(), vec!["page-1"]);

        let opts = PlanOptions {
            reembed_on_metadata_change: true,
            ..PlanOptions::default()
        };
        let plan = build_plan(vec![renamed], &snapshot, &opts).unwrap();
        assert_eq!(plan.embed_ids(), vec!["page-1"]);
        assert!(plan.to_upsert_metadata_only.is_empty());
    }

    #[test]
    fn unrecorded_metadata_fingerprint_backfills() {
        let item = Item::new("page-1", "body");
        let mut snapshot = snapshot_of(std::slice::from_ref(&item));
        snapshot.get_mut("page-1").unwrap().metadata_fingerprint = None;
        let plan = build_plan(vec![item], &snapshot, &PlanOptions::default()).unwrap();
        assert_eq!(plan.metadata_ids(), vec!["page-1"]);
    }

    #[test]
    fn force_reembed_still_deletes() {
        let items = scenario_items();
        let mut snapshot = snapshot_of(&items);
        let gone = Item::new("aws_iam_role.old", "delete role");
        snapshot.insert(gone.id.clone(), entry_for(&gone));

        let opts = PlanOptions {
            force_reembed: true,
            ..PlanOptions::default()
        };
        let plan = build_plan(items, &snapshot, &opts).unwrap();
        assert_eq!(plan.to_embed.len(), 2);
        assert!(plan.to_embed.iter().all(|t| t.kind == ChangeKind::Modified));
        assert_eq!(plan.to_delete, vec!["aws_iam_role.old"]);
    }

    #[test]
    fn lists_partition_union_of_ids() {
        let prior = vec![
            Item::new("a", "1"),
            Item::new("b", "2").with_metadata("k", "v"),
            Item::new("c", "3"),
            Item::new("d", "4"),
        ];
        let snapshot = snapshot_of(&prior);
        let current = vec![
            Item::new("a", "1"),
            Item::new("b", "2").with_metadata("k", "w"),
            Item::new("c", "3 changed"),
            Item::new("e", "5"),
        ];
        let plan = build_plan(current, &snapshot, &PlanOptions::default()).unwrap();

        let mut all: Vec<String> = Vec::new();
        all.extend(plan.embed_ids().into_iter().map(String::from));
        all.extend(plan.metadata_ids().into_iter().map(String::from));
        all.extend(plan.unchanged.iter().cloned());
        all.extend(plan.to_delete.iter().cloned());
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, all.len(), "lists overlap");
        assert_eq!(all, vec!["a", "b", "c", "d", "e"]);

        assert_eq!(plan.unchanged, vec!["a"]);
        assert_eq!(plan.metadata_ids(), vec!["b"]);
        assert_eq!(plan.embed_ids(), vec!["c", "e"]);
        assert_eq!(plan.count_kind(ChangeKind::New), 1);
        assert_eq!(plan.to_delete, vec!["d"]);
    }

    #[test]
    fn deterministic_across_calls() {
        let snapshot = snapshot_of(&scenario_items());
        let items = vec![
            Item::new("x", "new"),
            Item::new("aws_s3_bucket.logs", "create logs v2"),
        ];
        let a = build_plan(items.clone(), &snapshot, &PlanOptions::default()).unwrap();
        let b = build_plan(items, &snapshot, &PlanOptions::default()).unwrap();
        assert_eq!(a.embed_ids(), b.embed_ids());
        assert_eq!(a.to_delete, b.to_delete);
        assert_eq!(a.unchanged, b.unchanged);
    }
}

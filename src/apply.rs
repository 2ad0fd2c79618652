//! Mapping Applier: rewrites the listing store according to a mapping set.
//!
//! Streams the store in batches, renaming each document's keys per the
//! active mapping set's rules. Unmapped fields pass through unchanged.
//!
//! Guarantees:
//! - **Idempotent**: a document already in canonical shape is skipped, so
//!   re-running after a partial failure is safe.
//! - **Per-document atomicity**: a document is fully renamed or left
//!   untouched; a rename conflict is recorded as a per-document error and
//!   the batch continues.
//! - **Batch-boundary checks**: cancellation and the mapping set's active
//!   flag are re-checked between batches. A set deactivated mid-run aborts
//!   the rest of the run; already-rewritten documents stay rewritten.
//! - **Fatal errors**: only store-unavailable conditions end the run early;
//!   the outcome still reports the work completed so far.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ApplyConfig;
use crate::error::HarmonizerError;
use crate::jobs::{ApplyJob, JobRegistry};
use crate::listing_store::{FieldUpdate, ListingStore};
use crate::mapping_store::MappingStore;
use crate::models::{ApplyOutcome, ApplyStatus, DocumentError, FieldMapping, MappingSet};
use crate::progress::{ApplyEvent, ApplyProgressReporter};

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub batch_size: u32,
    /// Count what would change without writing anything.
    pub dry_run: bool,
}

impl From<&ApplyConfig> for ApplyOptions {
    fn from(cfg: &ApplyConfig) -> Self {
        Self {
            batch_size: cfg.batch_size,
            dry_run: false,
        }
    }
}

/// Rename a document's keys per the rule sequence.
///
/// Returns `Ok(None)` when nothing changed (already canonical), `Ok(Some)`
/// with the renamed map, or `Err` with a description when a rename would
/// collide with an existing key. Rules are applied in sequence over the
/// evolving map.
pub fn apply_rules(
    fields: &BTreeMap<String, serde_json::Value>,
    rules: &[FieldMapping],
) -> Result<Option<BTreeMap<String, serde_json::Value>>, String> {
    let mut renamed = fields.clone();
    let mut changed = false;

    for rule in rules {
        let original = rule.original_field.as_str();
        let target = rule.target_field.as_str();
        if original == target {
            continue;
        }
        let Some(value) = renamed.remove(original) else {
            continue;
        };
        if renamed.contains_key(target) {
            return Err(format!(
                "cannot rename '{}' to '{}': both fields present",
                original, target
            ));
        }
        renamed.insert(target.to_string(), value);
        changed = true;
    }

    Ok(if changed { Some(renamed) } else { None })
}

/// Run an apply for the given mapping set.
///
/// The set must be active when the run starts; a stale request against a
/// deactivated set fails with [`HarmonizerError::MappingNoLongerActive`]
/// before any document is touched. At most one apply per mapping set runs
/// at a time ([`HarmonizerError::ApplyInFlight`]).
pub async fn run_apply(
    listings: &dyn ListingStore,
    mappings: &MappingStore,
    registry: &Arc<JobRegistry>,
    mapping_set_id: &str,
    opts: &ApplyOptions,
    reporter: Box<dyn ApplyProgressReporter>,
) -> Result<ApplyOutcome, HarmonizerError> {
    let set = mappings.get(mapping_set_id).await?;
    if !set.is_active {
        return Err(HarmonizerError::MappingNoLongerActive(set.name));
    }

    let job = registry.start(mapping_set_id)?;
    Ok(run_with_job(listings, mappings, &set, job, opts, reporter).await)
}

/// Drive a pre-registered job to completion. The HTTP server registers the
/// job first (so it can hand the id back immediately) and spawns this.
pub async fn run_with_job(
    listings: &dyn ListingStore,
    mappings: &MappingStore,
    set: &MappingSet,
    job: ApplyJob,
    opts: &ApplyOptions,
    reporter: Box<dyn ApplyProgressReporter>,
) -> ApplyOutcome {
    let reporter = job.reporter(reporter);
    info!(mapping_set = %set.name, job_id = %job.id(), dry_run = opts.dry_run, "apply started");

    let mut outcome = run_batches(listings, mappings, set, &job, opts, &reporter).await;
    outcome.job_id = job.id().to_string();

    let summary = format!(
        "{} documents scanned, {} rewritten, {} errors",
        outcome.documents_scanned,
        outcome.documents_rewritten,
        outcome.errors.len()
    );
    let terminal = match outcome.status {
        ApplyStatus::Completed => ApplyEvent::Completed {
            message: format!("completed: {}", summary),
        },
        ApplyStatus::Cancelled => ApplyEvent::Completed {
            message: format!("cancelled: {}", summary),
        },
        ApplyStatus::MappingNoLongerActive => ApplyEvent::Error {
            message: format!("mapping set '{}' is no longer active; {}", set.name, summary),
        },
        ApplyStatus::Fatal => ApplyEvent::Error {
            message: format!(
                "{}; {}",
                outcome.fatal_message.as_deref().unwrap_or("store unavailable"),
                summary
            ),
        },
    };
    reporter.report(&terminal);
    info!(job_id = %job.id(), status = ?outcome.status, "apply finished: {}", summary);

    outcome
}

async fn run_batches(
    listings: &dyn ListingStore,
    mappings: &MappingStore,
    set: &MappingSet,
    job: &ApplyJob,
    opts: &ApplyOptions,
    reporter: &dyn ApplyProgressReporter,
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome {
        job_id: job.id().to_string(),
        mapping_set_id: set.id.clone(),
        documents_scanned: 0,
        documents_rewritten: 0,
        errors: Vec::new(),
        status: ApplyStatus::Completed,
        fatal_message: None,
    };

    let total = match listings.count().await {
        Ok(total) => total,
        Err(e) => return fatal(outcome, e),
    };

    let mut cursor: Option<String> = None;
    loop {
        if job.is_cancelled() {
            outcome.status = ApplyStatus::Cancelled;
            break;
        }
        match mappings.is_active(&set.id).await {
            Ok(true) => {}
            Ok(false) => {
                outcome.status = ApplyStatus::MappingNoLongerActive;
                break;
            }
            Err(e) => return fatal(outcome, e),
        }

        let batch = match listings.scan_after(cursor.as_deref(), opts.batch_size).await {
            Ok(batch) => batch,
            Err(e) => return fatal(outcome, e),
        };
        if batch.is_empty() {
            break;
        }
        cursor = batch.last().map(|doc| doc.id.clone());

        let mut updates = Vec::new();
        for doc in &batch {
            outcome.documents_scanned += 1;
            match apply_rules(&doc.fields, &set.mappings) {
                Ok(Some(fields)) => updates.push(FieldUpdate {
                    id: doc.id.clone(),
                    fields,
                }),
                Ok(None) => {}
                Err(message) => {
                    warn!(document_id = %doc.id, "skipping document: {}", message);
                    outcome.errors.push(DocumentError {
                        document_id: doc.id.clone(),
                        message,
                    });
                }
            }
        }

        if opts.dry_run {
            outcome.documents_rewritten += updates.len() as u64;
        } else if !updates.is_empty() {
            let attempted = updates.len() as u64;
            match listings.write_fields(&updates).await {
                Ok(failures) => {
                    outcome.documents_rewritten += attempted - failures.len() as u64;
                    outcome.errors.extend(failures);
                }
                Err(e) => return fatal(outcome, e),
            }
        }

        reporter.report(&ApplyEvent::Progress {
            current: outcome.documents_scanned,
            total,
        });
    }

    outcome
}

fn fatal(mut outcome: ApplyOutcome, error: HarmonizerError) -> ApplyOutcome {
    outcome.status = ApplyStatus::Fatal;
    outcome.fatal_message = Some(error.to_string());
    outcome
}

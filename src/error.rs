//! Error taxonomy for the harmonization engine.
//!
//! Validation failures (duplicate names, ambiguous merges, unknown ids,
//! deleting an active set) surface synchronously to the caller and are never
//! retried. Per-document rewrite failures are collected in
//! [`ApplyOutcome::errors`](crate::models::ApplyOutcome) instead of aborting
//! the batch. Store-unavailable conditions are fatal to the current run but
//! leave state safe to retry thanks to the applier's idempotence.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarmonizerError {
    /// Profiling was asked to run over an empty document sample.
    #[error("cannot profile an empty document sample")]
    EmptySample,

    /// A mapping set with this name already exists.
    #[error("a mapping set named '{0}' already exists")]
    DuplicateName(String),

    /// Two distinct original fields would map to the same target field.
    /// An ambiguous merge is rejected, not silently allowed.
    #[error("ambiguous merge: fields '{first}' and '{second}' both map to '{target}'")]
    DuplicateTarget {
        first: String,
        second: String,
        target: String,
    },

    /// The same original field appears in more than one rule of a set.
    #[error("field '{0}' appears in more than one rename rule")]
    DuplicateOriginal(String),

    /// No mapping set with the given id.
    #[error("mapping set not found: {0}")]
    NotFound(String),

    /// An active mapping set must be deactivated before deletion.
    #[error("mapping set '{0}' is active and cannot be deleted")]
    ActiveMappingDelete(String),

    /// An apply run targeted a mapping set that is not (or no longer) active.
    #[error("mapping set '{0}' is no longer active")]
    MappingNoLongerActive(String),

    /// An apply run is already in flight for this mapping set.
    #[error("an apply is already running for mapping set '{0}'")]
    ApplyInFlight(String),

    /// The backing store cannot be read or written at all. Fatal to the
    /// current operation; a retry resumes safely.
    #[error("listing store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// A stored payload failed to (de)serialize.
    #[error("corrupt stored payload: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// A field name failed validation.
    #[error("invalid field name: {0:?}")]
    InvalidFieldName(String),
}

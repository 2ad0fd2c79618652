//! Core data models for the field harmonization engine.
//!
//! These types represent the field profiles, clusters, and mapping sets that
//! flow through the profile → score → cluster → suggest → apply pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::HarmonizerError;

/// A validated field name: non-empty after trimming.
///
/// Cluster and profile lookups are keyed by this type so that an absent field
/// is an explicit `None`, never a silent `unknown` fallback.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldName(String);

impl FieldName {
    pub fn new(raw: impl Into<String>) -> Result<Self, HarmonizerError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(HarmonizerError::InvalidFieldName(raw));
        }
        Ok(FieldName(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FieldName {
    type Error = HarmonizerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FieldName::new(value)
    }
}

impl From<FieldName> for String {
    fn from(name: FieldName) -> String {
        name.0
    }
}

/// Inferred type of a field, from a pass over sampled values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Numeric,
    Categorical,
    Boolean,
    Text,
    /// No non-null value was observed for this field.
    Unknown,
}

/// Summary of one field name observed across a document sample.
///
/// Immutable once produced; a later profiling run supersedes it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldProfile {
    pub field_name: FieldName,
    pub inferred_type: FieldType,
    /// First N distinct values encountered, in insertion order.
    pub value_examples: Vec<String>,
    /// Count of non-null occurrences across the sample.
    pub observed_count: u64,
    /// Count of distinct non-null values across the sample.
    pub distinct_count: u64,
}

/// A group of mutually similar fields produced by one clustering run.
///
/// Not persisted beyond the review session; the operator promotes reviewed
/// clusters into a mapping set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldCluster {
    pub id: String,
    /// The member elected to represent the cluster. Always one of the
    /// original member names.
    pub canonical_field: FieldName,
    /// The remaining members, sorted; excludes `canonical_field`.
    pub similar_fields: Vec<FieldName>,
    /// Each similar field's score against `canonical_field`, in [0, 1].
    pub similarity_scores: BTreeMap<FieldName, f64>,
    pub field_types: BTreeMap<FieldName, FieldType>,
    /// Per-member value examples carried over from the profiles.
    pub patterns: BTreeMap<FieldName, Vec<String>>,
    /// Proposed canonical rename, when one member token dominates.
    pub suggested_name: Option<String>,
}

/// One rename rule: `original_field` becomes `target_field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub original_field: FieldName,
    pub target_field: FieldName,
}

/// A named, versioned set of rename rules. At most one set is active across
/// the whole store at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingSet {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub mappings: Vec<FieldMapping>,
    pub is_active: bool,
    pub created_at: i64,
}

/// A raw listing record as stored: heterogeneous fields keyed by
/// source-specific names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingDocument {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub updated_at: i64,
}

/// A listing about to be inserted by the importer. The original scraped
/// field map is retained verbatim in `raw` for provenance and re-apply.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub source: String,
    pub source_id: String,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub raw: BTreeMap<String, serde_json::Value>,
    pub dedup_hash: String,
}

/// A per-document failure collected during an apply run. Never aborts the
/// batch on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentError {
    pub document_id: String,
    pub message: String,
}

/// Terminal state of an apply run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    /// All batches processed.
    Completed,
    /// Stopped cleanly at a batch boundary on operator request.
    Cancelled,
    /// The mapping set was deactivated mid-run; later batches were not
    /// applied. Documents rewritten before the abort stay rewritten.
    MappingNoLongerActive,
    /// The store became unavailable; counts reflect work completed so far.
    Fatal,
}

/// Result of an apply run, partial or complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub job_id: String,
    pub mapping_set_id: String,
    pub documents_scanned: u64,
    pub documents_rewritten: u64,
    pub errors: Vec<DocumentError>,
    pub status: ApplyStatus,
    /// Present for `Fatal` outcomes: the underlying store error.
    pub fatal_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_name_trims_and_rejects_empty() {
        assert_eq!(FieldName::new("  price ").unwrap().as_str(), "price");
        assert!(FieldName::new("   ").is_err());
        assert!(FieldName::new("").is_err());
    }

    #[test]
    fn field_name_round_trips_through_serde() {
        let name = FieldName::new("asking_price").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"asking_price\"");
        let back: FieldName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }
}

//! Similarity Scorer: bounded [0, 1] similarity between two field profiles.
//!
//! Combines Jaro-Winkler name similarity with value-distribution overlap
//! under fixed weights (0.6 name / 0.4 value by default). Both components
//! are symmetric, so the combined score is too. Fields of different inferred
//! types get no value contribution; their score is capped at the name
//! component.
//!
//! Name similarity is computed over normalized names (case, underscores,
//! dashes, and camelCase humps all collapse to spaced lowercase tokens) and
//! boosted when both names carry tokens from the same known synonym group
//! ("price"/"cost", "mileage"/"odometer", ...). Listing sites agree on very
//! few spellings; without the synonym table, obvious pairs never cross a
//! useful threshold.

use std::collections::BTreeSet;

use rapidfuzz::distance::jaro_winkler;

use crate::config::ClusteringConfig;
use crate::models::{FieldProfile, FieldType};

/// Weights for the two score components. Must sum to 1 (validated at config
/// load) to keep the combined score in [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub name: f64,
    pub value: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            name: 0.6,
            value: 0.4,
        }
    }
}

impl From<&ClusteringConfig> for ScoreWeights {
    fn from(cfg: &ClusteringConfig) -> Self {
        Self {
            name: cfg.name_weight,
            value: cfg.value_weight,
        }
    }
}

/// Name similarity floor applied when two names share a synonym group.
const SYNONYM_FLOOR: f64 = 0.9;

/// Number of buckets used for numeric range overlap.
const NUMERIC_BUCKETS: usize = 10;

/// Field-name tokens that refer to the same listing concept across source
/// sites. Extend as new sources are onboarded.
const SYNONYM_GROUPS: &[&[&str]] = &[
    &["price", "cost", "amount", "asking"],
    &["mileage", "odometer", "km", "kilometers", "miles"],
    &["make", "brand", "manufacturer"],
    &["model", "variant"],
    &["year", "yr", "vintage"],
    &["area", "surface", "sqm", "sqft", "size"],
    &["rooms", "bedrooms", "beds"],
    &["location", "city", "town", "municipality"],
    &["description", "text", "body", "details"],
    &["fuel", "engine", "propulsion"],
];

/// Similarity between two field profiles, symmetric and in [0, 1].
/// A field compared with itself scores exactly 1.0.
pub fn similarity(a: &FieldProfile, b: &FieldProfile, weights: &ScoreWeights) -> f64 {
    if a.field_name == b.field_name {
        return 1.0;
    }

    let name_sim = name_similarity(a.field_name.as_str(), b.field_name.as_str());
    let value_sim = if a.inferred_type == b.inferred_type {
        value_overlap(a, b)
    } else {
        0.0
    };

    (weights.name * name_sim + weights.value * value_sim).clamp(0.0, 1.0)
}

fn name_similarity(a: &str, b: &str) -> f64 {
    let norm_a = normalize(a);
    let norm_b = normalize(b);
    let base = jaro_winkler::similarity(norm_a.chars(), norm_b.chars());

    if shares_synonym_group(&norm_a, &norm_b) {
        base.max(SYNONYM_FLOOR)
    } else {
        base
    }
}

fn shares_synonym_group(norm_a: &str, norm_b: &str) -> bool {
    let tokens_a: BTreeSet<&str> = norm_a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = norm_b.split_whitespace().collect();
    SYNONYM_GROUPS.iter().any(|group| {
        tokens_a.iter().any(|t| group.contains(t)) && tokens_b.iter().any(|t| group.contains(t))
    })
}

fn value_overlap(a: &FieldProfile, b: &FieldProfile) -> f64 {
    match a.inferred_type {
        FieldType::Numeric => numeric_bucket_overlap(&a.value_examples, &b.value_examples),
        FieldType::Categorical | FieldType::Boolean => {
            example_jaccard(&a.value_examples, &b.value_examples)
        }
        FieldType::Text => token_jaccard(&a.value_examples, &b.value_examples),
        FieldType::Unknown => 0.0,
    }
}

/// Jaccard overlap of the (case-folded) example sets.
fn example_jaccard(a: &[String], b: &[String]) -> f64 {
    let set_a: BTreeSet<String> = a.iter().map(|v| v.trim().to_lowercase()).collect();
    let set_b: BTreeSet<String> = b.iter().map(|v| v.trim().to_lowercase()).collect();
    jaccard(&set_a, &set_b)
}

/// Jaccard overlap of normalized word tokens pooled across examples.
fn token_jaccard(a: &[String], b: &[String]) -> f64 {
    let tokens = |examples: &[String]| -> BTreeSet<String> {
        examples
            .iter()
            .flat_map(|v| {
                normalize(v)
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    };
    jaccard(&tokens(a), &tokens(b))
}

/// Bucketed range overlap: the combined range of both fields is split into
/// [`NUMERIC_BUCKETS`] equal buckets and the occupied-bucket sets are
/// compared with Jaccard.
fn numeric_bucket_overlap(a: &[String], b: &[String]) -> f64 {
    let parse = |examples: &[String]| -> Vec<f64> {
        examples
            .iter()
            .filter_map(|v| v.trim().parse::<f64>().ok())
            .collect()
    };
    let values_a = parse(a);
    let values_b = parse(b);
    if values_a.is_empty() || values_b.is_empty() {
        return 0.0;
    }

    let min = values_a
        .iter()
        .chain(&values_b)
        .cloned()
        .fold(f64::INFINITY, f64::min);
    let max = values_a
        .iter()
        .chain(&values_b)
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    if span == 0.0 {
        // All examples share one value.
        return 1.0;
    }

    let bucket_of = |v: f64| -> usize {
        let idx = ((v - min) / span * NUMERIC_BUCKETS as f64) as usize;
        idx.min(NUMERIC_BUCKETS - 1)
    };
    let buckets_a: BTreeSet<usize> = values_a.iter().map(|&v| bucket_of(v)).collect();
    let buckets_b: BTreeSet<usize> = values_b.iter().map(|&v| bucket_of(v)).collect();
    jaccard(&buckets_a, &buckets_b)
}

fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Normalize a field name for comparison.
///
/// Lowercases, breaks camelCase humps, and replaces separators with spaces:
/// `askingPrice`, `asking_price`, and `Asking-Price` all normalize to
/// `asking price`.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_was_lower = false;
    for ch in name.chars() {
        if ch == '_' || ch == '-' || ch == '.' || ch.is_whitespace() {
            out.push(' ');
            prev_was_lower = false;
        } else if ch.is_uppercase() {
            if prev_was_lower {
                out.push(' ');
            }
            out.extend(ch.to_lowercase());
            prev_was_lower = false;
        } else {
            out.push(ch);
            prev_was_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

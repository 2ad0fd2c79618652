//! Field Profiler: one pass over a document sample, producing a
//! [`FieldProfile`] per observed field name.
//!
//! Pure function of the sample — no store access, no side effects. A later
//! profiling run supersedes the previous one wholesale.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::config::ProfilingConfig;
use crate::error::HarmonizerError;
use crate::models::{FieldName, FieldProfile, FieldType, ListingDocument};

/// Tunables for a profiling run.
#[derive(Debug, Clone)]
pub struct ProfileOptions {
    /// Cap on `value_examples` per field.
    pub max_examples: usize,
    /// A field is categorical when its distinct count is at or below this...
    pub categorical_max_distinct: u64,
    /// ...or below this fraction of the sample size.
    pub categorical_max_ratio: f64,
}

impl From<&ProfilingConfig> for ProfileOptions {
    fn from(cfg: &ProfilingConfig) -> Self {
        Self {
            max_examples: cfg.max_examples,
            categorical_max_distinct: cfg.categorical_max_distinct,
            categorical_max_ratio: cfg.categorical_max_ratio,
        }
    }
}

impl Default for ProfileOptions {
    fn default() -> Self {
        (&ProfilingConfig::default()).into()
    }
}

struct FieldAccumulator {
    examples: Vec<String>,
    distinct: BTreeSet<String>,
    observed: u64,
    all_numeric: bool,
    all_boolean: bool,
}

impl FieldAccumulator {
    fn new() -> Self {
        Self {
            examples: Vec::new(),
            distinct: BTreeSet::new(),
            observed: 0,
            all_numeric: true,
            all_boolean: true,
        }
    }
}

/// Profile every field observed across the sample.
///
/// Fails with [`HarmonizerError::EmptySample`] when the sample is empty.
pub fn profile_fields(
    sample: &[ListingDocument],
    opts: &ProfileOptions,
) -> Result<BTreeMap<FieldName, FieldProfile>, HarmonizerError> {
    if sample.is_empty() {
        return Err(HarmonizerError::EmptySample);
    }

    let mut accumulators: BTreeMap<FieldName, FieldAccumulator> = BTreeMap::new();

    for doc in sample {
        for (key, value) in &doc.fields {
            let Ok(name) = FieldName::new(key.as_str()) else {
                // Blank keys are scraper noise, not fields.
                continue;
            };
            let acc = accumulators.entry(name).or_insert_with(FieldAccumulator::new);

            if value.is_null() {
                continue;
            }
            acc.observed += 1;
            acc.all_numeric &= is_numeric_value(value);
            acc.all_boolean &= is_boolean_value(value);

            let rendered = render_value(value);
            if acc.distinct.insert(rendered.clone()) && acc.examples.len() < opts.max_examples {
                acc.examples.push(rendered);
            }
        }
    }

    let sample_size = sample.len() as u64;
    let profiles = accumulators
        .into_iter()
        .map(|(name, acc)| {
            let inferred_type = infer_type(&acc, sample_size, opts);
            let profile = FieldProfile {
                field_name: name.clone(),
                inferred_type,
                value_examples: acc.examples,
                observed_count: acc.observed,
                distinct_count: acc.distinct.len() as u64,
            };
            (name, profile)
        })
        .collect();

    Ok(profiles)
}

/// Type inference policy, per field over the whole sample:
/// every non-null value numeric → `Numeric`; else all boolean-like →
/// `Boolean`; else distinct count at/below the cardinality thresholds →
/// `Categorical`; else `Text`. Boolean-like literals are recognized before
/// the cardinality test, otherwise two-valued yes/no fields would always
/// collapse into `Categorical`.
fn infer_type(acc: &FieldAccumulator, sample_size: u64, opts: &ProfileOptions) -> FieldType {
    if acc.observed == 0 {
        return FieldType::Unknown;
    }
    if acc.all_numeric {
        return FieldType::Numeric;
    }
    if acc.all_boolean {
        return FieldType::Boolean;
    }
    let distinct = acc.distinct.len() as u64;
    let ratio = distinct as f64 / sample_size as f64;
    if distinct <= opts.categorical_max_distinct || ratio <= opts.categorical_max_ratio {
        return FieldType::Categorical;
    }
    FieldType::Text
}

fn is_numeric_value(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

fn is_boolean_value(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "false" | "yes" | "no"
        ),
        _ => false,
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, fields: Value) -> ListingDocument {
        let map = fields
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ListingDocument {
            id: id.to_string(),
            source: "test".to_string(),
            source_id: id.to_string(),
            fields: map,
            updated_at: 0,
        }
    }

    fn get<'a>(
        profiles: &'a BTreeMap<FieldName, FieldProfile>,
        name: &str,
    ) -> &'a FieldProfile {
        profiles
            .get(&FieldName::new(name).unwrap())
            .unwrap_or_else(|| panic!("no profile for {}", name))
    }

    #[test]
    fn empty_sample_is_an_error() {
        let err = profile_fields(&[], &ProfileOptions::default()).unwrap_err();
        assert!(matches!(err, HarmonizerError::EmptySample));
    }

    #[test]
    fn numeric_inference_accepts_number_strings() {
        let sample = vec![
            doc("1", json!({"price": 12500, "mileage": "80000"})),
            doc("2", json!({"price": "9 999", "mileage": 120_000})),
        ];
        let profiles = profile_fields(&sample, &ProfileOptions::default()).unwrap();
        // "9 999" does not parse as a number, so price degrades.
        assert_ne!(get(&profiles, "price").inferred_type, FieldType::Numeric);
        assert_eq!(get(&profiles, "mileage").inferred_type, FieldType::Numeric);
    }

    #[test]
    fn boolean_beats_categorical_for_yes_no_fields() {
        let sample: Vec<_> = (0..10)
            .map(|i| {
                doc(
                    &i.to_string(),
                    json!({"sold": if i % 2 == 0 { "yes" } else { "no" }}),
                )
            })
            .collect();
        let profiles = profile_fields(&sample, &ProfileOptions::default()).unwrap();
        assert_eq!(get(&profiles, "sold").inferred_type, FieldType::Boolean);
    }

    #[test]
    fn low_cardinality_strings_are_categorical() {
        let sample: Vec<_> = (0..30)
            .map(|i| {
                let fuel = ["diesel", "petrol", "electric"][i % 3];
                doc(&i.to_string(), json!({"fuel": fuel}))
            })
            .collect();
        let profiles = profile_fields(&sample, &ProfileOptions::default()).unwrap();
        let fuel = get(&profiles, "fuel");
        assert_eq!(fuel.inferred_type, FieldType::Categorical);
        assert_eq!(fuel.distinct_count, 3);
        assert_eq!(fuel.observed_count, 30);
    }

    #[test]
    fn high_cardinality_strings_are_text() {
        let opts = ProfileOptions {
            categorical_max_distinct: 2,
            categorical_max_ratio: 0.05,
            ..ProfileOptions::default()
        };
        let sample: Vec<_> = (0..20)
            .map(|i| doc(&i.to_string(), json!({"headline": format!("listing nr {}", i)})))
            .collect();
        let profiles = profile_fields(&sample, &opts).unwrap();
        assert_eq!(get(&profiles, "headline").inferred_type, FieldType::Text);
    }

    #[test]
    fn all_null_field_is_unknown() {
        let sample = vec![doc("1", json!({"vin": null})), doc("2", json!({"vin": null}))];
        let profiles = profile_fields(&sample, &ProfileOptions::default()).unwrap();
        let vin = get(&profiles, "vin");
        assert_eq!(vin.inferred_type, FieldType::Unknown);
        assert_eq!(vin.observed_count, 0);
    }

    #[test]
    fn examples_keep_first_distinct_in_insertion_order() {
        let opts = ProfileOptions {
            max_examples: 3,
            ..ProfileOptions::default()
        };
        let sample: Vec<_> = ["a", "b", "a", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(i, v)| doc(&i.to_string(), json!({"color": v})))
            .collect();
        let profiles = profile_fields(&sample, &opts).unwrap();
        let color = get(&profiles, "color");
        assert_eq!(color.value_examples, vec!["a", "b", "c"]);
        assert_eq!(color.distinct_count, 5);
    }

    #[test]
    fn blank_keys_are_dropped() {
        let sample = vec![doc("1", json!({" ": "x", "make": "Toyota"}))];
        let profiles = profile_fields(&sample, &ProfileOptions::default()).unwrap();
        assert_eq!(profiles.len(), 1);
        assert!(profiles.contains_key(&FieldName::new("make").unwrap()));
    }
}

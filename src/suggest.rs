//! Suggestion Generator: proposes a canonical name for a cluster.
//!
//! Picks the dominant semantic token across member names. When no token
//! covers more than half the members there is no defensible suggestion and
//! the operator names the cluster manually.

use std::collections::BTreeMap;

use crate::models::{FieldCluster, FieldName};
use crate::score;

/// Tokens that carry no field semantics and never win a suggestion.
const NOISE_TOKENS: &[&str] = &[
    "the", "a", "of", "in", "id", "no", "nr", "num", "val", "value", "raw", "src", "field", "data",
    "info", "item", "listing",
];

/// Suggest a canonical name for the cluster, if one member token dominates.
///
/// The winner is the token shared by more than half the member names;
/// shorter tokens win over longer ones, then higher coverage, then
/// lexicographic order. Returns `None` when nothing dominates.
pub fn suggest_name(cluster: &FieldCluster) -> Option<String> {
    let members: Vec<&FieldName> = std::iter::once(&cluster.canonical_field)
        .chain(cluster.similar_fields.iter())
        .collect();

    let mut coverage: BTreeMap<String, usize> = BTreeMap::new();
    for member in &members {
        let mut tokens: Vec<String> = score::normalize(member.as_str())
            .split_whitespace()
            .filter(|t| !NOISE_TOKENS.contains(t))
            .map(str::to_string)
            .collect();
        tokens.sort();
        tokens.dedup();
        for token in tokens {
            *coverage.entry(token).or_insert(0) += 1;
        }
    }

    coverage
        .into_iter()
        .filter(|(_, count)| *count * 2 > members.len())
        .min_by(|(token_a, count_a), (token_b, count_b)| {
            token_a
                .len()
                .cmp(&token_b.len())
                .then_with(|| count_b.cmp(count_a))
                .then_with(|| token_a.cmp(token_b))
        })
        .map(|(token, _)| token)
}

/// Fill `suggested_name` on each cluster in place.
pub fn annotate_clusters(clusters: &mut [FieldCluster]) {
    for cluster in clusters {
        cluster.suggested_name = suggest_name(cluster);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn cluster(canonical: &str, similar: &[&str]) -> FieldCluster {
        FieldCluster {
            id: "test".to_string(),
            canonical_field: FieldName::new(canonical).unwrap(),
            similar_fields: similar
                .iter()
                .map(|s| FieldName::new(*s).unwrap())
                .collect(),
            similarity_scores: BTreeMap::new(),
            field_types: BTreeMap::new(),
            patterns: BTreeMap::new(),
            suggested_name: None,
        }
    }

    #[test]
    fn dominant_token_wins() {
        let c = cluster("price", &["asking_price", "priceEur"]);
        assert_eq!(suggest_name(&c).as_deref(), Some("price"));
    }

    #[test]
    fn no_majority_token_means_no_suggestion() {
        let c = cluster("price", &["cost"]);
        assert_eq!(suggest_name(&c), None);
    }

    #[test]
    fn noise_tokens_never_win() {
        let c = cluster("price_value", &["cost_value", "amount_value"]);
        // "value" covers all three but is noise; no other token dominates.
        assert_eq!(suggest_name(&c), None);
    }

    #[test]
    fn shortest_majority_token_wins_over_longer_one() {
        let c = cluster("km_total", &["km_driven", "km"]);
        assert_eq!(suggest_name(&c).as_deref(), Some("km"));
    }

    #[test]
    fn annotate_fills_every_cluster() {
        let mut clusters = vec![
            cluster("price", &["asking_price"]),
            cluster("make", &["brand"]),
        ];
        annotate_clusters(&mut clusters);
        assert_eq!(clusters[0].suggested_name.as_deref(), Some("price"));
        assert_eq!(clusters[1].suggested_name, None);
    }
}

//! Clusterer: partitions profiled fields into groups of mutually similar
//! fields using the pairwise similarity matrix.
//!
//! Two fields are joined when their score reaches the threshold, and groups
//! are the connected components of that relation (union-find). Similarity is
//! not transitive in general; treating components as clusters is a deliberate
//! assumption of this engine, kept from the original design rather than
//! corrected, because it gives operators a small number of larger clusters to
//! review instead of many overlapping pairs.
//!
//! The result is deterministic for a given set of profiles: ties in the
//! canonical election break toward the lexicographically smallest name, and
//! output clusters are sorted by canonical field.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::config::Config;
use crate::error::HarmonizerError;
use crate::listing_store::ListingStore;
use crate::models::{FieldCluster, FieldName, FieldProfile};
use crate::profile::{self, ProfileOptions};
use crate::score::{self, ScoreWeights};
use crate::suggest;

/// Group fields into clusters of pairwise-connected similar fields.
///
/// Singleton fields are not reported; every returned cluster has at least
/// two members, and every member scores at least `threshold` against some
/// other member of its cluster.
pub fn cluster_fields(
    profiles: &BTreeMap<FieldName, FieldProfile>,
    threshold: f64,
    weights: &ScoreWeights,
) -> Vec<FieldCluster> {
    // BTreeMap iteration gives a stable, sorted field order, which makes the
    // whole run order-independent.
    let names: Vec<&FieldName> = profiles.keys().collect();
    let n = names.len();

    let mut dsu = DisjointSet::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            let score = score::similarity(&profiles[names[i]], &profiles[names[j]], weights);
            if score >= threshold {
                dsu.union(i, j);
            }
        }
    }

    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        components.entry(dsu.find(i)).or_default().push(i);
    }

    let mut clusters: Vec<FieldCluster> = components
        .into_values()
        .filter(|members| members.len() >= 2)
        .map(|members| build_cluster(&members, &names, profiles, weights))
        .collect();

    clusters.sort_by(|a, b| a.canonical_field.cmp(&b.canonical_field));
    clusters
}

fn build_cluster(
    members: &[usize],
    names: &[&FieldName],
    profiles: &BTreeMap<FieldName, FieldProfile>,
    weights: &ScoreWeights,
) -> FieldCluster {
    // Canonical member: highest observed_count, ties to the smallest name.
    // `members` is ascending by index and indexes a sorted name list, so the
    // first maximum is already the lexicographic winner.
    let canonical_idx = members
        .iter()
        .copied()
        .max_by(|&a, &b| {
            profiles[names[a]]
                .observed_count
                .cmp(&profiles[names[b]].observed_count)
                .then_with(|| names[b].cmp(names[a]))
        })
        .expect("cluster has members");
    let canonical = names[canonical_idx].clone();
    let canonical_profile = &profiles[&canonical];

    let mut similar_fields = Vec::new();
    let mut similarity_scores = BTreeMap::new();
    let mut field_types = BTreeMap::new();
    let mut patterns = BTreeMap::new();

    field_types.insert(canonical.clone(), canonical_profile.inferred_type);
    patterns.insert(canonical.clone(), canonical_profile.value_examples.clone());

    for &idx in members {
        let name = names[idx].clone();
        if name == canonical {
            continue;
        }
        let member_profile = &profiles[&name];
        let against_canonical = score::similarity(member_profile, canonical_profile, weights);
        similarity_scores.insert(name.clone(), against_canonical);
        field_types.insert(name.clone(), member_profile.inferred_type);
        patterns.insert(name.clone(), member_profile.value_examples.clone());
        similar_fields.push(name);
    }
    similar_fields.sort();

    FieldCluster {
        id: Uuid::new_v4().to_string(),
        canonical_field: canonical,
        similar_fields,
        similarity_scores,
        field_types,
        patterns,
        suggested_name: None,
    }
}

/// The full on-demand review pipeline: sample the store, profile, cluster,
/// and annotate each cluster with a suggested canonical name.
///
/// Nothing is persisted; the operator promotes reviewed clusters into a
/// mapping set explicitly.
pub async fn suggested_clusters(
    store: &dyn ListingStore,
    config: &Config,
) -> Result<Vec<FieldCluster>, HarmonizerError> {
    let sample = store.sample(config.profiling.sample_size).await?;
    let profiles = profile::profile_fields(&sample, &ProfileOptions::from(&config.profiling))?;

    let weights = ScoreWeights::from(&config.clustering);
    let mut clusters = cluster_fields(&profiles, config.clustering.threshold, &weights);
    suggest::annotate_clusters(&mut clusters);
    Ok(clusters)
}

/// Union-find over field indices, with path compression. Union keeps the
/// smaller index as root so component representatives are stable.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        let (small, large) = if root_a < root_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent[large] = small;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldType;

    fn profile(name: &str, ty: FieldType, examples: &[&str], observed: u64) -> FieldProfile {
        FieldProfile {
            field_name: FieldName::new(name).unwrap(),
            inferred_type: ty,
            value_examples: examples.iter().map(|s| s.to_string()).collect(),
            observed_count: observed,
            distinct_count: examples.len() as u64,
        }
    }

    fn profile_map(profiles: Vec<FieldProfile>) -> BTreeMap<FieldName, FieldProfile> {
        profiles
            .into_iter()
            .map(|p| (p.field_name.clone(), p))
            .collect()
    }

    #[test]
    fn price_and_cost_cluster_with_price_canonical() {
        let profiles = profile_map(vec![
            profile("price", FieldType::Numeric, &["100", "200", "300"], 50),
            profile("cost", FieldType::Numeric, &["110", "210", "290"], 20),
            profile("description", FieldType::Text, &["spacious family home"], 40),
        ]);
        let clusters = cluster_fields(&profiles, 0.75, &ScoreWeights::default());

        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        assert_eq!(cluster.canonical_field.as_str(), "price");
        assert_eq!(cluster.similar_fields.len(), 1);
        assert_eq!(cluster.similar_fields[0].as_str(), "cost");
        let cost_score = cluster.similarity_scores[&FieldName::new("cost").unwrap()];
        assert!(cost_score >= 0.75, "got {}", cost_score);
    }

    #[test]
    fn singletons_are_not_emitted() {
        let profiles = profile_map(vec![
            profile("price", FieldType::Numeric, &["100"], 10),
            profile("description", FieldType::Text, &["nice"], 10),
        ]);
        let clusters = cluster_fields(&profiles, 0.75, &ScoreWeights::default());
        assert!(clusters.is_empty());
    }

    #[test]
    fn canonical_tie_breaks_to_smallest_name() {
        // Identical counts and identical value distributions; only the name
        // decides.
        let profiles = profile_map(vec![
            profile("mileage", FieldType::Numeric, &["10", "20"], 30),
            profile("odometer", FieldType::Numeric, &["10", "20"], 30),
        ]);
        let clusters = cluster_fields(&profiles, 0.7, &ScoreWeights::default());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].canonical_field.as_str(), "mileage");
    }

    #[test]
    fn result_is_deterministic_under_insertion_order() {
        let forward = profile_map(vec![
            profile("price", FieldType::Numeric, &["100", "150", "200"], 5),
            profile("cost", FieldType::Numeric, &["105", "155", "195"], 9),
            profile("amount", FieldType::Numeric, &["103", "152", "197"], 9),
        ]);
        let reversed = profile_map(vec![
            profile("amount", FieldType::Numeric, &["103", "152", "197"], 9),
            profile("cost", FieldType::Numeric, &["105", "155", "195"], 9),
            profile("price", FieldType::Numeric, &["100", "150", "200"], 5),
        ]);

        let a = cluster_fields(&forward, 0.75, &ScoreWeights::default());
        let b = cluster_fields(&reversed, 0.75, &ScoreWeights::default());

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.canonical_field, y.canonical_field);
            assert_eq!(x.similar_fields, y.similar_fields);
            assert_eq!(x.similarity_scores, y.similarity_scores);
        }
        // Tie between "amount" and "cost" at observed_count 9 goes to
        // "amount".
        assert_eq!(a[0].canonical_field.as_str(), "amount");
    }

    #[test]
    fn members_all_connect_above_threshold() {
        let profiles = profile_map(vec![
            profile("price", FieldType::Numeric, &["100", "200", "300"], 10),
            profile("cost", FieldType::Numeric, &["100", "200", "300"], 10),
            profile("asking_price", FieldType::Numeric, &["100", "200", "300"], 10),
        ]);
        let clusters = cluster_fields(&profiles, 0.75, &ScoreWeights::default());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].similar_fields.len() + 1, 3);
        for score in clusters[0].similarity_scores.values() {
            assert!(*score >= 0.75);
        }
    }
}

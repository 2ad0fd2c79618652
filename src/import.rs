//! Scraper-export import.
//!
//! The scraper itself lives outside this engine; it drops NDJSON/JSON export
//! files. `fhz import <dir>` walks the directory, parses one JSON object per
//! listing, and upserts into the listing store keyed by `(source, source_id)`
//! with a content hash so unchanged listings are skipped on re-import.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::Config;
use crate::listing_store::{ListingStore, UpsertOutcome};
use crate::models::NewListing;

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub files: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub invalid: u64,
}

pub async fn run_import(
    config: &Config,
    store: &dyn ListingStore,
    dir: &Path,
    source_override: Option<&str>,
) -> Result<ImportSummary> {
    if !dir.exists() {
        bail!("import directory does not exist: {}", dir.display());
    }

    let include_set = build_globset(&config.import.include_globs)?;
    let exclude_set = build_globset(&config.import.exclude_globs)?;

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(entry.path().to_path_buf());
    }
    // Sort for deterministic ordering
    files.sort();

    let mut summary = ImportSummary::default();
    for path in &files {
        summary.files += 1;
        let records = read_records(path)
            .with_context(|| format!("Failed to read export file: {}", path.display()))?;

        let default_source = source_override
            .map(str::to_string)
            .unwrap_or_else(|| file_stem(path));

        for record in records {
            match record_to_listing(record, &default_source) {
                Some(listing) => match store.upsert(&listing).await? {
                    UpsertOutcome::Inserted => summary.inserted += 1,
                    UpsertOutcome::Updated => summary.updated += 1,
                    UpsertOutcome::Unchanged => summary.unchanged += 1,
                },
                None => summary.invalid += 1,
            }
        }
    }

    Ok(summary)
}

fn read_records(path: &Path) -> Result<Vec<serde_json::Value>> {
    let content = std::fs::read_to_string(path)?;

    if path.extension().is_some_and(|ext| ext == "ndjson") {
        return content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect();
    }

    let value: serde_json::Value = serde_json::from_str(&content)?;
    Ok(match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    })
}

/// Convert one export record into a listing.
///
/// Two record shapes are accepted: an envelope
/// `{"source": ..., "source_id": ..., "fields": {...}}`, or a bare field
/// map where `id`/`url` (when present) provide the source id. Records that
/// are not JSON objects are counted as invalid and skipped.
fn record_to_listing(record: serde_json::Value, default_source: &str) -> Option<NewListing> {
    let obj = record.as_object()?;

    let (source, source_id, fields) = match obj.get("fields").and_then(|f| f.as_object()) {
        Some(inner) => {
            let source = obj
                .get("source")
                .and_then(|v| v.as_str())
                .unwrap_or(default_source)
                .to_string();
            let fields: BTreeMap<String, serde_json::Value> =
                inner.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let source_id = obj
                .get("source_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| content_id(&fields));
            (source, source_id, fields)
        }
        None => {
            let fields: BTreeMap<String, serde_json::Value> =
                obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let source_id = ["id", "url"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(|v| v.as_str()))
                .map(str::to_string)
                .unwrap_or_else(|| content_id(&fields));
            (default_source.to_string(), source_id, fields)
        }
    };

    if fields.is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(source_id.as_bytes());
    hasher.update(serde_json::to_string(&fields).ok()?.as_bytes());
    let dedup_hash = format!("{:x}", hasher.finalize());

    Some(NewListing {
        source,
        source_id,
        raw: fields.clone(),
        fields,
        dedup_hash,
    })
}

/// Stable fallback id for records without one: hash of the field map.
fn content_id(fields: &BTreeMap<String, serde_json::Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(fields).unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "export".to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

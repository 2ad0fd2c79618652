//! # Field Harmonizer CLI (`fhz`)
//!
//! The `fhz` binary drives the harmonization workflow from the terminal:
//! import scraped listings, inspect field profiles, review suggested
//! clusters, manage mapping sets, and apply the active set to the store.
//!
//! ## Usage
//!
//! ```bash
//! fhz --config ./config/fhz.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fhz init` | Create the SQLite database and run schema migrations |
//! | `fhz import <dir>` | Import scraper export files (NDJSON/JSON) |
//! | `fhz profile` | Print field profiles for a listing sample |
//! | `fhz clusters` | Print suggested clusters of similar fields |
//! | `fhz mapping <action>` | Create, list, activate, and delete mapping sets |
//! | `fhz apply <id>` | Rewrite the listing store per a mapping set |
//! | `fhz serve` | Start the operator HTTP API |

mod apply;
mod cluster;
mod config;
mod db;
mod error;
mod import;
mod jobs;
mod listing_store;
mod mapping_store;
mod migrate;
mod models;
mod profile;
mod progress;
mod score;
mod server;
mod suggest;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::apply::ApplyOptions;
use crate::jobs::JobRegistry;
use crate::listing_store::{ListingStore, SqliteListingStore};
use crate::mapping_store::{MappingSetUpdate, MappingStore};
use crate::models::{ApplyStatus, FieldMapping, FieldName, MappingSet};
use crate::profile::ProfileOptions;
use crate::progress::ProgressMode;

/// Field Harmonizer CLI — profile, cluster, and rename heterogeneous
/// listing fields into a canonical schema.
#[derive(Parser)]
#[command(
    name = "fhz",
    about = "Field Harmonizer — normalize heterogeneous listing fields into a canonical schema",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fhz.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent.
    Init,

    /// Import scraper export files from a directory.
    ///
    /// Accepts NDJSON (one listing per line) and JSON (array or single
    /// object) files. Re-importing unchanged listings is a no-op.
    Import {
        /// Directory containing export files.
        dir: PathBuf,

        /// Source label to record when a file does not name one.
        /// Defaults to the export file's stem.
        #[arg(long)]
        source: Option<String>,
    },

    /// Profile fields over a listing sample and print the result.
    Profile {
        /// Sample size override (defaults to `[profiling].sample_size`).
        #[arg(long)]
        sample: Option<u32>,
    },

    /// Compute and print suggested clusters of similar fields.
    Clusters {
        /// Similarity threshold override (defaults to `[clustering].threshold`).
        #[arg(long)]
        threshold: Option<f64>,

        /// Print the clusters as JSON instead of the human table.
        #[arg(long)]
        json: bool,
    },

    /// Manage mapping sets.
    Mapping {
        #[command(subcommand)]
        action: MappingAction,
    },

    /// Apply a mapping set's rename rules to the listing store.
    ///
    /// The set must be active. Safe to re-run: documents already in
    /// canonical shape are skipped.
    Apply {
        /// Mapping set id.
        id: String,

        /// Count what would change without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Documents per batch (defaults to `[apply].batch_size`).
        #[arg(long)]
        batch_size: Option<u32>,

        /// Progress output: `off`, `human`, or `json`. Defaults to `human`
        /// when stderr is a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Start the operator HTTP API.
    Serve,
}

/// Mapping-set subcommands.
#[derive(Subcommand)]
enum MappingAction {
    /// List all mapping sets.
    List,

    /// Show one mapping set with its rules.
    Show {
        /// Mapping set id.
        id: String,
    },

    /// Create a mapping set (starts inactive).
    Create {
        /// Unique mapping set name.
        name: String,

        /// Optional description.
        #[arg(long)]
        description: Option<String>,

        /// Rename rules as `original=target` pairs. Repeatable.
        #[arg(long = "rule", value_parser = parse_rule)]
        rules: Vec<(String, String)>,

        /// JSON file with rules: `[{"original_field": ..., "target_field": ...}]`.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Update a mapping set's name, description, or rules.
    Update {
        /// Mapping set id.
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Replace all rules with `original=target` pairs. Repeatable.
        #[arg(long = "rule", value_parser = parse_rule)]
        rules: Vec<(String, String)>,

        /// Replace all rules from a JSON file.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Make this set the single active one.
    Activate {
        /// Mapping set id.
        id: String,
    },

    /// Return the set to the inactive state.
    Deactivate {
        /// Mapping set id.
        id: String,
    },

    /// Delete an inactive mapping set.
    Delete {
        /// Mapping set id.
        id: String,
    },
}

/// Parse an `original=target` rule argument.
fn parse_rule(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid rule: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { dir, source } => {
            let pool = db::connect(&cfg).await?;
            let store = SqliteListingStore::new(pool.clone());
            let summary = import::run_import(&cfg, &store, &dir, source.as_deref()).await?;
            println!("import {}", dir.display());
            println!("  files read: {}", summary.files);
            println!("  inserted: {}", summary.inserted);
            println!("  updated: {}", summary.updated);
            println!("  unchanged: {}", summary.unchanged);
            if summary.invalid > 0 {
                println!("  invalid records skipped: {}", summary.invalid);
            }
            println!("ok");
            pool.close().await;
        }
        Commands::Profile { sample } => {
            let pool = db::connect(&cfg).await?;
            let store = SqliteListingStore::new(pool.clone());
            let n = sample.unwrap_or(cfg.profiling.sample_size);
            let docs = store.sample(n).await?;
            let profiles = profile::profile_fields(&docs, &ProfileOptions::from(&cfg.profiling))?;

            println!("{} fields across {} sampled listings", profiles.len(), docs.len());
            for p in profiles.values() {
                println!(
                    "  {:<28} {:<12} observed {:<6} distinct {:<6} e.g. {}",
                    p.field_name.as_str(),
                    format!("{:?}", p.inferred_type).to_lowercase(),
                    p.observed_count,
                    p.distinct_count,
                    p.value_examples
                        .iter()
                        .take(3)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            pool.close().await;
        }
        Commands::Clusters { threshold, json } => {
            let mut cfg = cfg;
            if let Some(threshold) = threshold {
                cfg.clustering.threshold = threshold;
            }
            let pool = db::connect(&cfg).await?;
            let store = SqliteListingStore::new(pool.clone());
            let clusters = cluster::suggested_clusters(&store, &cfg).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&clusters)?);
            } else if clusters.is_empty() {
                println!("no clusters above threshold {}", cfg.clustering.threshold);
            } else {
                for c in &clusters {
                    println!(
                        "cluster {}  canonical: {}{}",
                        c.id,
                        c.canonical_field,
                        c.suggested_name
                            .as_deref()
                            .map(|s| format!("  (suggested name: {})", s))
                            .unwrap_or_default()
                    );
                    for member in &c.similar_fields {
                        let score = c.similarity_scores.get(member).copied().unwrap_or(0.0);
                        println!("    {:<28} score {:.2}", member.to_string(), score);
                    }
                }
            }
            pool.close().await;
        }
        Commands::Mapping { action } => {
            let pool = db::connect(&cfg).await?;
            let store = MappingStore::new(pool.clone());
            run_mapping_action(&store, action).await?;
            pool.close().await;
        }
        Commands::Apply {
            id,
            dry_run,
            batch_size,
            progress,
        } => {
            let pool = db::connect(&cfg).await?;
            let listings = SqliteListingStore::new(pool.clone());
            let mappings = MappingStore::new(pool.clone());
            let registry = Arc::new(JobRegistry::new());

            let mode = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some("off") => ProgressMode::Off,
                Some("human") => ProgressMode::Human,
                Some("json") => ProgressMode::Json,
                Some(other) => anyhow::bail!("unknown progress mode: '{}'", other),
            };
            let opts = ApplyOptions {
                batch_size: batch_size.unwrap_or(cfg.apply.batch_size),
                dry_run,
            };

            let outcome =
                apply::run_apply(&listings, &mappings, &registry, &id, &opts, mode.reporter())
                    .await?;

            println!("apply {}{}", id, if dry_run { " (dry-run)" } else { "" });
            println!("  documents scanned: {}", outcome.documents_scanned);
            println!(
                "  documents {}: {}",
                if dry_run { "that would change" } else { "rewritten" },
                outcome.documents_rewritten
            );
            if !outcome.errors.is_empty() {
                println!("  errors: {}", outcome.errors.len());
                for e in &outcome.errors {
                    println!("    {}: {}", e.document_id, e.message);
                }
            }
            match outcome.status {
                ApplyStatus::Completed => println!("ok"),
                ApplyStatus::Cancelled => println!("cancelled"),
                ApplyStatus::MappingNoLongerActive => {
                    anyhow::bail!("mapping set was deactivated mid-run; apply aborted")
                }
                ApplyStatus::Fatal => anyhow::bail!(
                    "apply failed: {}",
                    outcome.fatal_message.unwrap_or_default()
                ),
            }
            pool.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_mapping_action(store: &MappingStore, action: MappingAction) -> Result<()> {
    match action {
        MappingAction::List => {
            let sets = store.list().await?;
            if sets.is_empty() {
                println!("no mapping sets");
            }
            for set in sets {
                println!(
                    "{}  {:<24} {} rules{}",
                    set.id,
                    set.name,
                    set.mappings.len(),
                    if set.is_active { "  [active]" } else { "" }
                );
            }
        }
        MappingAction::Show { id } => {
            let set = store.get(&id).await?;
            print_mapping_set(&set);
        }
        MappingAction::Create {
            name,
            description,
            rules,
            file,
        } => {
            let mappings = collect_rules(rules, file)?;
            let set = store.create(&name, description, mappings).await?;
            println!("created mapping set {} ({})", set.name, set.id);
        }
        MappingAction::Update {
            id,
            name,
            description,
            rules,
            file,
        } => {
            let mappings = if rules.is_empty() && file.is_none() {
                None
            } else {
                Some(collect_rules(rules, file)?)
            };
            let set = store
                .update(
                    &id,
                    MappingSetUpdate {
                        name,
                        description,
                        mappings,
                    },
                )
                .await?;
            println!("updated mapping set {} ({})", set.name, set.id);
        }
        MappingAction::Activate { id } => {
            store.activate(&id).await?;
            println!("mapping set {} is now active", id);
        }
        MappingAction::Deactivate { id } => {
            store.deactivate(&id).await?;
            println!("mapping set {} is now inactive", id);
        }
        MappingAction::Delete { id } => {
            store.delete(&id).await?;
            println!("deleted mapping set {}", id);
        }
    }
    Ok(())
}

fn collect_rules(
    rules: Vec<(String, String)>,
    file: Option<PathBuf>,
) -> Result<Vec<FieldMapping>> {
    if let Some(path) = file {
        if !rules.is_empty() {
            anyhow::bail!("use either --rule or --file, not both");
        }
        let content = std::fs::read_to_string(&path)?;
        return Ok(serde_json::from_str(&content)?);
    }
    rules
        .into_iter()
        .map(|(original, target)| {
            Ok(FieldMapping {
                original_field: FieldName::new(original)?,
                target_field: FieldName::new(target)?,
            })
        })
        .collect()
}

fn print_mapping_set(set: &MappingSet) {
    println!("{}  {}{}", set.id, set.name, if set.is_active { "  [active]" } else { "" });
    if let Some(description) = &set.description {
        println!("  {}", description);
    }
    for rule in &set.mappings {
        println!("  {} -> {}", rule.original_field, rule.target_field);
    }
}

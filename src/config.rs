use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub profiling: ProfilingConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfilingConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: u32,
    #[serde(default = "default_max_examples")]
    pub max_examples: usize,
    #[serde(default = "default_categorical_max_distinct")]
    pub categorical_max_distinct: u64,
    #[serde(default = "default_categorical_max_ratio")]
    pub categorical_max_ratio: f64,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            max_examples: default_max_examples(),
            categorical_max_distinct: default_categorical_max_distinct(),
            categorical_max_ratio: default_categorical_max_ratio(),
        }
    }
}

fn default_sample_size() -> u32 {
    1000
}
fn default_max_examples() -> usize {
    10
}
fn default_categorical_max_distinct() -> u64 {
    20
}
fn default_categorical_max_ratio() -> f64 {
    0.10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_name_weight")]
    pub name_weight: f64,
    #[serde(default = "default_value_weight")]
    pub value_weight: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            name_weight: default_name_weight(),
            value_weight: default_value_weight(),
        }
    }
}

fn default_threshold() -> f64 {
    0.75
}
fn default_name_weight() -> f64 {
    0.6
}
fn default_value_weight() -> f64 {
    0.4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplyConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> u32 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7410".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.ndjson".to_string(), "**/*.json".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.profiling.sample_size == 0 {
        anyhow::bail!("profiling.sample_size must be > 0");
    }
    if config.profiling.max_examples == 0 {
        anyhow::bail!("profiling.max_examples must be > 0");
    }
    if !(0.0..=1.0).contains(&config.profiling.categorical_max_ratio) {
        anyhow::bail!("profiling.categorical_max_ratio must be in [0.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.clustering.threshold) {
        anyhow::bail!("clustering.threshold must be in [0.0, 1.0]");
    }
    if config.clustering.name_weight < 0.0 || config.clustering.value_weight < 0.0 {
        anyhow::bail!("clustering weights must be non-negative");
    }
    let weight_sum = config.clustering.name_weight + config.clustering.value_weight;
    if (weight_sum - 1.0).abs() > 1e-9 {
        anyhow::bail!(
            "clustering.name_weight + clustering.value_weight must sum to 1.0 (got {})",
            weight_sum
        );
    }

    if config.apply.batch_size == 0 {
        anyhow::bail!("apply.batch_size must be > 0");
    }

    Ok(())
}

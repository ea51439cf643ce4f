use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod brands;

pub use brands::{BrandEntryConfig, BrandTableConfig, MultiWordBrandConfig, load_brand_table};

pub const LARDER_DIR_NAME: &str = ".larder";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const BRANDS_FILE_NAME: &str = "brands.toml";
pub const DEFAULT_MERGE_CONCURRENCY: usize = 4;
pub const MAX_MERGE_CONCURRENCY: usize = 64;
pub const DEFAULT_ACTOR: &str = "larderd";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LarderConfig {
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_pass_gate")]
    pub pass: GateThresholds,
    #[serde(default = "default_near_gate")]
    pub near: GateThresholds,
    #[serde(default = "default_kcal_min")]
    pub kcal_min: f64,
    #[serde(default = "default_kcal_max")]
    pub kcal_max: f64,
    #[serde(default)]
    pub price_buckets: PriceBucketConfig,
    #[serde(default)]
    pub weights: ScoreWeights,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            pass: default_pass_gate(),
            near: default_near_gate(),
            kcal_min: default_kcal_min(),
            kcal_max: default_kcal_max(),
            price_buckets: PriceBucketConfig::default(),
            weights: ScoreWeights::default(),
        }
    }
}

/// Coverage minimums in percent (0–100) plus the tolerated kcal outlier count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    pub form_cov: f64,
    pub life_stage_cov: f64,
    pub ingredients_cov: f64,
    pub price_bucket_cov: f64,
    pub max_kcal_outliers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBucketConfig {
    #[serde(default = "default_budget_max")]
    pub budget_max: f64,
    #[serde(default = "default_standard_max")]
    pub standard_max: f64,
}

impl Default for PriceBucketConfig {
    fn default() -> Self {
        Self {
            budget_max: default_budget_max(),
            standard_max: default_standard_max(),
        }
    }
}

/// Weights of the per-product composite score. They are normalized by their
/// sum, so only the ratios matter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_weight_form")]
    pub form: f64,
    #[serde(default = "default_weight_life_stage")]
    pub life_stage: f64,
    #[serde(default = "default_weight_ingredients")]
    pub ingredients: f64,
    #[serde(default = "default_weight_kcal")]
    pub kcal: f64,
    #[serde(default = "default_weight_price")]
    pub price: f64,
    #[serde(default = "default_weight_macros")]
    pub macros: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            form: default_weight_form(),
            life_stage: default_weight_life_stage(),
            ingredients: default_weight_ingredients(),
            kcal: default_weight_kcal(),
            price: default_weight_price(),
            macros: default_weight_macros(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_merge_concurrency")]
    pub merge_concurrency: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            merge_concurrency: default_merge_concurrency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_actor")]
    pub default_actor: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            default_actor: default_actor(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("brand table not found at {0}")]
    MissingBrandTable(PathBuf),
}

pub fn larder_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(LARDER_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    larder_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn brands_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    larder_dir(workspace_root).join(BRANDS_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<LarderConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(LarderConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: LarderConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<LarderConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(larder_dir(workspace_root))?;

    let brands = brands_path(workspace_root);
    if !brands.exists() {
        let content = toml::to_string_pretty(&BrandTableConfig::default())?;
        fs::write(brands, content)?;
    }

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = LarderConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &LarderConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();
    let quality = &config.quality;

    let pass = &quality.pass;
    let near = &quality.near;
    if near.form_cov > pass.form_cov
        || near.life_stage_cov > pass.life_stage_cov
        || near.ingredients_cov > pass.ingredients_cov
        || near.price_bucket_cov > pass.price_bucket_cov
        || near.max_kcal_outliers < pass.max_kcal_outliers
    {
        warnings.push(ConfigWarning {
            code: "near_gate_stricter_than_pass",
            message: "[quality.near] is stricter than [quality.pass] on at least one metric"
                .to_owned(),
        });
    }

    for (label, gate) in [("pass", pass), ("near", near)] {
        let values = [
            gate.form_cov,
            gate.life_stage_cov,
            gate.ingredients_cov,
            gate.price_bucket_cov,
        ];
        if values.iter().any(|value| !(0.0..=100.0).contains(value)) {
            warnings.push(ConfigWarning {
                code: "gate_out_of_range",
                message: format!("[quality.{label}] coverage thresholds must be within 0..=100"),
            });
        }
    }

    if quality.kcal_min >= quality.kcal_max {
        warnings.push(ConfigWarning {
            code: "kcal_range_inverted",
            message: format!(
                "kcal_min ({}) must be below kcal_max ({})",
                quality.kcal_min, quality.kcal_max
            ),
        });
    }

    if quality.price_buckets.budget_max >= quality.price_buckets.standard_max {
        warnings.push(ConfigWarning {
            code: "price_buckets_inverted",
            message: "price_buckets.budget_max must be below price_buckets.standard_max"
                .to_owned(),
        });
    }

    let weights = &quality.weights;
    let weight_sum = weights.form
        + weights.life_stage
        + weights.ingredients
        + weights.kcal
        + weights.price
        + weights.macros;
    if weight_sum <= 0.0 {
        warnings.push(ConfigWarning {
            code: "score_weights_empty",
            message: "quality weights sum to zero; every product will score 0".to_owned(),
        });
    }

    warnings
}

fn normalize_config(mut config: LarderConfig) -> LarderConfig {
    config.link.merge_concurrency = config
        .link
        .merge_concurrency
        .clamp(1, MAX_MERGE_CONCURRENCY);

    let actor = config.publish.default_actor.trim();
    if actor.is_empty() {
        config.publish.default_actor = default_actor();
    } else {
        config.publish.default_actor = actor.to_owned();
    }

    config
}

fn default_pass_gate() -> GateThresholds {
    GateThresholds {
        form_cov: 95.0,
        life_stage_cov: 95.0,
        ingredients_cov: 85.0,
        price_bucket_cov: 70.0,
        max_kcal_outliers: 0,
    }
}

fn default_near_gate() -> GateThresholds {
    GateThresholds {
        form_cov: 90.0,
        life_stage_cov: 90.0,
        ingredients_cov: 80.0,
        price_bucket_cov: 65.0,
        max_kcal_outliers: 2,
    }
}

fn default_kcal_min() -> f64 {
    200.0
}

fn default_kcal_max() -> f64 {
    600.0
}

fn default_budget_max() -> f64 {
    5.0
}

fn default_standard_max() -> f64 {
    12.0
}

fn default_weight_form() -> f64 {
    1.0
}

fn default_weight_life_stage() -> f64 {
    1.0
}

fn default_weight_ingredients() -> f64 {
    1.5
}

fn default_weight_kcal() -> f64 {
    1.5
}

fn default_weight_price() -> f64 {
    1.0
}

fn default_weight_macros() -> f64 {
    0.5
}

fn default_merge_concurrency() -> usize {
    DEFAULT_MERGE_CONCURRENCY
}

fn default_actor() -> String {
    DEFAULT_ACTOR.to_owned()
}

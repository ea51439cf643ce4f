use std::collections::BTreeMap;
use std::fmt;

use larder_config::{GateThresholds, PriceBucketConfig, QualityConfig};
use larder_core::{Attributes, CanonicalProduct, PriceBucket};
use serde::{Deserialize, Serialize};

mod product;

pub use product::{kcal_in_range, price_bucket, product_quality_score};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    Pass,
    Near,
    Todo,
}

impl QualityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Near => "NEAR",
            Self::Todo => "TODO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMetric {
    FormCoverage,
    LifeStageCoverage,
    IngredientsCoverage,
    PriceBucketCoverage,
    KcalOutliers,
}

impl QualityMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FormCoverage => "form_cov",
            Self::LifeStageCoverage => "life_stage_cov",
            Self::IngredientsCoverage => "ingredients_cov",
            Self::PriceBucketCoverage => "price_bucket_cov",
            Self::KcalOutliers => "kcal_outliers",
        }
    }
}

/// Percentages in 0–100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CoverageSnapshot {
    pub form_cov: f64,
    pub life_stage_cov: f64,
    pub ingredients_cov: f64,
    pub kcal_valid_pct: f64,
    pub price_bucket_cov: f64,
}

impl CoverageSnapshot {
    /// Unweighted mean of the five coverages.
    pub fn completion_pct(&self) -> f64 {
        (self.form_cov
            + self.life_stage_cov
            + self.ingredients_cov
            + self.kcal_valid_pct
            + self.price_bucket_cov)
            / 5.0
    }
}

/// A threshold the brand missed, e.g. `form_cov 93.0% < 95.0%`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateFailure {
    pub metric: QualityMetric,
    pub actual: f64,
    pub required: f64,
}

impl fmt::Display for GateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.metric {
            QualityMetric::KcalOutliers => write!(
                f,
                "{} {} > {}",
                self.metric.as_str(),
                self.actual,
                self.required
            ),
            _ => write!(
                f,
                "{} {:.1}% < {:.1}%",
                self.metric.as_str(),
                self.actual,
                self.required
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandQualityReport {
    pub brand_slug: String,
    pub product_count: u32,
    pub coverage: CoverageSnapshot,
    pub kcal_outliers: u32,
    pub completion_pct: f64,
    pub status: QualityStatus,
    /// Thresholds of the PASS gate this brand does not meet; empty on PASS.
    pub failing: Vec<GateFailure>,
}

impl BrandQualityReport {
    pub fn passed(&self) -> bool {
        self.status == QualityStatus::Pass
    }
}

/// Scores the products of one brand. Products of other brands are ignored; a
/// brand with no products scores 0% everywhere and classifies as TODO.
pub fn score(
    products: &[CanonicalProduct],
    brand_slug: &str,
    config: &QualityConfig,
) -> BrandQualityReport {
    let owned = products
        .iter()
        .filter(|product| product.brand_slug() == brand_slug)
        .collect::<Vec<_>>();
    score_subset(brand_slug, &owned, config)
}

/// One report per brand present in `products`, ordered by brand slug.
pub fn score_all(products: &[CanonicalProduct], config: &QualityConfig) -> Vec<BrandQualityReport> {
    let mut by_brand: BTreeMap<&str, Vec<&CanonicalProduct>> = BTreeMap::new();
    for product in products {
        by_brand.entry(product.brand_slug()).or_default().push(product);
    }

    by_brand
        .into_iter()
        .map(|(brand_slug, owned)| score_subset(brand_slug, &owned, config))
        .collect()
}

/// Brands with the most remaining work first; ties by slug.
pub fn rank_by_effort(reports: &[BrandQualityReport]) -> Vec<&BrandQualityReport> {
    let mut ranked = reports.iter().collect::<Vec<_>>();
    ranked.sort_by(|left, right| {
        left.completion_pct
            .total_cmp(&right.completion_pct)
            .then_with(|| left.brand_slug.cmp(&right.brand_slug))
    });
    ranked
}

/// PASS, then NEAR, else TODO. The returned failures are measured against the
/// PASS gate so callers can explain exactly what blocks promotion.
pub fn classify(
    coverage: &CoverageSnapshot,
    kcal_outliers: u32,
    config: &QualityConfig,
) -> (QualityStatus, Vec<GateFailure>) {
    let pass_failures = gate_failures(coverage, kcal_outliers, &config.pass);
    if pass_failures.is_empty() {
        return (QualityStatus::Pass, pass_failures);
    }

    if gate_failures(coverage, kcal_outliers, &config.near).is_empty() {
        return (QualityStatus::Near, pass_failures);
    }

    (QualityStatus::Todo, pass_failures)
}

pub fn gate_failures(
    coverage: &CoverageSnapshot,
    kcal_outliers: u32,
    gate: &GateThresholds,
) -> Vec<GateFailure> {
    let checks = [
        (QualityMetric::FormCoverage, coverage.form_cov, gate.form_cov),
        (
            QualityMetric::LifeStageCoverage,
            coverage.life_stage_cov,
            gate.life_stage_cov,
        ),
        (
            QualityMetric::IngredientsCoverage,
            coverage.ingredients_cov,
            gate.ingredients_cov,
        ),
        (
            QualityMetric::PriceBucketCoverage,
            coverage.price_bucket_cov,
            gate.price_bucket_cov,
        ),
    ];

    let mut failures = checks
        .into_iter()
        .filter(|(_, actual, required)| actual < required)
        .map(|(metric, actual, required)| GateFailure {
            metric,
            actual,
            required,
        })
        .collect::<Vec<_>>();

    if kcal_outliers > gate.max_kcal_outliers {
        failures.push(GateFailure {
            metric: QualityMetric::KcalOutliers,
            actual: f64::from(kcal_outliers),
            required: f64::from(gate.max_kcal_outliers),
        });
    }

    failures
}

fn score_subset(
    brand_slug: &str,
    products: &[&CanonicalProduct],
    config: &QualityConfig,
) -> BrandQualityReport {
    let total = products.len();

    let with_form = count_where(products, |product| product.form().is_known());
    let with_stage = count_where(products, |product| product.life_stage().is_known());
    let with_ingredients = count_where(products, |product| !product.ingredients().is_empty());
    let with_valid_kcal = count_where(products, |product| {
        product
            .kcal_per_100g()
            .is_some_and(|kcal| kcal_in_range(kcal, config))
    });
    let with_bucket = count_where(products, |product| {
        bucket_for(product, &config.price_buckets).is_some()
    });
    let kcal_outliers = count_where(products, |product| {
        product
            .kcal_per_100g()
            .is_some_and(|kcal| !kcal_in_range(kcal, config))
    });

    let coverage = CoverageSnapshot {
        form_cov: percent(with_form, total),
        life_stage_cov: percent(with_stage, total),
        ingredients_cov: percent(with_ingredients, total),
        kcal_valid_pct: percent(with_valid_kcal, total),
        price_bucket_cov: percent(with_bucket, total),
    };
    let kcal_outliers = saturating_count(kcal_outliers);
    let (status, failing) = classify(&coverage, kcal_outliers, config);

    BrandQualityReport {
        brand_slug: brand_slug.to_owned(),
        product_count: saturating_count(total),
        coverage,
        kcal_outliers,
        completion_pct: coverage.completion_pct(),
        status,
        failing,
    }
}

fn saturating_count(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn count_where(
    products: &[&CanonicalProduct],
    predicate: impl Fn(&CanonicalProduct) -> bool,
) -> usize {
    products.iter().filter(|product| predicate(product)).count()
}

fn bucket_for(product: &CanonicalProduct, buckets: &PriceBucketConfig) -> Option<PriceBucket> {
    product
        .price_bucket
        .or_else(|| price_bucket(product.price_per_kg(), buckets))
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    // Multiply first so exact ratios such as 19/20 land on 95.0.
    (count as f64 * 100.0) / total as f64
}

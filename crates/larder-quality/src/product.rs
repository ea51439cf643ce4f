use larder_config::{PriceBucketConfig, QualityConfig};
use larder_core::{Attributes, PriceBucket};

pub fn kcal_in_range(kcal_per_100g: f64, config: &QualityConfig) -> bool {
    (config.kcal_min..=config.kcal_max).contains(&kcal_per_100g)
}

/// Non-positive or missing prices get no bucket.
pub fn price_bucket(price_per_kg: Option<f64>, buckets: &PriceBucketConfig) -> Option<PriceBucket> {
    let price = price_per_kg.filter(|price| price.is_finite() && *price > 0.0)?;
    if price <= buckets.budget_max {
        Some(PriceBucket::Budget)
    } else if price <= buckets.standard_max {
        Some(PriceBucket::Standard)
    } else {
        Some(PriceBucket::Premium)
    }
}

/// Weighted share (0.0–1.0) of the attributes a consumer needs: known form and
/// life stage, ingredients, plausible kcal, a bucketed price and the core macros.
pub fn product_quality_score(item: &impl Attributes, config: &QualityConfig) -> f64 {
    let weights = &config.weights;
    let signals = [
        (weights.form, item.form().is_known()),
        (weights.life_stage, item.life_stage().is_known()),
        (weights.ingredients, !item.ingredients().is_empty()),
        (
            weights.kcal,
            item.kcal_per_100g()
                .is_some_and(|kcal| kcal_in_range(kcal, config)),
        ),
        (
            weights.price,
            price_bucket(item.price_per_kg(), &config.price_buckets).is_some(),
        ),
        (weights.macros, item.has_macros()),
    ];

    let total = signals
        .iter()
        .map(|(weight, _)| weight.max(0.0))
        .sum::<f64>();
    if total <= 0.0 {
        return 0.0;
    }

    let earned = signals
        .iter()
        .filter(|(_, present)| *present)
        .map(|(weight, _)| weight.max(0.0))
        .sum::<f64>();

    // Rounded so scores compare equal across platforms and re-runs.
    (earned / total * 10_000.0).round() / 10_000.0
}

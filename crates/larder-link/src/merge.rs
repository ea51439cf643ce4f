use larder_config::QualityConfig;
use larder_core::{CanonicalProduct, LifeStage, ProductKey, RawRecord, SourceRef};
use larder_quality::{price_bucket, product_quality_score};

use crate::rank::{RankedRecord, sort_by_rank};

/// Builds the canonical product for one key. Each attribute comes from the
/// highest-ranked record that supplies it, so a lower-ranked record can still
/// fill a gap left by everything above it.
///
/// `group` must be non-empty and share `key`.
pub fn merge_group(
    key: &ProductKey,
    mut group: Vec<RankedRecord>,
    config: &QualityConfig,
) -> Option<CanonicalProduct> {
    sort_by_rank(&mut group);
    let top = group.first()?;

    // Energy value and its estimated flag travel together.
    let (kcal_per_100g, kcal_estimated) = group
        .iter()
        .find_map(|item| {
            item.record
                .kcal_per_100g
                .map(|kcal| (Some(kcal), item.record.kcal_estimated))
        })
        .unwrap_or((None, false));

    let life_stage = group
        .iter()
        .map(|item| item.record.life_stage)
        .find(|stage| stage.is_known())
        .unwrap_or(LifeStage::Unknown);

    let ingredients_tokens = group
        .iter()
        .map(|item| &item.record.ingredients_tokens)
        .find(|tokens| !tokens.is_empty())
        .cloned()
        .unwrap_or_default();

    let price_per_kg = first_value(&group, |record| record.price_per_kg);

    let mut product = CanonicalProduct {
        key: key.clone(),
        product_name: top.cleaned_product_name.trim().to_owned(),
        life_stage,
        kcal_per_100g,
        kcal_estimated,
        protein_percent: first_value(&group, |record| record.protein_percent),
        fat_percent: first_value(&group, |record| record.fat_percent),
        fiber_percent: first_value(&group, |record| record.fiber_percent),
        ash_percent: first_value(&group, |record| record.ash_percent),
        moisture_percent: first_value(&group, |record| record.moisture_percent),
        ingredients_tokens,
        price_per_kg,
        price_bucket: price_bucket(price_per_kg, &config.price_buckets),
        image_url: group
            .iter()
            .find_map(|item| item.record.image_url.clone()),
        product_url: group
            .iter()
            .find_map(|item| item.record.product_url.clone()),
        sources: group
            .iter()
            .map(|item| SourceRef {
                source_id: item.record.source_id.clone(),
                updated_at: item.record.updated_at,
            })
            .collect(),
        quality_score: 0.0,
        updated_at: group
            .iter()
            .map(|item| item.record.updated_at)
            .max()
            .unwrap_or_default(),
    };
    product.quality_score = product_quality_score(&product, config);

    Some(product)
}

fn first_value(group: &[RankedRecord], pick: impl Fn(&RawRecord) -> Option<f64>) -> Option<f64> {
    group.iter().find_map(|item| pick(&item.record))
}

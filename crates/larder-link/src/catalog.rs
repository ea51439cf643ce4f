use std::collections::BTreeMap;

use larder_config::QualityConfig;
use larder_core::{CanonicalProduct, KeyComputationError, ProductKey, RawRecord};
use larder_quality::{price_bucket, product_quality_score};

use crate::{Linker, RankedRecord};

/// A raw record accepted under a product key.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub key: ProductKey,
    pub ranked: RankedRecord,
}

impl Contribution {
    /// Rebuilds a contribution loaded from storage. The key is kept as stored,
    /// ranking inputs are recomputed under the current quality settings.
    pub fn restore(
        linker: &Linker,
        key: ProductKey,
        cleaned_product_name: String,
        record: RawRecord,
    ) -> Result<Self, KeyComputationError> {
        Ok(Self {
            key,
            ranked: linker.rank_input(record, cleaned_product_name)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkReport {
    pub created: Vec<ProductKey>,
    pub updated: Vec<ProductKey>,
    /// Keys that received new contributions without changing their product.
    pub unchanged: usize,
    /// Records already present in the catalog or repeated within the batch.
    pub duplicates: usize,
    pub accepted: Vec<Contribution>,
    pub orphans: Vec<KeyComputationError>,
}

impl LinkReport {
    pub fn changed_keys(&self) -> impl Iterator<Item = &ProductKey> {
        self.created.iter().chain(self.updated.iter())
    }
}

/// Every contribution seen so far, grouped by key, and the product merged from
/// each group. Contributions are only ever added. A newer record from a source
/// supersedes that source's earlier ones in the merge, and fields the newer
/// record lacks are carried forward, so a product never loses a field it once
/// had.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    contributions: BTreeMap<ProductKey, BTreeMap<String, RankedRecord>>,
    products: BTreeMap<ProductKey, CanonicalProduct>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(
        contributions: impl IntoIterator<Item = Contribution>,
        products: impl IntoIterator<Item = CanonicalProduct>,
    ) -> Self {
        let mut catalog = Self::new();
        for contribution in contributions {
            catalog
                .contributions
                .entry(contribution.key)
                .or_default()
                .insert(contribution.ranked.fingerprint.clone(), contribution.ranked);
        }
        catalog.products = products
            .into_iter()
            .map(|product| (product.key.clone(), product))
            .collect();
        catalog
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn contribution_count(&self) -> usize {
        self.contributions.values().map(BTreeMap::len).sum()
    }

    pub fn products(&self) -> impl Iterator<Item = &CanonicalProduct> {
        self.products.values()
    }

    pub fn product(&self, key: &ProductKey) -> Option<&CanonicalProduct> {
        self.products.get(key)
    }

    pub fn products_for_brand<'a>(
        &'a self,
        brand_slug: &'a str,
    ) -> impl Iterator<Item = &'a CanonicalProduct> + 'a {
        self.products
            .values()
            .filter(move |product| product.brand_slug() == brand_slug)
    }

    /// Adds `records` and re-merges only the keys they touch. Nothing in the
    /// catalog changes until every touched group has been merged.
    pub fn link(&mut self, linker: &Linker, records: &[RawRecord]) -> LinkReport {
        let mut report = LinkReport::default();
        let mut staged: BTreeMap<ProductKey, BTreeMap<String, RankedRecord>> = BTreeMap::new();

        for record in records {
            let (key, ranked) = match linker.prepare(record) {
                Ok(prepared) => prepared,
                Err(err) => {
                    tracing::warn!(source_id = %err.source_id(), error = %err, "orphaned record");
                    report.orphans.push(err);
                    continue;
                }
            };

            let known = self
                .contributions
                .get(&key)
                .is_some_and(|group| group.contains_key(&ranked.fingerprint));
            let fresh = staged.entry(key.clone()).or_default();
            if known || fresh.contains_key(&ranked.fingerprint) {
                report.duplicates += 1;
                continue;
            }

            report.accepted.push(Contribution {
                key,
                ranked: ranked.clone(),
            });
            fresh.insert(ranked.fingerprint.clone(), ranked);
        }
        staged.retain(|_, fresh| !fresh.is_empty());

        let groups = staged
            .iter()
            .map(|(key, fresh)| {
                let mut members = self
                    .contributions
                    .get(key)
                    .map(|existing| existing.values().cloned().collect::<Vec<_>>())
                    .unwrap_or_default();
                members.extend(fresh.values().cloned());
                (key.clone(), members)
            })
            .collect();

        let mut merged = Vec::new();
        for mut product in linker.merge_groups(groups) {
            match self.products.get(&product.key) {
                Some(previous) => {
                    carry_forward(previous, &mut product, linker.quality());
                    if previous == &product {
                        report.unchanged += 1;
                    } else {
                        report.updated.push(product.key.clone());
                    }
                }
                None => report.created.push(product.key.clone()),
            }
            merged.push(product);
        }

        for (key, fresh) in staged {
            self.contributions.entry(key).or_default().extend(fresh);
        }
        for product in merged {
            self.products.insert(product.key.clone(), product);
        }

        tracing::debug!(
            created = report.created.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged,
            duplicates = report.duplicates,
            orphans = report.orphans.len(),
            "catalog linked"
        );
        report
    }
}

/// Restores any attribute the previous product had and the fresh merge lacks.
/// Happens when a source's newer record drops a field the older one carried.
fn carry_forward(previous: &CanonicalProduct, next: &mut CanonicalProduct, config: &QualityConfig) {
    let mut carried = Vec::new();

    if next.kcal_per_100g.is_none() && previous.kcal_per_100g.is_some() {
        next.kcal_per_100g = previous.kcal_per_100g;
        next.kcal_estimated = previous.kcal_estimated;
        carried.push("kcal_per_100g");
    }
    if !next.life_stage.is_known() && previous.life_stage.is_known() {
        next.life_stage = previous.life_stage;
        carried.push("life_stage");
    }
    if next.ingredients_tokens.is_empty() && !previous.ingredients_tokens.is_empty() {
        next.ingredients_tokens = previous.ingredients_tokens.clone();
        carried.push("ingredients_tokens");
    }
    if next.price_per_kg.is_none() && previous.price_per_kg.is_some() {
        next.price_per_kg = previous.price_per_kg;
        carried.push("price_per_kg");
    }
    for (field, slot, old) in [
        ("protein_percent", &mut next.protein_percent, previous.protein_percent),
        ("fat_percent", &mut next.fat_percent, previous.fat_percent),
        ("fiber_percent", &mut next.fiber_percent, previous.fiber_percent),
        ("ash_percent", &mut next.ash_percent, previous.ash_percent),
        ("moisture_percent", &mut next.moisture_percent, previous.moisture_percent),
    ] {
        if slot.is_none() && old.is_some() {
            *slot = old;
            carried.push(field);
        }
    }
    if next.image_url.is_none() && previous.image_url.is_some() {
        next.image_url = previous.image_url.clone();
        carried.push("image_url");
    }
    if next.product_url.is_none() && previous.product_url.is_some() {
        next.product_url = previous.product_url.clone();
        carried.push("product_url");
    }

    if carried.is_empty() {
        return;
    }

    tracing::warn!(key = %next.key, fields = ?carried, "kept previously merged fields");
    next.price_bucket = price_bucket(next.price_per_kg, &config.price_buckets);
    next.quality_score = product_quality_score(&*next, config);
}

#[cfg(test)]
mod tests {
    use larder_core::{LifeStage, product_fingerprint};

    use super::*;
    use crate::tests::{linker, record};

    fn snapshot(catalog: &Catalog) -> Vec<String> {
        catalog
            .products()
            .map(|product| product_fingerprint(product).expect("fingerprint"))
            .collect()
    }

    #[test]
    fn relinking_the_same_batch_changes_nothing() {
        let linker = linker(2);
        let mut priced = record("retailer", "barking_heads", "Fat Dog Slim");
        priced.price_per_kg = Some(4.2);
        let records = vec![record("scrape", "barking", "Heads Fat Dog Slim"), priced];

        let mut catalog = Catalog::new();
        let first = catalog.link(&linker, &records);
        let before = snapshot(&catalog);
        let second = catalog.link(&linker, &records);

        assert_eq!(first.created.len(), 1);
        assert_eq!(first.accepted.len(), 2);
        assert!(second.created.is_empty());
        assert!(second.updated.is_empty());
        assert!(second.accepted.is_empty());
        assert_eq!(second.duplicates, 2);
        assert_eq!(snapshot(&catalog), before);
        assert_eq!(catalog.contribution_count(), 2);
    }

    #[test]
    fn incremental_linking_matches_a_single_batch() {
        let linker = linker(1);
        let mut a = record("a", "Arden Grange", "Adult Lamb");
        a.kcal_per_100g = Some(372.0);
        let mut b = record("b", "arden", "Grange Adult Lamb");
        b.life_stage = LifeStage::Adult;
        b.price_per_kg = Some(6.5);
        let c = record("c", "Tiny Paws", "Senior Bites");

        let mut incremental = Catalog::new();
        incremental.link(&linker, &[a.clone()]);
        let report = incremental.link(&linker, &[b.clone(), c.clone()]);

        let mut batch = Catalog::new();
        batch.link(&linker, &[a, b, c]);

        assert_eq!(report.updated.len(), 1);
        assert_eq!(report.created.len(), 1);
        assert_eq!(snapshot(&incremental), snapshot(&batch));
    }

    #[test]
    fn later_higher_ranked_record_does_not_erase_fields() {
        let linker = linker(1);
        let mut priced = record("retailer", "Arden Grange", "Puppy");
        priced.price_per_kg = Some(5.5);
        priced.ingredients_tokens = vec!["chicken".to_owned(), "rice".to_owned()];
        let mut measured = record("manufacturer", "Arden Grange", "Puppy");
        measured.kcal_per_100g = Some(390.0);
        measured.life_stage = LifeStage::Puppy;

        let mut catalog = Catalog::new();
        catalog.link(&linker, &[priced]);
        catalog.link(&linker, &[measured]);

        let key = ProductKey::new("arden_grange", "puppy", larder_core::Form::Dry);
        let product = catalog.product(&key).expect("merged product");
        assert_eq!(product.sources[0].source_id, "manufacturer");
        assert_eq!(product.kcal_per_100g, Some(390.0));
        assert_eq!(product.price_per_kg, Some(5.5));
        assert_eq!(product.ingredients_tokens.len(), 2);
    }

    #[test]
    fn restored_catalog_behaves_like_the_original() {
        let linker = linker(1);
        let records = vec![
            record("a", "Arden", "Grange Senior"),
            record("b", "Tiny Paws", "Senior Bites"),
        ];

        let mut original = Catalog::new();
        let report = original.link(&linker, &records);

        let contributions = report.accepted.into_iter().map(|item| {
            Contribution::restore(
                &linker,
                item.key,
                item.ranked.cleaned_product_name,
                item.ranked.record,
            )
            .expect("restore contribution")
        });
        let mut restored = Catalog::restore(contributions, original.products().cloned());
        let again = restored.link(&linker, &records);

        assert_eq!(again.duplicates, 2);
        assert_eq!(snapshot(&restored), snapshot(&original));
        assert_eq!(restored.products_for_brand("tiny_paws").count(), 1);
    }

    #[test]
    fn stored_fields_survive_a_merge_that_lacks_them() {
        let linker = linker(1);
        let mut catalog = Catalog::new();
        catalog.link(&linker, &[record("a", "Tiny Paws", "Senior Bites")]);

        let key = ProductKey::new("tiny_paws", "senior_bites", larder_core::Form::Dry);
        let mut stored = catalog.product(&key).cloned().expect("product");
        stored.image_url = Some("https://img.example/bites.png".to_owned());
        let contributions = vec![Contribution::restore(
            &linker,
            key.clone(),
            "Senior Bites".to_owned(),
            record("a", "Tiny Paws", "Senior Bites"),
        )
        .expect("restore contribution")];
        let mut restored = Catalog::restore(contributions, vec![stored]);

        restored.link(&linker, &[record("b", "Tiny Paws", "Senior Bites")]);

        let product = restored.product(&key).expect("product");
        assert_eq!(product.image_url.as_deref(), Some("https://img.example/bites.png"));
        assert_eq!(product.sources.len(), 2);
    }

    #[test]
    fn newer_record_from_the_same_source_corrects_its_earlier_one() {
        let linker = linker(1);
        let mut first = record("retailer", "Arden Grange", "Adult Lamb");
        first.kcal_per_100g = Some(3720.0);
        first.ingredients_tokens = vec!["lamb".to_owned(), "rice".to_owned(), "beet".to_owned()];
        first.image_url = Some("https://img.example/lamb.png".to_owned());
        first.updated_at = 1;
        let mut second = record("retailer", "Arden Grange", "Adult Lamb");
        second.kcal_per_100g = Some(372.0);
        second.ingredients_tokens = vec!["lamb".to_owned(), "rice".to_owned()];
        second.updated_at = 2;
        let key = ProductKey::new("arden_grange", "adult_lamb", larder_core::Form::Dry);

        let mut catalog = Catalog::new();
        catalog.link(&linker, &[first.clone()]);
        let report = catalog.link(&linker, &[second.clone()]);

        assert_eq!(report.updated, vec![key.clone()]);
        let product = catalog.product(&key).expect("product");
        assert_eq!(product.kcal_per_100g, Some(372.0));
        assert_eq!(product.ingredients_tokens.len(), 2);
        assert_eq!(
            product.image_url.as_deref(),
            Some("https://img.example/lamb.png")
        );
        assert_eq!(
            product
                .sources
                .iter()
                .map(|source| (source.source_id.as_str(), source.updated_at))
                .collect::<Vec<_>>(),
            vec![("retailer", 2)]
        );
        assert_eq!(catalog.contribution_count(), 2);

        let mut late = first.clone();
        late.price_per_kg = Some(9.9);
        let resent = catalog.link(&linker, &[late]);
        assert_eq!(resent.accepted.len(), 1);
        assert_eq!(resent.unchanged, 1);
        assert_eq!(catalog.product(&key).expect("product").price_per_kg, None);

        let mut batch = Catalog::new();
        batch.link(&linker, &[second, first]);
        let batched = batch.product(&key).expect("product");
        assert_eq!(batched.kcal_per_100g, Some(372.0));
        assert_eq!(batched.sources.len(), 1);
    }

    #[test]
    fn orphans_are_reported_without_touching_the_catalog() {
        let mut catalog = Catalog::new();
        let report = catalog.link(&linker(1), &[record("x", "  ", "Adult")]);

        assert_eq!(report.orphans.len(), 1);
        assert!(catalog.is_empty());
        assert_eq!(catalog.contribution_count(), 0);
    }
}

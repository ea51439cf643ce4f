use std::collections::BTreeMap;
use std::sync::Arc;

use larder_canon::Canonicalizer;
use larder_config::QualityConfig;
use larder_core::{
    CanonicalProduct, KeyComputationError, ProductKey, RawRecord, record_fingerprint, slugify,
};
use larder_quality::product_quality_score;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

mod catalog;
mod merge;
mod rank;

pub use catalog::{Catalog, Contribution, LinkReport};
pub use merge::merge_group;
pub use rank::{RankedRecord, compare_rank, latest_per_source, sort_by_rank};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to build merge worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result of a stateless [`Linker::link`] call: one product per key, ordered by
/// key, plus the records that could not be keyed.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkOutcome {
    pub products: Vec<CanonicalProduct>,
    pub orphans: Vec<KeyComputationError>,
}

pub struct Linker {
    canonicalizer: Canonicalizer,
    quality: QualityConfig,
    pool: Option<Arc<ThreadPool>>,
}

impl Linker {
    /// `merge_concurrency` of 1 merges on the calling thread. Larger values
    /// spread key groups over a worker pool; a group is always merged by one
    /// worker, so ranking inside a group stays sequential.
    pub fn new(
        canonicalizer: Canonicalizer,
        quality: QualityConfig,
        merge_concurrency: usize,
    ) -> Result<Self, LinkError> {
        let pool = if merge_concurrency > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(merge_concurrency)
                .thread_name(|idx| format!("larder-merge-{idx}"))
                .build()?;
            Some(Arc::new(pool))
        } else {
            None
        };

        Ok(Self {
            canonicalizer,
            quality,
            pool,
        })
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    pub fn quality(&self) -> &QualityConfig {
        &self.quality
    }

    pub fn compute_key(&self, record: &RawRecord) -> Result<ProductKey, KeyComputationError> {
        self.prepare(record).map(|(key, _)| key)
    }

    /// Resolves the brand, derives the product key and precomputes ranking
    /// inputs. Records without a usable brand or name are rejected rather than
    /// folded into a catch-all key.
    pub fn prepare(
        &self,
        record: &RawRecord,
    ) -> Result<(ProductKey, RankedRecord), KeyComputationError> {
        if slugify(&record.brand_raw).is_empty() {
            return Err(KeyComputationError::MissingBrand {
                source_id: record.source_id.clone(),
                product_name_raw: record.product_name_raw.clone(),
            });
        }

        let resolved = self
            .canonicalizer
            .canonicalize(&record.brand_raw, &record.product_name_raw);
        let name_slug = self
            .canonicalizer
            .name_slug(&resolved.brand_slug, &resolved.cleaned_product_name);
        if name_slug.is_empty() {
            return Err(KeyComputationError::MissingName {
                source_id: record.source_id.clone(),
                brand_slug: resolved.brand_slug,
            });
        }

        let key = ProductKey::new(resolved.brand_slug, name_slug, record.form);
        let ranked = self.rank_input(record.clone(), resolved.cleaned_product_name)?;
        Ok((key, ranked))
    }

    pub(crate) fn rank_input(
        &self,
        record: RawRecord,
        cleaned_product_name: String,
    ) -> Result<RankedRecord, KeyComputationError> {
        let fingerprint =
            record_fingerprint(&record).map_err(|err| KeyComputationError::Unencodable {
                source_id: record.source_id.clone(),
                cause: err.to_string(),
            })?;
        Ok(RankedRecord {
            fingerprint,
            quality_score: product_quality_score(&record, &self.quality),
            cleaned_product_name,
            record,
        })
    }

    /// Groups `records` by product key and merges each group. Identical
    /// records collapse to one contribution, so repeating the input changes
    /// nothing.
    pub fn link(&self, records: &[RawRecord]) -> LinkOutcome {
        let mut groups: BTreeMap<ProductKey, BTreeMap<String, RankedRecord>> = BTreeMap::new();
        let mut orphans = Vec::new();

        for record in records {
            match self.prepare(record) {
                Ok((key, ranked)) => {
                    groups
                        .entry(key)
                        .or_default()
                        .insert(ranked.fingerprint.clone(), ranked);
                }
                Err(err) => {
                    tracing::warn!(source_id = %err.source_id(), error = %err, "orphaned record");
                    orphans.push(err);
                }
            }
        }

        let products = self.merge_groups(
            groups
                .into_iter()
                .map(|(key, members)| (key, members.into_values().collect()))
                .collect(),
        );

        LinkOutcome { products, orphans }
    }

    /// Merges independent key groups, in parallel when a pool is configured.
    /// Only the latest record of each source takes part. Output order matches
    /// input order.
    pub fn merge_groups(&self, groups: Vec<(ProductKey, Vec<RankedRecord>)>) -> Vec<CanonicalProduct> {
        let quality = &self.quality;
        let merge = |(key, members): (ProductKey, Vec<RankedRecord>)| {
            merge_group(&key, latest_per_source(members), quality)
        };

        match &self.pool {
            Some(pool) => pool.install(|| groups.into_par_iter().filter_map(merge).collect()),
            None => groups.into_iter().filter_map(merge).collect(),
        }
    }
}

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use larder_core::{Attributes, RawRecord};

/// A record prepared for merging: canonical brand resolution done, ranking
/// inputs precomputed.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRecord {
    pub record: RawRecord,
    pub fingerprint: String,
    pub cleaned_product_name: String,
    pub quality_score: f64,
}

/// Total order, best first:
/// measured kcal > estimated kcal > unknown, specific life stage > all >
/// unknown, longer ingredient list, price present, higher quality score, most
/// recent update, then source id and fingerprint so ties are reproducible.
pub fn compare_rank(left: &RankedRecord, right: &RankedRecord) -> Ordering {
    let (a, b) = (&left.record, &right.record);

    b.energy_class()
        .cmp(&a.energy_class())
        .then_with(|| {
            b.life_stage
                .specificity()
                .cmp(&a.life_stage.specificity())
        })
        .then_with(|| {
            b.ingredients_tokens
                .len()
                .cmp(&a.ingredients_tokens.len())
        })
        .then_with(|| b.price_per_kg.is_some().cmp(&a.price_per_kg.is_some()))
        .then_with(|| right.quality_score.total_cmp(&left.quality_score))
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.source_id.cmp(&b.source_id))
        .then_with(|| left.fingerprint.cmp(&right.fingerprint))
}

pub fn sort_by_rank(records: &mut [RankedRecord]) {
    records.sort_by(compare_rank);
}

/// Keeps one record per source: the most recently updated, with rank breaking
/// timestamp ties. Earlier versions a source sent for the same key stay on
/// record but take no part in the merge.
pub fn latest_per_source(members: impl IntoIterator<Item = RankedRecord>) -> Vec<RankedRecord> {
    let mut latest: BTreeMap<String, RankedRecord> = BTreeMap::new();
    for member in members {
        match latest.entry(member.record.source_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(member);
            }
            Entry::Occupied(mut slot) => {
                if supersedes(&member, slot.get()) {
                    slot.insert(member);
                }
            }
        }
    }
    latest.into_values().collect()
}

fn supersedes(candidate: &RankedRecord, current: &RankedRecord) -> bool {
    candidate
        .record
        .updated_at
        .cmp(&current.record.updated_at)
        .then_with(|| compare_rank(current, candidate))
        .is_gt()
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use larder_core::CanonicalProduct;
use larder_store::{SqliteStore, StoreError, ViewGenerationRecord};
use serde::{Deserialize, Serialize};

use crate::PublishError;
use crate::allowlist::AllowlistStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Preview,
    Production,
}

impl ViewKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Production => "production",
        }
    }
}

impl std::str::FromStr for ViewKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "preview" => Ok(Self::Preview),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "invalid view kind '{other}', expected one of: preview, production"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedProduct {
    pub product: CanonicalProduct,
    pub status: AllowlistStatus,
}

/// One immutable generation of both views. Readers hold an `Arc` to a whole
/// generation, so a later swap never changes what they already see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedViews {
    pub generation: i64,
    pub created_at: i64,
    pub brand_statuses: BTreeMap<String, AllowlistStatus>,
    pub preview: Vec<PublishedProduct>,
    pub production: Vec<PublishedProduct>,
    /// Products the views were projected from. Allowlist transitions and
    /// rollbacks project it again under the statuses committed at that time.
    pub catalog: Vec<CanonicalProduct>,
}

impl PublishedViews {
    pub fn view(&self, kind: ViewKind) -> &[PublishedProduct] {
        match kind {
            ViewKind::Preview => &self.preview,
            ViewKind::Production => &self.production,
        }
    }
}

/// Production holds brands that are ACTIVE, preview those ACTIVE or PENDING.
/// Brands without an allowlist entry appear in neither.
pub fn project_views(
    generation: i64,
    created_at: i64,
    products: &[CanonicalProduct],
    brand_statuses: BTreeMap<String, AllowlistStatus>,
) -> PublishedViews {
    let mut catalog = products.to_vec();
    catalog.sort_by(|left, right| left.key.cmp(&right.key));

    let mut preview = Vec::new();
    let mut production = Vec::new();
    for product in &catalog {
        let Some(&status) = brand_statuses.get(product.brand_slug()) else {
            continue;
        };
        if status.in_preview() {
            preview.push(PublishedProduct {
                product: product.clone(),
                status,
            });
        }
        if status.in_production() {
            production.push(PublishedProduct {
                product: product.clone(),
                status,
            });
        }
    }

    PublishedViews {
        generation,
        created_at,
        brand_statuses,
        preview,
        production,
        catalog,
    }
}

/// Projects the catalog of `source` under the allowlist as `store` currently
/// sees it. Inside a store transaction that includes the transaction's own
/// writes.
pub(crate) fn reproject_generation(
    store: &SqliteStore,
    source: &ViewGenerationRecord,
    generation: i64,
    now_ms: i64,
) -> Result<ViewGenerationRecord, StoreError> {
    let rebuild = || -> Result<ViewGenerationRecord, PublishError> {
        let source_views = decode_generation(source)?;
        let statuses = committed_statuses(store)?;
        let views = project_views(generation, now_ms, &source_views.catalog, statuses);
        tracing::debug!(
            generation,
            source = source.generation,
            production = views.production.len(),
            "re-projected view generation"
        );
        encode_generation(&views)
    };
    rebuild().map_err(projection_error)
}

fn committed_statuses(
    store: &SqliteStore,
) -> Result<BTreeMap<String, AllowlistStatus>, PublishError> {
    store
        .list_allowlist()?
        .into_iter()
        .map(|record| {
            let status = record
                .status
                .parse::<AllowlistStatus>()
                .map_err(PublishError::CorruptRecord)?;
            Ok((record.brand_slug, status))
        })
        .collect()
}

fn projection_error(err: PublishError) -> StoreError {
    match err {
        PublishError::Store(err) => err,
        other => StoreError::Projection(other.to_string()),
    }
}

#[derive(Debug, Clone, Default)]
struct ViewSlots {
    current: Option<Arc<PublishedViews>>,
    previous: Option<Arc<PublishedViews>>,
}

impl ViewSlots {
    fn load(store: &SqliteStore) -> Result<Self, PublishError> {
        Ok(Self {
            current: store
                .current_generation()?
                .as_ref()
                .map(decode_generation)
                .transpose()?,
            previous: store
                .previous_generation()?
                .as_ref()
                .map(decode_generation)
                .transpose()?,
        })
    }

    fn numbers(&self) -> (Option<i64>, Option<i64>) {
        (
            self.current.as_ref().map(|views| views.generation),
            self.previous.as_ref().map(|views| views.generation),
        )
    }
}

/// Serves the current view generation and the one before it. New generations
/// are persisted first and then swapped in whole. Generations written by other
/// handles, such as an allowlist transition, are picked up on the next read.
pub struct ViewPublisher {
    workspace: PathBuf,
    slots: RwLock<ViewSlots>,
}

impl ViewPublisher {
    pub fn open(workspace: impl AsRef<Path>) -> Result<Self, PublishError> {
        let workspace = workspace.as_ref().to_path_buf();
        let store = SqliteStore::open(&workspace)?;
        let slots = ViewSlots::load(&store)?;

        Ok(Self {
            workspace,
            slots: RwLock::new(slots),
        })
    }

    pub fn current(&self) -> Result<Option<Arc<PublishedViews>>, PublishError> {
        Ok(self.refresh()?.current)
    }

    pub fn previous(&self) -> Result<Option<Arc<PublishedViews>>, PublishError> {
        Ok(self.refresh()?.previous)
    }

    /// Snapshots `products` and projects them under the allowlist committed
    /// at publish time.
    pub fn publish(
        &self,
        products: &[CanonicalProduct],
        now_ms: i64,
    ) -> Result<Arc<PublishedViews>, PublishError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);

        let store = SqliteStore::open(&self.workspace)?;
        let record = store.publish_generation(|store, generation| {
            let build = || -> Result<ViewGenerationRecord, PublishError> {
                let statuses = committed_statuses(store)?;
                encode_generation(&project_views(generation, now_ms, products, statuses))
            };
            build().map_err(projection_error)
        })?;
        *slots = ViewSlots::load(&store)?;

        let views = decode_generation(&record)?;
        tracing::info!(
            generation = views.generation,
            preview = views.preview.len(),
            production = views.production.len(),
            "published view generation"
        );
        Ok(views)
    }

    /// Restores the catalog of the previous generation as a new generation,
    /// projected under the current allowlist. A brand that has since been
    /// paused or removed stays out. Only one step back is kept.
    pub fn rollback(&self, now_ms: i64) -> Result<Arc<PublishedViews>, PublishError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);

        let store = SqliteStore::open(&self.workspace)?;
        let mut restored_from = None;
        let record = store.rollback_generation(|store, previous, generation| {
            restored_from = Some(previous.generation);
            reproject_generation(store, previous, generation, now_ms)
        })?;
        *slots = ViewSlots::load(&store)?;

        let views = decode_generation(&record)?;
        tracing::warn!(
            generation = views.generation,
            restored_from,
            production = views.production.len(),
            "rolled back view generation"
        );
        Ok(views)
    }

    fn refresh(&self) -> Result<ViewSlots, PublishError> {
        let store = SqliteStore::open(&self.workspace)?;
        let stored = (
            store.current_generation_number()?,
            store.previous_generation_number()?,
        );

        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            if slots.numbers() == stored {
                return Ok(slots.clone());
            }
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        *slots = ViewSlots::load(&store)?;
        Ok(slots.clone())
    }
}

fn encode_generation(views: &PublishedViews) -> Result<ViewGenerationRecord, PublishError> {
    Ok(ViewGenerationRecord {
        generation: views.generation,
        created_at: views.created_at,
        views_json: serde_json::to_string(views)?,
    })
}

fn decode_generation(record: &ViewGenerationRecord) -> Result<Arc<PublishedViews>, PublishError> {
    let views: PublishedViews = serde_json::from_str(&record.views_json)?;
    Ok(Arc::new(views))
}

#[cfg(test)]
mod tests {
    use larder_core::{Form, LifeStage, ProductKey};
    use larder_quality::{BrandQualityReport, CoverageSnapshot, QualityStatus};
    use tempfile::tempdir;

    use super::*;
    use crate::allowlist::{
        AllowlistAction, AllowlistService, BrandAllowlistEntry, TransitionRequest,
    };

    fn product(brand: &str, name: &str) -> CanonicalProduct {
        CanonicalProduct {
            key: ProductKey::new(brand, name, Form::Dry),
            product_name: name.to_owned(),
            life_stage: LifeStage::Adult,
            kcal_per_100g: Some(360.0),
            kcal_estimated: false,
            protein_percent: None,
            fat_percent: None,
            fiber_percent: None,
            ash_percent: None,
            moisture_percent: None,
            ingredients_tokens: vec!["lamb".to_owned()],
            price_per_kg: None,
            price_bucket: None,
            image_url: None,
            product_url: None,
            sources: Vec::new(),
            quality_score: 0.5,
            updated_at: 1,
        }
    }

    fn statuses(entries: &[(&str, AllowlistStatus)]) -> BTreeMap<String, AllowlistStatus> {
        entries
            .iter()
            .map(|(brand, status)| ((*brand).to_owned(), *status))
            .collect()
    }

    fn keys(views: &PublishedViews, kind: ViewKind) -> Vec<String> {
        views
            .view(kind)
            .iter()
            .map(|item| item.product.key.to_string())
            .collect()
    }

    fn report(brand: &str, status: QualityStatus) -> BrandQualityReport {
        BrandQualityReport {
            brand_slug: brand.to_owned(),
            product_count: 1,
            coverage: CoverageSnapshot::default(),
            kcal_outliers: 0,
            completion_pct: 100.0,
            status,
            failing: Vec::new(),
        }
    }

    fn transition(
        service: &AllowlistService,
        brand: &str,
        action: AllowlistAction,
        status: QualityStatus,
        now_ms: i64,
    ) -> BrandAllowlistEntry {
        let expected_revision = service
            .entry(brand)
            .expect("read entry")
            .map(|entry| entry.revision);
        let report = report(brand, status);
        service
            .apply(
                &TransitionRequest {
                    brand_slug: brand.to_owned(),
                    action,
                    actor: "ops@larder".to_owned(),
                    reason: "catalog review".to_owned(),
                    expected_revision,
                },
                action.needs_quality_report().then_some(&report),
                now_ms,
            )
            .expect("transition")
    }

    fn production(publisher: &ViewPublisher) -> Vec<String> {
        let views = publisher
            .current()
            .expect("read views")
            .expect("published generation");
        keys(&views, ViewKind::Production)
    }

    #[test]
    fn projection_follows_allowlist_status() {
        let products = vec![
            product("pending_co", "adult"),
            product("active_co", "puppy"),
            product("paused_co", "adult"),
            product("removed_co", "adult"),
            product("unlisted_co", "adult"),
            product("active_co", "adult"),
        ];
        let brand_statuses = statuses(&[
            ("active_co", AllowlistStatus::Active),
            ("pending_co", AllowlistStatus::Pending),
            ("paused_co", AllowlistStatus::Paused),
            ("removed_co", AllowlistStatus::Removed),
        ]);

        let views = project_views(1, 0, &products, brand_statuses);

        assert_eq!(
            keys(&views, ViewKind::Production),
            vec!["active_co|adult|dry", "active_co|puppy|dry"]
        );
        assert_eq!(
            keys(&views, ViewKind::Preview),
            vec!["active_co|adult|dry", "active_co|puppy|dry", "pending_co|adult|dry"]
        );
        assert_eq!(views.preview[2].status, AllowlistStatus::Pending);
        assert_eq!(views.catalog.len(), 6);
    }

    #[test]
    fn publish_swaps_whole_generations_and_rolls_back_once() {
        let temp = tempdir().expect("tempdir");
        let service = AllowlistService::new(temp.path());
        let publisher = ViewPublisher::open(temp.path()).expect("open publisher");
        transition(&service, "acme", AllowlistAction::Add, QualityStatus::Pass, 10);

        let first = publisher
            .publish(&[product("acme", "adult")], 100)
            .expect("first publish");
        let held = publisher.current().expect("read views").expect("current view");
        let second = publisher
            .publish(&[product("acme", "adult"), product("acme", "senior")], 200)
            .expect("second publish");

        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
        assert_eq!(held.production.len(), 1);
        assert_eq!(production(&publisher).len(), 2);
        assert_eq!(
            publisher
                .previous()
                .expect("read views")
                .map(|views| views.generation),
            Some(1)
        );

        let restored = publisher.rollback(300).expect("rollback");
        assert_eq!(restored.generation, 3);
        assert_eq!(production(&publisher), vec!["acme|adult|dry"]);
        assert!(matches!(
            publisher.rollback(400),
            Err(PublishError::Store(StoreError::NoPreviousGeneration))
        ));

        let reopened = ViewPublisher::open(temp.path()).expect("reopen");
        assert_eq!(
            reopened
                .current()
                .expect("read views")
                .map(|views| views.generation),
            Some(3)
        );
        assert!(reopened.previous().expect("read views").is_none());
    }

    #[test]
    fn pause_and_remove_leave_production_without_a_publish() {
        let temp = tempdir().expect("tempdir");
        let service = AllowlistService::new(temp.path());
        let publisher = ViewPublisher::open(temp.path()).expect("open publisher");
        transition(&service, "acme", AllowlistAction::Add, QualityStatus::Pass, 10);
        transition(&service, "zest", AllowlistAction::Add, QualityStatus::Pass, 10);
        publisher
            .publish(&[product("acme", "adult"), product("zest", "adult")], 100)
            .expect("publish");
        assert_eq!(production(&publisher), vec!["acme|adult|dry", "zest|adult|dry"]);

        transition(&service, "acme", AllowlistAction::Pause, QualityStatus::Pass, 200);
        assert_eq!(production(&publisher), vec!["zest|adult|dry"]);
        let paused = publisher.current().expect("read views").expect("current");
        assert_eq!(keys(&paused, ViewKind::Preview), vec!["zest|adult|dry"]);
        assert_eq!(paused.created_at, 200);

        transition(&service, "acme", AllowlistAction::Reactivate, QualityStatus::Pass, 300);
        assert_eq!(production(&publisher), vec!["acme|adult|dry", "zest|adult|dry"]);

        transition(&service, "zest", AllowlistAction::Remove, QualityStatus::Pass, 400);
        assert_eq!(production(&publisher), vec!["acme|adult|dry"]);
    }

    #[test]
    fn rollback_keeps_removed_brands_out() {
        let temp = tempdir().expect("tempdir");
        let service = AllowlistService::new(temp.path());
        let publisher = ViewPublisher::open(temp.path()).expect("open publisher");
        transition(&service, "acme", AllowlistAction::Add, QualityStatus::Pass, 10);
        transition(&service, "zest", AllowlistAction::Add, QualityStatus::Pass, 10);
        publisher
            .publish(&[product("acme", "adult"), product("zest", "adult")], 100)
            .expect("first publish");

        transition(&service, "acme", AllowlistAction::Remove, QualityStatus::Pass, 200);
        transition(&service, "zest", AllowlistAction::Pause, QualityStatus::Pass, 210);
        publisher
            .publish(&[product("acme", "adult")], 300)
            .expect("second publish");
        assert!(production(&publisher).is_empty());

        let restored = publisher.rollback(400).expect("rollback");
        assert!(restored.production.is_empty());
        assert!(restored.preview.is_empty());
        assert_eq!(restored.catalog.len(), 2);
        assert_eq!(
            restored.brand_statuses.get("acme"),
            Some(&AllowlistStatus::Removed)
        );
        assert!(production(&publisher).is_empty());
    }
}

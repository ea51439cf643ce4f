use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use larder_adapt::AdapterRegistry;
use larder_canon::{CanonError, Canonicalizer};
use larder_config::{
    ConfigError, larder_dir, load_brand_table, load_workspace_config, validate_config,
};
use larder_core::{
    AdapterError, CanonicalProduct, KeyComputationError, ProductKey, RawRecord, Residual,
    ResidualKind, product_fingerprint,
};
use larder_link::{Catalog, Contribution, LinkError, LinkReport, Linker};
use larder_store::{ContributionRecord, ProductRecord, RunRecord, SqliteStore, StoreError};
use serde::Serialize;
use thiserror::Error;

use crate::input::read_source_rows;

pub const RUN_LOCK_FILE_NAME: &str = "run.lock";

/// Every variant aborts the run before anything is committed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("run aborted: invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("run aborted: invalid brand table: {0}")]
    BrandTable(#[from] CanonError),
    #[error("run aborted: {0}")]
    Link(#[from] LinkError),
    #[error("run aborted: {0}")]
    Store(#[from] StoreError),
    #[error("run aborted: another run holds {0}")]
    Locked(PathBuf),
    #[error("run aborted: cannot read input {path}: {source}")]
    Input {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("run aborted: io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("run aborted: stored catalog is corrupt: {0}")]
    Corrupt(String),
    #[error("run aborted: json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub inputs: Vec<PathBuf>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub brand_table_version: String,
    pub records_in: usize,
    pub adapted: usize,
    /// New contributions accepted into the catalog.
    pub linked: usize,
    pub duplicates: usize,
    pub orphaned: usize,
    pub products_created: Vec<String>,
    pub products_updated: Vec<String>,
    pub products_unchanged: usize,
    pub residuals: Vec<Residual>,
}

/// Adapts, links and commits one batch. Per-record failures land in
/// `residuals`; anything else aborts and leaves the store untouched.
pub fn run_once(workspace: &Path, options: &RunOptions) -> Result<RunReport, RunError> {
    let started_at = current_unix_timestamp_millis();
    let _lock = RunLock::acquire(workspace)?;

    let config = load_workspace_config(workspace)?;
    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "{}", warning.message);
    }
    let table = load_brand_table(workspace)?;
    let canonicalizer = Canonicalizer::new(&table)?;
    let brand_table_version = canonicalizer.version().to_owned();
    let linker = Linker::new(
        canonicalizer,
        config.quality.clone(),
        config.link.merge_concurrency,
    )?;

    let store = SqliteStore::open(workspace)?;
    let mut catalog = load_catalog(&store, &linker)?;
    let run_id = options
        .run_id
        .clone()
        .unwrap_or_else(|| format!("run-{started_at}"));
    tracing::info!(
        run_id = %run_id,
        brand_table_version = %brand_table_version,
        products = catalog.len(),
        contributions = catalog.contribution_count(),
        "run started"
    );

    let registry = AdapterRegistry::with_defaults();
    let mut residuals = Vec::new();
    let mut records = Vec::new();
    let mut records_in = 0;
    let mut adapted = 0;
    for path in &options.inputs {
        let rows = read_source_rows(path).map_err(|source| RunError::Input {
            path: path.clone(),
            source,
        })?;

        for row in rows {
            records_in += 1;
            let (row_ref, record) = match row.and_then(|row| {
                registry
                    .adapt(&row)
                    .map(|record| (row.row_ref.clone(), record))
            }) {
                Ok(adapted_row) => adapted_row,
                Err(err) => {
                    residuals.push(adapter_residual(&err));
                    continue;
                }
            };
            adapted += 1;

            match linker.compute_key(&record) {
                Ok(_) => records.push(record),
                Err(err) => residuals.push(orphan_residual(&err, &row_ref)),
            }
        }
    }
    let orphaned = adapted - records.len();

    let link = catalog.link(&linker, &records);
    residuals.extend(link.orphans.iter().map(|err| orphan_residual(err, "")));

    let contributions = link
        .accepted
        .iter()
        .map(|contribution| contribution_record(contribution, &run_id))
        .collect::<Result<Vec<_>, _>>()?;
    let products = changed_products(&catalog, &link)?
        .into_iter()
        .map(|product| product_record(product, &run_id))
        .collect::<Result<Vec<_>, _>>()?;

    let report = RunReport {
        run_id: run_id.clone(),
        started_at,
        finished_at: current_unix_timestamp_millis(),
        brand_table_version: brand_table_version.clone(),
        records_in,
        adapted,
        linked: link.accepted.len(),
        duplicates: link.duplicates,
        orphaned: orphaned + link.orphans.len(),
        products_created: link.created.iter().map(ToString::to_string).collect(),
        products_updated: link.updated.iter().map(ToString::to_string).collect(),
        products_unchanged: link.unchanged,
        residuals,
    };

    let run = RunRecord {
        run_id,
        started_at: report.started_at,
        finished_at: report.finished_at,
        brand_table_version,
        records_in: report.records_in as i64,
        contributions_added: report.linked as i64,
        products_changed: products.len() as i64,
        residuals: report.residuals.len() as i64,
        report_json: serde_json::to_string(&report)?,
    };
    store.commit_run(&run, &contributions, &products)?;

    tracing::info!(
        run_id = %report.run_id,
        records_in = report.records_in,
        linked = report.linked,
        created = report.products_created.len(),
        updated = report.products_updated.len(),
        residuals = report.residuals.len(),
        "run committed"
    );
    Ok(report)
}

fn load_products(store: &SqliteStore) -> Result<Vec<CanonicalProduct>, RunError> {
    store
        .list_products()?
        .into_iter()
        .map(|row| {
            serde_json::from_str(&row.product_json)
                .map_err(|err| RunError::Corrupt(format!("product {}: {err}", row.product_key)))
        })
        .collect()
}

fn load_catalog(store: &SqliteStore, linker: &Linker) -> Result<Catalog, RunError> {
    let contributions = store
        .list_contributions()?
        .into_iter()
        .map(|row| {
            let key = row.product_key.parse::<ProductKey>().map_err(|err| {
                RunError::Corrupt(format!("contribution {}: {err}", row.fingerprint))
            })?;
            let record = serde_json::from_str::<RawRecord>(&row.record_json).map_err(|err| {
                RunError::Corrupt(format!("contribution {}: {err}", row.fingerprint))
            })?;
            Contribution::restore(linker, key, row.cleaned_product_name, record).map_err(|err| {
                RunError::Corrupt(format!("contribution {}: {err}", row.fingerprint))
            })
        })
        .collect::<Result<Vec<_>, RunError>>()?;

    Ok(Catalog::restore(contributions, load_products(store)?))
}

fn changed_products<'a>(
    catalog: &'a Catalog,
    link: &LinkReport,
) -> Result<Vec<&'a CanonicalProduct>, RunError> {
    link.changed_keys()
        .map(|key| {
            catalog
                .product(key)
                .ok_or_else(|| RunError::Corrupt(format!("linked product {key} is missing")))
        })
        .collect()
}

fn contribution_record(
    contribution: &Contribution,
    run_id: &str,
) -> Result<ContributionRecord, RunError> {
    let ranked = &contribution.ranked;
    Ok(ContributionRecord {
        fingerprint: ranked.fingerprint.clone(),
        product_key: contribution.key.to_string(),
        source_id: ranked.record.source_id.clone(),
        cleaned_product_name: ranked.cleaned_product_name.clone(),
        updated_at: ranked.record.updated_at,
        record_json: serde_json::to_string(&ranked.record)?,
        run_id: run_id.to_owned(),
    })
}

fn product_record(product: &CanonicalProduct, run_id: &str) -> Result<ProductRecord, RunError> {
    Ok(ProductRecord {
        product_key: product.key.to_string(),
        brand_slug: product.brand_slug().to_owned(),
        fingerprint: product_fingerprint(product)?,
        product_json: serde_json::to_string(product)?,
        updated_at: product.updated_at,
        run_id: run_id.to_owned(),
    })
}

fn adapter_residual(err: &AdapterError) -> Residual {
    tracing::warn!(
        source_id = %err.source_id,
        row_ref = %err.row_ref,
        error = %err.cause,
        "dropped source row"
    );
    Residual::from(err)
}

fn orphan_residual(err: &KeyComputationError, row_ref: &str) -> Residual {
    tracing::warn!(source_id = %err.source_id(), row_ref, error = %err, "orphaned record");
    Residual {
        kind: ResidualKind::KeyComputation,
        source_id: err.source_id().to_owned(),
        row_ref: row_ref.to_owned(),
        reason: err.to_string(),
    }
}

/// Exclusive for the lifetime of the value; released on drop.
struct RunLock {
    file: File,
}

impl RunLock {
    fn acquire(workspace: &Path) -> Result<Self, RunError> {
        let dir = larder_dir(workspace);
        fs::create_dir_all(&dir)?;
        let path = dir.join(RUN_LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| RunError::Locked(path))?;
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub(crate) fn current_unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

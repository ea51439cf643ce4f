use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use thiserror::Error;

pub const CATALOG_DB_FILE_NAME: &str = "catalog.sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributionRecord {
    pub fingerprint: String,
    pub product_key: String,
    pub source_id: String,
    pub cleaned_product_name: String,
    pub updated_at: i64,
    pub record_json: String,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub product_key: String,
    pub brand_slug: String,
    pub fingerprint: String,
    pub product_json: String,
    pub updated_at: i64,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub brand_table_version: String,
    pub records_in: i64,
    pub contributions_added: i64,
    pub products_changed: i64,
    pub residuals: i64,
    pub report_json: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistRecord {
    pub brand_slug: String,
    pub status: String,
    pub quality_gate_passed: bool,
    pub coverage_json: String,
    pub last_validated: i64,
    pub revision: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub seq: i64,
    pub brand_slug: String,
    pub action: String,
    pub old_status: Option<String>,
    pub new_status: String,
    pub actor: String,
    pub reason: String,
    pub revision: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewGenerationRecord {
    pub generation: i64,
    pub created_at: i64,
    pub views_json: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(
        "allowlist entry '{brand_slug}' changed concurrently: expected revision {expected:?}, found {actual:?}"
    )]
    RevisionConflict {
        brand_slug: String,
        expected: Option<i64>,
        actual: Option<i64>,
    },
    #[error("no previous view generation to roll back to")]
    NoPreviousGeneration,
    #[error("view projection failed: {0}")]
    Projection(String),
}

pub struct SqliteStore {
    conn: Connection,
    larder_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let larder_dir = workspace_root.as_ref().join(".larder");
        fs::create_dir_all(&larder_dir)?;

        let conn = Connection::open(larder_dir.join(CATALOG_DB_FILE_NAME))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self { conn, larder_dir })
    }

    pub fn larder_dir(&self) -> &Path {
        &self.larder_dir
    }

    /// Writes everything a run produced in one transaction. Contributions are
    /// insert-only; products are replaced by key.
    pub fn commit_run(
        &self,
        run: &RunRecord,
        contributions: &[ContributionRecord],
        products: &[ProductRecord],
    ) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;

        {
            let mut insert_contribution = tx.prepare(
                r#"
                INSERT OR IGNORE INTO contributions (
                    fingerprint, product_key, source_id, cleaned_product_name,
                    updated_at, record_json, run_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for record in contributions {
                insert_contribution.execute(params![
                    record.fingerprint,
                    record.product_key,
                    record.source_id,
                    record.cleaned_product_name,
                    record.updated_at,
                    record.record_json,
                    record.run_id,
                ])?;
            }

            let mut upsert_product = tx.prepare(
                r#"
                INSERT INTO products (
                    product_key, brand_slug, fingerprint, product_json, updated_at, run_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(product_key) DO UPDATE SET
                    brand_slug = excluded.brand_slug,
                    fingerprint = excluded.fingerprint,
                    product_json = excluded.product_json,
                    updated_at = excluded.updated_at,
                    run_id = excluded.run_id
                "#,
            )?;
            for record in products {
                upsert_product.execute(params![
                    record.product_key,
                    record.brand_slug,
                    record.fingerprint,
                    record.product_json,
                    record.updated_at,
                    record.run_id,
                ])?;
            }

            tx.execute(
                r#"
                INSERT INTO runs (
                    run_id, started_at, finished_at, brand_table_version, records_in,
                    contributions_added, products_changed, residuals, report_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    run.run_id,
                    run.started_at,
                    run.finished_at,
                    run.brand_table_version,
                    run.records_in,
                    run.contributions_added,
                    run.products_changed,
                    run.residuals,
                    run.report_json,
                ],
            )?;
        }

        tx.commit()?;
        tracing::debug!(
            run_id = %run.run_id,
            contributions = contributions.len(),
            products = products.len(),
            "run committed"
        );
        Ok(())
    }

    pub fn list_contributions(&self) -> Result<Vec<ContributionRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT fingerprint, product_key, source_id, cleaned_product_name,
                   updated_at, record_json, run_id
            FROM contributions
            ORDER BY product_key ASC, fingerprint ASC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ContributionRecord {
                fingerprint: row.get(0)?,
                product_key: row.get(1)?,
                source_id: row.get(2)?,
                cleaned_product_name: row.get(3)?,
                updated_at: row.get(4)?,
                record_json: row.get(5)?,
                run_id: row.get(6)?,
            })
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn list_products(&self) -> Result<Vec<ProductRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT product_key, brand_slug, fingerprint, product_json, updated_at, run_id
            FROM products
            ORDER BY product_key ASC
            "#,
        )?;

        let rows = stmt.query_map([], product_from_row)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn get_product(&self, product_key: &str) -> Result<Option<ProductRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                r#"
                SELECT product_key, brand_slug, fingerprint, product_json, updated_at, run_id
                FROM products
                WHERE product_key = ?1
                "#,
                params![product_key],
                product_from_row,
            )
            .optional()?;

        Ok(record)
    }

    pub fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT run_id, started_at, finished_at, brand_table_version, records_in,
                   contributions_added, products_changed, residuals, report_json
            FROM runs
            ORDER BY started_at DESC, run_id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(params![limit.clamp(1, 1000) as i64], |row| {
            Ok(RunRecord {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                finished_at: row.get(2)?,
                brand_table_version: row.get(3)?,
                records_in: row.get(4)?,
                contributions_added: row.get(5)?,
                products_changed: row.get(6)?,
                residuals: row.get(7)?,
                report_json: row.get(8)?,
            })
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn get_allowlist(&self, brand_slug: &str) -> Result<Option<AllowlistRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                r#"
                SELECT brand_slug, status, quality_gate_passed, coverage_json, last_validated, revision
                FROM allowlist
                WHERE brand_slug = ?1
                "#,
                params![brand_slug],
                allowlist_from_row,
            )
            .optional()?;

        Ok(record)
    }

    pub fn list_allowlist(&self) -> Result<Vec<AllowlistRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT brand_slug, status, quality_gate_passed, coverage_json, last_validated, revision
            FROM allowlist
            ORDER BY brand_slug ASC
            "#,
        )?;

        let rows = stmt.query_map([], allowlist_from_row)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Stores `next` and its audit row only if the entry is still at
    /// `expected_revision` (`None` meaning the brand has no entry yet). The
    /// caller assigns `next.revision`; the audit `seq` is assigned here.
    ///
    /// If a view generation is current, `reproject` rebuilds it against the
    /// updated allowlist and the rebuilt generation replaces it in the same
    /// transaction. The rollback target is kept.
    pub fn apply_transition<F>(
        &self,
        expected_revision: Option<i64>,
        next: &AllowlistRecord,
        audit: &AuditRecord,
        reproject: F,
    ) -> Result<i64, StoreError>
    where
        F: FnOnce(&Self, &ViewGenerationRecord, i64) -> Result<ViewGenerationRecord, StoreError>,
    {
        // Take the write lock before reading so two processes cannot both pass
        // the revision check.
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let actual = tx
            .query_row(
                "SELECT revision FROM allowlist WHERE brand_slug = ?1",
                params![next.brand_slug],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if actual != expected_revision {
            return Err(StoreError::RevisionConflict {
                brand_slug: next.brand_slug.clone(),
                expected: expected_revision,
                actual,
            });
        }

        tx.execute(
            r#"
            INSERT INTO allowlist (
                brand_slug, status, quality_gate_passed, coverage_json, last_validated, revision
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(brand_slug) DO UPDATE SET
                status = excluded.status,
                quality_gate_passed = excluded.quality_gate_passed,
                coverage_json = excluded.coverage_json,
                last_validated = excluded.last_validated,
                revision = excluded.revision
            "#,
            params![
                next.brand_slug,
                next.status,
                next.quality_gate_passed,
                next.coverage_json,
                next.last_validated,
                next.revision,
            ],
        )?;

        tx.execute(
            r#"
            INSERT INTO allowlist_audit (
                brand_slug, action, old_status, new_status, actor, reason, revision, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                audit.brand_slug,
                audit.action,
                audit.old_status,
                audit.new_status,
                audit.actor,
                audit.reason,
                audit.revision,
                audit.created_at,
            ],
        )?;
        let seq = tx.last_insert_rowid();

        if let Some(current) = self.pointed_generation("current")? {
            let generation = next_generation(&tx)?;
            let rebuilt = reproject(self, &current, generation)?;
            swap_generation(&tx, &rebuilt, PreviousSlot::Keep)?;
        }

        tx.commit()?;
        Ok(seq)
    }

    pub fn list_audit(&self, brand_slug: Option<&str>) -> Result<Vec<AuditRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT seq, brand_slug, action, old_status, new_status, actor, reason, revision, created_at
            FROM allowlist_audit
            WHERE ?1 IS NULL OR brand_slug = ?1
            ORDER BY seq ASC
            "#,
        )?;

        let rows = stmt.query_map(params![brand_slug], |row| {
            Ok(AuditRecord {
                seq: row.get(0)?,
                brand_slug: row.get(1)?,
                action: row.get(2)?,
                old_status: row.get(3)?,
                new_status: row.get(4)?,
                actor: row.get(5)?,
                reason: row.get(6)?,
                revision: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Makes the generation built by `build` current and keeps the one it
    /// replaces as the rollback target. Anything older is dropped.
    pub fn publish_generation<F>(&self, build: F) -> Result<ViewGenerationRecord, StoreError>
    where
        F: FnOnce(&Self, i64) -> Result<ViewGenerationRecord, StoreError>,
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let generation = next_generation(&tx)?;
        let record = build(self, generation)?;
        swap_generation(&tx, &record, PreviousSlot::Current)?;

        tx.commit()?;
        Ok(record)
    }

    pub fn current_generation(&self) -> Result<Option<ViewGenerationRecord>, StoreError> {
        self.pointed_generation("current")
    }

    pub fn previous_generation(&self) -> Result<Option<ViewGenerationRecord>, StoreError> {
        self.pointed_generation("previous")
    }

    pub fn current_generation_number(&self) -> Result<Option<i64>, StoreError> {
        self.pointer_slot("current")
    }

    pub fn previous_generation_number(&self) -> Result<Option<i64>, StoreError> {
        self.pointer_slot("previous")
    }

    /// Replaces the current generation with one `reproject` rebuilds from the
    /// previous generation. Only one step is kept, so a second rollback
    /// without an intervening publish fails.
    pub fn rollback_generation<F>(&self, reproject: F) -> Result<ViewGenerationRecord, StoreError>
    where
        F: FnOnce(&Self, &ViewGenerationRecord, i64) -> Result<ViewGenerationRecord, StoreError>,
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let previous = self
            .pointed_generation("previous")?
            .ok_or(StoreError::NoPreviousGeneration)?;
        let generation = next_generation(&tx)?;
        let record = reproject(self, &previous, generation)?;
        swap_generation(&tx, &record, PreviousSlot::Clear)?;

        tx.commit()?;
        Ok(record)
    }

    fn pointer_slot(&self, slot: &str) -> Result<Option<i64>, StoreError> {
        let number = self
            .conn
            .query_row(
                &format!("SELECT {slot} FROM view_pointer WHERE id = 1"),
                [],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        Ok(number)
    }

    fn pointed_generation(&self, slot: &str) -> Result<Option<ViewGenerationRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT g.generation, g.created_at, g.views_json
            FROM view_pointer p
            JOIN view_generations g ON g.generation = p.{slot}
            WHERE p.id = 1
            "#
        );
        let record = self
            .conn
            .query_row(&sql, [], generation_from_row)
            .optional()?;
        Ok(record)
    }
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<ProductRecord> {
    Ok(ProductRecord {
        product_key: row.get(0)?,
        brand_slug: row.get(1)?,
        fingerprint: row.get(2)?,
        product_json: row.get(3)?,
        updated_at: row.get(4)?,
        run_id: row.get(5)?,
    })
}

fn allowlist_from_row(row: &Row<'_>) -> rusqlite::Result<AllowlistRecord> {
    Ok(AllowlistRecord {
        brand_slug: row.get(0)?,
        status: row.get(1)?,
        quality_gate_passed: row.get(2)?,
        coverage_json: row.get(3)?,
        last_validated: row.get(4)?,
        revision: row.get(5)?,
    })
}

fn generation_from_row(row: &Row<'_>) -> rusqlite::Result<ViewGenerationRecord> {
    Ok(ViewGenerationRecord {
        generation: row.get(0)?,
        created_at: row.get(1)?,
        views_json: row.get(2)?,
    })
}

#[derive(Debug, Clone, Copy)]
enum PreviousSlot {
    Current,
    Keep,
    Clear,
}

fn next_generation(conn: &Connection) -> Result<i64, StoreError> {
    let max: Option<i64> =
        conn.query_row("SELECT MAX(generation) FROM view_generations", [], |row| {
            row.get(0)
        })?;
    Ok(max.unwrap_or(0) + 1)
}

fn swap_generation(
    conn: &Connection,
    record: &ViewGenerationRecord,
    previous: PreviousSlot,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO view_generations (generation, created_at, views_json)
        VALUES (?1, ?2, ?3)
        "#,
        params![record.generation, record.created_at, record.views_json],
    )?;

    let previous = match previous {
        PreviousSlot::Current => "view_pointer.current",
        PreviousSlot::Keep => "view_pointer.previous",
        PreviousSlot::Clear => "NULL",
    };
    conn.execute(
        &format!(
            r#"
            INSERT INTO view_pointer (id, current, previous)
            VALUES (1, ?1, NULL)
            ON CONFLICT(id) DO UPDATE SET
                previous = {previous},
                current = excluded.current
            "#
        ),
        params![record.generation],
    )?;

    prune_generations(conn)
}

fn prune_generations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        r#"
        DELETE FROM view_generations
        WHERE generation NOT IN (
            SELECT current FROM view_pointer WHERE id = 1 AND current IS NOT NULL
            UNION
            SELECT previous FROM view_pointer WHERE id = 1 AND previous IS NOT NULL
        )
        "#,
        [],
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS contributions (
            fingerprint TEXT PRIMARY KEY,
            product_key TEXT NOT NULL,
            source_id TEXT NOT NULL,
            cleaned_product_name TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            record_json TEXT NOT NULL,
            run_id TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_contributions_product_key
            ON contributions(product_key);

        CREATE TABLE IF NOT EXISTS products (
            product_key TEXT PRIMARY KEY,
            brand_slug TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            product_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            run_id TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_products_brand_slug ON products(brand_slug);

        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            brand_table_version TEXT NOT NULL,
            records_in INTEGER NOT NULL,
            contributions_added INTEGER NOT NULL,
            products_changed INTEGER NOT NULL,
            residuals INTEGER NOT NULL,
            report_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS allowlist (
            brand_slug TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            quality_gate_passed INTEGER NOT NULL,
            coverage_json TEXT NOT NULL,
            last_validated INTEGER NOT NULL,
            revision INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS allowlist_audit (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            brand_slug TEXT NOT NULL,
            action TEXT NOT NULL,
            old_status TEXT,
            new_status TEXT NOT NULL,
            actor TEXT NOT NULL,
            reason TEXT NOT NULL,
            revision INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_allowlist_audit_brand
            ON allowlist_audit(brand_slug, seq);

        CREATE TRIGGER IF NOT EXISTS allowlist_audit_no_update
        BEFORE UPDATE ON allowlist_audit
        BEGIN
            SELECT RAISE(ABORT, 'allowlist_audit is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS allowlist_audit_no_delete
        BEFORE DELETE ON allowlist_audit
        BEGIN
            SELECT RAISE(ABORT, 'allowlist_audit is append-only');
        END;

        CREATE TABLE IF NOT EXISTS view_generations (
            generation INTEGER PRIMARY KEY,
            created_at INTEGER NOT NULL,
            views_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS view_pointer (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            current INTEGER,
            previous INTEGER
        );
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn run(run_id: &str, started_at: i64) -> RunRecord {
        RunRecord {
            run_id: run_id.to_owned(),
            started_at,
            finished_at: started_at + 10,
            brand_table_version: "1".to_owned(),
            records_in: 2,
            contributions_added: 1,
            products_changed: 1,
            residuals: 0,
            report_json: "{}".to_owned(),
        }
    }

    fn contribution(fingerprint: &str, run_id: &str) -> ContributionRecord {
        ContributionRecord {
            fingerprint: fingerprint.to_owned(),
            product_key: "acme|adult|dry".to_owned(),
            source_id: "retailer".to_owned(),
            cleaned_product_name: "Adult".to_owned(),
            updated_at: 1_700_000_000_000,
            record_json: "{}".to_owned(),
            run_id: run_id.to_owned(),
        }
    }

    fn product(fingerprint: &str, run_id: &str) -> ProductRecord {
        ProductRecord {
            product_key: "acme|adult|dry".to_owned(),
            brand_slug: "acme".to_owned(),
            fingerprint: fingerprint.to_owned(),
            product_json: format!("{{\"v\":\"{fingerprint}\"}}"),
            updated_at: 1_700_000_000_000,
            run_id: run_id.to_owned(),
        }
    }

    fn entry(status: &str, revision: i64) -> AllowlistRecord {
        AllowlistRecord {
            brand_slug: "acme".to_owned(),
            status: status.to_owned(),
            quality_gate_passed: status == "ACTIVE",
            coverage_json: "{}".to_owned(),
            last_validated: 1_700_000_000_000,
            revision,
        }
    }

    fn audit(action: &str, old_status: Option<&str>, new_status: &str, revision: i64) -> AuditRecord {
        AuditRecord {
            seq: 0,
            brand_slug: "acme".to_owned(),
            action: action.to_owned(),
            old_status: old_status.map(str::to_owned),
            new_status: new_status.to_owned(),
            actor: "ops".to_owned(),
            reason: "test".to_owned(),
            revision,
            created_at: 1_700_000_000_000 + revision,
        }
    }

    fn generation(number: i64) -> ViewGenerationRecord {
        ViewGenerationRecord {
            generation: number,
            created_at: number * 100,
            views_json: format!("{{\"generation\":{number}}}"),
        }
    }

    /// Rebuilds `source` under a new number, recording where it came from and
    /// which statuses the allowlist held at that point.
    fn relabel(
        store: &SqliteStore,
        source: &ViewGenerationRecord,
        number: i64,
    ) -> Result<ViewGenerationRecord, StoreError> {
        let statuses = store
            .list_allowlist()?
            .into_iter()
            .map(|record| record.status)
            .collect::<Vec<_>>();
        Ok(ViewGenerationRecord {
            generation: number,
            created_at: number * 100,
            views_json: format!(
                "{{\"from\":{},\"statuses\":\"{}\"}}",
                source.generation,
                statuses.join(",")
            ),
        })
    }

    fn publish(store: &SqliteStore) -> ViewGenerationRecord {
        store
            .publish_generation(|_, number| Ok(generation(number)))
            .expect("publish generation")
    }

    fn pointers(store: &SqliteStore) -> (Option<i64>, Option<i64>) {
        (
            store.current_generation().expect("current").map(|g| g.generation),
            store.previous_generation().expect("previous").map(|g| g.generation),
        )
    }

    #[test]
    fn commit_run_persists_contributions_products_and_run() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        store
            .commit_run(&run("r1", 1), &[contribution("c1", "r1")], &[product("p1", "r1")])
            .expect("commit first run");
        store
            .commit_run(
                &run("r2", 2),
                &[contribution("c1", "r2"), contribution("c2", "r2")],
                &[product("p2", "r2")],
            )
            .expect("commit second run");

        let contributions = store.list_contributions().expect("contributions");
        assert_eq!(contributions.len(), 2);
        assert_eq!(contributions[0].run_id, "r1");

        let stored = store
            .get_product("acme|adult|dry")
            .expect("get product")
            .expect("product exists");
        assert_eq!(stored.fingerprint, "p2");
        assert_eq!(store.list_products().expect("products").len(), 1);

        let runs = store.list_runs(10).expect("runs");
        assert_eq!(
            runs.iter().map(|item| item.run_id.as_str()).collect::<Vec<_>>(),
            vec!["r2", "r1"]
        );
    }

    #[test]
    fn failed_commit_leaves_nothing_behind() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        store
            .commit_run(&run("r1", 1), &[], &[])
            .expect("commit first run");

        let err = store
            .commit_run(&run("r1", 2), &[contribution("c9", "r1")], &[product("p9", "r1")])
            .expect_err("duplicate run id must fail");
        assert!(matches!(err, StoreError::Sqlite(_)));

        assert!(store.list_contributions().expect("contributions").is_empty());
        assert!(store.list_products().expect("products").is_empty());
    }

    #[test]
    fn transition_requires_expected_revision() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        store
            .apply_transition(
                None,
                &entry("PENDING", 1),
                &audit("ADD", None, "PENDING", 1),
                relabel,
            )
            .expect("add");
        store
            .apply_transition(
                Some(1),
                &entry("PAUSED", 2),
                &audit("PAUSE", Some("PENDING"), "PAUSED", 2),
                relabel,
            )
            .expect("pause");

        let err = store
            .apply_transition(
                Some(1),
                &entry("ACTIVE", 2),
                &audit("PROMOTE", Some("PENDING"), "ACTIVE", 2),
                relabel,
            )
            .expect_err("stale revision");
        assert!(matches!(
            err,
            StoreError::RevisionConflict {
                expected: Some(1),
                actual: Some(2),
                ..
            }
        ));

        let current = store
            .get_allowlist("acme")
            .expect("get entry")
            .expect("entry exists");
        assert_eq!(current.status, "PAUSED");
        assert_eq!(current.revision, 2);

        let history = store.list_audit(Some("acme")).expect("audit");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].old_status.as_deref(), Some("PENDING"));
        assert!(store.list_audit(Some("other")).expect("audit").is_empty());
        assert_eq!(store.list_audit(None).expect("audit").len(), 2);
    }

    #[test]
    fn audit_log_rejects_rewrites() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        store
            .apply_transition(
                None,
                &entry("ACTIVE", 1),
                &audit("ADD", None, "ACTIVE", 1),
                relabel,
            )
            .expect("add");

        assert!(
            store
                .conn
                .execute("UPDATE allowlist_audit SET actor = 'someone else'", [])
                .is_err()
        );
        assert!(store.conn.execute("DELETE FROM allowlist_audit", []).is_err());
        assert_eq!(store.list_audit(None).expect("audit")[0].actor, "ops");
    }

    #[test]
    fn generations_keep_one_rollback_step() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        assert!(store.current_generation().expect("current").is_none());
        assert!(matches!(
            store.rollback_generation(relabel),
            Err(StoreError::NoPreviousGeneration)
        ));

        for number in 1..=3 {
            assert_eq!(publish(&store).generation, number);
        }
        assert_eq!(pointers(&store), (Some(3), Some(2)));

        let restored = store.rollback_generation(relabel).expect("rollback");
        assert_eq!(restored.generation, 4);
        assert_eq!(restored.views_json, "{\"from\":2,\"statuses\":\"\"}");
        assert_eq!(pointers(&store), (Some(4), None));
        assert!(matches!(
            store.rollback_generation(relabel),
            Err(StoreError::NoPreviousGeneration)
        ));

        assert_eq!(publish(&store).generation, 5);
        assert_eq!(pointers(&store), (Some(5), Some(4)));
    }

    #[test]
    fn transition_rebuilds_current_generation_in_the_same_transaction() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        store
            .apply_transition(
                None,
                &entry("ACTIVE", 1),
                &audit("ADD", None, "ACTIVE", 1),
                relabel,
            )
            .expect("add without views");
        assert!(store.current_generation().expect("current").is_none());

        publish(&store);
        publish(&store);
        store
            .apply_transition(
                Some(1),
                &entry("PAUSED", 2),
                &audit("PAUSE", Some("ACTIVE"), "PAUSED", 2),
                relabel,
            )
            .expect("pause");

        assert_eq!(pointers(&store), (Some(3), Some(1)));
        let current = store
            .current_generation()
            .expect("current")
            .expect("current exists");
        assert_eq!(current.views_json, "{\"from\":2,\"statuses\":\"PAUSED\"}");

        let err = store
            .apply_transition(
                Some(2),
                &entry("ACTIVE", 3),
                &audit("REACTIVATE", Some("PAUSED"), "ACTIVE", 3),
                |_, _, _| Err(StoreError::Projection("broken snapshot".to_owned())),
            )
            .expect_err("projection failure");
        assert!(matches!(err, StoreError::Projection(_)));
        assert_eq!(
            store
                .get_allowlist("acme")
                .expect("get entry")
                .map(|record| record.status),
            Some("PAUSED".to_owned())
        );
        assert_eq!(store.list_audit(None).expect("audit").len(), 2);
        assert_eq!(pointers(&store), (Some(3), Some(1)));
    }

    #[test]
    fn reopening_keeps_data() {
        let temp = tempdir().expect("tempdir");
        {
            let store = SqliteStore::open(temp.path()).expect("open store");
            publish(&store);
        }

        let store = SqliteStore::open(temp.path()).expect("reopen store");
        assert!(store.larder_dir().join(CATALOG_DB_FILE_NAME).exists());
        assert_eq!(
            store.current_generation().expect("current").map(|g| g.views_json),
            Some("{\"generation\":1}".to_owned())
        );
    }
}

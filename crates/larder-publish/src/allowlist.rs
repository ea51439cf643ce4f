use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use larder_quality::{BrandQualityReport, CoverageSnapshot, QualityStatus};
use larder_store::{AllowlistRecord, AuditRecord, SqliteStore, StoreError};
use serde::{Deserialize, Serialize};

use crate::PublishError;
use crate::views::reproject_generation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllowlistStatus {
    Active,
    Pending,
    Paused,
    Removed,
}

impl AllowlistStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Pending => "PENDING",
            Self::Paused => "PAUSED",
            Self::Removed => "REMOVED",
        }
    }

    pub fn in_production(self) -> bool {
        self == Self::Active
    }

    pub fn in_preview(self) -> bool {
        matches!(self, Self::Active | Self::Pending)
    }
}

impl std::str::FromStr for AllowlistStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "PENDING" => Ok(Self::Pending),
            "PAUSED" => Ok(Self::Paused),
            "REMOVED" => Ok(Self::Removed),
            other => Err(format!(
                "invalid allowlist status '{other}', expected one of: ACTIVE, PENDING, PAUSED, REMOVED"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllowlistAction {
    Add,
    Promote,
    Pause,
    Reactivate,
    Remove,
}

impl AllowlistAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Promote => "PROMOTE",
            Self::Pause => "PAUSE",
            Self::Reactivate => "REACTIVATE",
            Self::Remove => "REMOVE",
        }
    }

    /// Actions whose outcome depends on the brand's current quality report.
    pub fn needs_quality_report(self) -> bool {
        matches!(self, Self::Add | Self::Promote | Self::Reactivate)
    }
}

impl std::str::FromStr for AllowlistAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADD" => Ok(Self::Add),
            "PROMOTE" => Ok(Self::Promote),
            "PAUSE" => Ok(Self::Pause),
            "REACTIVATE" => Ok(Self::Reactivate),
            "REMOVE" => Ok(Self::Remove),
            other => Err(format!(
                "invalid allowlist action '{other}', expected one of: ADD, PROMOTE, PAUSE, REACTIVATE, REMOVE"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: i64,
    pub brand_slug: String,
    pub action: AllowlistAction,
    pub old_status: Option<AllowlistStatus>,
    pub new_status: AllowlistStatus,
    pub actor: String,
    pub reason: String,
    pub revision: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandAllowlistEntry {
    pub brand_slug: String,
    pub status: AllowlistStatus,
    pub quality_gate_passed: bool,
    pub coverage: CoverageSnapshot,
    pub last_validated: i64,
    /// Bumped by every accepted transition.
    pub revision: i64,
    pub history: Vec<AuditEntry>,
}

/// A transition is applied only if the entry is still at `expected_revision`;
/// `None` asserts the brand has no entry yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub brand_slug: String,
    pub action: AllowlistAction,
    pub actor: String,
    pub reason: String,
    pub expected_revision: Option<i64>,
}

/// Decides the next status without touching storage. `report` is required for
/// actions that consult quality and must belong to the same brand.
pub fn plan_transition(
    request: &TransitionRequest,
    current: Option<AllowlistStatus>,
    report: Option<&BrandQualityReport>,
) -> Result<AllowlistStatus, PublishError> {
    let reject = |reason: String, report: Option<&BrandQualityReport>| PublishError::TransitionRejected {
        brand_slug: request.brand_slug.clone(),
        action: request.action,
        current,
        reason,
        failing: report.map(|report| report.failing.clone()).unwrap_or_default(),
    };

    if request.actor.trim().is_empty() {
        return Err(reject("an actor is required".to_owned(), None));
    }
    if request.reason.trim().is_empty() {
        return Err(reject("a reason is required".to_owned(), None));
    }

    let report = match report {
        Some(report) if report.brand_slug != request.brand_slug => {
            return Err(reject(
                format!("quality report is for brand '{}'", report.brand_slug),
                None,
            ));
        }
        Some(report) => Some(report),
        None if request.action.needs_quality_report() => {
            return Err(reject("no current quality report".to_owned(), None));
        }
        None => None,
    };
    let passed = report.is_some_and(BrandQualityReport::passed);
    let gated = || {
        if passed {
            AllowlistStatus::Active
        } else {
            AllowlistStatus::Pending
        }
    };

    use AllowlistAction as A;
    use AllowlistStatus as S;
    match (request.action, current) {
        (A::Add, None) => Ok(gated()),
        (A::Add, Some(status)) => Err(reject(
            format!("brand is already on the allowlist as {}", status.as_str()),
            None,
        )),
        (_, None) => Err(reject("brand is not on the allowlist".to_owned(), None)),
        (_, Some(S::Removed)) => Err(reject("brand was removed".to_owned(), None)),
        (A::Promote, Some(S::Pending)) if passed => Ok(S::Active),
        (A::Promote, Some(S::Pending)) => {
            let status = report.map_or(QualityStatus::Todo, |report| report.status);
            Err(reject(
                format!("quality status is {}, PASS required", status.as_str()),
                report,
            ))
        }
        (A::Pause, Some(S::Active | S::Pending)) => Ok(S::Paused),
        (A::Reactivate, Some(S::Paused)) => Ok(gated()),
        (A::Remove, Some(_)) => Ok(S::Removed),
        (action, Some(status)) => Err(reject(
            format!("{} is not allowed from {}", action.as_str(), status.as_str()),
            None,
        )),
    }
}

/// Applies allowlist transitions one at a time per brand. Every accepted
/// transition is written together with its audit row and, once views have
/// been published, a re-projected view generation.
pub struct AllowlistService {
    workspace: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AllowlistService {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn entry(&self, brand_slug: &str) -> Result<Option<BrandAllowlistEntry>, PublishError> {
        let store = SqliteStore::open(&self.workspace)?;
        load_entry(&store, brand_slug)
    }

    pub fn entries(&self) -> Result<Vec<BrandAllowlistEntry>, PublishError> {
        let store = SqliteStore::open(&self.workspace)?;
        let records = store.list_allowlist()?;
        records
            .into_iter()
            .map(|record| {
                let history = load_history(&store, &record.brand_slug)?;
                entry_from_record(record, history)
            })
            .collect()
    }

    pub fn audit(&self, brand_slug: Option<&str>) -> Result<Vec<AuditEntry>, PublishError> {
        let store = SqliteStore::open(&self.workspace)?;
        store
            .list_audit(brand_slug)?
            .into_iter()
            .map(audit_from_record)
            .collect()
    }

    pub fn apply(
        &self,
        request: &TransitionRequest,
        report: Option<&BrandQualityReport>,
        now_ms: i64,
    ) -> Result<BrandAllowlistEntry, PublishError> {
        let lock = self.brand_lock(&request.brand_slug);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let store = SqliteStore::open(&self.workspace)?;
        let current = load_entry(&store, &request.brand_slug)?;
        let current_status = current.as_ref().map(|entry| entry.status);
        let current_revision = current.as_ref().map(|entry| entry.revision);

        if current_revision != request.expected_revision {
            return Err(stale(request, current_status, current_revision));
        }

        let next_status = plan_transition(request, current_status, report)?;

        let (quality_gate_passed, coverage, last_validated) = match (report, &current) {
            (Some(report), _) => (report.passed(), report.coverage, now_ms),
            (None, Some(entry)) => (entry.quality_gate_passed, entry.coverage, entry.last_validated),
            (None, None) => (false, CoverageSnapshot::default(), now_ms),
        };
        let revision = current_revision.unwrap_or(0) + 1;

        let record = AllowlistRecord {
            brand_slug: request.brand_slug.clone(),
            status: next_status.as_str().to_owned(),
            quality_gate_passed,
            coverage_json: serde_json::to_string(&coverage)?,
            last_validated,
            revision,
        };
        let audit = AuditRecord {
            seq: 0,
            brand_slug: request.brand_slug.clone(),
            action: request.action.as_str().to_owned(),
            old_status: current_status.map(|status| status.as_str().to_owned()),
            new_status: next_status.as_str().to_owned(),
            actor: request.actor.trim().to_owned(),
            reason: request.reason.trim().to_owned(),
            revision,
            created_at: now_ms,
        };

        let applied = store.apply_transition(
            current_revision,
            &record,
            &audit,
            |store, current, generation| reproject_generation(store, current, generation, now_ms),
        );
        match applied {
            Ok(_) => {}
            Err(StoreError::RevisionConflict { actual, .. }) => {
                return Err(stale(request, current_status, actual));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            brand = %request.brand_slug,
            action = request.action.as_str(),
            from = current_status.map(AllowlistStatus::as_str).unwrap_or("-"),
            to = next_status.as_str(),
            actor = %audit.actor,
            "allowlist transition applied"
        );

        load_entry(&store, &request.brand_slug)?.ok_or_else(|| {
            PublishError::CorruptRecord(format!(
                "allowlist entry '{}' missing after transition",
                request.brand_slug
            ))
        })
    }

    fn brand_lock(&self, brand_slug: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(brand_slug.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn stale(
    request: &TransitionRequest,
    current: Option<AllowlistStatus>,
    actual: Option<i64>,
) -> PublishError {
    PublishError::TransitionRejected {
        brand_slug: request.brand_slug.clone(),
        action: request.action,
        current,
        reason: format!(
            "entry changed since it was read (expected revision {}, found {})",
            revision_label(request.expected_revision),
            revision_label(actual)
        ),
        failing: Vec::new(),
    }
}

fn revision_label(revision: Option<i64>) -> String {
    revision.map_or_else(|| "none".to_owned(), |value| value.to_string())
}

pub(crate) fn load_entry(
    store: &SqliteStore,
    brand_slug: &str,
) -> Result<Option<BrandAllowlistEntry>, PublishError> {
    let Some(record) = store.get_allowlist(brand_slug)? else {
        return Ok(None);
    };
    let history = load_history(store, brand_slug)?;
    entry_from_record(record, history).map(Some)
}

fn load_history(store: &SqliteStore, brand_slug: &str) -> Result<Vec<AuditEntry>, PublishError> {
    store
        .list_audit(Some(brand_slug))?
        .into_iter()
        .map(audit_from_record)
        .collect()
}

fn entry_from_record(
    record: AllowlistRecord,
    history: Vec<AuditEntry>,
) -> Result<BrandAllowlistEntry, PublishError> {
    Ok(BrandAllowlistEntry {
        status: record.status.parse().map_err(PublishError::CorruptRecord)?,
        coverage: serde_json::from_str(&record.coverage_json)?,
        brand_slug: record.brand_slug,
        quality_gate_passed: record.quality_gate_passed,
        last_validated: record.last_validated,
        revision: record.revision,
        history,
    })
}

fn audit_from_record(record: AuditRecord) -> Result<AuditEntry, PublishError> {
    Ok(AuditEntry {
        seq: record.seq,
        action: record.action.parse().map_err(PublishError::CorruptRecord)?,
        old_status: record
            .old_status
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(PublishError::CorruptRecord)?,
        new_status: record.new_status.parse().map_err(PublishError::CorruptRecord)?,
        brand_slug: record.brand_slug,
        actor: record.actor,
        reason: record.reason,
        revision: record.revision,
        created_at: record.created_at,
    })
}

use larder_quality::GateFailure;
use larder_store::StoreError;
use thiserror::Error;

mod allowlist;
mod views;

pub use allowlist::{
    AllowlistAction, AllowlistService, AllowlistStatus, AuditEntry, BrandAllowlistEntry,
    TransitionRequest, plan_transition,
};
pub use views::{PublishedProduct, PublishedViews, ViewKind, ViewPublisher, project_views};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(
        "{} rejected for brand '{brand_slug}' (current status {}): {reason}{}",
        .action.as_str(),
        .current.map(AllowlistStatus::as_str).unwrap_or("none"),
        format_failing(.failing)
    )]
    TransitionRejected {
        brand_slug: String,
        action: AllowlistAction,
        current: Option<AllowlistStatus>,
        reason: String,
        failing: Vec<GateFailure>,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt allowlist record: {0}")]
    CorruptRecord(String),
}

fn format_failing(failing: &[GateFailure]) -> String {
    if failing.is_empty() {
        return String::new();
    }

    let parts = failing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    format!("; failing: {}", parts.join(", "))
}

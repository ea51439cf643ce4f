use std::collections::HashMap;

use larder_core::{AdapterError, RawRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod heuristics;
mod mapping;
mod values;

pub use heuristics::{classify_form, classify_life_stage};
pub use mapping::{FieldMapping, KcalField, MappedAdapter, PriceField};
pub use values::estimate_kcal_per_100g;

/// One untyped row from a source, as read from an input stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    pub source_type: String,
    pub source_id: String,
    pub row_ref: String,
    #[serde(default)]
    pub fields: Value,
}

/// Maps one source schema onto [`RawRecord`]. Implementations are pure: the
/// same row always yields the same record or the same error.
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> &str;
    fn adapt(&self, row: &SourceRow) -> Result<RawRecord, AdapterError>;
}

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Box<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn with_defaults() -> Self {
        Self::default()
            .register(MappedAdapter::new("manufacturer", FieldMapping::manufacturer()))
            .register(MappedAdapter::new("retailer", FieldMapping::retailer()))
            .register(MappedAdapter::new("legacy_sheet", FieldMapping::legacy_sheet()))
    }

    /// Registers or replaces the adapter for its source type.
    pub fn register(mut self, adapter: impl SourceAdapter + 'static) -> Self {
        self.adapters
            .insert(adapter.source_type().to_ascii_lowercase(), Box::new(adapter));
        self
    }

    pub fn source_types(&self) -> Vec<&str> {
        let mut types = self.adapters.keys().map(String::as_str).collect::<Vec<_>>();
        types.sort_unstable();
        types
    }

    pub fn adapt(&self, row: &SourceRow) -> Result<RawRecord, AdapterError> {
        let adapter = self
            .adapters
            .get(&row.source_type.trim().to_ascii_lowercase())
            .ok_or_else(|| {
                AdapterError::new(
                    &row.source_id,
                    &row.row_ref,
                    format!("no adapter registered for source type '{}'", row.source_type),
                )
            })?;
        adapter.adapt(row)
    }
}

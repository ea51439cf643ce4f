use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod text;

pub use text::{normalize_text, slugify, tokens};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd, Default)]
#[serde(rename_all = "snake_case")]
pub enum Form {
    Dry,
    Wet,
    Raw,
    FreezeDried,
    #[default]
    Unknown,
}

impl Form {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dry => "dry",
            Self::Wet => "wet",
            Self::Raw => "raw",
            Self::FreezeDried => "freeze_dried",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

impl std::str::FromStr for Form {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "dry" => Ok(Self::Dry),
            "wet" => Ok(Self::Wet),
            "raw" => Ok(Self::Raw),
            "freeze_dried" => Ok(Self::FreezeDried),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!(
                "invalid form '{other}', expected one of: dry, wet, raw, freeze_dried, unknown"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifeStage {
    Puppy,
    Adult,
    Senior,
    All,
    #[default]
    Unknown,
}

impl LifeStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Puppy => "puppy",
            Self::Adult => "adult",
            Self::Senior => "senior",
            Self::All => "all",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    /// Specific stage > `all` > unknown. Composite labels are stored as `all`.
    pub fn specificity(self) -> u8 {
        match self {
            Self::Puppy | Self::Adult | Self::Senior => 2,
            Self::All => 1,
            Self::Unknown => 0,
        }
    }
}

impl std::str::FromStr for LifeStage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "puppy" => Ok(Self::Puppy),
            "adult" => Ok(Self::Adult),
            "senior" => Ok(Self::Senior),
            "all" => Ok(Self::All),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!(
                "invalid life stage '{other}', expected one of: puppy, adult, senior, all, unknown"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum PriceBucket {
    Budget,
    Standard,
    Premium,
}

impl PriceBucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }
}

/// One row as emitted by a source adapter. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_id: String,
    pub brand_raw: String,
    pub product_name_raw: String,
    pub form: Form,
    pub life_stage: LifeStage,
    pub kcal_per_100g: Option<f64>,
    pub kcal_estimated: bool,
    pub protein_percent: Option<f64>,
    pub fat_percent: Option<f64>,
    pub fiber_percent: Option<f64>,
    pub ash_percent: Option<f64>,
    pub moisture_percent: Option<f64>,
    pub ingredients_tokens: Vec<String>,
    pub price_per_kg: Option<f64>,
    pub image_url: Option<String>,
    pub product_url: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd)]
pub enum EnergyClass {
    Unknown,
    Estimated,
    Measured,
}

/// Read access to the attributes that drive ranking and scoring, shared by raw
/// rows and merged products.
pub trait Attributes {
    fn form(&self) -> Form;
    fn life_stage(&self) -> LifeStage;
    fn kcal_per_100g(&self) -> Option<f64>;
    fn kcal_estimated(&self) -> bool;
    fn ingredients(&self) -> &[String];
    fn price_per_kg(&self) -> Option<f64>;
    fn macros(&self) -> [Option<f64>; 5];

    fn energy_class(&self) -> EnergyClass {
        match (self.kcal_per_100g(), self.kcal_estimated()) {
            (None, _) => EnergyClass::Unknown,
            (Some(_), true) => EnergyClass::Estimated,
            (Some(_), false) => EnergyClass::Measured,
        }
    }

    fn has_macros(&self) -> bool {
        let [protein, fat, ..] = self.macros();
        protein.is_some() && fat.is_some()
    }
}

impl Attributes for RawRecord {
    fn form(&self) -> Form {
        self.form
    }

    fn life_stage(&self) -> LifeStage {
        self.life_stage
    }

    fn kcal_per_100g(&self) -> Option<f64> {
        self.kcal_per_100g
    }

    fn kcal_estimated(&self) -> bool {
        self.kcal_estimated
    }

    fn ingredients(&self) -> &[String] {
        &self.ingredients_tokens
    }

    fn price_per_kg(&self) -> Option<f64> {
        self.price_per_kg
    }

    fn macros(&self) -> [Option<f64>; 5] {
        [
            self.protein_percent,
            self.fat_percent,
            self.fiber_percent,
            self.ash_percent,
            self.moisture_percent,
        ]
    }
}

/// `brand_slug|name_slug|form`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct ProductKey {
    pub brand_slug: String,
    pub name_slug: String,
    pub form: Form,
}

impl ProductKey {
    pub fn new(brand_slug: impl Into<String>, name_slug: impl Into<String>, form: Form) -> Self {
        Self {
            brand_slug: brand_slug.into(),
            name_slug: name_slug.into(),
            form,
        }
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.brand_slug, self.name_slug, self.form.as_str())
    }
}

impl std::str::FromStr for ProductKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.trim().split('|');
        let (Some(brand), Some(name), Some(form), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!(
                "invalid product key '{value}', expected brand_slug|name_slug|form"
            ));
        };
        if brand.is_empty() || name.is_empty() {
            return Err(format!("invalid product key '{value}', empty component"));
        }

        Ok(Self::new(brand, name, form.parse()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_id: String,
    pub updated_at: i64,
}

/// Merge result for one [`ProductKey`]. Every attribute holds the value of the
/// highest-ranked contribution that supplied one; `sources` lists every
/// contribution in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProduct {
    pub key: ProductKey,
    pub product_name: String,
    pub life_stage: LifeStage,
    pub kcal_per_100g: Option<f64>,
    pub kcal_estimated: bool,
    pub protein_percent: Option<f64>,
    pub fat_percent: Option<f64>,
    pub fiber_percent: Option<f64>,
    pub ash_percent: Option<f64>,
    pub moisture_percent: Option<f64>,
    pub ingredients_tokens: Vec<String>,
    pub price_per_kg: Option<f64>,
    pub price_bucket: Option<PriceBucket>,
    pub image_url: Option<String>,
    pub product_url: Option<String>,
    pub sources: Vec<SourceRef>,
    pub quality_score: f64,
    pub updated_at: i64,
}

impl CanonicalProduct {
    pub fn brand_slug(&self) -> &str {
        &self.key.brand_slug
    }

    pub fn name_slug(&self) -> &str {
        &self.key.name_slug
    }
}

impl Attributes for CanonicalProduct {
    fn form(&self) -> Form {
        self.key.form
    }

    fn life_stage(&self) -> LifeStage {
        self.life_stage
    }

    fn kcal_per_100g(&self) -> Option<f64> {
        self.kcal_per_100g
    }

    fn kcal_estimated(&self) -> bool {
        self.kcal_estimated
    }

    fn ingredients(&self) -> &[String] {
        &self.ingredients_tokens
    }

    fn price_per_kg(&self) -> Option<f64> {
        self.price_per_kg
    }

    fn macros(&self) -> [Option<f64>; 5] {
        [
            self.protein_percent,
            self.fat_percent,
            self.fiber_percent,
            self.ash_percent,
            self.moisture_percent,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("adapter error in source {source_id} at {row_ref}: {cause}")]
pub struct AdapterError {
    pub source_id: String,
    pub row_ref: String,
    pub cause: String,
}

impl AdapterError {
    pub fn new(
        source_id: impl Into<String>,
        row_ref: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            row_ref: row_ref.into(),
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyComputationError {
    #[error("record from {source_id} ({product_name_raw:?}) has no brand")]
    MissingBrand {
        source_id: String,
        product_name_raw: String,
    },
    #[error("record from {source_id} (brand {brand_slug}) has no product name left after brand cleanup")]
    MissingName {
        source_id: String,
        brand_slug: String,
    },
    #[error("record from {source_id} cannot be fingerprinted: {cause}")]
    Unencodable { source_id: String, cause: String },
}

impl KeyComputationError {
    pub fn source_id(&self) -> &str {
        match self {
            Self::MissingBrand { source_id, .. }
            | Self::MissingName { source_id, .. }
            | Self::Unencodable { source_id, .. } => source_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualKind {
    Adapter,
    KeyComputation,
}

impl ResidualKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Adapter => "adapter",
            Self::KeyComputation => "key_computation",
        }
    }
}

/// A record that did not make it into the catalog, with the reason why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Residual {
    pub kind: ResidualKind,
    pub source_id: String,
    pub row_ref: String,
    pub reason: String,
}

impl From<&AdapterError> for Residual {
    fn from(err: &AdapterError) -> Self {
        Self {
            kind: ResidualKind::Adapter,
            source_id: err.source_id.clone(),
            row_ref: err.row_ref.clone(),
            reason: err.cause.clone(),
        }
    }
}

pub fn record_fingerprint(record: &RawRecord) -> Result<String, serde_json::Error> {
    fingerprint_json(record)
}

pub fn product_fingerprint(product: &CanonicalProduct) -> Result<String, serde_json::Error> {
    fingerprint_json(product)
}

fn fingerprint_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    // Struct fields serialize in declaration order, so the encoding is stable.
    let mut hasher = blake3::Hasher::new();
    serde_json::to_writer(&mut hasher, value)?;
    Ok(hasher.finalize().to_hex().to_string())
}

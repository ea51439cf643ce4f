use larder_core::{AdapterError, Form, LifeStage, RawRecord, slugify};
use serde_json::Value;

use crate::heuristics::{classify_form, classify_life_stage};
use crate::values::{estimate_kcal_per_100g, parse_number, parse_text, parse_timestamp, parse_tokens};
use crate::{SourceAdapter, SourceRow};

/// Where a source keeps its energy value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KcalField {
    PerHundredGrams(&'static str),
    PerKilogram(&'static str),
}

/// Where a source keeps its price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceField {
    PerKilogram(&'static str),
    /// Pack price divided by pack weight in kilograms.
    Pack {
        price: &'static str,
        pack_kg: &'static str,
    },
}

/// Candidate keys per `RawRecord` field, tried in order. The first key that is
/// present wins, even when its value is unusable.
#[derive(Debug, Clone, Default)]
pub struct FieldMapping {
    pub brand: Vec<&'static str>,
    pub product_name: Vec<&'static str>,
    pub form: Vec<&'static str>,
    pub life_stage: Vec<&'static str>,
    /// Free text consulted for form and life stage when no structured field
    /// exists. The product name is always included.
    pub description: Vec<&'static str>,
    pub kcal: Vec<KcalField>,
    pub protein: Vec<&'static str>,
    pub fat: Vec<&'static str>,
    pub fiber: Vec<&'static str>,
    pub ash: Vec<&'static str>,
    pub moisture: Vec<&'static str>,
    pub ingredients: Vec<&'static str>,
    pub price: Vec<PriceField>,
    /// Conversion into the catalog currency.
    pub price_multiplier: f64,
    pub image_url: Vec<&'static str>,
    pub product_url: Vec<&'static str>,
    pub updated_at: Vec<&'static str>,
    pub estimate_kcal: bool,
}

impl FieldMapping {
    pub fn manufacturer() -> Self {
        Self {
            brand: vec!["brand", "brand_name"],
            product_name: vec!["product_name", "name", "title"],
            form: vec!["form", "food_type"],
            life_stage: vec!["life_stage", "lifestage"],
            description: vec!["description"],
            kcal: vec![
                KcalField::PerHundredGrams("kcal_per_100g"),
                KcalField::PerKilogram("kcal_per_kg"),
                KcalField::PerKilogram("metabolizable_energy"),
            ],
            protein: vec!["protein_percent", "protein"],
            fat: vec!["fat_percent", "fat"],
            fiber: vec!["fiber_percent", "fibre_percent", "fiber", "fibre"],
            ash: vec!["ash_percent", "ash"],
            moisture: vec!["moisture_percent", "moisture"],
            ingredients: vec!["ingredients_tokens", "ingredients"],
            price: vec![PriceField::PerKilogram("price_per_kg")],
            price_multiplier: 1.0,
            image_url: vec!["image_url", "image"],
            product_url: vec!["product_url", "url"],
            updated_at: vec!["updated_at", "scraped_at"],
            estimate_kcal: true,
        }
    }

    pub fn retailer() -> Self {
        Self {
            brand: vec!["brand", "manufacturer"],
            product_name: vec!["title", "product_name"],
            form: vec!["food_type", "category"],
            life_stage: vec!["age_group", "life_stage"],
            description: vec!["description", "summary"],
            kcal: vec![
                KcalField::PerHundredGrams("kcal_per_100g"),
                KcalField::PerKilogram("kcal_per_kg"),
            ],
            protein: vec!["crude_protein", "protein_percent"],
            fat: vec!["crude_fat", "fat_percent"],
            fiber: vec!["crude_fiber", "fiber_percent"],
            ash: vec!["crude_ash", "ash_percent"],
            moisture: vec!["moisture", "moisture_percent"],
            ingredients: vec!["ingredients_tokens"],
            price: vec![
                PriceField::PerKilogram("price_per_kg"),
                PriceField::Pack {
                    price: "price",
                    pack_kg: "pack_size_kg",
                },
            ],
            price_multiplier: 1.0,
            image_url: vec!["image_url"],
            product_url: vec!["url", "product_url"],
            updated_at: vec!["updated_at", "last_seen"],
            estimate_kcal: false,
        }
    }

    pub fn legacy_sheet() -> Self {
        Self {
            brand: vec!["Brand"],
            product_name: vec!["Product"],
            form: vec!["Type"],
            life_stage: vec!["Life Stage"],
            description: vec!["Notes"],
            kcal: vec![
                KcalField::PerHundredGrams("kcal/100g"),
                KcalField::PerKilogram("kcal/kg"),
            ],
            protein: vec!["Protein %"],
            fat: vec!["Fat %"],
            fiber: vec!["Fibre %"],
            ash: vec!["Ash %"],
            moisture: vec!["Moisture %"],
            ingredients: vec!["Ingredients"],
            price: vec![PriceField::PerKilogram("Price/kg")],
            price_multiplier: 1.0,
            image_url: Vec::new(),
            product_url: vec!["Link"],
            updated_at: vec!["Updated"],
            estimate_kcal: true,
        }
    }

    pub fn with_price_multiplier(mut self, multiplier: f64) -> Self {
        self.price_multiplier = multiplier;
        self
    }
}

/// A [`SourceAdapter`] driven entirely by a [`FieldMapping`].
#[derive(Debug, Clone)]
pub struct MappedAdapter {
    source_type: String,
    mapping: FieldMapping,
}

impl MappedAdapter {
    pub fn new(source_type: impl Into<String>, mapping: FieldMapping) -> Self {
        Self {
            source_type: source_type.into(),
            mapping,
        }
    }
}

impl SourceAdapter for MappedAdapter {
    fn source_type(&self) -> &str {
        &self.source_type
    }

    fn adapt(&self, row: &SourceRow) -> Result<RawRecord, AdapterError> {
        let fail = |cause: String| AdapterError::new(&row.source_id, &row.row_ref, cause);
        let Value::Object(_) = &row.fields else {
            return Err(fail("row fields must be a JSON object".to_owned()));
        };
        let fields = Fields(&row.fields);
        let mapping = &self.mapping;

        let brand_raw = fields.text(&mapping.brand).unwrap_or_default();
        let product_name_raw = fields.text(&mapping.product_name).unwrap_or_default();
        let free_text = std::iter::once(product_name_raw.clone())
            .chain(mapping.description.iter().filter_map(|key| fields.get(key).and_then(parse_text)))
            .collect::<Vec<_>>()
            .join(" ");

        let form = match fields.first(&mapping.form) {
            Some(value) => structured_form(value),
            None => classify_form(&free_text),
        };
        let life_stage = match fields.first(&mapping.life_stage) {
            Some(value) => structured_life_stage(value),
            None => classify_life_stage(&free_text),
        };

        let percent = |keys: &[&'static str], label: &str| -> Result<Option<f64>, AdapterError> {
            let value = fields.number(keys).map_err(|cause| fail(format!("{label}: {cause}")))?;
            match value {
                Some(value) if !(0.0..=100.0).contains(&value) => {
                    Err(fail(format!("{label}: {value} is outside 0-100")))
                }
                other => Ok(other),
            }
        };
        let protein_percent = percent(&mapping.protein, "protein")?;
        let fat_percent = percent(&mapping.fat, "fat")?;
        let fiber_percent = percent(&mapping.fiber, "fiber")?;
        let ash_percent = percent(&mapping.ash, "ash")?;
        let moisture_percent = percent(&mapping.moisture, "moisture")?;

        let mut kcal_per_100g = fields.kcal(&mapping.kcal).map_err(fail)?;
        let mut kcal_estimated = false;
        if kcal_per_100g.is_none() && mapping.estimate_kcal {
            kcal_per_100g = estimate_kcal_per_100g(
                protein_percent,
                fat_percent,
                fiber_percent,
                ash_percent,
                moisture_percent,
            );
            kcal_estimated = kcal_per_100g.is_some();
        }

        let ingredients_tokens = match fields.first(&mapping.ingredients) {
            Some(value) => parse_tokens(value).map_err(fail)?,
            None => Vec::new(),
        };

        let price_per_kg = fields
            .price(&mapping.price)
            .map_err(fail)?
            .map(|price| price * mapping.price_multiplier);

        let updated_at = match fields.first(&mapping.updated_at) {
            Some(value) => parse_timestamp(value).map_err(|cause| fail(format!("updated_at: {cause}")))?,
            None => return Err(fail("updated_at is missing".to_owned())),
        };

        Ok(RawRecord {
            source_id: row.source_id.clone(),
            brand_raw,
            product_name_raw,
            form,
            life_stage,
            kcal_per_100g,
            kcal_estimated,
            protein_percent,
            fat_percent,
            fiber_percent,
            ash_percent,
            moisture_percent,
            ingredients_tokens,
            price_per_kg,
            image_url: fields.text(&mapping.image_url),
            product_url: fields.text(&mapping.product_url),
            updated_at,
        })
    }
}

/// Structured values are matched against the enum spelling first, then the
/// controlled vocabulary. Anything else stays unknown.
fn structured_form(value: &Value) -> Form {
    let Some(text) = parse_text(value) else {
        return Form::Unknown;
    };
    slugify(&text)
        .parse::<Form>()
        .unwrap_or_else(|_| classify_form(&text))
}

fn structured_life_stage(value: &Value) -> LifeStage {
    let Some(text) = parse_text(value) else {
        return LifeStage::Unknown;
    };
    slugify(&text)
        .parse::<LifeStage>()
        .unwrap_or_else(|_| classify_life_stage(&text))
}

struct Fields<'a>(&'a Value);

impl<'a> Fields<'a> {
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.0.get(key)
    }

    fn first(&self, keys: &[&'static str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|key| self.get(key))
            .find(|value| !value.is_null())
    }

    fn text(&self, keys: &[&'static str]) -> Option<String> {
        self.first(keys).and_then(parse_text)
    }

    fn number(&self, keys: &[&'static str]) -> Result<Option<f64>, String> {
        match self.first(keys) {
            Some(value) => parse_number(value),
            None => Ok(None),
        }
    }

    fn kcal(&self, candidates: &[KcalField]) -> Result<Option<f64>, String> {
        for candidate in candidates {
            let (key, divisor) = match *candidate {
                KcalField::PerHundredGrams(key) => (key, 1.0),
                KcalField::PerKilogram(key) => (key, 10.0),
            };
            let Some(value) = self.get(key).filter(|value| !value.is_null()) else {
                continue;
            };
            return match parse_number(value).map_err(|cause| format!("{key}: {cause}"))? {
                Some(kcal) if kcal < 0.0 => Err(format!("{key}: negative energy value {kcal}")),
                parsed => Ok(parsed.map(|kcal| kcal / divisor)),
            };
        }
        Ok(None)
    }

    fn price(&self, candidates: &[PriceField]) -> Result<Option<f64>, String> {
        for candidate in candidates {
            let per_kg = match *candidate {
                PriceField::PerKilogram(key) => {
                    let Some(value) = self.get(key).filter(|value| !value.is_null()) else {
                        continue;
                    };
                    parse_number(value).map_err(|cause| format!("{key}: {cause}"))?
                }
                PriceField::Pack { price, pack_kg } => {
                    let (Some(price_value), Some(pack_value)) = (
                        self.get(price).filter(|value| !value.is_null()),
                        self.get(pack_kg).filter(|value| !value.is_null()),
                    ) else {
                        continue;
                    };
                    let amount = parse_number(price_value).map_err(|cause| format!("{price}: {cause}"))?;
                    let weight = parse_number(pack_value).map_err(|cause| format!("{pack_kg}: {cause}"))?;
                    match (amount, weight) {
                        (Some(_), Some(weight)) if weight <= 0.0 => {
                            return Err(format!("{pack_kg}: pack weight must be positive"));
                        }
                        (Some(amount), Some(weight)) => Some(amount / weight),
                        _ => None,
                    }
                }
            };

            return match per_kg {
                Some(value) if value <= 0.0 => Err(format!("price {value} must be positive")),
                other => Ok(other.map(|value| (value * 100.0).round() / 100.0)),
            };
        }
        Ok(None)
    }
}

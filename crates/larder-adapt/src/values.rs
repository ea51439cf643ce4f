use chrono::{DateTime, NaiveDate};
use serde_json::Value;

/// Modified Atwater factors, kcal per gram.
const PROTEIN_KCAL: f64 = 3.5;
const FAT_KCAL: f64 = 8.5;
const NFE_KCAL: f64 = 3.5;

/// Accepts JSON numbers and numeric strings such as `"25 %"` or `"3,5"`.
/// Blank strings and `null` read as absent.
pub fn parse_number(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => number
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("number {number} is out of range")),
        Value::String(text) => {
            let cleaned = text
                .trim()
                .trim_end_matches('%')
                .trim()
                .replace(',', ".");
            if cleaned.is_empty() {
                return Ok(None);
            }
            cleaned
                .parse::<f64>()
                .map(Some)
                .map_err(|_| format!("'{text}' is not a number"))
        }
        other => Err(format!("expected a number, found {other}")),
    }
}

pub fn parse_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Ingredient lists arrive already tokenized; a plain string is rejected
/// rather than split here.
pub fn parse_tokens(value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(token) if token.trim().is_empty() => None,
                Value::String(token) => Some(Ok(token.trim().to_owned())),
                other => Some(Err(format!("ingredient token {other} is not a string"))),
            })
            .collect(),
        other => Err(format!("ingredients must be a token array, found {other}")),
    }
}

/// Unix milliseconds, an RFC 3339 timestamp, or a bare `YYYY-MM-DD` date
/// taken as midnight UTC.
pub fn parse_timestamp(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| format!("timestamp {number} is not an integer")),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Ok(parsed.timestamp_millis());
            }
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|midnight| midnight.and_utc().timestamp_millis())
                .ok_or_else(|| format!("'{text}' is not a timestamp"))
        }
        other => Err(format!("expected a timestamp, found {other}")),
    }
}

/// Estimated kcal per 100 g from guaranteed analysis. Needs protein and fat;
/// missing fiber, ash or moisture count as zero.
pub fn estimate_kcal_per_100g(
    protein: Option<f64>,
    fat: Option<f64>,
    fiber: Option<f64>,
    ash: Option<f64>,
    moisture: Option<f64>,
) -> Option<f64> {
    let (protein, fat) = (protein?, fat?);
    let rest = fiber.unwrap_or(0.0) + ash.unwrap_or(0.0) + moisture.unwrap_or(0.0);
    let nfe = (100.0 - protein - fat - rest).max(0.0);
    let kcal = protein * PROTEIN_KCAL + fat * FAT_KCAL + nfe * NFE_KCAL;
    Some((kcal * 10.0).round() / 10.0)
}

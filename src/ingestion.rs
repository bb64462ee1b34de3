use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

const REQUIRED_FIELDS: [&str; 3] = ["title", "destination", "duration"];
const ITINERARY_FIELD: &str = "processed_itinerary";

/// One source tour, kept as the raw object so generation sees every field.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTour {
    fields: Map<String, Value>,
}

impl RawTour {
    pub fn title(&self) -> Option<&str> {
        self.text("title")
    }

    pub fn destination(&self) -> Option<&str> {
        self.text("destination")
    }

    pub fn duration(&self) -> Option<&str> {
        self.text("duration")
    }

    /// Destination when present, else title. Used to spot tours already processed.
    pub fn processing_key(&self) -> Option<&str> {
        self.destination().or_else(|| self.title())
    }

    pub fn itinerary_days(&self) -> usize {
        self.fields
            .get(ITINERARY_FIELD)
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn price_value(&self) -> Option<f64> {
        match self.fields.get("price_value")? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// First run of digits in the duration label, e.g. "5N4Đ" gives 5.
    pub fn duration_days(&self) -> Option<u32> {
        let duration = self.duration()?;
        let digits: String = duration
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TourBatch {
    pub tours: Vec<RawTour>,
    pub rejected: usize,
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Returns the first required field that is missing or empty.
pub fn missing_field(value: &Value) -> Option<&'static str> {
    let Some(object) = value.as_object() else {
        return Some("object");
    };
    for field in REQUIRED_FIELDS {
        if !object.get(field).map(is_truthy).unwrap_or(false) {
            return Some(field);
        }
    }
    match object.get(ITINERARY_FIELD).and_then(Value::as_array) {
        Some(days) if !days.is_empty() => None,
        _ => Some(ITINERARY_FIELD),
    }
}

pub fn validate_tour(value: Value) -> Option<RawTour> {
    if let Some(field) = missing_field(&value) {
        let title = value.get("title").and_then(Value::as_str).unwrap_or("Unknown");
        warn!(field, title, "tour is missing a required field");
        return None;
    }
    match value {
        Value::Object(fields) => Some(RawTour { fields }),
        _ => None,
    }
}

/// Accepts either an array of tours or a single tour object.
pub fn parse_tours(bytes: &[u8]) -> AppResult<TourBatch> {
    let document: Value = serde_json::from_slice(bytes)?;
    let candidates = match document {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(AppError::InvalidInput(format!(
                "expected a tour object or an array of tours, found {}",
                json_kind(&other)
            )))
        }
    };

    let total = candidates.len();
    let tours: Vec<RawTour> = candidates.into_iter().filter_map(validate_tour).collect();
    let batch = TourBatch {
        rejected: total - tours.len(),
        tours,
    };
    debug!(valid = batch.tours.len(), rejected = batch.rejected, "tour file parsed");
    Ok(batch)
}

pub fn load_tours(path: &Path) -> AppResult<TourBatch> {
    let bytes = fs::read(path)?;
    parse_tours(&bytes)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DurationRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TourStats {
    pub total: usize,
    pub destinations: Vec<String>,
    pub total_days: usize,
    pub price_range: Option<PriceRange>,
    pub duration_range: Option<DurationRange>,
}

impl TourStats {
    /// Prices of zero or below count as unknown.
    pub fn compute(tours: &[RawTour]) -> Self {
        let destinations: BTreeSet<String> = tours
            .iter()
            .filter_map(|tour| tour.destination().map(str::to_string))
            .collect();

        let prices: Vec<f64> = tours
            .iter()
            .filter_map(RawTour::price_value)
            .filter(|price| *price > 0.0)
            .collect();
        let price_range = (!prices.is_empty()).then(|| PriceRange {
            min: prices.iter().copied().fold(f64::INFINITY, f64::min),
            max: prices.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg: prices.iter().sum::<f64>() / prices.len() as f64,
        });

        let durations: Vec<u32> = tours.iter().filter_map(RawTour::duration_days).collect();
        let duration_range = match (durations.iter().min(), durations.iter().max()) {
            (Some(min), Some(max)) => Some(DurationRange {
                min: *min,
                max: *max,
            }),
            _ => None,
        };

        Self {
            total: tours.len(),
            destinations: destinations.into_iter().collect(),
            total_days: tours.iter().map(RawTour::itinerary_days).sum(),
            price_range,
            duration_range,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::providers::PlaceResult;

pub const GENERATOR_VERSION: &str = "1.5.1";

/// A place inside a time block. Fields the model emits that are not listed
/// here survive in `extra`, so enriched output keeps the generated shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TourPlace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub lat: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_maps_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure_time: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub visit_duration_hours: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub avg_price_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_to_next: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personalization_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TourPlace {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// The lookup query for this place, if it has a usable name.
    pub fn query(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }

    /// Overlays a resolved result without discarding anything the result lacks.
    pub fn merged_with(&self, result: &PlaceResult) -> TourPlace {
        let mut merged = self.clone();

        merged.place_id = result
            .place_id
            .clone()
            .or_else(|| Some(result.name.clone()).filter(|name| !name.is_empty()))
            .or_else(|| self.place_id.clone());
        merged.google_maps_uri = result
            .google_maps_uri
            .clone()
            .or_else(|| self.google_maps_uri.clone());
        if let Some(lat) = result.lat.filter(|value| *value != 0.0) {
            merged.lat = Some(lat);
        }
        if let Some(lng) = result.lng.filter(|value| *value != 0.0) {
            merged.lng = Some(lng);
        }
        merged.provider = Some(result.source.as_tag().to_string());
        merged
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeBlock {
    #[serde(default)]
    pub block_type: String,
    #[serde(default)]
    pub time_range: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub places: Vec<TourPlace>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One day of the generated plan. `summary` is kept exactly as generated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyItinerary {
    #[serde(
        default,
        deserialize_with = "lenient_day_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub day_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_title_en: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub blocks: Vec<TimeBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DailyItinerary {
    pub fn places(&self) -> impl Iterator<Item = &TourPlace> {
        self.blocks.iter().flat_map(|block| block.places.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalizedTour {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub daily_itineraries: Vec<DailyItinerary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub engine: String,
}

impl GenerationMetadata {
    pub fn now(engine: impl Into<String>) -> Self {
        Self {
            version: GENERATOR_VERSION.to_string(),
            generated_at: Utc::now(),
            engine: engine.into(),
        }
    }
}

/// The enriched document produced for one tour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedData {
    pub metadata: GenerationMetadata,
    pub user_schema: Value,
    pub sample_user_profile: Value,
    pub personalized_tour: PersonalizedTour,
    #[serde(default)]
    pub places: Vec<PlaceResult>,
}

impl GeneratedData {
    pub fn destination(&self) -> Option<&str> {
        self.personalized_tour
            .destination
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Numbers arrive as JSON numbers or numeric strings; anything else is dropped.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }))
}

fn lenient_day_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_number(deserializer)?
        .filter(|value| value.is_finite() && *value >= 0.0)
        .map(|value| value.round() as u32))
}

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};

use crate::config::AppConfig;
use crate::errors::AppResult;

pub mod gemini_maps;
pub mod google_places;
pub mod nominatim;
pub mod opencage;

pub use gemini_maps::GeminiMapsClient;
pub use google_places::GooglePlacesClient;
pub use nominatim::NominatimClient;
pub use opencage::OpenCageClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaceSource {
    #[serde(rename = "osm")]
    Osm,
    #[serde(rename = "opencage")]
    OpenCage,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "gemini-maps")]
    GeminiMaps,
}

impl PlaceSource {
    pub fn as_tag(&self) -> &'static str {
        match self {
            PlaceSource::Osm => "osm",
            PlaceSource::OpenCage => "opencage",
            PlaceSource::Google => "google",
            PlaceSource::GeminiMaps => "gemini-maps",
        }
    }
}

/// A place resolved by one provider. Coordinates are `None` when the provider
/// could not supply them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceResult {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ratings_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    pub source: PlaceSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_maps_uri: Option<String>,
}

impl PlaceResult {
    pub fn named(name: impl Into<String>, source: PlaceSource) -> Self {
        Self {
            name: name.into(),
            formatted_address: None,
            lat: None,
            lng: None,
            rating: None,
            user_ratings_total: None,
            place_id: None,
            types: Vec::new(),
            source,
            google_maps_uri: None,
        }
    }

    pub fn at(mut self, lat: f64, lng: f64) -> Self {
        self.lat = Some(lat);
        self.lng = Some(lng);
        self
    }
}

/// Result of resolving one query. Provider failures never surface as errors;
/// they collapse into [`Resolution::NotFound`] so callers can fall through.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(PlaceResult),
    NotFound,
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }

    pub fn into_option(self) -> Option<PlaceResult> {
        match self {
            Resolution::Found(result) => Some(result),
            Resolution::NotFound => None,
        }
    }
}

impl From<Option<PlaceResult>> for Resolution {
    fn from(value: Option<PlaceResult>) -> Self {
        value.map(Resolution::Found).unwrap_or(Resolution::NotFound)
    }
}

#[async_trait]
pub trait PlaceLookup: Send + Sync {
    fn source(&self) -> PlaceSource;

    /// Waits until the provider may send another request. Callers that
    /// time `lookup` await this first so queueing is not charged to the call.
    async fn ready(&self) {}

    /// Sends one request. Does not pace itself; see [`PlaceLookup::ready`].
    async fn lookup(&self, query: &str) -> Resolution;

    async fn paced_lookup(&self, query: &str) -> Resolution {
        self.ready().await;
        self.lookup(query).await
    }
}

/// Lookup that can use a free-text location hint, such as the tour
/// destination, to disambiguate the query.
#[async_trait]
pub trait ContextualLookup: Send + Sync {
    async fn lookup_in_context(&self, query: &str, context: Option<&str>) -> Resolution;
}

pub(crate) fn http_client(config: &AppConfig) -> AppResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_millis(config.lookup_timeout_ms))
        .build()?;
    Ok(client)
}

/// Text before the first comma of a full address.
pub(crate) fn leading_segment(address: &str) -> String {
    address
        .split(',')
        .next()
        .map(|part| part.trim().to_string())
        .unwrap_or_default()
}

pub(crate) struct RateLimiter {
    min_interval: Duration,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    pub(crate) fn new(qps: u32) -> Self {
        Self {
            min_interval: Duration::from_millis(Self::interval_ms(qps)),
            last_tick: AsyncMutex::new(None),
        }
    }

    fn interval_ms(qps: u32) -> u64 {
        let safe_qps = qps.max(1);
        (1000_f64 / safe_qps as f64).ceil() as u64
    }

    pub(crate) async fn wait(&self) {
        let interval = self.min_interval;
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}

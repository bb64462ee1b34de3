use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{http_client, PlaceLookup, PlaceResult, PlaceSource, Resolution};
use crate::config::AppConfig;
use crate::credentials::{CredentialPool, KeyAttempt, ProviderCredential};
use crate::errors::AppResult;

/// Google Maps text search proxied through RapidAPI. Richest answer but the
/// tightest quota, so it runs last.
pub struct GooglePlacesClient {
    http: reqwest::Client,
    endpoint: String,
    language: String,
    pool: CredentialPool,
}

#[derive(Debug, Deserialize)]
struct TextSearchResponse {
    #[serde(default)]
    results: Vec<TextSearchHit>,
}

#[derive(Debug, Deserialize)]
struct TextSearchHit {
    name: String,
    formatted_address: Option<String>,
    geometry: Option<HitGeometry>,
    rating: Option<f64>,
    user_ratings_total: Option<u64>,
    place_id: Option<String>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HitGeometry {
    location: HitLocation,
}

#[derive(Debug, Deserialize)]
struct HitLocation {
    lat: f64,
    lng: f64,
}

impl GooglePlacesClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        language: impl Into<String>,
        pool: CredentialPool,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            language: language.into(),
            pool,
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Ok(Self::new(
            http_client(config)?,
            config.places_endpoint.clone(),
            config.places_language.clone(),
            CredentialPool::new("google_places", config.rapidapi_keys.clone()),
        ))
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    async fn attempt(&self, query: &str, credential: ProviderCredential) -> KeyAttempt {
        let mut request = self
            .http
            .get(&self.endpoint)
            .query(&[("query", query), ("language", self.language.as_str())])
            .header("x-rapidapi-key", credential.key().expose_secret());
        if let Some(host) = credential.host() {
            request = request.header("x-rapidapi-host", host);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(?err, query, "places request failed");
                return KeyAttempt::Rejected;
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::PAYMENT_REQUIRED {
            debug!(%status, "places key over quota");
            return KeyAttempt::Rejected;
        }
        if !status.is_success() {
            warn!(%status, query, "places returned an error status");
            return KeyAttempt::Rejected;
        }

        let parsed: TextSearchResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(?err, query, "places response could not be decoded");
                return KeyAttempt::Rejected;
            }
        };

        let Some(hit) = parsed.results.into_iter().next() else {
            return KeyAttempt::Empty;
        };

        let mut result = PlaceResult {
            formatted_address: hit.formatted_address,
            rating: hit.rating,
            user_ratings_total: hit.user_ratings_total,
            place_id: hit.place_id,
            types: hit.types,
            ..PlaceResult::named(hit.name, PlaceSource::Google)
        };
        if let Some(geometry) = hit.geometry {
            result = result.at(geometry.location.lat, geometry.location.lng);
        }
        KeyAttempt::Found(result)
    }
}

#[async_trait]
impl PlaceLookup for GooglePlacesClient {
    fn source(&self) -> PlaceSource {
        PlaceSource::Google
    }

    async fn lookup(&self, query: &str) -> Resolution {
        self.pool
            .try_each(|credential| self.attempt(query, credential))
            .await
    }
}

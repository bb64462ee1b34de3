use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{http_client, leading_segment, PlaceLookup, PlaceResult, PlaceSource, Resolution};
use crate::config::AppConfig;
use crate::credentials::{CredentialPool, KeyAttempt, ProviderCredential};
use crate::errors::AppResult;

/// OpenCage forward geocoder. Keyed; quota failures rotate to the next key.
pub struct OpenCageClient {
    http: reqwest::Client,
    endpoint: String,
    pool: CredentialPool,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeHit>,
}

#[derive(Debug, Deserialize)]
struct GeocodeHit {
    formatted: String,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    lat: f64,
    lng: f64,
}

impl OpenCageClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, pool: CredentialPool) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            pool,
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Ok(Self::new(
            http_client(config)?,
            config.opencage_endpoint.clone(),
            CredentialPool::new("opencage", config.opencage_api_keys.clone()),
        ))
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    async fn attempt(&self, query: &str, credential: ProviderCredential) -> KeyAttempt {
        let sent = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("key", credential.key().expose_secret()),
                ("limit", "1"),
                ("no_annotations", "1"),
            ])
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                warn!(?err, query, "opencage request failed");
                return KeyAttempt::Rejected;
            }
        };

        let status = response.status();
        if status == StatusCode::PAYMENT_REQUIRED || status == StatusCode::TOO_MANY_REQUESTS {
            debug!(%status, "opencage key over quota");
            return KeyAttempt::Rejected;
        }
        if !status.is_success() {
            warn!(%status, query, "opencage returned an error status");
            return KeyAttempt::Rejected;
        }

        let parsed: GeocodeResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(?err, query, "opencage response could not be decoded");
                return KeyAttempt::Rejected;
            }
        };

        match parsed.results.into_iter().next() {
            Some(hit) => KeyAttempt::Found(PlaceResult {
                name: leading_segment(&hit.formatted),
                formatted_address: Some(hit.formatted),
                types: vec![PlaceSource::OpenCage.as_tag().to_string()],
                ..PlaceResult::named("", PlaceSource::OpenCage).at(hit.geometry.lat, hit.geometry.lng)
            }),
            None => KeyAttempt::Empty,
        }
    }
}

#[async_trait]
impl PlaceLookup for OpenCageClient {
    fn source(&self) -> PlaceSource {
        PlaceSource::OpenCage
    }

    async fn lookup(&self, query: &str) -> Resolution {
        self.pool
            .try_each(|credential| self.attempt(query, credential))
            .await
    }
}

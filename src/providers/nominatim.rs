use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{http_client, leading_segment, PlaceLookup, PlaceResult, PlaceSource, RateLimiter, Resolution};
use crate::config::AppConfig;
use crate::errors::AppResult;

/// OpenStreetMap Nominatim search. Free and keyless, so it heads the chain.
pub struct NominatimClient {
    http: reqwest::Client,
    endpoint: String,
    rate_limiter: RateLimiter,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    display_name: String,
    lat: String,
    lon: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    class: Option<String>,
}

impl NominatimClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, qps: u32) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            rate_limiter: RateLimiter::new(qps),
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Ok(Self::new(
            http_client(config)?,
            config.nominatim_endpoint.clone(),
            config.nominatim_rate_limit_qps,
        ))
    }

    async fn search(&self, query: &str) -> AppResult<Option<PlaceResult>> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("addressdetails", "1"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let hits: Vec<SearchHit> = response.json().await?;
        let Some(hit) = hits.into_iter().next() else {
            return Ok(None);
        };

        let (Ok(lat), Ok(lng)) = (hit.lat.trim().parse::<f64>(), hit.lon.trim().parse::<f64>())
        else {
            debug!(query, "nominatim hit carried unparsable coordinates");
            return Ok(None);
        };

        let mut types: Vec<String> = [hit.kind, hit.class].into_iter().flatten().collect();
        types.push(PlaceSource::Osm.as_tag().to_string());

        Ok(Some(PlaceResult {
            name: leading_segment(&hit.display_name),
            formatted_address: Some(hit.display_name),
            types,
            ..PlaceResult::named("", PlaceSource::Osm).at(lat, lng)
        }))
    }
}

#[async_trait]
impl PlaceLookup for NominatimClient {
    fn source(&self) -> PlaceSource {
        PlaceSource::Osm
    }

    async fn ready(&self) {
        self.rate_limiter.wait().await;
    }

    async fn lookup(&self, query: &str) -> Resolution {
        match self.search(query).await {
            Ok(result) => result.into(),
            Err(err) => {
                warn!(?err, query, "nominatim lookup failed");
                Resolution::NotFound
            }
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::gemini::GeminiClient;
use crate::providers::{
    http_client, ContextualLookup, GeminiMapsClient, GooglePlacesClient, NominatimClient,
    OpenCageClient, PlaceLookup, Resolution,
};

/// Ordered provider chain with an optional grounded lookup in front of it.
#[derive(Clone)]
pub struct PlaceResolver {
    chain: Vec<Arc<dyn PlaceLookup>>,
    grounded: Option<Arc<dyn ContextualLookup>>,
    call_timeout: Duration,
}

impl PlaceResolver {
    pub fn new(chain: Vec<Arc<dyn PlaceLookup>>, call_timeout: Duration) -> Self {
        Self {
            chain,
            grounded: None,
            call_timeout,
        }
    }

    pub fn with_grounding(mut self, grounded: Arc<dyn ContextualLookup>) -> Self {
        self.grounded = Some(grounded);
        self
    }

    /// Nominatim, then OpenCage, then Google Places; Gemini grounding in front
    /// when a key is configured and grounding is enabled.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let chain: Vec<Arc<dyn PlaceLookup>> = vec![
            Arc::new(NominatimClient::from_config(config)?),
            Arc::new(OpenCageClient::from_config(config)?),
            Arc::new(GooglePlacesClient::from_config(config)?),
        ];
        let resolver = Self::new(chain, Duration::from_millis(config.lookup_timeout_ms));

        match (&config.gemini_api_key, config.grounding_enabled) {
            (Some(key), true) => {
                let client =
                    GeminiClient::new(http_client(config)?, &config.gemini_endpoint, key.clone());
                let grounded = GeminiMapsClient::new(client, &config.grounding_model);
                Ok(resolver.with_grounding(Arc::new(grounded)))
            }
            _ => Ok(resolver),
        }
    }

    /// First provider in priority order that answers wins. Providers are tried
    /// one after another, never raced. The timeout starts once the provider
    /// is ready to send.
    pub async fn resolve(&self, query: &str) -> Resolution {
        if query.trim().is_empty() {
            return Resolution::NotFound;
        }

        for provider in &self.chain {
            let source = provider.source();
            provider.ready().await;
            match timeout(self.call_timeout, provider.lookup(query)).await {
                Ok(Resolution::Found(mut result)) => {
                    result.source = source;
                    debug!(query, source = source.as_tag(), "place resolved");
                    return Resolution::Found(result);
                }
                Ok(Resolution::NotFound) => {
                    debug!(query, source = source.as_tag(), "provider had no answer; falling through");
                }
                Err(_) => {
                    warn!(
                        query,
                        source = source.as_tag(),
                        timeout_ms = self.call_timeout.as_millis() as u64,
                        "provider timed out; falling through"
                    );
                }
            }
        }

        debug!(query, "no provider resolved the query");
        Resolution::NotFound
    }

    /// Grounded lookup using `context` first; the generic chain only runs when
    /// grounding is unavailable or has no answer.
    pub async fn resolve_in_context(&self, query: &str, context: Option<&str>) -> Resolution {
        if query.trim().is_empty() {
            return Resolution::NotFound;
        }

        if let Some(grounded) = &self.grounded {
            match timeout(self.call_timeout, grounded.lookup_in_context(query, context)).await {
                Ok(Resolution::Found(result)) => return Resolution::Found(result),
                Ok(Resolution::NotFound) => {
                    debug!(query, "grounded lookup had no answer; using provider chain");
                }
                Err(_) => {
                    warn!(query, "grounded lookup timed out; using provider chain");
                }
            }
        }

        self.resolve(query).await
    }
}

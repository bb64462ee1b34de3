use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::{ContextualLookup, PlaceResult, PlaceSource, Resolution};
use crate::gemini::{GeminiClient, GenerateContentResponse};

/// Asks Gemini to ground the query with its Google Maps tool. The answer
/// carries a map link and title but no reliable coordinates.
pub struct GeminiMapsClient {
    client: GeminiClient,
    model: String,
}

impl GeminiMapsClient {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn prompt(query: &str, context: Option<&str>) -> String {
        let near = context
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| format!(" located in or near {value}"))
            .unwrap_or_default();
        format!(
            "Find the official Google Maps information for the place: \"{query}\"{near}. \
             Please provide the exact name, full address, and coordinates if possible."
        )
    }
}

pub(crate) fn result_from_grounding(
    query: &str,
    response: &GenerateContentResponse,
) -> Option<PlaceResult> {
    let chunk = response.first_maps_chunk()?;
    let name = chunk
        .title
        .clone()
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| query.to_string());
    let formatted_address = response
        .text()
        .and_then(|text| text.lines().next().map(|line| line.trim().to_string()))
        .filter(|line| !line.is_empty())
        .or_else(|| chunk.title.clone());

    Some(PlaceResult {
        formatted_address,
        place_id: chunk.place_id.clone(),
        google_maps_uri: chunk.uri.clone(),
        ..PlaceResult::named(name, PlaceSource::GeminiMaps)
    })
}

#[async_trait]
impl ContextualLookup for GeminiMapsClient {
    async fn lookup_in_context(&self, query: &str, context: Option<&str>) -> Resolution {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": Self::prompt(query, context) }] }],
            "tools": [{ "googleMaps": {} }],
        });

        match self.client.generate_content(&self.model, &body).await {
            Ok(response) => {
                let result = result_from_grounding(query, &response);
                if result.is_none() {
                    debug!(query, "grounding returned no maps chunk");
                }
                result.into()
            }
            Err(err) => {
                warn!(?err, query, "maps grounding failed");
                Resolution::NotFound
            }
        }
    }
}

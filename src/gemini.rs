//! Thin client for the Gemini `generateContent` endpoint, shared by tour
//! generation and maps-grounded place lookup.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::errors::AppResult;

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub async fn generate_content(
        &self,
        model: &str,
        body: &Value,
    ) -> AppResult<GenerateContentResponse> {
        let url = format!("{}/models/{model}:generateContent", self.endpoint);
        trace!(model, "calling generateContent");
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
    #[serde(rename = "groundingMetadata")]
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Part {
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroundingMetadata {
    #[serde(rename = "groundingChunks", default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroundingChunk {
    pub maps: Option<MapsChunk>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct MapsChunk {
    pub uri: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "placeId")]
    pub place_id: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, if any.
    pub fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|part| part.text.as_deref()).collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn first_maps_chunk(&self) -> Option<&MapsChunk> {
        self.candidates
            .first()?
            .grounding_metadata
            .as_ref()?
            .grounding_chunks
            .iter()
            .find_map(|chunk| chunk.maps.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_text_and_first_maps_chunk() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Temple of Heaven\n" }, { "text": "Beijing" }] },
                "groundingMetadata": {
                    "groundingChunks": [
                        { "web": { "uri": "https://example.com" } },
                        { "maps": { "uri": "https://maps.google.com/?cid=1", "title": "Temple of Heaven" } }
                    ]
                }
            }]
        }))
        .unwrap();

        assert_eq!(response.text().unwrap(), "Temple of Heaven\nBeijing");
        let chunk = response.first_maps_chunk().unwrap();
        assert_eq!(chunk.title.as_deref(), Some("Temple of Heaven"));
    }

    #[test]
    fn tolerates_empty_responses() {
        let response: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.text().is_none());
        assert!(response.first_maps_chunk().is_none());
    }
}

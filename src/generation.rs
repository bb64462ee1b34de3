use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::gemini::GeminiClient;
use crate::model::{GeneratedData, GenerationMetadata, PersonalizedTour};

const GENERATION_TIMEOUT: Duration = Duration::from_secs(180);
const DEFAULT_ENGINE: &str = "Gemini-3-Flash";

/// Turns one raw tour into a structured, personalized itinerary.
#[async_trait]
pub trait TourGenerator: Send + Sync {
    async fn generate(&self, raw_tour: &Value, prior_schema: Option<&Value>)
        -> AppResult<GeneratedData>;
}

pub struct GeminiTourGenerator {
    client: GeminiClient,
    model: String,
}

impl GeminiTourGenerator {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let key = config.gemini_api_key.clone().ok_or_else(|| {
            AppError::Config("GEMINI_API_KEY (or API_KEY) must be set to generate tours".into())
        })?;
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(GENERATION_TIMEOUT)
            .build()?;
        Ok(Self::new(
            GeminiClient::new(http, &config.gemini_endpoint, key),
            &config.generation_model,
        ))
    }

    fn prompt(raw_tour: &Value) -> String {
        format!(
            "Analyse the source tour below and rebuild it as a personalized itinerary. \
             Respond with JSON only.\n\n\
             Source data: {raw_tour}\n\n\
             Rules:\n\
             1. Every day except the first and last must contain all seven time blocks: \
             breakfast, morning, lunch, afternoon, dinner, evening, hotel.\n\
             2. When the source lacks a place for a block, propose a fitting restaurant, \
             sight or activity near the neighbouring blocks.\n\
             3. Keep timeblock_configuration consistent with those blocks.\n\
             4. Return a sample_user_profile describing the typical traveller for this tour.\n\
             5. Every place except the last of its block and the last of the day carries \
             transport_to_next with mode, distance_km, travel_time_hours and cost_usd.\n\
             6. Derive arrival_time and departure_time from the travel time of the previous place.\n\
             Top-level keys: user_schema, sample_user_profile, personalized_tour \
             (destination, duration_days, user_id, user_preferences, daily_itineraries, \
             summary, timeblock_configuration)."
        )
    }
}

#[async_trait]
impl TourGenerator for GeminiTourGenerator {
    async fn generate(
        &self,
        raw_tour: &Value,
        prior_schema: Option<&Value>,
    ) -> AppResult<GeneratedData> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": Self::prompt(raw_tour) }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });
        let response = self.client.generate_content(&self.model, &body).await?;
        let text = response
            .text()
            .ok_or_else(|| AppError::Generation("model returned no text".into()))?;
        debug!(model = %self.model, bytes = text.len(), "generation response received");
        assemble_generated(&text, prior_schema, DEFAULT_ENGINE)
    }
}

/// Parses model output as JSON. When the text is wrapped in prose or code
/// fences, the span from the first `{` to the last `}` is tried instead.
pub fn safe_json_parse(text: &str) -> AppResult<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            match serde_json::from_str(&text[start..=end]) {
                Ok(value) => return Ok(value),
                Err(err) => warn!(?err, "json recovery failed"),
            }
        }
    }

    Err(AppError::Generation("model response is not valid JSON".into()))
}

/// Profiles sometimes arrive JSON-encoded inside a string. Empty values
/// become `{}`; strings that are not JSON are kept as they are.
pub fn ensure_object(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => json!({}),
        Some(Value::String(text)) if text.is_empty() => json!({}),
        Some(Value::String(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
        }
        Some(other) => other.clone(),
    }
}

/// Builds the generated document from raw model text.
pub fn assemble_generated(
    text: &str,
    prior_schema: Option<&Value>,
    engine: &str,
) -> AppResult<GeneratedData> {
    let parsed = safe_json_parse(text)?;
    let Value::Object(mut root) = parsed else {
        return Err(AppError::Generation(
            "model response is not a JSON object".into(),
        ));
    };

    let personalized_tour = match root.remove("personalized_tour") {
        None | Some(Value::Null) => PersonalizedTour::default(),
        Some(value) => serde_json::from_value(value).map_err(|err| {
            AppError::Generation(format!("personalized_tour has an unexpected shape: {err}"))
        })?,
    };

    Ok(GeneratedData {
        metadata: GenerationMetadata::now(engine),
        user_schema: prior_schema
            .cloned()
            .unwrap_or_else(|| (*USER_SCHEMA_DEFINITION).clone()),
        sample_user_profile: ensure_object(root.get("sample_user_profile")),
        personalized_tour,
        places: Vec::new(),
    })
}

/// JSON schema of the traveller profile attached to every generated tour.
pub static USER_SCHEMA_DEFINITION: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "basic_info": {
                "type": "object",
                "properties": {
                    "departure": { "type": "string" },
                    "destination": { "type": "string" },
                    "start_date": { "type": "string", "format": "date" },
                    "end_date": { "type": "string", "format": "date" },
                    "group_size": {
                        "type": "object",
                        "properties": {
                            "adults": { "type": "integer", "minimum": 1 },
                            "children": { "type": "integer", "minimum": 0 }
                        }
                    }
                }
            },
            "budget_and_style": {
                "type": "object",
                "properties": {
                    "budget": { "type": "number" },
                    "tour_type": { "type": "string", "enum": ["Budget", "Standard", "Luxury"] },
                    "travel_style": {
                        "type": "string",
                        "enum": ["Relaxation", "Exploration", "Adventure", "Family", "Couple", "Business"]
                    }
                }
            },
            "preferences": {
                "type": "object",
                "properties": {
                    "interests": {
                        "type": "array",
                        "items": {
                            "type": "string",
                            "enum": ["Beach", "Mountain", "Culture", "Food", "Shopping"]
                        }
                    },
                    "activity_level": { "type": "string", "enum": ["Light", "Moderate", "High"] },
                    "special_needs": { "type": "array", "items": { "type": "string" } }
                }
            },
            "services": {
                "type": "object",
                "properties": {
                    "hotel": {
                        "type": "object",
                        "properties": {
                            "stars": { "type": "integer", "minimum": 1, "maximum": 5 },
                            "room_type": { "type": "string" }
                        }
                    },
                    "transport": { "type": "string", "enum": ["Flight", "Train", "Private Car", "Bus"] },
                    "extras": {
                        "type": "object",
                        "properties": {
                            "tour_guide": { "type": "boolean" },
                            "tickets": { "type": "boolean" },
                            "insurance": { "type": "boolean" }
                        }
                    }
                }
            },
            "contact_info": {
                "type": "object",
                "properties": {
                    "full_name": { "type": "string" },
                    "phone": { "type": "string" },
                    "email": { "type": "string", "format": "email" }
                }
            }
        }
    })
});

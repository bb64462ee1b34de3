use std::path::PathBuf;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

use crate::credentials::ProviderCredential;

const DEFAULT_TELEMETRY_BUFFER_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_TELEMETRY_BUFFER_MAX_FILES: usize = 5;
const DEFAULT_RAPIDAPI_HOST: &str = "google-map-places.p.rapidapi.com";

pub const DEFAULT_NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_OPENCAGE_ENDPOINT: &str = "https://api.opencagedata.com/geocode/v1/json";
pub const DEFAULT_PLACES_ENDPOINT: &str =
    "https://google-map-places.p.rapidapi.com/maps/api/place/textsearch/json";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub user_agent: String,
    pub nominatim_endpoint: String,
    pub nominatim_rate_limit_qps: u32,
    pub opencage_endpoint: String,
    pub opencage_api_keys: Vec<ProviderCredential>,
    pub places_endpoint: String,
    pub places_language: String,
    pub rapidapi_keys: Vec<ProviderCredential>,
    pub gemini_api_key: Option<SecretString>,
    pub gemini_endpoint: String,
    pub generation_model: String,
    pub grounding_model: String,
    pub grounding_enabled: bool,
    pub lookup_timeout_ms: u64,
    pub resolve_concurrency: usize,
    pub batch_pause_ms: u64,
    pub failure_pause_ms: u64,
    pub lock_schema: bool,
    pub telemetry_enabled_by_default: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
    pub telemetry_buffer_max_files: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub data_dir: String,
    pub nominatim_endpoint: String,
    pub nominatim_rate_limit_qps: u32,
    pub opencage_endpoint: String,
    pub opencage_key_count: usize,
    pub places_endpoint: String,
    pub rapidapi_key_count: usize,
    pub has_gemini_key: bool,
    pub generation_model: String,
    pub grounding_model: String,
    pub grounding_enabled: bool,
    pub lookup_timeout_ms: u64,
    pub resolve_concurrency: usize,
    pub lock_schema: bool,
    pub telemetry_enabled_by_default: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let rapidapi_host =
            env::var("RAPIDAPI_HOST").unwrap_or_else(|_| DEFAULT_RAPIDAPI_HOST.to_string());
        Self {
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".tour-architect")),
            user_agent: env::var("HTTP_USER_AGENT")
                .unwrap_or_else(|_| "TourArchitect/1.0 (itinerary enrichment)".to_string()),
            nominatim_endpoint: env::var("NOMINATIM_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_NOMINATIM_ENDPOINT.to_string()),
            nominatim_rate_limit_qps: parse_u32("NOMINATIM_RATE_LIMIT_QPS", 1).max(1),
            opencage_endpoint: env::var("OPENCAGE_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_OPENCAGE_ENDPOINT.to_string()),
            opencage_api_keys: parse_credentials("OPENCAGE_API_KEYS", None),
            places_endpoint: env::var("PLACES_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_PLACES_ENDPOINT.to_string()),
            places_language: env::var("PLACES_LANGUAGE").unwrap_or_else(|_| "vi".to_string()),
            rapidapi_keys: parse_credentials("RAPIDAPI_KEYS", Some(&rapidapi_host)),
            gemini_api_key: env::var("GEMINI_API_KEY")
                .or_else(|_| env::var("API_KEY"))
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            gemini_endpoint: env::var("GEMINI_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_GEMINI_ENDPOINT.to_string()),
            generation_model: env::var("GENERATION_MODEL")
                .unwrap_or_else(|_| "gemini-3-flash-preview".to_string()),
            grounding_model: env::var("GROUNDING_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            grounding_enabled: parse_bool("GROUNDING_ENABLED", true),
            lookup_timeout_ms: parse_u64("LOOKUP_TIMEOUT_MS", 10_000).max(1),
            resolve_concurrency: parse_usize("RESOLVE_CONCURRENCY", 10).max(1),
            batch_pause_ms: parse_u64("BATCH_PAUSE_MS", 1_500),
            failure_pause_ms: parse_u64("FAILURE_PAUSE_MS", 3_000),
            lock_schema: parse_bool("LOCK_SCHEMA", true),
            telemetry_enabled_by_default: parse_bool("TELEMETRY_ENABLED", true),
            telemetry_batch_size: parse_usize("TELEMETRY_BATCH_SIZE", 25).max(1),
            telemetry_buffer_max_bytes: parse_u64(
                "TELEMETRY_BUFFER_MAX_BYTES",
                DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
            ),
            telemetry_buffer_max_files: parse_usize(
                "TELEMETRY_BUFFER_MAX_FILES",
                DEFAULT_TELEMETRY_BUFFER_MAX_FILES,
            )
            .max(1),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            data_dir: self.data_dir.to_string_lossy().to_string(),
            nominatim_endpoint: self.nominatim_endpoint.clone(),
            nominatim_rate_limit_qps: self.nominatim_rate_limit_qps,
            opencage_endpoint: self.opencage_endpoint.clone(),
            opencage_key_count: self.opencage_api_keys.len(),
            places_endpoint: self.places_endpoint.clone(),
            rapidapi_key_count: self.rapidapi_keys.len(),
            has_gemini_key: self.gemini_api_key.is_some(),
            generation_model: self.generation_model.clone(),
            grounding_model: self.grounding_model.clone(),
            grounding_enabled: self.grounding_enabled,
            lookup_timeout_ms: self.lookup_timeout_ms,
            resolve_concurrency: self.resolve_concurrency,
            lock_schema: self.lock_schema,
            telemetry_enabled_by_default: self.telemetry_enabled_by_default,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

/// Splits a comma separated key list. Entries may carry a host as `key@host`;
/// entries without one, or with a blank one, get `default_host`.
fn parse_credentials(key: &str, default_host: Option<&str>) -> Vec<ProviderCredential> {
    env::var(key)
        .map(|raw| parse_credential_list(&raw, default_host))
        .unwrap_or_default()
}

pub(crate) fn parse_credential_list(
    raw: &str,
    default_host: Option<&str>,
) -> Vec<ProviderCredential> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (key, host) = match entry.split_once('@') {
                Some((key, host)) => (key.trim(), Some(host.trim())),
                None => (entry, None),
            };
            let credential = ProviderCredential::new(key);
            match host.filter(|host| !host.is_empty()).or(default_host) {
                Some(host) => credential.with_host(host),
                None => credential,
            }
        })
        .collect()
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) fn test_config(data_dir: &std::path::Path) -> AppConfig {
    AppConfig {
        data_dir: data_dir.to_path_buf(),
        user_agent: "tour-architect-tests".into(),
        nominatim_endpoint: DEFAULT_NOMINATIM_ENDPOINT.into(),
        nominatim_rate_limit_qps: 1,
        opencage_endpoint: DEFAULT_OPENCAGE_ENDPOINT.into(),
        opencage_api_keys: Vec::new(),
        places_endpoint: DEFAULT_PLACES_ENDPOINT.into(),
        places_language: "vi".into(),
        rapidapi_keys: Vec::new(),
        gemini_api_key: None,
        gemini_endpoint: DEFAULT_GEMINI_ENDPOINT.into(),
        generation_model: "gemini-3-flash-preview".into(),
        grounding_model: "gemini-2.5-flash".into(),
        grounding_enabled: false,
        lookup_timeout_ms: 1_000,
        resolve_concurrency: 4,
        batch_pause_ms: 0,
        failure_pause_ms: 0,
        lock_schema: true,
        telemetry_enabled_by_default: true,
        telemetry_batch_size: 2,
        telemetry_buffer_max_bytes: 1024,
        telemetry_buffer_max_files: 3,
    }
}

use std::sync::Arc;
use std::time::Duration;

use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use secrecy::SecretString;
use serde_json::json;

use tour_architect::enrichment::resolve_all;
use tour_architect::gemini::GeminiClient;
use tour_architect::providers::{
    GeminiMapsClient, GooglePlacesClient, NominatimClient, OpenCageClient,
};
use tour_architect::{
    CredentialPool, PlaceLookup, PlaceResolver, PlaceSource, ProviderCredential, Resolution,
};

fn pool(provider: &'static str, keys: &[&str]) -> CredentialPool {
    CredentialPool::new(
        provider,
        keys.iter().map(|key| ProviderCredential::new(*key)).collect(),
    )
}

fn opencage_hit(formatted: &str, lat: f64, lng: f64) -> serde_json::Value {
    json!({ "results": [{ "formatted": formatted, "geometry": { "lat": lat, "lng": lng } }] })
}

#[tokio::test]
async fn nominatim_parses_first_hit() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/search"),
            request::query(url_decoded(contains(("q", "Forbidden City")))),
            request::query(url_decoded(contains(("format", "json")))),
            request::query(url_decoded(contains(("limit", "1")))),
        ])
        .respond_with(json_encoded(json!([{
            "display_name": "Forbidden City, Dongcheng District, Beijing, China",
            "lat": "39.9163",
            "lon": "116.3972",
            "type": "museum",
            "class": "tourism"
        }]))),
    );

    let client = NominatimClient::new(reqwest::Client::new(), server.url_str("/search"), 50);
    let result = client.paced_lookup("Forbidden City").await.into_option().unwrap();

    assert_eq!(result.name, "Forbidden City");
    assert_eq!((result.lat, result.lng), (Some(39.9163), Some(116.3972)));
    assert_eq!(result.types, ["museum", "tourism", "osm"]);
    assert_eq!(result.source, PlaceSource::Osm);
}

#[tokio::test]
async fn nominatim_server_error_is_not_found() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/search"))
            .respond_with(status_code(503)),
    );

    let client = NominatimClient::new(reqwest::Client::new(), server.url_str("/search"), 50);
    assert_eq!(client.paced_lookup("Anywhere").await, Resolution::NotFound);
}

#[tokio::test]
async fn nominatim_queueing_does_not_count_against_the_call_timeout() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/search"))
            .times(5)
            .respond_with(json_encoded(json!([{
                "display_name": "Somewhere, Hanoi, Vietnam",
                "lat": "21.03",
                "lon": "105.85"
            }]))),
    );

    // 4 requests per second puts the fifth slot about a second out, well
    // past the 200 ms budget for a single request.
    let nominatim: Arc<dyn PlaceLookup> =
        Arc::new(NominatimClient::new(reqwest::Client::new(), server.url_str("/search"), 4));
    let resolver = PlaceResolver::new(vec![nominatim], Duration::from_millis(200));
    let queries: Vec<String> = (1..=5).map(|n| format!("Stop {n}")).collect();

    let resolved = resolve_all(&resolver, &queries, None, 5).await;
    assert_eq!(resolved.len(), 5);
    assert!(resolved.values().all(|place| place.source == PlaceSource::Osm));
}

#[tokio::test]
async fn opencage_rotates_past_exhausted_keys() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/geocode/v1/json"),
            request::query(url_decoded(contains(("key", "k0")))),
        ])
        .respond_with(status_code(402)),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/geocode/v1/json"),
            request::query(url_decoded(contains(("key", "k1")))),
        ])
        .respond_with(status_code(429)),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/geocode/v1/json"),
            request::query(url_decoded(contains(("key", "k2")))),
            request::query(url_decoded(contains(("no_annotations", "1")))),
        ])
        .times(2)
        .respond_with(json_encoded(opencage_hit(
            "Temple of Heaven, Dongcheng, Beijing, China",
            39.8822,
            116.4066,
        ))),
    );

    let client = OpenCageClient::new(
        reqwest::Client::new(),
        server.url_str("/geocode/v1/json"),
        pool("opencage", &["k0", "k1", "k2"]),
    );

    let result = client.lookup("Temple of Heaven").await.into_option().unwrap();
    assert_eq!(result.name, "Temple of Heaven");
    assert_eq!(result.source, PlaceSource::OpenCage);
    assert_eq!(client.pool().cursor(), 2);

    // The next lookup starts on the key that worked.
    assert!(client.lookup("Temple of Heaven").await.is_found());
    assert_eq!(client.pool().cursor(), 2);
}

#[tokio::test]
async fn opencage_empty_answer_stops_rotation() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/geocode/v1/json"),
            request::query(url_decoded(contains(("key", "k0")))),
        ])
        .respond_with(json_encoded(json!({ "results": [] }))),
    );

    let client = OpenCageClient::new(
        reqwest::Client::new(),
        server.url_str("/geocode/v1/json"),
        pool("opencage", &["k0", "k1"]),
    );
    assert_eq!(client.lookup("Nowhere Lane").await, Resolution::NotFound);
    assert_eq!(client.pool().cursor(), 0);
}

#[tokio::test]
async fn places_sends_rapidapi_headers() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/maps/api/place/textsearch/json"),
            request::headers(contains(("x-rapidapi-key", "r1"))),
            request::headers(contains(("x-rapidapi-host", "places.example"))),
            request::query(url_decoded(contains(("query", "Pho 10 Ly Quoc Su")))),
            request::query(url_decoded(contains(("language", "vi")))),
        ])
        .respond_with(json_encoded(json!({
            "results": [{
                "name": "Phở 10 Lý Quốc Sư",
                "formatted_address": "10 Lý Quốc Sư, Hoàn Kiếm, Hà Nội",
                "geometry": { "location": { "lat": 21.0306, "lng": 105.8490 } },
                "rating": 4.3,
                "user_ratings_total": 12873,
                "place_id": "ChIJpho10",
                "types": ["restaurant", "food"]
            }]
        }))),
    );

    let client = GooglePlacesClient::new(
        reqwest::Client::new(),
        server.url_str("/maps/api/place/textsearch/json"),
        "vi",
        CredentialPool::new(
            "google_places",
            vec![ProviderCredential::new("r1").with_host("places.example")],
        ),
    );

    let result = client.lookup("Pho 10 Ly Quoc Su").await.into_option().unwrap();
    assert_eq!(result.source, PlaceSource::Google);
    assert_eq!(result.place_id.as_deref(), Some("ChIJpho10"));
    assert_eq!(result.user_ratings_total, Some(12873));
    assert_eq!(result.rating, Some(4.3));
    assert_eq!(result.types, ["restaurant", "food"]);
}

#[tokio::test]
async fn chain_reports_the_provider_that_answered() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/search"))
            .respond_with(json_encoded(json!([]))),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/geocode/v1/json"))
            .respond_with(status_code(402)),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/textsearch"))
            .respond_with(json_encoded(json!({
                "results": [{
                    "name": "Hotel X",
                    "geometry": { "location": { "lat": 16.4637, "lng": 107.5909 } }
                }]
            }))),
    );

    let http = reqwest::Client::new();
    let chain: Vec<Arc<dyn PlaceLookup>> = vec![
        Arc::new(NominatimClient::new(http.clone(), server.url_str("/search"), 50)),
        Arc::new(OpenCageClient::new(
            http.clone(),
            server.url_str("/geocode/v1/json"),
            pool("opencage", &["only"]),
        )),
        Arc::new(GooglePlacesClient::new(
            http,
            server.url_str("/textsearch"),
            "vi",
            pool("google_places", &["r1"]),
        )),
    ];
    let resolver = PlaceResolver::new(chain, Duration::from_secs(5));

    let result = resolver.resolve("Hotel X").await.into_option().unwrap();
    assert_eq!(result.source, PlaceSource::Google);
    assert_eq!((result.lat, result.lng), (Some(16.4637), Some(107.5909)));
}

#[tokio::test]
async fn grounded_lookup_runs_before_the_chain() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("POST", "/v1beta/models/gemini-2.5-flash:generateContent"),
            request::headers(contains(("x-goog-api-key", "g-key"))),
        ])
        .respond_with(json_encoded(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Jingshan Front St, Dongcheng, Beijing\nMore details follow." }] },
                "groundingMetadata": { "groundingChunks": [
                    { "maps": { "uri": "https://maps.google.com/?cid=7", "title": "Forbidden City" } }
                ] }
            }]
        }))),
    );

    let http = reqwest::Client::new();
    let gemini = GeminiClient::new(
        http.clone(),
        server.url_str("/v1beta"),
        SecretString::from("g-key".to_string()),
    );
    let nominatim: Arc<dyn PlaceLookup> =
        Arc::new(NominatimClient::new(http, server.url_str("/search"), 50));
    let resolver = PlaceResolver::new(vec![nominatim], Duration::from_secs(5))
        .with_grounding(Arc::new(GeminiMapsClient::new(gemini, "gemini-2.5-flash")));

    let result = resolver
        .resolve_in_context("Forbidden City", Some("Beijing"))
        .await
        .into_option()
        .unwrap();
    assert_eq!(result.source, PlaceSource::GeminiMaps);
    assert_eq!(result.google_maps_uri.as_deref(), Some("https://maps.google.com/?cid=7"));
    assert_eq!(
        result.formatted_address.as_deref(),
        Some("Jingshan Front St, Dongcheng, Beijing")
    );
    assert!(result.lat.is_none());
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::collection::TourCollection;
use crate::config::AppConfig;
use crate::enrichment::{enrich_days, EnrichmentStats};
use crate::errors::AppResult;
use crate::generation::{GeminiTourGenerator, TourGenerator};
use crate::ingestion::RawTour;
use crate::itinerary::normalize_days;
use crate::model::GeneratedData;
use crate::resolver::PlaceResolver;
use crate::telemetry::{PipelineEvent, TelemetryClient};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub concurrency: usize,
    pub batch_pause: Duration,
    pub failure_pause: Duration,
    pub lock_schema: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.resolve_concurrency.max(1),
            batch_pause: Duration::from_millis(config.batch_pause_ms),
            failure_pause: Duration::from_millis(config.failure_pause_ms),
            lock_schema: config.lock_schema,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            batch_pause: Duration::from_millis(1_500),
            failure_pause: Duration::from_millis(3_000),
            lock_schema: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedTour {
    pub data: GeneratedData,
    pub stats: EnrichmentStats,
}

type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Cancellation flag and progress callback for a batch run.
#[derive(Clone, Default)]
pub struct BatchControl {
    cancel: Arc<AtomicBool>,
    progress: Option<Arc<ProgressFn>>,
}

impl BatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with `(current, total)` before each tour is considered.
    pub fn on_progress(mut self, observer: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(observer));
        self
    }

    /// The run stops before the next tour once this is set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn report(&self, current: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(current, total);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchFailure {
    pub tour: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub failures: Vec<BatchFailure>,
    pub cancelled: bool,
}

pub struct TourArchitect {
    generator: Arc<dyn TourGenerator>,
    resolver: PlaceResolver,
    telemetry: Option<TelemetryClient>,
    options: PipelineOptions,
}

impl TourArchitect {
    pub fn new(
        generator: Arc<dyn TourGenerator>,
        resolver: PlaceResolver,
        options: PipelineOptions,
    ) -> Self {
        Self {
            generator,
            resolver,
            telemetry: None,
            options,
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryClient) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let architect = Self::new(
            Arc::new(GeminiTourGenerator::from_config(config)?),
            PlaceResolver::from_config(config)?,
            PipelineOptions::from_config(config),
        );
        Ok(architect.with_telemetry(TelemetryClient::new(config)?))
    }

    pub fn resolver(&self) -> &PlaceResolver {
        &self.resolver
    }

    /// Generate, normalize and enrich one tour. Only generation can fail;
    /// lookup misses leave places as generated.
    pub async fn process_tour(
        &self,
        tour: &RawTour,
        prior_schema: Option<&Value>,
    ) -> AppResult<ProcessedTour> {
        let mut data = self.generator.generate(&tour.to_value(), prior_schema).await?;

        let days = normalize_days(std::mem::take(&mut data.personalized_tour.daily_itineraries));
        let context = data
            .destination()
            .or_else(|| tour.destination())
            .map(str::to_string);
        let enrichment =
            enrich_days(&self.resolver, &days, context.as_deref(), self.options.concurrency).await;

        data.personalized_tour.daily_itineraries = enrichment.days;
        data.places = enrichment.places;

        self.emit(PipelineEvent::TourEnriched {
            destination: context.unwrap_or_default(),
            days: data.personalized_tour.daily_itineraries.len(),
            unique_queries: enrichment.stats.unique_queries,
            resolved: enrichment.stats.resolved,
        });

        Ok(ProcessedTour {
            data,
            stats: enrichment.stats,
        })
    }

    /// Processes tours one at a time into `collection`. A failed tour is
    /// logged and the run continues with the next one.
    pub async fn process_batch(
        &self,
        tours: &[RawTour],
        collection: &mut TourCollection,
        control: &BatchControl,
    ) -> BatchReport {
        let total = tours.len();
        let mut report = BatchReport::default();

        for (index, tour) in tours.iter().enumerate() {
            if control.is_cancelled() {
                warn!(remaining = total - index, "batch cancelled");
                report.cancelled = true;
                break;
            }
            control.report(index + 1, total);

            let key = tour.processing_key();
            let label = key.unwrap_or("untitled").to_string();
            if key.is_some_and(|key| collection.contains_destination(key)) {
                info!(tour = %label, "already processed; skipping");
                report.skipped += 1;
                continue;
            }

            let prior_schema = if self.options.lock_schema {
                collection.locked_schema().cloned()
            } else {
                None
            };

            let pause = match self.process_tour(tour, prior_schema.as_ref()).await {
                Ok(processed) => {
                    info!(
                        tour = %label,
                        resolved = processed.stats.resolved,
                        unresolved = processed.stats.unresolved,
                        "tour enriched"
                    );
                    collection.upsert(processed.data);
                    report.processed += 1;
                    self.options.batch_pause
                }
                Err(err) => {
                    error!(?err, tour = %label, "tour generation failed");
                    self.emit(PipelineEvent::TourFailed {
                        tour: label.clone(),
                        reason: err.to_string(),
                    });
                    report.failures.push(BatchFailure {
                        tour: label,
                        reason: err.to_string(),
                    });
                    self.options.failure_pause
                }
            };

            if index + 1 < total && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        self.emit(PipelineEvent::BatchComplete {
            processed: report.processed,
            failed: report.failures.len(),
            skipped: report.skipped,
            cancelled: report.cancelled,
        });
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.flush() {
                warn!(?err, "telemetry flush failed");
            }
        }

        report
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.record(event) {
                warn!(?err, "telemetry write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::config::test_config;
    use crate::errors::AppError;
    use crate::generation::{assemble_generated, USER_SCHEMA_DEFINITION};
    use crate::ingestion::validate_tour;
    use crate::providers::{PlaceLookup, PlaceSource};
    use crate::resolver::tests::StubProvider;

    /// Answers with canned model text keyed by tour title.
    struct ScriptedGenerator {
        scripts: HashMap<String, String>,
        priors: Mutex<Vec<Option<Value>>>,
    }

    impl ScriptedGenerator {
        fn new(scripts: &[(&str, Value)]) -> Self {
            Self {
                scripts: scripts
                    .iter()
                    .map(|(title, body)| (title.to_string(), body.to_string()))
                    .collect(),
                priors: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TourGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            raw_tour: &Value,
            prior_schema: Option<&Value>,
        ) -> AppResult<GeneratedData> {
            self.priors.lock().push(prior_schema.cloned());
            let title = raw_tour["title"].as_str().unwrap_or_default();
            match self.scripts.get(title) {
                Some(text) => assemble_generated(text, prior_schema, "scripted"),
                None => Err(AppError::Generation("model response is not valid JSON".into())),
            }
        }
    }

    fn raw_tour(title: &str, destination: &str) -> RawTour {
        validate_tour(json!({
            "title": title,
            "destination": destination,
            "duration": "2 days",
            "processed_itinerary": [{ "day_number": 1 }]
        }))
        .unwrap()
    }

    fn beijing_script() -> Value {
        json!({
            "sample_user_profile": "{\"id\": \"traveller-1\"}",
            "personalized_tour": {
                "destination": "Beijing",
                "duration_days": 2,
                "daily_itineraries": [
                    { "day_number": 1, "date": "Day 1", "blocks": [] },
                    {
                        "day_number": 2,
                        "summary": { "total_cost_usd": 42 },
                        "blocks": [{
                            "block_type": "morning",
                            "time_range": "08:00 - 11:00",
                            "places": [{ "name": "Forbidden City", "visit_duration_hours": 3 }]
                        }]
                    }
                ]
            }
        })
    }

    fn architect(
        generator: Arc<ScriptedGenerator>,
        known: &[(&str, f64, f64)],
    ) -> (TourArchitect, Arc<StubProvider>) {
        let stub = Arc::new(StubProvider::new(PlaceSource::Osm, known));
        let resolver = PlaceResolver::new(
            vec![Arc::clone(&stub) as Arc<dyn PlaceLookup>],
            Duration::from_millis(500),
        );
        let options = PipelineOptions {
            concurrency: 4,
            batch_pause: Duration::ZERO,
            failure_pause: Duration::ZERO,
            lock_schema: true,
        };
        (TourArchitect::new(generator, resolver, options), stub)
    }

    #[tokio::test]
    async fn empty_day_gets_skeleton_and_populated_day_is_kept() {
        let generator = Arc::new(ScriptedGenerator::new(&[("Beijing Classic", beijing_script())]));
        let (architect, _) = architect(generator, &[]);

        let processed = architect
            .process_tour(&raw_tour("Beijing Classic", "Beijing"), None)
            .await
            .unwrap();

        let days = &processed.data.personalized_tour.daily_itineraries;
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].blocks.len(), 7);
        assert!(days[0].blocks.iter().all(|block| block.places.is_empty()));
        assert_eq!(days[1].blocks.len(), 1);
        assert_eq!(days[1].blocks[0].places[0].name.as_deref(), Some("Forbidden City"));
        assert_eq!(days[1].summary, Some(json!({ "total_cost_usd": 42 })));
        assert_eq!(processed.stats.resolved, 0);
        assert!(processed.data.places.is_empty());
        assert_eq!(processed.data.sample_user_profile, json!({ "id": "traveller-1" }));
    }

    #[tokio::test]
    async fn resolved_places_are_merged_and_listed() {
        let generator = Arc::new(ScriptedGenerator::new(&[("Beijing Classic", beijing_script())]));
        let (architect, stub) = architect(generator, &[("Forbidden City", 39.916, 116.397)]);

        let processed = architect
            .process_tour(&raw_tour("Beijing Classic", "Beijing"), None)
            .await
            .unwrap();

        let place = &processed.data.personalized_tour.daily_itineraries[1].blocks[0].places[0];
        assert_eq!((place.lat, place.lng), (Some(39.916), Some(116.397)));
        assert_eq!(place.provider.as_deref(), Some("osm"));
        assert_eq!(place.visit_duration_hours, Some(3.0));
        assert_eq!(processed.data.places.len(), 1);
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn batch_skips_known_destinations_and_survives_failures() {
        let dir = tempdir().unwrap();
        let telemetry = TelemetryClient::new(&test_config(dir.path())).unwrap();
        let generator = Arc::new(ScriptedGenerator::new(&[("Beijing Classic", beijing_script())]));
        let (architect, _) = architect(Arc::clone(&generator), &[]);
        let architect = architect.with_telemetry(telemetry.clone());

        let seen = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&seen);
        let control = BatchControl::new().on_progress(move |current, total| {
            assert!(current <= total);
            observed.fetch_add(1, Ordering::SeqCst);
        });

        let tours = vec![
            raw_tour("Beijing Classic", "Beijing"),
            raw_tour("Hue Heritage", "Hue"),
            raw_tour("Beijing Again", "Beijing"),
        ];
        let mut collection = TourCollection::new();
        let report = architect.process_batch(&tours, &mut collection, &control).await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].tour, "Hue");
        assert!(!report.cancelled);
        assert_eq!(collection.len(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        let priors = generator.priors.lock().clone();
        assert_eq!(priors, vec![None, Some((*USER_SCHEMA_DEFINITION).clone())]);

        let journal = std::fs::read_to_string(telemetry.buffer_path()).unwrap();
        assert!(journal.contains("tour_enriched"));
        assert!(journal.contains("tour_failed"));
        assert!(journal.contains("batch_complete"));
    }

    #[tokio::test]
    async fn title_matching_a_processed_destination_is_not_skipped() {
        let generator = Arc::new(ScriptedGenerator::new(&[
            ("Beijing Classic", beijing_script()),
            ("Beijing", json!({ "personalized_tour": { "destination": "Sapa" } })),
        ]));
        let (architect, _) = architect(Arc::clone(&generator), &[]);

        let mut collection = TourCollection::new();
        let tours = [raw_tour("Beijing Classic", "Beijing"), raw_tour("Beijing", "Sapa")];
        let report = architect
            .process_batch(&tours, &mut collection, &BatchControl::new())
            .await;

        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 0);
        assert!(collection.contains_destination("Sapa"));
    }

    #[tokio::test]
    async fn cancelled_batch_stops_before_next_tour() {
        let generator = Arc::new(ScriptedGenerator::new(&[("Beijing Classic", beijing_script())]));
        let (architect, _) = architect(Arc::clone(&generator), &[]);
        let control = BatchControl::new();
        control.cancel();

        let mut collection = TourCollection::new();
        let report = architect
            .process_batch(&[raw_tour("Beijing Classic", "Beijing")], &mut collection, &control)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
        assert!(generator.priors.lock().is_empty());
    }

    #[tokio::test]
    async fn unlocked_schema_is_never_passed_on() {
        let generator = Arc::new(ScriptedGenerator::new(&[
            ("Beijing Classic", beijing_script()),
            ("Sapa Trek", json!({ "personalized_tour": { "destination": "Sapa" } })),
        ]));
        let (mut architect, _) = architect(Arc::clone(&generator), &[]);
        architect.options.lock_schema = false;

        let mut collection = TourCollection::new();
        let tours = [raw_tour("Beijing Classic", "Beijing"), raw_tour("Sapa Trek", "Sapa")];
        let report = architect
            .process_batch(&tours, &mut collection, &BatchControl::new())
            .await;

        assert_eq!(report.processed, 2);
        assert_eq!(*generator.priors.lock(), vec![None, None]);
        assert_eq!(collection.entries()[0].destination(), Some("Sapa"));
    }
}

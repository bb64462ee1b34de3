use std::collections::{HashMap, HashSet};

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::debug;

use crate::model::{DailyItinerary, TimeBlock};
use crate::providers::PlaceResult;
use crate::resolver::PlaceResolver;

/// Counters for one enrichment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentStats {
    pub place_occurrences: usize,
    pub unique_queries: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub unnamed_skipped: usize,
}

#[derive(Debug, Clone)]
pub struct Enrichment {
    pub days: Vec<DailyItinerary>,
    /// Every resolved place, in the order its name first appears.
    pub places: Vec<PlaceResult>,
    pub stats: EnrichmentStats,
}

/// Distinct non-blank place names across all days, in first-seen order.
pub fn collect_place_queries(days: &[DailyItinerary]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut queries = Vec::new();
    for place in days.iter().flat_map(DailyItinerary::places) {
        if let Some(query) = place.query() {
            if seen.insert(query) {
                queries.push(query.to_string());
            }
        }
    }
    queries
}

/// Resolves each query once, with at most `concurrency` lookups in flight.
/// Misses are absent from the returned map.
pub async fn resolve_all(
    resolver: &PlaceResolver,
    queries: &[String],
    context: Option<&str>,
    concurrency: usize,
) -> HashMap<String, PlaceResult> {
    stream::iter(queries.iter())
        .map(|query| async move {
            let resolution = resolver.resolve_in_context(query, context).await;
            (query.clone(), resolution.into_option())
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|(query, result)| async move { result.map(|result| (query, result)) })
        .collect()
        .await
}

/// Returns a new tree with resolved fields merged into every named place
/// that has a match. Everything else is copied unchanged.
pub fn overlay(days: &[DailyItinerary], resolved: &HashMap<String, PlaceResult>) -> Vec<DailyItinerary> {
    days.iter()
        .map(|day| DailyItinerary {
            blocks: day
                .blocks
                .iter()
                .map(|block| TimeBlock {
                    places: block
                        .places
                        .iter()
                        .map(|place| {
                            match place.query().and_then(|query| resolved.get(query)) {
                                Some(result) => place.merged_with(result),
                                None => place.clone(),
                            }
                        })
                        .collect(),
                    ..block.clone()
                })
                .collect(),
            ..day.clone()
        })
        .collect()
}

fn tally(
    days: &[DailyItinerary],
    queries: &[String],
    resolved: &HashMap<String, PlaceResult>,
) -> EnrichmentStats {
    let mut stats = EnrichmentStats {
        unique_queries: queries.len(),
        resolved: resolved.len(),
        unresolved: queries.len().saturating_sub(resolved.len()),
        ..EnrichmentStats::default()
    };
    for place in days.iter().flat_map(DailyItinerary::places) {
        stats.place_occurrences += 1;
        if place.query().is_none() {
            stats.unnamed_skipped += 1;
        }
    }
    stats
}

/// Collect, resolve and overlay in one pass.
pub async fn enrich_days(
    resolver: &PlaceResolver,
    days: &[DailyItinerary],
    context: Option<&str>,
    concurrency: usize,
) -> Enrichment {
    let queries = collect_place_queries(days);
    let resolved = resolve_all(resolver, &queries, context, concurrency).await;
    let stats = tally(days, &queries, &resolved);
    debug!(
        unique = stats.unique_queries,
        resolved = stats.resolved,
        unresolved = stats.unresolved,
        "place enrichment finished"
    );

    let places = queries
        .iter()
        .filter_map(|query| resolved.get(query).cloned())
        .collect();

    Enrichment {
        days: overlay(days, &resolved),
        places,
        stats,
    }
}

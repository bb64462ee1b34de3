pub mod collection;
pub mod config;
pub mod credentials;
pub mod enrichment;
pub mod errors;
pub mod gemini;
pub mod generation;
pub mod ingestion;
pub mod itinerary;
pub mod model;
pub mod pipeline;
pub mod providers;
pub mod resolver;
pub mod telemetry;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use collection::TourCollection;
pub use config::AppConfig;
pub use credentials::{CredentialPool, KeyAttempt, ProviderCredential};
pub use errors::{AppError, AppResult};
pub use model::{DailyItinerary, GeneratedData, TimeBlock, TourPlace};
pub use pipeline::{BatchControl, BatchReport, PipelineOptions, TourArchitect};
pub use providers::{PlaceLookup, PlaceResult, PlaceSource, Resolution};
pub use resolver::PlaceResolver;

/// Installs the global subscriber once. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,tour_architect=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}

pub mod types;
pub mod config;
pub mod traits;
pub mod fetcher;
pub mod parser;
pub mod classifier;
pub mod state;
pub mod emitter;
pub mod pipeline;
pub mod scheduler;

pub use types::*;
pub use config::SensorConfig;
pub use traits::NoteSource;
pub use fetcher::{Fetcher, RetryPolicy};
pub use parser::{parse_timestamp, NoteParser};
pub use classifier::{BundleCache, Classification, Classifier, SkipReason};
pub use state::StateStore;
pub use emitter::Emitter;
pub use pipeline::{IngestionPipeline, PollReport};
pub use scheduler::{Scheduler, SchedulerPhase, SensorStatus};

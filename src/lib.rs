// src/lib.rs
// Public library surface for the demo binary and integration tests.

pub mod config;
pub mod cursor;
pub mod error;
pub mod listing;
pub mod telemetry;

// Filter intent and query inputs
pub mod filters;
pub mod source;

// Fetch pipeline
pub mod coalesce;
pub mod fetcher;
pub mod orchestrator;
pub mod snapshot;

// ---- Re-exports for stable public API ----
pub use crate::config::FeedConfig;
pub use crate::cursor::{Cursor, Cursors};
pub use crate::error::FeedError;
pub use crate::fetcher::{FetchPage, MultiSourceFetcher};
pub use crate::filters::intent::FilterIntent;
pub use crate::filters::{FilterAction, FilterCriteria, ListingType, SortMode, ViewMode};
pub use crate::listing::{Listing, PriceInfo, SourceKind};
pub use crate::orchestrator::{FeedOrchestrator, FeedPhase, FeedView};
pub use crate::snapshot::{FileStore, KvStore, MemoryStore, SnapshotCache, ViewerKey};
pub use crate::source::memory::InMemorySource;
pub use crate::source::{PageRequest, QuerySource, RawRecord};

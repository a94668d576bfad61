//! Logging and metrics bootstrap.

use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a global subscriber. `RUST_LOG` wins over `default_directive`;
/// `FEED_LOG_JSON=1` switches to JSON lines. Safe to call more than once.
pub fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let json = std::env::var("FEED_LOG_JSON").ok().as_deref() == Some("1");
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::trace!("tracing subscriber already installed");
    }
}

/// One-time metrics registration (so series show up on the recorder).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_source_calls_total", "Page queries issued to a source.");
        describe_counter!(
            "feed_source_errors_total",
            "Page queries that failed; the source contributes nothing to that page."
        );
        describe_counter!(
            "feed_coalesced_total",
            "Calls that joined an identical in-flight query."
        );
        describe_counter!(
            "feed_records_skipped_total",
            "Raw records dropped by normalization."
        );
        describe_counter!("feed_snapshot_hits_total", "Snapshot reads that returned data.");
        describe_counter!("feed_snapshot_writes_total", "Snapshots persisted.");
        describe_counter!(
            "feed_snapshot_skipped_total",
            "Snapshot writes skipped by the freshness window."
        );
        describe_counter!(
            "feed_sessions_discarded_total",
            "Fetch results dropped because a newer session took over."
        );
        describe_histogram!("feed_fetch_ms", "Multi-source fetch time in milliseconds.");
    });
}

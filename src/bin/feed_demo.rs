//! Demo: in-memory sources, snapshot store, filter intent and orchestrator.
//! Run twice to see the second start served from the snapshot.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;

use discovery_feed::snapshot::{FileStore, KvStore, MemoryStore};
use discovery_feed::telemetry::init_tracing;
use discovery_feed::{
    FeedConfig, FeedOrchestrator, FeedView, FilterIntent, InMemorySource, ListingType,
    SnapshotCache, SortMode, ViewerKey,
};

fn sample_records() -> (Vec<serde_json::Value>, Vec<serde_json::Value>) {
    let now = Utc::now().timestamp();
    let offers = (0..30)
        .map(|i| {
            let subtype = if i % 3 == 0 { "product" } else { "service" };
            json!({
                "id": format!("o{i:02}"),
                "title": format!("Offer #{i}"),
                "description": "Weekly <b>garden</b> care &amp; trimming",
                "created_at": now - i * 600,
                "price": 20 + i * 5,
                "subtype": subtype,
                "provider": { "id": format!("p{}", i % 4), "name": "Provider", "verified": i % 2 == 0 }
            })
        })
        .collect();
    let requests = (0..25)
        .map(|i| {
            let pricing = if i % 4 == 0 { json!("quote_based") } else { json!("budget") };
            json!({
                "id": format!("r{i:02}"),
                "title": format!("Request #{i}"),
                "created_at": now - i * 900 - 300,
                "pricing_type": pricing,
                "budget_min": 50 + i * 10,
                "budget_max": 150 + i * 20,
                "customer_id": format!("c{}", i % 5)
            })
        })
        .collect();
    (offers, requests)
}

fn print_view(label: &str, v: &FeedView) {
    println!(
        "[{label}] phase={:?} items={} loading={} loading_more={} has_more={} transitioning={} trigger={} error={}",
        v.phase,
        v.listings.len(),
        v.loading,
        v.loading_more,
        v.has_more,
        v.is_transitioning,
        v.listings_changed_trigger,
        v.error.as_ref().map(|e| e.to_string()).unwrap_or_else(|| "-".into()),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing("info,discovery_feed=debug");

    let config = FeedConfig::load_default()?;
    let store: Arc<dyn KvStore> = match &config.snapshot.dir {
        Some(dir) => Arc::new(FileStore::new(dir)?),
        None => Arc::new(MemoryStore::new()),
    };
    let cache = Arc::new(SnapshotCache::new(store, &config.snapshot));

    let (offers, requests) = sample_records();
    let source = Arc::new(InMemorySource::new(offers, requests).with_latency(Duration::from_millis(80)));

    let orch = FeedOrchestrator::new(source.clone(), cache, ViewerKey::Anonymous, config);
    let intent = FilterIntent::default();

    let mut views = orch.subscribe();
    let printer = tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let v = views.borrow_and_update().clone();
            print_view("view", &v);
        }
    });

    let watcher = orch.attach(&intent);
    tokio::time::sleep(Duration::from_millis(500)).await;

    orch.fetch_more().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    intent.set_listing_type(ListingType::Request);
    intent.set_price_bounds(Some(50.0), Some(300.0));
    intent.set_sort(SortMode::Price);
    tokio::time::sleep(Duration::from_millis(600)).await;

    intent.reset(None);
    tokio::time::sleep(Duration::from_millis(600)).await;

    print_view("final", &orch.view());
    println!("source calls: {}", source.total_calls());

    drop(intent);
    let _ = watcher.await;
    drop(orch);
    printer.abort();
    Ok(())
}

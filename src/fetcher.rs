//! # Multi-source cursor fetcher
//! One coalesced page query per enabled source, run concurrently, merged into
//! one page of [`Listing`]s.
//!
//! Ordering: each source's own order is trusted. Only a reset page with more
//! than one contributing source is merge-sorted, once. Pagination appends are
//! returned in source order without re-sorting.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use metrics::{counter, histogram};

use crate::coalesce::RequestCoalescer;
use crate::cursor::{Cursor, Cursors};
use crate::error::FeedError;
use crate::filters::FilterCriteria;
use crate::listing::{feed_order, Listing, SourceKind};
use crate::source::normalize::{cursor_of, normalize};
use crate::source::{PageRequest, QueryFilters, QuerySource, RawRecord};
use crate::telemetry::ensure_metrics_described;

/// Result of one multi-source fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPage {
    pub listings: Vec<Listing>,
    pub next_cursors: Cursors,
    /// True when any queried source returned a full page.
    pub has_more: bool,
    /// Sources that returned a short page and have nothing further.
    pub exhausted: BTreeSet<SourceKind>,
    /// Per-source failures that degraded this page without failing it.
    pub source_errors: Vec<FeedError>,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub criteria: &'a FilterCriteria,
    pub cursors: &'a Cursors,
    pub page_size: usize,
    pub reset: bool,
    /// Sources not to query on this (non-reset) page.
    pub skip: &'a BTreeSet<SourceKind>,
}

struct SourcePage {
    kind: SourceKind,
    listings: Vec<Listing>,
    last_cursor: Option<Cursor>,
    full: bool,
}

pub struct MultiSourceFetcher<S: QuerySource> {
    source: Arc<S>,
    coalescer: RequestCoalescer<Arc<Vec<RawRecord>>, FeedError>,
}

impl<S: QuerySource> MultiSourceFetcher<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            coalescer: RequestCoalescer::new(),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Fetches one page from every enabled source. On `reset` all cursors start
    /// from the top of the feed.
    pub async fn fetch(
        &self,
        criteria: &FilterCriteria,
        cursors: &Cursors,
        page_size: usize,
        reset: bool,
    ) -> Result<FetchPage, FeedError> {
        let skip = BTreeSet::new();
        self.fetch_with(FetchRequest {
            criteria,
            cursors,
            page_size,
            reset,
            skip: &skip,
        })
        .await
    }

    pub async fn fetch_with(&self, req: FetchRequest<'_>) -> Result<FetchPage, FeedError> {
        ensure_metrics_described();
        let t0 = Instant::now();
        let page_size = req.page_size.max(1);

        let kinds: Vec<SourceKind> = req
            .criteria
            .listing_type
            .enabled_sources()
            .into_iter()
            .filter(|k| req.reset || !req.skip.contains(k))
            .collect();

        let mut next_cursors = if req.reset {
            Cursors::default()
        } else {
            req.cursors.clone()
        };
        let mut exhausted = if req.reset {
            BTreeSet::new()
        } else {
            req.skip.clone()
        };

        if kinds.is_empty() {
            return Ok(FetchPage {
                listings: Vec::new(),
                next_cursors,
                has_more: false,
                exhausted,
                source_errors: Vec::new(),
            });
        }

        let results = join_all(kinds.iter().map(|kind| {
            let cursor = if req.reset {
                None
            } else {
                req.cursors.get(*kind)
            };
            self.fetch_source(*kind, req.criteria, cursor, page_size)
        }))
        .await;

        let mut pages = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for res in results {
            match res {
                Ok(p) => pages.push(p),
                Err(e) => {
                    counter!("feed_source_errors_total").increment(1);
                    tracing::warn!(target: "feed::source", source = self.source.name(), "{e}");
                    errors.push(e);
                }
            }
        }

        if pages.is_empty() {
            return Err(FeedError::AllSourcesFailed { failures: errors });
        }

        let mut has_more = false;
        let mut contributing = 0usize;
        let mut listings = Vec::new();
        for page in pages {
            if let Some(c) = page.last_cursor {
                next_cursors.advance(page.kind, c);
            }
            if page.full {
                has_more = true;
            } else {
                exhausted.insert(page.kind);
            }
            if !page.listings.is_empty() {
                contributing += 1;
            }
            listings.extend(page.listings);
        }

        if req.reset && contributing > 1 {
            listings.sort_by(feed_order);
        }

        histogram!("feed_fetch_ms").record(t0.elapsed().as_secs_f64() * 1000.0);
        tracing::debug!(
            target: "feed::source",
            reset = req.reset,
            count = listings.len(),
            has_more,
            failed = errors.len(),
            "fetched page"
        );

        Ok(FetchPage {
            listings,
            next_cursors,
            has_more,
            exhausted,
            source_errors: errors,
        })
    }

    async fn fetch_source(
        &self,
        kind: SourceKind,
        criteria: &FilterCriteria,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<SourcePage, FeedError> {
        let request = PageRequest::new(
            kind,
            cursor,
            limit,
            QueryFilters::from_criteria(criteria, kind),
        );
        let key = request.signature();
        let source = Arc::clone(&self.source);
        let records = self
            .coalescer
            .run(key, move || {
                counter!("feed_source_calls_total", "source" => kind.as_str()).increment(1);
                async move {
                    source
                        .query_page(&request)
                        .await
                        .map(Arc::new)
                        .map_err(|e| FeedError::source_failed(kind, &e))
                }
            })
            .await?;

        // Cursor follows the raw page so records dropped below are not re-fetched.
        let last_cursor = records.iter().rev().find_map(cursor_of);
        let full = records.len() >= limit;

        let mut skipped = 0usize;
        let mut listings = Vec::with_capacity(records.len());
        for raw in records.iter() {
            match normalize(kind, raw) {
                Some(l) if criteria.admits(&l) => listings.push(l),
                Some(_) => {}
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            counter!("feed_records_skipped_total").increment(skipped as u64);
            tracing::debug!(target: "feed::source", kind = %kind, skipped, "skipped malformed records");
        }

        Ok(SourcePage {
            kind,
            listings,
            last_cursor,
            full,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::SortMode;
    use crate::source::memory::InMemorySource;
    use serde_json::json;

    #[tokio::test]
    async fn reset_merge_ignores_sort_mode() {
        let offers = vec![json!({ "id": "o1", "created_at": 1_750_000_000, "price": 900 })];
        let requests = vec![json!({ "id": "r1", "created_at": 1_749_999_900,
            "pricing_type": "fixed", "fixed_price": 5 })];
        let fetcher = MultiSourceFetcher::new(Arc::new(InMemorySource::new(offers, requests)));

        for sort in [SortMode::Price, SortMode::Distance, SortMode::Relevance] {
            let criteria = FilterCriteria {
                sort,
                ..FilterCriteria::default()
            };
            let page = fetcher.fetch(&criteria, &Cursors::default(), 10, true).await.unwrap();
            let ids: Vec<_> = page.listings.iter().map(|l| l.id.as_str()).collect();
            assert_eq!(ids, vec!["o1", "r1"], "{sort:?}");
        }
    }
}

// src/source/memory.rs
//! In-process [`QuerySource`] over fixed record sets.
//!
//! Honors cursors and limits the way the remote service does (newest first,
//! strictly after the cursor). Used by the demo binary and by tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::{Mutex, RwLock};

use super::normalize::cursor_of;
use super::{PageRequest, QuerySource, RawRecord};
use crate::listing::SourceKind;

#[derive(Debug, Default)]
pub struct InMemorySource {
    offers: RwLock<Vec<RawRecord>>,
    requests: RwLock<Vec<RawRecord>>,
    offer_calls: AtomicUsize,
    request_calls: AtomicUsize,
    failing: Mutex<Vec<SourceKind>>,
    latency: Option<Duration>,
}

impl InMemorySource {
    pub fn new(offers: Vec<RawRecord>, requests: Vec<RawRecord>) -> Self {
        Self {
            offers: RwLock::new(offers),
            requests: RwLock::new(requests),
            ..Self::default()
        }
    }

    /// Every query sleeps for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push(&self, kind: SourceKind, record: RawRecord) {
        self.records(kind).write().push(record);
    }

    pub fn replace(&self, kind: SourceKind, records: Vec<RawRecord>) {
        *self.records(kind).write() = records;
    }

    /// Makes every query against `kind` fail until switched off again.
    pub fn set_failing(&self, kind: SourceKind, failing: bool) {
        let mut f = self.failing.lock();
        f.retain(|k| *k != kind);
        if failing {
            f.push(kind);
        }
    }

    /// Number of queries received for `kind`.
    pub fn calls(&self, kind: SourceKind) -> usize {
        self.counter(kind).load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        SourceKind::ALL.iter().map(|k| self.calls(*k)).sum()
    }

    fn records(&self, kind: SourceKind) -> &RwLock<Vec<RawRecord>> {
        match kind {
            SourceKind::Offer => &self.offers,
            SourceKind::Request => &self.requests,
        }
    }

    fn counter(&self, kind: SourceKind) -> &AtomicUsize {
        match kind {
            SourceKind::Offer => &self.offer_calls,
            SourceKind::Request => &self.request_calls,
        }
    }

    fn matches_text(record: &RawRecord, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        ["title", "description"].iter().any(|k| {
            record
                .get(*k)
                .and_then(|v| v.as_str())
                .is_some_and(|s| s.to_lowercase().contains(&needle))
        })
    }

    fn matches_subtype(record: &RawRecord, subtype: &str) -> bool {
        record
            .get("subtype")
            .and_then(|v| v.as_str())
            .is_some_and(|s| s.eq_ignore_ascii_case(subtype))
    }
}

#[async_trait::async_trait]
impl QuerySource for InMemorySource {
    async fn query_page(&self, request: &PageRequest) -> Result<Vec<RawRecord>> {
        self.counter(request.source).fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
        if self.failing.lock().contains(&request.source) {
            bail!("{} source unavailable", request.source);
        }

        let after = request.cursor();
        let mut page: Vec<(crate::cursor::Cursor, RawRecord)> = self
            .records(request.source)
            .read()
            .iter()
            .filter_map(|r| cursor_of(r).map(|c| (c, r.clone())))
            .filter(|(c, _)| after.as_ref().map_or(true, |a| c.is_past(a)))
            .filter(|(_, r)| {
                request
                    .filters
                    .text
                    .as_deref()
                    .map_or(true, |t| Self::matches_text(r, t))
            })
            .filter(|(_, r)| {
                request
                    .filters
                    .offer_subtype
                    .as_deref()
                    .map_or(true, |s| Self::matches_subtype(r, s))
            })
            .collect();
        page.sort_by(|(a, _), (b, _)| a.feed_cmp(b));
        page.truncate(request.limit);
        Ok(page.into_iter().map(|(_, r)| r).collect())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

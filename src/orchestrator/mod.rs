//! # Fetch orchestrator
//! Decides between snapshot, live reset fetch and pagination, debounces
//! criteria changes, and makes sure exactly one fetch session is authoritative.
//!
//! Every state mutation that follows an await first checks the session token;
//! results of superseded sessions are dropped without touching listings or
//! cursors. Outputs are published as [`FeedView`] values on a watch channel.

pub mod debounce;
pub mod session;
pub mod view;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::FeedConfig;
use crate::cursor::Cursors;
use crate::error::FeedError;
use crate::fetcher::{FetchRequest, MultiSourceFetcher};
use crate::filters::intent::FilterIntent;
use crate::filters::FilterCriteria;
use crate::listing::{Listing, SourceKind};
use crate::snapshot::{Snapshot, SnapshotCache, ViewerKey};
use crate::source::QuerySource;
use crate::telemetry::ensure_metrics_described;

use debounce::{select_delay, DebounceInput};
use session::{FetchSession, SessionTracker};
pub use view::{FeedPhase, FeedView};

pub struct FeedOrchestrator<S: QuerySource> {
    inner: Arc<Inner<S>>,
}

impl<S: QuerySource> Clone for FeedOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S: QuerySource> {
    fetcher: MultiSourceFetcher<S>,
    cache: Arc<SnapshotCache>,
    config: FeedConfig,
    sessions: Arc<SessionTracker>,
    state: Mutex<EngineState>,
    view_tx: watch::Sender<FeedView>,
}

struct EngineState {
    phase: FeedPhase,
    /// Where a failed fetch falls back to.
    last_stable: FeedPhase,
    mounted: bool,
    criteria: FilterCriteria,
    viewer: ViewerKey,
    listings: Vec<Listing>,
    cursors: Cursors,
    exhausted: BTreeSet<SourceKind>,
    has_more: bool,
    loading: bool,
    loading_more: bool,
    error: Option<FeedError>,
    /// No reset fetch has committed yet.
    first_commit_pending: bool,
    /// Only the mount fetch gets the initial-load delay.
    first_fetch_scheduled: bool,
    /// Set when a snapshot is served; consumed by the next delay selection.
    snapshot_unconsumed: bool,
    /// The listings on screen came from a snapshot for the current criteria.
    snapshot_on_screen: bool,
    is_transitioning: bool,
    visual_commit_ready: bool,
    listings_changed_trigger: u64,
    pending: Option<JoinHandle<()>>,
}

impl EngineState {
    fn new(viewer: ViewerKey) -> Self {
        Self {
            phase: FeedPhase::Idle,
            last_stable: FeedPhase::Idle,
            mounted: false,
            criteria: FilterCriteria::default(),
            viewer,
            listings: Vec::new(),
            cursors: Cursors::default(),
            exhausted: BTreeSet::new(),
            has_more: false,
            loading: false,
            loading_more: false,
            error: None,
            first_commit_pending: true,
            first_fetch_scheduled: false,
            snapshot_unconsumed: false,
            snapshot_on_screen: false,
            is_transitioning: false,
            visual_commit_ready: false,
            listings_changed_trigger: 0,
            pending: None,
        }
    }

    fn set_phase(&mut self, phase: FeedPhase) {
        self.phase = phase;
        if phase.is_stable() {
            self.last_stable = phase;
        }
    }

    fn view(&self) -> FeedView {
        FeedView {
            listings: self.listings.clone(),
            loading: self.loading,
            loading_more: self.loading_more,
            has_more: self.has_more,
            error: self.error.clone(),
            is_transitioning: self.is_transitioning,
            visual_commit_ready: self.visual_commit_ready,
            listings_changed_trigger: self.listings_changed_trigger,
            phase: self.phase,
        }
    }
}

impl<S: QuerySource> FeedOrchestrator<S> {
    pub fn new(
        source: Arc<S>,
        cache: Arc<SnapshotCache>,
        viewer: ViewerKey,
        config: FeedConfig,
    ) -> Self {
        ensure_metrics_described();
        let state = EngineState::new(viewer);
        let (view_tx, _) = watch::channel(state.view());
        Self {
            inner: Arc::new(Inner {
                fetcher: MultiSourceFetcher::new(source),
                cache,
                config,
                sessions: SessionTracker::new(),
                state: Mutex::new(state),
                view_tx,
            }),
        }
    }

    /// First activation. Serves the viewer's snapshot when `criteria` are
    /// clean and one exists, then schedules the live reset fetch.
    ///
    /// Must be called from within a tokio runtime. A second call behaves
    /// like [`FeedOrchestrator::criteria_changed`].
    pub fn mount(&self, criteria: FilterCriteria) {
        let mut st = self.inner.state.lock();
        if st.mounted {
            drop(st);
            self.criteria_changed(criteria);
            return;
        }
        st.mounted = true;
        st.criteria = criteria;

        let snapshot = if st.criteria.is_clean() {
            self.inner.cache.read(&st.viewer)
        } else {
            None
        };
        match snapshot {
            Some(snap) => self.inner.serve_snapshot(&mut st, snap),
            None => st.loading = true,
        }
        self.inner.publish(&st);
        self.inner.schedule(&mut st);
    }

    /// Reacts to new criteria: supersedes the current session and schedules
    /// a debounced reset fetch. Identical criteria are ignored.
    pub fn criteria_changed(&self, criteria: FilterCriteria) {
        let mut st = self.inner.state.lock();
        if !st.mounted {
            drop(st);
            self.mount(criteria);
            return;
        }
        if st.criteria == criteria {
            return;
        }
        st.criteria = criteria;
        st.snapshot_on_screen = false;
        self.inner.schedule(&mut st);
    }

    /// Switches viewer identity. The snapshot key follows the viewer and a
    /// reset fetch is scheduled.
    pub fn set_viewer(&self, viewer: ViewerKey) {
        let mut st = self.inner.state.lock();
        if st.viewer == viewer {
            return;
        }
        tracing::debug!(target: "feed", viewer = %viewer.storage_key(), "viewer changed");
        st.viewer = viewer;
        if st.mounted {
            st.snapshot_on_screen = false;
            self.inner.schedule(&mut st);
        }
    }

    /// Subscribes to `intent` as its single observer: mounts with the current
    /// criteria and reschedules on every change until the intent is dropped.
    pub fn attach(&self, intent: &FilterIntent) -> JoinHandle<()> {
        let mut rx = intent.subscribe();
        let initial = rx.borrow_and_update().clone();
        self.mount(initial);
        let this = self.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                this.criteria_changed(next);
            }
            tracing::debug!(target: "feed", "filter intent closed");
        })
    }

    /// Immediate reset fetch, superseding anything pending or in flight.
    pub async fn refresh(&self) {
        let session = {
            let mut st = self.inner.state.lock();
            if let Some(h) = st.pending.take() {
                h.abort();
            }
            st.loading_more = false;
            if !st.phase.is_stable() {
                st.phase = st.last_stable;
            }
            self.inner.sessions.begin()
        };
        self.inner.run_reset(&session).await;
    }

    /// Appends the next page. No-op unless the feed is hydrated, has more
    /// and nothing is loading.
    pub async fn fetch_more(&self) {
        let (session, criteria, cursors, skip) = {
            let mut st = self.inner.state.lock();
            // a scheduled reset will replace listings and cursors
            let reset_pending = st.pending.is_some();
            if st.phase != FeedPhase::Hydrated
                || !st.has_more
                || st.loading
                || st.loading_more
                || reset_pending
            {
                tracing::trace!(target: "feed", phase = ?st.phase, has_more = st.has_more, reset_pending, "fetch_more ignored");
                return;
            }
            st.loading_more = true;
            st.set_phase(FeedPhase::Paginating);
            self.inner.publish(&st);
            (
                self.inner.sessions.current(),
                st.criteria.clone(),
                st.cursors.clone(),
                st.exhausted.clone(),
            )
        };

        let result = self
            .inner
            .fetcher
            .fetch_with(FetchRequest {
                criteria: &criteria,
                cursors: &cursors,
                page_size: self.inner.config.page_size,
                reset: false,
                skip: &skip,
            })
            .await;

        let mut st = self.inner.state.lock();
        if !session.is_current() {
            self.inner.discard(&session, "pagination");
            return;
        }
        st.loading_more = false;
        st.set_phase(FeedPhase::Hydrated);
        match result {
            Ok(page) => {
                let seen: HashSet<(SourceKind, String)> = st
                    .listings
                    .iter()
                    .map(|l| (l.source_kind, l.id.clone()))
                    .collect();
                let before = st.listings.len();
                st.listings.extend(
                    page.listings
                        .into_iter()
                        .filter(|l| !seen.contains(&(l.source_kind, l.id.clone()))),
                );
                st.cursors = std::mem::take(&mut st.cursors).merged(&page.next_cursors);
                st.exhausted.extend(page.exhausted);
                st.has_more = page.has_more;
                st.error = None;
                tracing::debug!(
                    target: "feed",
                    session = session.id(),
                    appended = st.listings.len() - before,
                    has_more = st.has_more,
                    "page appended"
                );
            }
            Err(e) => {
                tracing::warn!(target: "feed", session = session.id(), "pagination failed: {e}");
                st.error = Some(e);
            }
        }
        self.inner.publish(&st);
    }

    pub fn view(&self) -> FeedView {
        self.inner.view_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedView> {
        self.inner.view_tx.subscribe()
    }

    pub fn phase(&self) -> FeedPhase {
        self.inner.state.lock().phase
    }

    pub fn viewer(&self) -> ViewerKey {
        self.inner.state.lock().viewer.clone()
    }
}

impl<S: QuerySource> Inner<S> {
    fn publish(&self, st: &EngineState) {
        self.view_tx.send_replace(st.view());
    }

    fn serve_snapshot(&self, st: &mut EngineState, snap: Snapshot) {
        tracing::debug!(
            target: "feed",
            viewer = %st.viewer.storage_key(),
            count = snap.listings.len(),
            "serving snapshot"
        );
        st.has_more = snap.listings.len() >= self.config.page_size;
        st.listings = snap.listings;
        st.cursors = snap.cursors;
        st.loading = false;
        st.snapshot_unconsumed = true;
        st.snapshot_on_screen = true;
        st.visual_commit_ready = true;
        st.listings_changed_trigger += 1;
        st.set_phase(FeedPhase::SnapshotServed);
    }

    /// Starts a new session and spawns its debounced reset fetch. Any pending
    /// fetch task is aborted; an in-flight one is also made stale.
    fn schedule(self: &Arc<Self>, st: &mut EngineState) {
        let session = self.sessions.begin();
        let delay = select_delay(
            DebounceInput {
                is_initial_load: !std::mem::replace(&mut st.first_fetch_scheduled, true),
                snapshot_served: std::mem::take(&mut st.snapshot_unconsumed),
            },
            &self.config.debounce,
        );

        if let Some(h) = st.pending.take() {
            h.abort();
        }
        st.loading_more = false;
        if !st.phase.is_stable() {
            st.phase = st.last_stable;
        }
        if !st.first_commit_pending {
            st.is_transitioning = true;
            st.visual_commit_ready = false;
        }
        self.publish(st);

        tracing::debug!(
            target: "feed",
            session = session.id(),
            delay_ms = delay.as_millis() as u64,
            "reset fetch scheduled"
        );
        let inner = Arc::clone(self);
        st.pending = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            inner.run_reset(&session).await;
        }));
    }

    async fn run_reset(&self, session: &FetchSession) {
        let criteria = {
            let mut st = self.state.lock();
            if !session.is_current() {
                return;
            }
            st.loading = !st.snapshot_on_screen;
            st.set_phase(FeedPhase::LiveLoading);
            self.publish(&st);
            st.criteria.clone()
        };

        let result = self
            .fetcher
            .fetch(&criteria, &Cursors::default(), self.config.page_size, true)
            .await;

        let mut st = self.state.lock();
        if !session.is_current() {
            self.discard(session, "reset");
            return;
        }
        st.pending = None;
        st.loading = false;
        st.is_transitioning = false;
        st.visual_commit_ready = true;
        match result {
            Ok(page) => {
                st.listings = page.listings;
                st.cursors = page.next_cursors;
                st.exhausted = page.exhausted;
                st.has_more = page.has_more;
                st.error = None;
                st.listings_changed_trigger += 1;
                st.first_commit_pending = false;
                st.snapshot_on_screen = false;
                st.set_phase(FeedPhase::Hydrated);
                tracing::debug!(
                    target: "feed",
                    session = session.id(),
                    count = st.listings.len(),
                    has_more = st.has_more,
                    "reset committed"
                );
                if criteria.is_clean() && !st.listings.is_empty() {
                    self.cache.write(&st.viewer, &st.listings, &st.cursors);
                }
            }
            Err(e) => {
                tracing::warn!(target: "feed", session = session.id(), "reset fetch failed: {e}");
                st.error = Some(e);
                st.phase = st.last_stable;
            }
        }
        self.publish(&st);
    }

    fn discard(&self, session: &FetchSession, what: &'static str) {
        counter!("feed_sessions_discarded_total").increment(1);
        tracing::debug!(target: "feed", session = session.id(), what, "discarding superseded result");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::InMemorySource;
    use serde_json::json;
    use std::time::Duration;

    fn offer(id: &str, ts: i64) -> serde_json::Value {
        json!({ "id": id, "title": format!("offer {id}"), "created_at": ts, "price": 10 })
    }

    fn orchestrator(source: Arc<InMemorySource>, page_size: usize) -> FeedOrchestrator<InMemorySource> {
        let config = FeedConfig {
            page_size,
            ..FeedConfig::default()
        };
        FeedOrchestrator::new(
            source,
            Arc::new(SnapshotCache::in_memory()),
            ViewerKey::Anonymous,
            config,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn mount_without_snapshot_loads_after_initial_delay() {
        let source = Arc::new(InMemorySource::new(vec![offer("a", 1_700_000_000)], vec![]));
        let orch = orchestrator(source.clone(), 20);

        orch.mount(FilterCriteria::default());
        assert!(orch.view().loading);
        assert_eq!(orch.phase(), FeedPhase::Idle);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(source.total_calls(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let v = orch.view();
        assert_eq!(v.phase, FeedPhase::Hydrated);
        assert!(!v.loading);
        assert_eq!(v.listings.len(), 1);
        assert_eq!(v.listings_changed_trigger, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_collapse_into_one_fetch() {
        let source = Arc::new(InMemorySource::new(vec![offer("a", 1_700_000_000)], vec![]));
        let orch = orchestrator(source.clone(), 20);
        orch.mount(FilterCriteria::default());
        tokio::time::sleep(Duration::from_millis(100)).await;
        let baseline = source.total_calls();

        for text in ["c", "ch", "cha", "chair"] {
            let mut c = FilterCriteria::default();
            c.text = text.to_string();
            orch.criteria_changed(c);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(orch.view().is_transitioning);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(source.total_calls() - baseline, 2, "one call per enabled source");
        assert!(!orch.view().is_transitioning);
        assert!(orch.view().visual_commit_ready);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_criteria_do_not_reschedule() {
        let source = Arc::new(InMemorySource::default());
        let orch = orchestrator(source.clone(), 20);
        orch.mount(FilterCriteria::default());
        tokio::time::sleep(Duration::from_millis(100)).await;
        let calls = source.total_calls();

        orch.criteria_changed(FilterCriteria::default());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.total_calls(), calls);
    }
}

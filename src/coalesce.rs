//! # Request coalescer
//! Identical concurrent calls share one in-flight future.
//!
//! Entries are keyed by call signature and removed as soon as the call settles,
//! successful or not, or once every caller waiting on it has gone away. This
//! is not a cache: nothing outlives the in-flight call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use parking_lot::Mutex;

type InFlight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;
type Table<T, E> = Mutex<HashMap<String, Entry<T, E>>>;

struct Entry<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Distinguishes this call from a later one under the same key.
    id: u64,
    fut: InFlight<T, E>,
    waiters: usize,
}

pub struct RequestCoalescer<T, E>
where
    T: Clone,
    E: Clone,
{
    in_flight: Arc<Table<T, E>>,
    next_id: AtomicU64,
}

/// Held by each caller for as long as it waits; the last one to leave an
/// unsettled call evicts it.
struct Waiter<'a, T, E>
where
    T: Clone,
    E: Clone,
{
    table: &'a Table<T, E>,
    key: String,
    id: u64,
}

impl<T, E> Drop for Waiter<'_, T, E>
where
    T: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        let mut table = self.table.lock();
        let gone = match table.get_mut(&self.key) {
            Some(entry) if entry.id == self.id => {
                entry.waiters = entry.waiters.saturating_sub(1);
                entry.waiters == 0
            }
            _ => false,
        };
        if gone {
            table.remove(&self.key);
            tracing::debug!(target: "feed::source", key = %self.key, "abandoned in-flight call evicted");
        }
    }
}

fn evict<T: Clone, E: Clone>(table: &Table<T, E>, key: &str, id: u64) {
    let mut table = table.lock();
    if table.get(key).is_some_and(|e| e.id == id) {
        table.remove(key);
    }
}

impl<T, E> Default for RequestCoalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> RequestCoalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Runs `call` unless a call with the same `key` is already pending, in
    /// which case its result is shared. `call` is not invoked when joining.
    pub async fn run<F, Fut>(&self, key: String, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (id, shared) = {
            let mut table = self.in_flight.lock();
            match table.get_mut(&key) {
                Some(entry) => {
                    counter!("feed_coalesced_total").increment(1);
                    tracing::debug!(target: "feed::source", %key, "joined in-flight call");
                    entry.waiters += 1;
                    (entry.id, entry.fut.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let evict_from = Arc::clone(&self.in_flight);
                    let evict_key = key.clone();
                    let call = call();
                    let fut = async move {
                        let out = call.await;
                        evict(&evict_from, &evict_key, id);
                        out
                    }
                    .boxed()
                    .shared();
                    table.insert(
                        key.clone(),
                        Entry {
                            id,
                            fut: fut.clone(),
                            waiters: 1,
                        },
                    );
                    (id, fut)
                }
            }
        };
        let _waiter = Waiter {
            table: &self.in_flight,
            key,
            id,
        };
        shared.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn slow_call(
        calls: Arc<AtomicUsize>,
        out: Result<u32, String>,
    ) -> impl Future<Output = Result<u32, String>> + Send + 'static {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            out
        }
    }

    #[tokio::test(start_paused = true)]
    async fn identical_concurrent_calls_share_one_execution() {
        let co: RequestCoalescer<u32, String> = RequestCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            co.run("k".into(), || slow_call(calls.clone(), Ok(7))),
            co.run("k".into(), || slow_call(calls.clone(), Ok(8))),
        );
        assert_eq!(a, Ok(7));
        assert_eq!(b, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(co.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_do_not_share() {
        let co: RequestCoalescer<u32, String> = RequestCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (a, b) = tokio::join!(
            co.run("a".into(), || slow_call(calls.clone(), Ok(1))),
            co.run("b".into(), || slow_call(calls.clone(), Ok(2))),
        );
        assert_eq!((a, b), (Ok(1), Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_calls_are_evicted_including_failures() {
        let co: RequestCoalescer<u32, String> = RequestCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = co
            .run("k".into(), || slow_call(calls.clone(), Err("boom".into())))
            .await;
        assert_eq!(first, Err("boom".to_string()));
        assert_eq!(co.in_flight(), 0);

        let second = co.run("k".into(), || slow_call(calls.clone(), Ok(3))).await;
        assert_eq!(second, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_callers_do_not_leave_entries_behind() {
        let co: RequestCoalescer<u32, String> = RequestCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let gave_up = tokio::time::timeout(
            Duration::from_millis(5),
            co.run("k".into(), || slow_call(calls.clone(), Ok(1))),
        )
        .await;
        assert!(gave_up.is_err());
        assert_eq!(co.in_flight(), 0);

        // the next identical call starts fresh instead of joining the abandoned one
        let again = co.run("k".into(), || slow_call(calls.clone(), Ok(2))).await;
        assert_eq!(again, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_caller_still_gets_the_shared_result() {
        let co: RequestCoalescer<u32, String> = RequestCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (early, patient) = tokio::join!(
            tokio::time::timeout(
                Duration::from_millis(5),
                co.run("k".into(), || slow_call(calls.clone(), Ok(4))),
            ),
            co.run("k".into(), || slow_call(calls.clone(), Ok(5))),
        );
        assert!(early.is_err());
        assert_eq!(patient, Ok(4));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(co.in_flight(), 0);
    }
}

//! Per-post comment cache.
//!
//! Fresh snapshots are served directly, stale ones are served while a single
//! background refetch runs, and cold reads block on a fetch that concurrent
//! callers for the same post share. Snapshots are replaced whole.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::data::CommentService;
use crate::floors::{self, ThreadEntry};

pub const DEFAULT_FRESH_FOR: Duration = Duration::from_secs(120);
pub const DEFAULT_SERVE_STALE_FOR: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CAPACITY: usize = 64;
const FETCH_ATTEMPTS: usize = 2;

pub type Snapshot = Arc<Vec<ThreadEntry>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("load comments for post {post_id}: {message}")]
    Fetch { post_id: i64, message: String },
    #[error("comment fetch for post {post_id} was abandoned")]
    Abandoned { post_id: i64 },
}

#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    /// Age below which a snapshot is returned without refetching.
    pub fresh_for: Duration,
    /// Age below which a stale snapshot is still returned while a refetch runs.
    pub serve_stale_for: Duration,
    pub capacity: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            fresh_for: DEFAULT_FRESH_FOR,
            serve_stale_for: DEFAULT_SERVE_STALE_FOR,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

struct Entry {
    snapshot: Snapshot,
    fetched_at: Instant,
}

type FetchResult = Result<Snapshot, CacheError>;

/// One running fetch and the callers waiting on it.
struct Flight {
    id: u64,
    waiters: Vec<Sender<FetchResult>>,
}

#[derive(Default)]
struct State {
    entries: HashMap<i64, Entry>,
    in_flight: HashMap<i64, Flight>,
    /// Waiters of fetches started before an `invalidate`, keyed by flight id.
    detached: HashMap<u64, Vec<Sender<FetchResult>>>,
    next_flight: u64,
    network_calls: u64,
}

impl State {
    fn start_flight(&mut self, post_id: i64, waiters: Vec<Sender<FetchResult>>) -> u64 {
        self.next_flight += 1;
        self.network_calls += 1;
        let id = self.next_flight;
        self.in_flight.insert(post_id, Flight { id, waiters });
        id
    }
}

struct Inner {
    service: Arc<dyn CommentService + Send + Sync>,
    policy: CachePolicy,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct CommentCache {
    inner: Arc<Inner>,
}

enum Plan {
    Ready(Snapshot),
    Wait(crossbeam_channel::Receiver<FetchResult>, Option<u64>),
}

impl CommentCache {
    pub fn new(service: Arc<dyn CommentService + Send + Sync>, policy: CachePolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                policy,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Returns the numbered comments of `post_id`, fetching when needed.
    ///
    /// Blocks only when no servable snapshot exists.
    pub fn get_comments(&self, post_id: i64) -> Result<Snapshot, CacheError> {
        let plan = {
            let mut state = self.inner.state.lock();
            let policy = self.inner.policy;
            let cached = state.entries.get(&post_id).map(|entry| {
                (entry.snapshot.clone(), entry.fetched_at.elapsed())
            });
            match cached {
                Some((snapshot, age)) if age < policy.fresh_for => Plan::Ready(snapshot),
                Some((snapshot, age)) if age < policy.serve_stale_for => {
                    if !state.in_flight.contains_key(&post_id) {
                        debug!(post_id, ?age, "revalidating stale comments");
                        let flight = state.start_flight(post_id, Vec::new());
                        self.spawn_fetch(post_id, flight);
                    }
                    Plan::Ready(snapshot)
                }
                _ => {
                    let (tx, rx) = bounded(1);
                    let start = match state.in_flight.get_mut(&post_id) {
                        Some(flight) => {
                            flight.waiters.push(tx);
                            None
                        }
                        None => Some(state.start_flight(post_id, vec![tx])),
                    };
                    Plan::Wait(rx, start)
                }
            }
        };

        match plan {
            Plan::Ready(snapshot) => Ok(snapshot),
            Plan::Wait(rx, start) => {
                if let Some(flight) = start {
                    self.spawn_fetch(post_id, flight);
                }
                rx.recv()
                    .unwrap_or(Err(CacheError::Abandoned { post_id }))
            }
        }
    }

    /// Cached snapshot regardless of age, without fetching.
    pub fn peek(&self, post_id: i64) -> Option<Snapshot> {
        self.inner
            .state
            .lock()
            .entries
            .get(&post_id)
            .map(|entry| entry.snapshot.clone())
    }

    /// Drops the snapshot of `post_id`. A fetch already running is detached:
    /// its callers still get its result, but it is not cached and later reads
    /// start a new fetch.
    pub fn invalidate(&self, post_id: i64) {
        let mut state = self.inner.state.lock();
        state.entries.remove(&post_id);
        if let Some(flight) = state.in_flight.remove(&post_id) {
            debug!(post_id, flight = flight.id, "detaching in-flight comment fetch");
            state.detached.insert(flight.id, flight.waiters);
        }
    }

    /// Number of fetches started since creation.
    pub fn network_calls(&self) -> u64 {
        self.inner.state.lock().network_calls
    }

    fn spawn_fetch(&self, post_id: i64, flight: u64) {
        let inner = self.inner.clone();
        thread::spawn(move || inner.fetch(post_id, flight));
    }
}

/// Publishes the outcome of a flight when dropped, including on unwind, so
/// waiters are never left blocked.
struct FlightGuard<'a> {
    inner: &'a Inner,
    post_id: i64,
    flight: u64,
    outcome: Option<FetchResult>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.inner
            .finish(self.post_id, self.flight, self.outcome.take());
    }
}

impl Inner {
    fn fetch(&self, post_id: i64, flight: u64) {
        let mut guard = FlightGuard {
            inner: self,
            post_id,
            flight,
            outcome: None,
        };
        guard.outcome = Some(self.load(post_id));
    }

    fn load(&self, post_id: i64) -> FetchResult {
        let mut last_error = None;
        for attempt in 1..=FETCH_ATTEMPTS {
            match self.service.load_comments(post_id) {
                Ok(comments) => return Ok(Arc::new(floors::number_comments(comments))),
                Err(err) => {
                    warn!(post_id, attempt, error = %format!("{err:#}"), "comment fetch failed");
                    last_error = Some(format!("{err:#}"));
                }
            }
        }
        Err(CacheError::Fetch {
            post_id,
            message: last_error.unwrap_or_default(),
        })
    }

    /// `None` means the fetch died; its waiters see `CacheError::Abandoned`.
    fn finish(&self, post_id: i64, flight: u64, outcome: Option<FetchResult>) {
        let waiters = {
            let mut state = self.state.lock();
            let current = state
                .in_flight
                .get(&post_id)
                .is_some_and(|running| running.id == flight);
            if current {
                if let Some(Ok(snapshot)) = &outcome {
                    self.store(&mut state, post_id, snapshot.clone());
                }
                state
                    .in_flight
                    .remove(&post_id)
                    .map(|running| running.waiters)
                    .unwrap_or_default()
            } else {
                debug!(post_id, flight, "discarding result of invalidated fetch");
                state.detached.remove(&flight).unwrap_or_default()
            }
        };
        match outcome {
            Some(outcome) => {
                for waiter in waiters {
                    let _ = waiter.send(outcome.clone());
                }
            }
            None => warn!(post_id, waiting = waiters.len(), "comment fetch aborted"),
        }
    }

    fn store(&self, state: &mut State, post_id: i64, snapshot: Snapshot) {
        if !state.entries.contains_key(&post_id) && state.entries.len() >= self.policy.capacity {
            if let Some(old_key) = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.fetched_at)
                .map(|(key, _)| *key)
            {
                state.entries.remove(&old_key);
            }
        }
        state.entries.insert(
            post_id,
            Entry {
                snapshot,
                fetched_at: Instant::now(),
            },
        );
    }
}

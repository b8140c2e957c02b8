use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use super::{FutureSpfResult, SpfResult, deliver, run_checkers};
use crate::checker::{DnsLookupContinuation, Listener};
use crate::core::{DnsError, DnsRequest, DnsResponse, DnsService, SpfSession};
use crate::spf::Engine;

// au-delà, les appelants attendent
pub const MAX_OUTSTANDING_REQUESTS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdResponse {
    pub id: u16,
    pub records: Result<Vec<String>, DnsError>,
}

#[derive(Debug, Default)]
struct QueueState {
    responses: VecDeque<IdResponse>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct ResponseQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl ResponseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_response(&self, response: IdResponse) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.responses.push_back(response);
        self.available.notify_one();
    }

    /// Waits for the next answer; `None` once the queue is closed and drained.
    pub fn remove_response(&self) -> Option<IdResponse> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(response) = state.responses.pop_front() {
                return Some(response);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        self.available.notify_all();
    }
}

/// Non-blocking DNS access: the answer for `id` is pushed onto `queue` later.
pub trait AsyncDnsService: Send + Sync {
    fn get_records_async(&self, request: DnsRequest, id: u16, queue: Arc<ResponseQueue>);
}

pub struct ThreadedDnsLookup {
    dns: Arc<dyn DnsService>,
}

impl ThreadedDnsLookup {
    pub fn new(dns: Arc<dyn DnsService>) -> Self {
        Self { dns }
    }
}

impl AsyncDnsService for ThreadedDnsLookup {
    fn get_records_async(&self, request: DnsRequest, id: u16, queue: Arc<ResponseQueue>) {
        let dns = Arc::clone(&self.dns);
        let target = Arc::clone(&queue);
        let spawned = thread::Builder::new()
            .name("spf-dns-lookup".to_string())
            .spawn(move || {
                let records = dns.get_records(&request);
                target.insert_response(IdResponse { id, records });
            });
        if let Err(err) = spawned {
            warn!(id, error = %err, "unable to start DNS lookup thread");
            queue.insert_response(IdResponse {
                id,
                records: Err(DnsError::timeout(err.to_string())),
            });
        }
    }
}

struct Pending {
    session: SpfSession,
    listener: Listener,
    result: Arc<FutureSpfResult>,
}

#[derive(Default)]
struct InFlight {
    entries: HashMap<u16, Pending>,
    // le worker a retiré une entrée et ne l'a pas encore terminée ou resoumise
    resuming: bool,
    stopping: bool,
}

impl InFlight {
    fn idle(&self) -> bool {
        self.entries.is_empty() && !self.resuming
    }
}

struct Shared {
    engine: Arc<Engine>,
    dns: Arc<dyn AsyncDnsService>,
    queue: Arc<ResponseQueue>,
    pending: Mutex<InFlight>,
    released: Condvar,
    next_id: AtomicU16,
}

/// Runs checkers on the submitting thread until the first lookup, then
/// resumes each session on one worker thread as its answers arrive.
pub(crate) struct StagedExecutor {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl StagedExecutor {
    pub(crate) fn new(engine: Arc<Engine>, dns: Arc<dyn AsyncDnsService>) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            engine,
            dns,
            queue: Arc::new(ResponseQueue::new()),
            pending: Mutex::new(InFlight::default()),
            released: Condvar::new(),
            next_id: AtomicU16::new(0),
        });
        let worker_state = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("SPFExecutor".to_string())
            .spawn(move || worker_state.run())?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub(crate) fn execute(&self, session: SpfSession, result: Arc<FutureSpfResult>) {
        self.shared.execute(session, result, true);
    }
}

impl Drop for StagedExecutor {
    /// Sessions already submitted run to completion before the worker stops.
    fn drop(&mut self) {
        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pending.stopping = true;
            if pending.idle() {
                self.shared.queue.close();
            }
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("SPF executor worker panicked");
            }
        }
    }
}

impl Shared {
    fn execute(&self, mut session: SpfSession, result: Arc<FutureSpfResult>, throttle: bool) {
        match run_checkers(&mut session, &self.engine) {
            Some(continuation) => self.submit(session, result, continuation, throttle),
            None => result.set_result(SpfResult::from_session(&session)),
        }
    }

    fn submit(
        &self,
        session: SpfSession,
        result: Arc<FutureSpfResult>,
        continuation: DnsLookupContinuation,
        throttle: bool,
    ) {
        let (request, listener) = continuation.into_parts();
        let id = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if throttle {
                while pending.entries.len() > MAX_OUTSTANDING_REQUESTS {
                    pending = self
                        .released
                        .wait(pending)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
            let id = self.allocate_id(&pending.entries);
            pending.entries.insert(
                id,
                Pending {
                    session,
                    listener,
                    result,
                },
            );
            id
        };
        debug!(id, request = %request, "submitting lookup");
        self.dns
            .get_records_async(request, id, Arc::clone(&self.queue));
    }

    fn allocate_id(&self, pending: &HashMap<u16, Pending>) -> u16 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if !pending.contains_key(&id) {
                return id;
            }
        }
    }

    fn run(&self) {
        while let Some(response) = self.queue.remove_response() {
            let entry = {
                let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                let entry = pending.entries.remove(&response.id);
                pending.resuming = entry.is_some();
                self.released.notify_all();
                entry
            };
            let Some(Pending {
                mut session,
                listener,
                result,
            }) = entry
            else {
                warn!(id = response.id, "response for unknown request");
                continue;
            };
            let answer = DnsResponse::from(response.records);
            match deliver(&mut session, &self.engine, listener, answer) {
                Some(next) => self.submit(session, result, next, false),
                None => result.set_result(SpfResult::from_session(&session)),
            }
            self.finish_resume();
        }
    }

    fn finish_resume(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.resuming = false;
        if pending.stopping && pending.idle() {
            debug!("executor drained, stopping worker");
            self.queue.close();
        }
    }
}

mod result;
mod staged;

use std::sync::Arc;

use tracing::{debug, trace};

pub use result::{FutureSpfResult, HEADER_NAME, ResultCode, SpfResult};
pub use staged::{
    AsyncDnsService, IdResponse, MAX_OUTSTANDING_REQUESTS, ResponseQueue, ThreadedDnsLookup,
};
pub(crate) use staged::StagedExecutor;

use crate::checker::{DnsLookupContinuation, Listener};
use crate::core::{DnsResponse, SpfError, SpfSession};
use crate::spf::Engine;

/// Runs checkers until the stack is empty or one of them needs DNS.
pub(crate) fn run_checkers(
    session: &mut SpfSession,
    engine: &Engine,
) -> Option<DnsLookupContinuation> {
    while let Some(checker) = session.pop_checker() {
        trace!(checker = %checker, "running checker");
        match checker.check(session, engine) {
            Ok(Some(continuation)) => return Some(continuation),
            Ok(None) => {}
            Err(error) => unwind(error, session),
        }
    }
    None
}

/// Feeds a DNS answer to `listener`, then keeps running checkers.
pub(crate) fn deliver(
    session: &mut SpfSession,
    engine: &Engine,
    listener: Listener,
    response: DnsResponse,
) -> Option<DnsLookupContinuation> {
    match listener.on_dns_response(response, session, engine) {
        Ok(Some(continuation)) => return Some(continuation),
        Ok(None) => {}
        Err(error) => unwind(error, session),
    }
    run_checkers(session, engine)
}

fn unwind(mut error: SpfError, session: &mut SpfSession) {
    while let Some(catcher) = session.pop_catcher() {
        debug!(catcher = %catcher, error = %error, "unwinding");
        match catcher.on_exception(error, session) {
            Ok(()) => return,
            Err(next) => error = next,
        }
    }
    debug!(error = %error, "error escaped every catcher");
    session.set_current_result_expanded(error.result());
}

pub(crate) struct SynchronousExecutor {
    engine: Arc<Engine>,
}

impl SynchronousExecutor {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub(crate) fn execute(&self, mut session: SpfSession, result: &FutureSpfResult) {
        let engine = self.engine.as_ref();
        let mut next = run_checkers(&mut session, engine);
        while let Some(continuation) = next {
            let (request, listener) = continuation.into_parts();
            trace!(request = %request, "resolving synchronously");
            let response = DnsResponse::from(engine.dns.get_records(&request));
            next = deliver(&mut session, engine, listener, response);
        }
        result.set_result(SpfResult::from_session(&session));
    }
}

pub(crate) enum Executor {
    Synchronous(SynchronousExecutor),
    Staged(StagedExecutor),
}

impl Executor {
    pub(crate) fn execute(&self, session: SpfSession, result: Arc<FutureSpfResult>) {
        match self {
            Self::Synchronous(executor) => executor.execute(session, &result),
            Self::Staged(executor) => executor.execute(session, result),
        }
    }
}

//! SPF evaluation entry points.
//!
//! [`Spf`] bundles the DNS service, the record parser, macro expansion and
//! the configured policy chain, and runs each check on the selected
//! executor.

mod options;

use std::io;
use std::sync::Arc;

use tracing::info;

pub use options::SpfOptions;

use crate::checker::Checker;
use crate::core::{DnsService, MacroExpand, SpfSession};
use crate::executor::{
    AsyncDnsService, Executor, FutureSpfResult, SpfResult, StagedExecutor, SynchronousExecutor,
};
use crate::parser::RecordParser;
use crate::policies::PolicyChain;

/// Collaborators shared by every checker of every session.
pub(crate) struct Engine {
    pub(crate) dns: Arc<dyn DnsService>,
    pub(crate) macro_expand: MacroExpand,
    pub(crate) parser: RecordParser,
    pub(crate) policies: PolicyChain,
}

impl Engine {
    fn new(dns: Arc<dyn DnsService>, options: &SpfOptions) -> Self {
        if let Some(timeout) = options.timeout() {
            dns.set_timeout(timeout);
        }
        Self {
            macro_expand: MacroExpand::new(Some(Arc::clone(&dns))),
            parser: RecordParser::new(),
            policies: PolicyChain::from_options(options),
            dns,
        }
    }
}

/// SPF checker for `(client ip, envelope sender, HELO)` identities.
pub struct Spf {
    executor: Executor,
}

impl Spf {
    /// Synchronous checker with default options.
    pub fn new(dns: Arc<dyn DnsService>) -> Self {
        Self::with_options(dns, SpfOptions::default())
    }

    /// Synchronous checker: lookups run on the calling thread.
    pub fn with_options(dns: Arc<dyn DnsService>, options: SpfOptions) -> Self {
        let engine = Arc::new(Engine::new(dns, &options));
        Self {
            executor: Executor::Synchronous(SynchronousExecutor::new(engine)),
        }
    }

    /// Staged checker: lookups go through `async_dns` and sessions resume on
    /// a dedicated worker thread.
    pub fn staged(
        dns: Arc<dyn DnsService>,
        async_dns: Arc<dyn AsyncDnsService>,
        options: SpfOptions,
    ) -> io::Result<Self> {
        let engine = Arc::new(Engine::new(dns, &options));
        Ok(Self {
            executor: Executor::Staged(StagedExecutor::new(engine, async_dns)?),
        })
    }

    /// Checks the identity and blocks until the result is known.
    pub fn check_spf(&self, ip: &str, mail_from: &str, helo: &str) -> SpfResult {
        self.check_spf_future(ip, mail_from, helo).wait()
    }

    /// Starts a check and returns immediately. With the synchronous executor
    /// the returned future is already complete.
    pub fn check_spf_future(&self, ip: &str, mail_from: &str, helo: &str) -> Arc<FutureSpfResult> {
        let mut session = SpfSession::new(mail_from, helo, ip);
        session.push_checker(Checker::Default);
        session.push_checker(Checker::Spf);

        let result = Arc::new(FutureSpfResult::new());
        let sender = session.mail_from().to_string();
        let ip = ip.to_string();
        result.add_listener(move |outcome| {
            info!(ip = %ip, mail_from = %sender, result = %outcome.result(), "SPF check finished");
        });
        self.executor.execute(session, Arc::clone(&result));
        result
    }
}

#[cfg(test)]
mod tests;

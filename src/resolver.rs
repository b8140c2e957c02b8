//! [`DnsService`] backed by the system resolver (optional `with-dns` feature).

use std::fmt;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use trust_dns_resolver::{
    Resolver,
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::rr::{RData, RecordType as WireType},
    system_conf::read_system_conf,
};

use crate::core::{DEFAULT_RECORD_LIMIT, DnsError, DnsRequest, DnsService, RecordType};
use crate::executor::SpfResult;
use crate::spf::{Spf, SpfOptions};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Errors raised while setting up the bundled resolver.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("resolver configuration could not be read: {message}")]
    SystemConf { message: String },
    #[error("resolver initialization failed: {source}")]
    ResolverInit {
        #[source]
        source: std::io::Error,
    },
}

impl ResolverError {
    pub(crate) fn system_conf(err: impl fmt::Display) -> Self {
        Self::SystemConf {
            message: err.to_string(),
        }
    }

    pub(crate) fn resolver_init(source: std::io::Error) -> Self {
        Self::ResolverInit { source }
    }
}

/// Blocking lookups through `trust-dns-resolver`.
///
/// `SPF` (type 99) questions are answered with an empty set so that record
/// retrieval falls through to TXT.
pub struct TrustDnsService {
    config: ResolverConfig,
    opts: Mutex<ResolverOpts>,
    resolver: RwLock<Resolver>,
    record_limit: usize,
}

impl TrustDnsService {
    /// Uses the host's resolver configuration with a 20 second timeout.
    pub fn from_system_conf() -> Result<Self, ResolverError> {
        let (config, mut opts) = read_system_conf().map_err(ResolverError::system_conf)?;
        opts.timeout = DEFAULT_TIMEOUT;
        Self::new(config, opts)
    }

    pub fn new(config: ResolverConfig, opts: ResolverOpts) -> Result<Self, ResolverError> {
        let resolver =
            Resolver::new(config.clone(), opts.clone()).map_err(ResolverError::resolver_init)?;
        Ok(Self {
            config,
            opts: Mutex::new(opts),
            resolver: RwLock::new(resolver),
            record_limit: DEFAULT_RECORD_LIMIT,
        })
    }

    pub fn with_record_limit(mut self, limit: usize) -> Self {
        self.record_limit = limit;
        self
    }
}

impl fmt::Debug for TrustDnsService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustDnsService")
            .field("record_limit", &self.record_limit)
            .finish_non_exhaustive()
    }
}

impl DnsService for TrustDnsService {
    fn get_records(&self, request: &DnsRequest) -> Result<Vec<String>, DnsError> {
        let wire_type = match request.record_type() {
            RecordType::A => WireType::A,
            RecordType::Aaaa => WireType::AAAA,
            RecordType::Mx => WireType::MX,
            RecordType::Ptr => WireType::PTR,
            RecordType::Txt => WireType::TXT,
            RecordType::Spf => return Ok(Vec::new()),
        };
        let resolver = self.resolver.read().unwrap_or_else(PoisonError::into_inner);
        let lookup = match resolver.lookup(request.hostname(), wire_type) {
            Ok(lookup) => lookup,
            Err(err) => {
                if should_treat_as_empty(&err) {
                    return Ok(Vec::new());
                }
                debug!(request = %request, error = %err, "lookup failed");
                return Err(DnsError::timeout(format!("{request}: {err}")));
            }
        };
        Ok(lookup.iter().filter_map(answer_text).collect())
    }

    fn set_timeout(&self, timeout: Duration) {
        let mut opts = self.opts.lock().unwrap_or_else(PoisonError::into_inner);
        opts.timeout = timeout;
        match Resolver::new(self.config.clone(), opts.clone()) {
            Ok(resolver) => {
                *self.resolver.write().unwrap_or_else(PoisonError::into_inner) = resolver;
            }
            Err(err) => warn!(error = %err, "keeping previous resolver"),
        }
    }

    fn record_limit(&self) -> usize {
        self.record_limit
    }
}

fn answer_text(data: &RData) -> Option<String> {
    match data {
        RData::A(address) => Some(address.to_string()),
        RData::AAAA(address) => Some(address.to_string()),
        RData::MX(mx) => Some(trim_root(mx.exchange().to_string())),
        RData::PTR(name) => Some(trim_root(name.to_string())),
        RData::TXT(txt) => {
            let mut record = String::new();
            for piece in txt.txt_data().iter() {
                record.push_str(&String::from_utf8_lossy(piece));
            }
            Some(record)
        }
        _ => None,
    }
}

fn trim_root(mut name: String) -> String {
    if name.ends_with('.') {
        name.pop();
    }
    name
}

fn should_treat_as_empty(err: &ResolveError) -> bool {
    matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

/// One-shot check with the system resolver and default options.
pub fn check_spf(ip: &str, mail_from: &str, helo: &str) -> Result<SpfResult, ResolverError> {
    let dns = TrustDnsService::from_system_conf()?;
    let spf = Spf::with_options(std::sync::Arc::new(dns), SpfOptions::default());
    Ok(spf.check_spf(ip, mail_from, helo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_dot_is_trimmed() {
        assert_eq!(trim_root("mx.example.com.".to_string()), "mx.example.com");
        assert_eq!(trim_root("mx.example.com".to_string()), "mx.example.com");
    }

    #[test]
    fn spf_type_is_never_queried() {
        let dns = TrustDnsService::new(ResolverConfig::default(), ResolverOpts::default())
            .expect("resolver");
        let request = DnsRequest::new("example.com", RecordType::Spf).unwrap();
        assert_eq!(dns.get_records(&request), Ok(Vec::new()));
    }
}

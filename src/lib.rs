#![forbid(unsafe_code)]
//! spfcheck_lib — évaluation Sender Policy Framework (RFC 4408 / RFC 7208)
//!
//! [`Spf::check_spf`] evaluates the policy published by the sender's domain
//! for a `(client ip, MAIL FROM, HELO)` identity and returns an
//! [`SpfResult`] with the verdict, the explanation and the `Received-SPF`
//! header text. DNS access goes through a [`DnsService`]; the `with-dns`
//! feature bundles one based on the system resolver.

mod checker;
pub mod core;
pub mod executor;
pub mod parser;
pub mod policies;
pub mod spf;
pub mod terms;

pub use checker::DnsLookupContinuation;
pub use crate::core::{
    DEFAULT_RECORD_LIMIT, DnsError, DnsRequest, DnsResponse, DnsService, ExpansionMode, IpAddress,
    MAX_DEPTH, MacroData, MacroExpand, RecordType, SpfError, SpfSession, local_host_names,
};
pub use executor::{
    AsyncDnsService, FutureSpfResult, HEADER_NAME, IdResponse, MAX_OUTSTANDING_REQUESTS,
    ResponseQueue, ResultCode, SpfResult, ThreadedDnsLookup,
};
pub use parser::{RecordParser, is_spf1_record};
pub use policies::{
    BEST_GUESS_RECORD, DEFAULT_EXPLANATION, RecordSource, StaticRecords, TRUSTED_FORWARDER_HOST,
};
pub use spf::{Spf, SpfOptions};
pub use terms::{Directive, DualCidr, Mechanism, Modifier, Qualifier, SpfRecord};

#[cfg(feature = "with-dns")]
pub mod resolver;
#[cfg(feature = "with-dns")]
pub use resolver::{ResolverError, TrustDnsService, check_spf};

#[cfg(test)]
pub(crate) mod stub;

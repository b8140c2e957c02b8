use std::collections::VecDeque;

use tracing::{debug, trace};

use super::{DualCidr, Mechanism, Qualifier};
use crate::checker::{CheckResult, Checker, DnsLookupContinuation, Listener};
use crate::core::{
    DnsRequest, DnsResponse, DnsService, ExpansionMode, IpAddress, RecordType, SpfError,
    SpfSession,
};
use crate::spf::Engine;

/// Session state saved while an included domain is evaluated.
#[derive(Debug)]
pub(crate) struct IncludeState {
    domain: String,
    result: Option<Qualifier>,
    ignore_explanation: bool,
}

impl IncludeState {
    pub(crate) fn domain(&self) -> &str {
        &self.domain
    }

    fn restore(self, session: &mut SpfSession) -> Option<Qualifier> {
        let nested = session.current_result();
        session.set_current_domain(self.domain);
        session.set_current_result(self.result);
        session.set_ignore_explanation(self.ignore_explanation);
        nested
    }
}

/// First phase of a mechanism: address mechanisms answer directly, the rest
/// count against the lookup limit and validate their domain-spec.
pub(crate) fn check(mechanism: Mechanism, session: &mut SpfSession, engine: &Engine) -> CheckResult {
    match mechanism {
        Mechanism::All => {
            session.mechanism_result = Some(true);
            Ok(None)
        }
        Mechanism::Ip4 { network } | Mechanism::Ip6 { network } => {
            let matched = network.contains(session.client_address()?);
            trace!(network = %network, matched, "address mechanism");
            session.mechanism_result = Some(matched);
            Ok(None)
        }
        other => {
            session.increase_current_depth()?;
            let domain = other.domain().map(str::to_string);
            session.push_checker(Checker::MechanismExpanded(other));
            engine
                .macro_expand
                .check_expand(domain.as_deref(), session, ExpansionMode::Domain)
        }
    }
}

/// Second phase, run once every macro in the domain-spec can be expanded.
pub(crate) fn check_expanded(
    mechanism: Mechanism,
    session: &mut SpfSession,
    engine: &Engine,
) -> CheckResult {
    let host = expand_host(mechanism.domain(), session, engine)?;
    match mechanism {
        Mechanism::A { cidr, .. } => lookup_addresses(host, cidr, session),
        Mechanism::Mx { cidr, .. } => match DnsRequest::new(host, RecordType::Mx) {
            Ok(request) => Ok(Some(DnsLookupContinuation::new(
                request,
                Listener::MxTargets { cidr },
            ))),
            Err(SpfError::None(reason)) => no_match(session, &reason),
            Err(err) => Err(err),
        },
        Mechanism::Ptr { .. } => {
            let reverse = session.client_address()?.reverse_ip();
            let request = DnsRequest::new(reverse, RecordType::Ptr)?;
            Ok(Some(DnsLookupContinuation::new(
                request,
                Listener::PtrNames { target: host },
            )))
        }
        Mechanism::Include { .. } => {
            start_include(host, session);
            Ok(None)
        }
        Mechanism::Exists { .. } => match DnsRequest::new(host, RecordType::A) {
            Ok(request) => Ok(Some(DnsLookupContinuation::new(request, Listener::Exists))),
            Err(SpfError::None(reason)) => no_match(session, &reason),
            Err(err) => Err(err),
        },
        Mechanism::All | Mechanism::Ip4 { .. } | Mechanism::Ip6 { .. } => Ok(None),
    }
}

/// Expands a domain-spec, defaulting to the current domain.
pub(crate) fn expand_host(
    domain: Option<&str>,
    session: &mut SpfSession,
    engine: &Engine,
) -> Result<String, SpfError> {
    match domain {
        None => Ok(session.current_domain().to_string()),
        Some(spec) => engine
            .macro_expand
            .expand(spec, session, ExpansionMode::Domain)?
            .ok_or_else(|| SpfError::perm(format!("Unable to expand {spec}"))),
    }
}

fn no_match(session: &mut SpfSession, reason: &str) -> CheckResult {
    debug!(reason, "mechanism cannot match");
    session.mechanism_result = Some(false);
    Ok(None)
}

fn address_type(session: &SpfSession) -> Result<RecordType, SpfError> {
    Ok(if session.client_address()?.is_ipv4() {
        RecordType::A
    } else {
        RecordType::Aaaa
    })
}

fn lookup_addresses(host: String, cidr: DualCidr, session: &mut SpfSession) -> CheckResult {
    if IpAddress::is_valid(&host) {
        session.mechanism_result = Some(matches_any(session, &[host], cidr)?);
        return Ok(None);
    }
    match DnsRequest::new(host, address_type(session)?) {
        Ok(request) => Ok(Some(DnsLookupContinuation::new(
            request,
            Listener::AddressMatch { cidr },
        ))),
        Err(SpfError::None(reason)) => no_match(session, &reason),
        Err(err) => Err(err),
    }
}

/// True when any of `records` shares the client's network at `cidr`.
fn matches_any(session: &SpfSession, records: &[String], cidr: DualCidr) -> Result<bool, SpfError> {
    let mut network = session.client_address()?.clone();
    network.set_mask(if network.is_ipv4() { cidr.ip4 } else { cidr.ip6 });
    Ok(records.iter().any(|record| match IpAddress::parse(record) {
        Ok(address) => network.contains(&address),
        Err(_) => {
            debug!(record = %record, "skipping unparsable address record");
            false
        }
    }))
}

fn dns_failure(request: &str) -> SpfError {
    SpfError::temp(format!("Timeout querying dns server for {request}"))
}

pub(crate) fn on_address_records(
    response: DnsResponse,
    cidr: DualCidr,
    session: &mut SpfSession,
) -> CheckResult {
    let records = response.records().map_err(|err| dns_failure(&err.to_string()))?;
    session.mechanism_result = Some(matches_any(session, records, cidr)?);
    Ok(None)
}

pub(crate) fn on_mx_targets(
    response: DnsResponse,
    cidr: DualCidr,
    session: &mut SpfSession,
    dns: &dyn DnsService,
) -> CheckResult {
    let hosts = response
        .into_records()
        .map_err(|err| dns_failure(&err.to_string()))?;
    if hosts.len() > dns.record_limit() {
        return Err(SpfError::perm(format!(
            "Maximum MX lookups reached ({})",
            dns.record_limit()
        )));
    }
    let pending = hosts
        .into_iter()
        .map(|host| host.trim_end_matches('.').to_string())
        .collect();
    next_mx_lookup(pending, cidr, session)
}

pub(crate) fn on_mx_addresses(
    response: DnsResponse,
    cidr: DualCidr,
    pending: VecDeque<String>,
    session: &mut SpfSession,
) -> CheckResult {
    let records = response.records().map_err(|err| dns_failure(&err.to_string()))?;
    if matches_any(session, records, cidr)? {
        session.mechanism_result = Some(true);
        return Ok(None);
    }
    next_mx_lookup(pending, cidr, session)
}

fn next_mx_lookup(
    mut pending: VecDeque<String>,
    cidr: DualCidr,
    session: &mut SpfSession,
) -> CheckResult {
    let record_type = address_type(session)?;
    while let Some(host) = pending.pop_front() {
        match DnsRequest::new(host, record_type) {
            Ok(request) => {
                return Ok(Some(DnsLookupContinuation::new(
                    request,
                    Listener::MxAddresses { cidr, pending },
                )));
            }
            Err(err) => debug!(error = %err, "skipping MX host"),
        }
    }
    session.mechanism_result = Some(false);
    Ok(None)
}

pub(crate) fn on_ptr_names(
    response: DnsResponse,
    target: String,
    session: &mut SpfSession,
    dns: &dyn DnsService,
) -> CheckResult {
    match response.into_records() {
        Ok(names) => {
            let pending = names
                .into_iter()
                .take(dns.record_limit())
                .map(|name| name.trim_end_matches('.').to_string())
                .collect();
            next_ptr_lookup(target, pending, session)
        }
        Err(err) => no_match(session, &err.to_string()),
    }
}

pub(crate) fn on_ptr_forward(
    response: DnsResponse,
    target: String,
    candidate: String,
    pending: VecDeque<String>,
    session: &mut SpfSession,
) -> CheckResult {
    if let Ok(records) = response.records() {
        let client = session.client_address()?;
        let validated = records
            .iter()
            .filter_map(|record| IpAddress::parse(record).ok())
            .any(|address| address.contains(client));
        if validated && is_subdomain(&candidate, &target) {
            debug!(name = %candidate, target = %target, "ptr mechanism matched");
            session.mechanism_result = Some(true);
            return Ok(None);
        }
    }
    next_ptr_lookup(target, pending, session)
}

fn next_ptr_lookup(
    target: String,
    mut pending: VecDeque<String>,
    session: &mut SpfSession,
) -> CheckResult {
    let record_type = address_type(session)?;
    while let Some(candidate) = pending.pop_front() {
        if let Ok(request) = DnsRequest::new(candidate.clone(), record_type) {
            return Ok(Some(DnsLookupContinuation::new(
                request,
                Listener::PtrForward {
                    target,
                    candidate,
                    pending,
                },
            )));
        }
    }
    session.mechanism_result = Some(false);
    Ok(None)
}

fn is_subdomain(name: &str, target: &str) -> bool {
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    let target = target.trim_end_matches('.').to_ascii_lowercase();
    name == target || name.ends_with(&format!(".{target}"))
}

pub(crate) fn on_exists(response: DnsResponse, session: &mut SpfSession) -> CheckResult {
    let records = response.records().map_err(|err| dns_failure(&err.to_string()))?;
    session.mechanism_result = Some(!records.is_empty());
    Ok(None)
}

/// Saves the caller's state and evaluates `host` as a nested check.
fn start_include(host: String, session: &mut SpfSession) {
    let state = IncludeState {
        domain: session.current_domain().to_string(),
        result: session.current_result(),
        ignore_explanation: session.ignore_explanation(),
    };
    debug!(from = %state.domain, to = %host, "evaluating include");
    session.push_checker(Checker::IncludeCleanup(state));
    session.set_current_domain(host);
    session.set_current_result(None);
    session.set_ignore_explanation(true);
    session.push_checker(Checker::Spf);
}

/// Nested evaluation completed: only `pass` counts as a match.
pub(crate) fn include_finished(state: IncludeState, session: &mut SpfSession) {
    let nested = state.restore(session);
    session.mechanism_result = Some(nested == Some(Qualifier::Pass));
}

/// Nested evaluation failed. A domain without a usable policy is a no-match,
/// processing errors propagate.
pub(crate) fn include_failed(
    state: IncludeState,
    error: SpfError,
    session: &mut SpfSession,
) -> Result<(), SpfError> {
    state.restore(session);
    match error {
        SpfError::None(_) | SpfError::Neutral(_) => {
            debug!(error = %error, "included domain did not match");
            session.mechanism_result = Some(false);
            Ok(())
        }
        other => Err(other),
    }
}

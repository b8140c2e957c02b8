//! Policy stages run before a domain's record is evaluated: they obtain the
//! record (from overrides, DNS, a best guess or a fallback), parse it and
//! attach the checks appended after its own terms.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::checker::{CheckResult, Checker, DnsLookupContinuation, Listener};
use crate::core::grammar::is_fqdn;
use crate::core::{
    DnsRequest, DnsResponse, ExpansionMode, RecordSlot, RecordType, SpfError, SpfSession,
};
use crate::parser::{RecordParser, is_spf1_record};
use crate::spf::{Engine, SpfOptions};
use crate::terms::modifiers::wants_explanation;
use crate::terms::{Directive, Mechanism, Qualifier, RecordHook, SpfRecord};

/// Record evaluated when a domain publishes none and best guess is enabled.
pub const BEST_GUESS_RECORD: &str = "v=spf1 a/24 mx/24 ptr ~all";

/// Host included ahead of a final `-all`/`?all` when trusted forwarders are
/// accepted.
pub const TRUSTED_FORWARDER_HOST: &str = "spf.trusted-forwarder.org";

pub const DEFAULT_EXPLANATION: &str = "http://www.openspf.org/why.html?sender=%{S}&ip=%{I}";

/// Source of locally configured records, consulted by the override and
/// fallback stages.
pub trait RecordSource: Send + Sync + fmt::Debug {
    fn get_spf_record(&self, domain: &str) -> Option<String>;
}

/// Records keyed by host name. A `*.` prefix matches every subdomain; the
/// most specific entry wins.
#[derive(Debug, Clone, Default)]
pub struct StaticRecords {
    entries: HashMap<String, String>,
}

impl StaticRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the record for `host`, rejecting records that do not
    /// parse.
    pub fn add_entry(&mut self, host: &str, record: &str) -> Result<(), SpfError> {
        RecordParser::new().parse(record)?;
        self.entries
            .insert(normalize_host(host), record.trim().to_string());
        Ok(())
    }

    pub fn with_entry(mut self, host: &str, record: &str) -> Result<Self, SpfError> {
        self.add_entry(host, record)?;
        Ok(self)
    }

    pub fn remove_entry(&mut self, host: &str) -> Option<String> {
        self.entries.remove(&normalize_host(host))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RecordSource for StaticRecords {
    fn get_spf_record(&self, domain: &str) -> Option<String> {
        let domain = normalize_host(domain);
        if let Some(record) = self.entries.get(&domain) {
            return Some(record.clone());
        }
        let mut rest = domain.as_str();
        while let Some((_, parent)) = rest.split_once('.') {
            if let Some(record) = self.entries.get(&format!("*.{parent}")) {
                return Some(record.clone());
            }
            rest = parent;
        }
        None
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PolicyStage {
    Override,
    InitialChecks,
    Retrieve,
    RetrieveStrict,
    BestGuess,
    ParseRecord,
    Fallback,
    NoRecordFound,
    TrustedForwarder,
    NeutralIfUnmatched,
    DefaultExplanation,
}

/// Stage order and the sources the stages read from.
#[derive(Debug)]
pub(crate) struct PolicyChain {
    stages: Vec<PolicyStage>,
    override_policy: Option<Arc<dyn RecordSource>>,
    fallback_policy: Option<Arc<dyn RecordSource>>,
    default_explanation: String,
}

impl PolicyChain {
    pub(crate) fn from_options(options: &SpfOptions) -> Self {
        let mut stages = Vec::new();
        if options.override_policy.is_some() {
            stages.push(PolicyStage::Override);
        }
        stages.push(PolicyStage::InitialChecks);
        stages.push(if options.spf_must_equal_txt {
            PolicyStage::RetrieveStrict
        } else {
            PolicyStage::Retrieve
        });
        if options.use_best_guess {
            stages.push(PolicyStage::BestGuess);
        }
        stages.push(PolicyStage::ParseRecord);
        if options.fallback_policy.is_some() {
            stages.push(PolicyStage::Fallback);
        }
        stages.push(PolicyStage::NoRecordFound);
        if options.use_trusted_forwarder {
            stages.push(PolicyStage::TrustedForwarder);
        }
        stages.push(PolicyStage::NeutralIfUnmatched);
        stages.push(PolicyStage::DefaultExplanation);

        Self {
            stages,
            override_policy: options.override_policy.clone(),
            fallback_policy: options.fallback_policy.clone(),
            default_explanation: options
                .default_explanation
                .clone()
                .unwrap_or_else(|| DEFAULT_EXPLANATION.to_string()),
        }
    }

    pub(crate) fn stages(&self) -> &[PolicyStage] {
        &self.stages
    }
}

pub(crate) fn check(stage: PolicyStage, session: &mut SpfSession, engine: &Engine) -> CheckResult {
    let chain = &engine.policies;
    match stage {
        PolicyStage::Override => {
            if session.record.is_none() {
                load_local(chain.override_policy.as_deref(), session, engine, "override")?;
            }
            Ok(None)
        }
        PolicyStage::InitialChecks => {
            session.client_address()?;
            if !is_fqdn(session.current_domain()) {
                return Err(SpfError::none(format!(
                    "Not a valid domain: {}",
                    session.current_domain()
                )));
            }
            Ok(None)
        }
        PolicyStage::Retrieve => request_records(session, RecordType::Spf, Listener::SpfRecords),
        PolicyStage::RetrieveStrict => {
            request_records(session, RecordType::Spf, Listener::StrictSpf)
        }
        PolicyStage::BestGuess => {
            if session.record.is_none() {
                debug!(domain = session.current_domain(), "using best guess record");
                session.record = Some(RecordSlot::Raw(BEST_GUESS_RECORD.to_string()));
            }
            Ok(None)
        }
        PolicyStage::ParseRecord => {
            if let Some(RecordSlot::Raw(text)) = &session.record {
                let parsed = engine.parser.parse(text)?;
                session.record = Some(RecordSlot::Parsed(Arc::new(parsed)));
            }
            Ok(None)
        }
        PolicyStage::Fallback => {
            if session.record.is_none() {
                load_local(chain.fallback_policy.as_deref(), session, engine, "fallback")?;
            }
            Ok(None)
        }
        PolicyStage::NoRecordFound => {
            if session.record.is_none() {
                return Err(SpfError::none(format!(
                    "No SPF record found for host: {}",
                    session.current_domain()
                )));
            }
            Ok(None)
        }
        PolicyStage::TrustedForwarder => {
            // seul l'enregistrement du domaine expéditeur est réécrit, jamais
            // une cible d'include/redirect ni celui du forwarder lui-même
            let domain = session.current_domain();
            if domain != session.sender_domain() || domain == TRUSTED_FORWARDER_HOST {
                return Ok(None);
            }
            if let Some(RecordSlot::Parsed(record)) = session.record.as_mut() {
                let ends_strict = record.directives().last().is_some_and(|last| {
                    *last.mechanism() == Mechanism::All
                        && matches!(last.qualifier(), Qualifier::Fail | Qualifier::Neutral)
                });
                if ends_strict {
                    Arc::make_mut(record).insert_before_last(Directive::new(
                        Qualifier::Pass,
                        Mechanism::Include {
                            domain: TRUSTED_FORWARDER_HOST.to_string(),
                        },
                    ));
                }
            }
            Ok(None)
        }
        PolicyStage::NeutralIfUnmatched => {
            add_hook(session, RecordHook::NeutralIfUnmatched, |record| {
                !record.directives().is_empty()
            });
            Ok(None)
        }
        PolicyStage::DefaultExplanation => {
            let hook = RecordHook::DefaultExplanation(chain.default_explanation.clone());
            add_hook(session, hook, |_| true);
            Ok(None)
        }
    }
}

fn add_hook(
    session: &mut SpfSession,
    hook: RecordHook,
    applies: impl Fn(&SpfRecord) -> bool,
) {
    if let Some(RecordSlot::Parsed(record)) = session.record.as_mut() {
        if applies(&**record) {
            Arc::make_mut(record).hooks.push(hook);
        }
    }
}

fn load_local(
    source: Option<&dyn RecordSource>,
    session: &mut SpfSession,
    engine: &Engine,
    stage: &str,
) -> Result<(), SpfError> {
    let Some(text) = source.and_then(|source| source.get_spf_record(session.current_domain()))
    else {
        return Ok(());
    };
    info!(domain = session.current_domain(), stage, record = %text, "using locally configured record");
    let parsed = engine.parser.parse(&text)?;
    session.record = Some(RecordSlot::Parsed(Arc::new(parsed)));
    Ok(())
}

fn request_records(
    session: &mut SpfSession,
    record_type: RecordType,
    listener: Listener,
) -> CheckResult {
    if session.record.is_some() {
        return Ok(None);
    }
    let request = DnsRequest::new(session.current_domain().to_string(), record_type)?;
    Ok(Some(DnsLookupContinuation::new(request, listener)))
}

/// Picks the single `v=spf1` record out of a TXT/SPF answer.
fn extract_spf_record(records: &[String]) -> Result<Option<String>, SpfError> {
    let mut found = records.iter().filter(|record| is_spf1_record(record));
    let first = found.next();
    if found.next().is_some() {
        return Err(SpfError::perm("More than 1 SPF record found"));
    }
    Ok(first.cloned())
}

fn lookup_failed(session: &SpfSession) -> SpfError {
    SpfError::temp(format!(
        "Timeout querying dns for {}",
        session.current_domain()
    ))
}

pub(crate) fn on_spf_records(response: DnsResponse, session: &mut SpfSession) -> CheckResult {
    let records = response.records().map_err(|_| lookup_failed(session))?;
    match extract_spf_record(records)? {
        Some(record) => {
            session.record = Some(RecordSlot::Raw(record));
            Ok(None)
        }
        None => request_records(session, RecordType::Txt, Listener::TxtRecords),
    }
}

pub(crate) fn on_txt_records(response: DnsResponse, session: &mut SpfSession) -> CheckResult {
    let records = response.records().map_err(|_| lookup_failed(session))?;
    if let Some(record) = extract_spf_record(records)? {
        session.record = Some(RecordSlot::Raw(record));
    }
    Ok(None)
}

pub(crate) fn on_strict_spf(response: DnsResponse, session: &mut SpfSession) -> CheckResult {
    let records = response.records().map_err(|_| lookup_failed(session))?;
    let spf = extract_spf_record(records)?;
    let request = DnsRequest::new(session.current_domain().to_string(), RecordType::Txt)?;
    Ok(Some(DnsLookupContinuation::new(
        request,
        Listener::StrictTxt { spf },
    )))
}

/// Both record types were fetched; when both exist they must be identical.
pub(crate) fn on_strict_txt(
    response: DnsResponse,
    spf: Option<String>,
    session: &mut SpfSession,
) -> CheckResult {
    let records = response.records().map_err(|_| lookup_failed(session))?;
    let txt = extract_spf_record(records)?;
    if let (Some(spf), Some(txt)) = (&spf, &txt) {
        if spf != txt {
            return Err(SpfError::perm("Published SPF records not equals"));
        }
    }
    if let Some(record) = spf.or(txt) {
        session.record = Some(RecordSlot::Raw(record));
    }
    Ok(None)
}

pub(crate) fn run_hook(hook: RecordHook, session: &mut SpfSession, engine: &Engine) -> CheckResult {
    match hook {
        RecordHook::NeutralIfUnmatched => {
            if session.current_result().is_none() {
                session.set_current_result(Some(Qualifier::Neutral));
            }
            Ok(None)
        }
        RecordHook::DefaultExplanation(text) => {
            if !wants_explanation(session) {
                return Ok(None);
            }
            session.push_checker(Checker::ExplanationGuard);
            session.push_checker(Checker::Explain(text.clone()));
            engine
                .macro_expand
                .check_expand(Some(&text), session, ExpansionMode::Explanation)
        }
    }
}

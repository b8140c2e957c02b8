use std::collections::VecDeque;
use std::sync::{Arc, LazyLock};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use tracing::debug;

use super::grammar::{self, is_fqdn};
use super::{DnsRequest, DnsResponse, DnsService, IpAddress, RecordType, SpfError, SpfSession};
use crate::checker::{CheckResult, DnsLookupContinuation, Listener};

const MAX_DOMAIN_LENGTH: usize = 255;
const DOMAIN_LETTERS: &str = "lsodipvh";
const EXPLANATION_LETTERS: &str = "rctlsodipvh";
const UNKNOWN_DOMAIN: &str = "unknown";

const URL_RESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

static DOMAIN_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{}$", grammar::domain_spec())).expect("domain-spec grammar compiles")
});

static MACRO_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&grammar::macro_string_token()).expect("macro grammar compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionMode {
    /// Letters `lsodipvh`; the output must be a domain name.
    Domain,
    /// Letters `rctlsodipvh`; the input is split on spaces.
    Explanation,
}

// une méthode par lettre de macro
pub trait MacroData {
    fn current_sender_part(&self) -> &str;
    fn mail_from(&self) -> &str;
    fn host_name(&self) -> &str;
    fn current_domain(&self) -> &str;
    fn in_address(&self) -> &str;
    // None tant que le PTR du client n'est pas validé
    fn client_domain(&self) -> Option<&str>;
    fn sender_domain(&self) -> &str;
    fn time_stamp(&self) -> u64;
    fn readable_ip(&self) -> String;
    fn macro_ip_address(&self) -> String;
    fn receiving_domain(&self) -> Option<&str>;
    fn set_receiving_domain(&mut self, domain: String);
}

enum ExpandError {
    Spf(SpfError),
    NeedsClientDomain,
}

impl From<SpfError> for ExpandError {
    fn from(error: SpfError) -> Self {
        Self::Spf(error)
    }
}

pub struct MacroExpand {
    dns: Option<Arc<dyn DnsService>>,
}

impl MacroExpand {
    pub fn new(dns: Option<Arc<dyn DnsService>>) -> Self {
        Self { dns }
    }

    /// Expands `input`. `Ok(None)` means the `p` macro was referenced before
    /// the client domain was known.
    pub fn expand(
        &self,
        input: &str,
        data: &mut dyn MacroData,
        mode: ExpansionMode,
    ) -> Result<Option<String>, SpfError> {
        let outcome = match mode {
            ExpansionMode::Explanation => self.expand_explanation(input, data),
            ExpansionMode::Domain => self.expand_domain(input, data),
        };
        match outcome {
            Ok(expanded) => Ok(Some(expanded)),
            Err(ExpandError::NeedsClientDomain) => Ok(None),
            Err(ExpandError::Spf(error)) => Err(error),
        }
    }

    /// Validates that `input` expands, and asks for the client's PTR records
    /// when it can only expand once the client domain is known.
    pub(crate) fn check_expand(
        &self,
        input: Option<&str>,
        session: &mut SpfSession,
        mode: ExpansionMode,
    ) -> CheckResult {
        let Some(input) = input else {
            return Ok(None);
        };
        if self.expand(input, session, mode)?.is_some() {
            return Ok(None);
        }
        let reverse = session.client_address()?.reverse_ip();
        let request = DnsRequest::new(reverse, RecordType::Ptr)?;
        Ok(Some(DnsLookupContinuation::new(
            request,
            Listener::ClientDomainPtr,
        )))
    }

    fn expand_explanation(
        &self,
        input: &str,
        data: &mut dyn MacroData,
    ) -> Result<String, ExpandError> {
        let mut parts = Vec::new();
        for part in input.split(' ') {
            parts.push(self.expand_macro_string(part, data, ExpansionMode::Explanation)?);
        }
        Ok(parts.join(" "))
    }

    fn expand_domain(&self, input: &str, data: &mut dyn MacroData) -> Result<String, ExpandError> {
        if !DOMAIN_SPEC.is_match(input) {
            return Err(SpfError::perm(format!("Invalid DomainSpec: {input}")).into());
        }
        let mut domain = self.expand_macro_string(input, data, ExpansionMode::Domain)?;
        while domain.len() > MAX_DOMAIN_LENGTH {
            match domain.find('.') {
                Some(pos) => domain = domain[pos + 1..].to_string(),
                None => break,
            }
        }
        Ok(domain)
    }

    fn expand_macro_string(
        &self,
        input: &str,
        data: &mut dyn MacroData,
        mode: ExpansionMode,
    ) -> Result<String, ExpandError> {
        let mut out = String::with_capacity(input.len());
        let mut pos = 0;
        for token in MACRO_TOKEN.find_iter(input) {
            if token.start() != pos {
                return Err(SpfError::perm(format!(
                    "Middle part does not match: {}>>{}<<{} [{input}]",
                    &input[..pos],
                    &input[pos..token.start()],
                    &input[token.start()..]
                ))
                .into());
            }
            match token.as_str() {
                "%%" => out.push('%'),
                "%_" => out.push(' '),
                "%-" => out.push_str("%20"),
                text => match text.strip_prefix("%{").and_then(|t| t.strip_suffix('}')) {
                    Some(cell) => out.push_str(&self.replace_cell(cell, data, mode)?),
                    None => out.push_str(text),
                },
            }
            pos = token.end();
        }
        if pos != input.len() {
            return Err(SpfError::perm(format!(
                "End part does not match: {}",
                &input[pos..]
            ))
            .into());
        }
        Ok(out)
    }

    fn replace_cell(
        &self,
        cell: &str,
        data: &mut dyn MacroData,
        mode: ExpansionMode,
    ) -> Result<String, ExpandError> {
        let mut chars = cell.chars();
        let letter = chars
            .next()
            .ok_or_else(|| SpfError::perm("Empty macro cell"))?;
        let allowed = match mode {
            ExpansionMode::Domain => DOMAIN_LETTERS,
            ExpansionMode::Explanation => EXPLANATION_LETTERS,
        };
        let lower = letter.to_ascii_lowercase();
        if !allowed.contains(lower) {
            return Err(SpfError::perm(format!("MacroLetter not found: {cell}")).into());
        }

        let value = self.match_macro(lower, data)?;
        let value = if letter.is_ascii_uppercase() {
            utf8_percent_encode(&value, URL_RESERVED).to_string()
        } else {
            value
        };
        apply_transformers(&value, chars.as_str()).map_err(ExpandError::from)
    }

    fn match_macro(&self, letter: char, data: &mut dyn MacroData) -> Result<String, ExpandError> {
        let value = match letter {
            'i' => data.macro_ip_address(),
            's' => data.mail_from().to_string(),
            'h' => data.host_name().to_string(),
            'l' => data.current_sender_part().to_string(),
            'd' => data.current_domain().to_string(),
            'v' => data.in_address().to_string(),
            't' => data.time_stamp().to_string(),
            'c' => data.readable_ip(),
            'o' => data.sender_domain().to_string(),
            'r' => self.receiving_domain(data),
            'p' => data
                .client_domain()
                .map(str::to_string)
                .ok_or(ExpandError::NeedsClientDomain)?,
            other => return Err(SpfError::perm(format!("Unknown command : {other}")).into()),
        };
        Ok(value)
    }

    fn receiving_domain(&self, data: &mut dyn MacroData) -> String {
        if let Some(domain) = data.receiving_domain() {
            return domain.to_string();
        }
        let local = self
            .dns
            .as_ref()
            .and_then(|dns| dns.local_domain_names().into_iter().find(|name| is_fqdn(name)));
        match local {
            Some(domain) => {
                data.set_receiving_domain(domain.clone());
                domain
            }
            None => UNKNOWN_DOMAIN.to_string(),
        }
    }
}

fn apply_transformers(value: &str, transformers: &str) -> Result<String, SpfError> {
    let digits_end = transformers
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(transformers.len());
    let (digits, rest) = transformers.split_at(digits_end);
    let (reverse, delimiters) = match rest.strip_prefix('r') {
        Some(delimiters) => (true, delimiters),
        None => (false, rest),
    };

    let keep = if digits.is_empty() {
        None
    } else {
        match digits.parse::<usize>() {
            Ok(0) => return Err(SpfError::perm("Digit transformer must be non-zero")),
            Ok(count) => Some(count),
            Err(_) => return Err(SpfError::perm(format!("Invalid digit transformer: {digits}"))),
        }
    };
    if digits.is_empty() && !reverse && delimiters.is_empty() {
        return Ok(value.to_string());
    }

    let delimiters = if delimiters.is_empty() { "." } else { delimiters };
    let mut parts: Vec<&str> = value.split(|c: char| delimiters.contains(c)).collect();
    if reverse {
        parts.reverse();
    }
    if let Some(count) = keep {
        if count < parts.len() {
            parts.drain(..parts.len() - count);
        }
    }
    Ok(parts.join("."))
}

pub(crate) fn on_client_domain_ptr(
    response: DnsResponse,
    session: &mut SpfSession,
    dns: &dyn DnsService,
) -> CheckResult {
    match response.into_records() {
        Ok(names) => {
            let pending: VecDeque<String> =
                names.into_iter().take(dns.record_limit()).collect();
            next_client_domain_lookup(pending, session)
        }
        Err(err) => {
            debug!(error = %err, "PTR lookup for client domain failed");
            session.set_client_domain(UNKNOWN_DOMAIN.to_string());
            Ok(None)
        }
    }
}

pub(crate) fn on_client_domain_forward(
    response: DnsResponse,
    candidate: String,
    pending: VecDeque<String>,
    session: &mut SpfSession,
) -> CheckResult {
    if let Ok(records) = response.records() {
        let client = session.client_address()?;
        let confirmed = records
            .iter()
            .filter_map(|record| IpAddress::parse(record).ok())
            .any(|address| address.contains(client));
        if confirmed {
            debug!(client_domain = %candidate, "validated client domain");
            session.set_client_domain(candidate);
            return Ok(None);
        }
    }
    next_client_domain_lookup(pending, session)
}

fn next_client_domain_lookup(
    mut pending: VecDeque<String>,
    session: &mut SpfSession,
) -> CheckResult {
    let record_type = if session.client_address()?.is_ipv4() {
        RecordType::A
    } else {
        RecordType::Aaaa
    };
    while let Some(candidate) = pending.pop_front() {
        let candidate = candidate.trim_end_matches('.').to_string();
        if let Ok(request) = DnsRequest::new(candidate.clone(), record_type) {
            return Ok(Some(DnsLookupContinuation::new(
                request,
                Listener::ClientDomainForward { candidate, pending },
            )));
        }
    }
    session.set_client_domain(UNKNOWN_DOMAIN.to_string());
    Ok(None)
}

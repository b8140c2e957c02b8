use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use super::macros::MacroData;
use super::{IpAddress, SpfError};
use crate::checker::Checker;
use crate::executor::ResultCode;
use crate::terms::{Qualifier, SpfRecord};

/// Maximum number of DNS-querying terms (a, mx, ptr, include, exists and
/// redirect) evaluated for one check.
pub const MAX_DEPTH: u32 = 10;

const POSTMASTER: &str = "postmaster";

#[derive(Debug, Clone)]
pub(crate) enum RecordSlot {
    Raw(String),
    Parsed(Arc<SpfRecord>),
}

#[derive(Debug)]
pub struct SpfSession {
    ip_address: String,
    client: Option<IpAddress>,
    mail_from: String,
    host_name: String,
    current_sender_part: String,
    current_domain: String,
    sender_domain: String,
    in_address: String,
    client_domain: Option<String>,
    receiving_domain: Option<String>,
    time_stamp: u64,
    current_depth: u32,
    current_result: Option<Qualifier>,
    current_result_expanded: Option<ResultCode>,
    explanation: Option<String>,
    ignore_explanation: bool,
    pub(crate) mechanism_result: Option<bool>,
    pub(crate) record: Option<RecordSlot>,
    checkers: Vec<Checker>,
}

impl SpfSession {
    /// Builds a session for `client_ip` sending `mail_from` after `helo`.
    ///
    /// An empty sender is checked as `postmaster@<helo>`. An invalid client
    /// address does not fail construction; the session starts out with a
    /// `permerror` result instead.
    pub fn new(mail_from: &str, helo: &str, client_ip: &str) -> Self {
        let host_name = helo.trim().to_string();
        let mail_from = mail_from.trim();
        let (mail_from, local, domain) = split_sender(mail_from, &host_name);

        let mut session = Self {
            ip_address: client_ip.trim().to_string(),
            client: None,
            mail_from,
            host_name,
            current_sender_part: local,
            current_domain: domain.clone(),
            sender_domain: domain,
            in_address: "in-addr".to_string(),
            client_domain: None,
            receiving_domain: None,
            time_stamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or_default(),
            current_depth: 0,
            current_result: None,
            current_result_expanded: None,
            explanation: None,
            ignore_explanation: false,
            mechanism_result: None,
            record: None,
            checkers: Vec::new(),
        };

        let parsed = IpAddress::proper_ip_address(client_ip)
            .and_then(|ip| IpAddress::parse(&ip).map(|address| (ip, address)));
        match parsed {
            Ok((ip, address)) => {
                session.in_address = address.in_address_label().to_string();
                session.ip_address = ip;
                session.client = Some(address);
            }
            Err(err) => {
                debug!(ip = client_ip, error = %err, "client address rejected");
                session.current_result_expanded = Some(err.result());
            }
        }
        session
    }

    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }

    pub(crate) fn client_address(&self) -> Result<&IpAddress, SpfError> {
        self.client
            .as_ref()
            .ok_or_else(|| SpfError::perm(format!("No valid client address: {}", self.ip_address)))
    }

    pub fn mail_from(&self) -> &str {
        &self.mail_from
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn current_domain(&self) -> &str {
        &self.current_domain
    }

    pub(crate) fn set_current_domain(&mut self, domain: String) {
        self.current_domain = domain;
    }

    pub fn sender_domain(&self) -> &str {
        &self.sender_domain
    }

    pub(crate) fn set_client_domain(&mut self, domain: String) {
        self.client_domain = Some(domain);
    }

    pub fn current_depth(&self) -> u32 {
        self.current_depth
    }

    /// Counts one more DNS-querying term, failing once the limit is passed.
    pub(crate) fn increase_current_depth(&mut self) -> Result<(), SpfError> {
        self.current_depth += 1;
        if self.current_depth > MAX_DEPTH {
            return Err(SpfError::perm(format!(
                "Maximum mechanism/modifiers calls done: {}",
                self.current_depth
            )));
        }
        Ok(())
    }

    pub fn current_result(&self) -> Option<Qualifier> {
        self.current_result
    }

    pub(crate) fn set_current_result(&mut self, result: Option<Qualifier>) {
        self.current_result = result;
    }

    pub fn current_result_expanded(&self) -> Option<ResultCode> {
        self.current_result_expanded
    }

    /// The first final result wins; later attempts are ignored.
    pub(crate) fn set_current_result_expanded(&mut self, result: ResultCode) {
        if self.current_result_expanded.is_none() {
            self.current_result_expanded = Some(result);
        }
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    pub(crate) fn set_explanation(&mut self, explanation: String) {
        self.explanation = Some(explanation);
    }

    pub fn ignore_explanation(&self) -> bool {
        self.ignore_explanation
    }

    pub(crate) fn set_ignore_explanation(&mut self, ignore: bool) {
        self.ignore_explanation = ignore;
    }

    pub(crate) fn push_checker(&mut self, checker: Checker) {
        self.checkers.push(checker);
    }

    pub(crate) fn pop_checker(&mut self) -> Option<Checker> {
        self.checkers.pop()
    }

    pub(crate) fn pop_catcher(&mut self) -> Option<Checker> {
        while let Some(checker) = self.checkers.pop() {
            if checker.is_exception_catcher() {
                return Some(checker);
            }
        }
        None
    }
}

impl MacroData for SpfSession {
    fn current_sender_part(&self) -> &str {
        &self.current_sender_part
    }

    fn mail_from(&self) -> &str {
        &self.mail_from
    }

    fn host_name(&self) -> &str {
        &self.host_name
    }

    fn current_domain(&self) -> &str {
        &self.current_domain
    }

    fn in_address(&self) -> &str {
        &self.in_address
    }

    fn client_domain(&self) -> Option<&str> {
        self.client_domain.as_deref()
    }

    fn sender_domain(&self) -> &str {
        &self.sender_domain
    }

    fn time_stamp(&self) -> u64 {
        self.time_stamp
    }

    fn readable_ip(&self) -> String {
        IpAddress::readable_ip(&self.ip_address)
    }

    fn macro_ip_address(&self) -> String {
        match &self.client {
            Some(address) => address.nibble_format(),
            None => self.ip_address.clone(),
        }
    }

    fn receiving_domain(&self) -> Option<&str> {
        self.receiving_domain.as_deref()
    }

    fn set_receiving_domain(&mut self, domain: String) {
        self.receiving_domain = Some(domain);
    }
}

fn split_sender(mail_from: &str, helo: &str) -> (String, String, String) {
    if mail_from.is_empty() {
        let domain = to_ascii_domain(helo);
        return (format!("{POSTMASTER}@{helo}"), POSTMASTER.to_string(), domain);
    }
    match mail_from.rsplit_once('@') {
        Some((local, domain)) => {
            let local = if local.is_empty() { POSTMASTER } else { local };
            (mail_from.to_string(), local.to_string(), to_ascii_domain(domain))
        }
        None => (
            mail_from.to_string(),
            POSTMASTER.to_string(),
            to_ascii_domain(mail_from),
        ),
    }
}

fn to_ascii_domain(domain: &str) -> String {
    if domain.is_ascii() {
        return domain.to_string();
    }
    match idna::domain_to_ascii(domain) {
        Ok(ascii) => ascii,
        Err(err) => {
            debug!(domain, error = ?err, "IDNA conversion failed");
            domain.to_string()
        }
    }
}

use std::fmt;
use std::time::Duration;

use tracing::debug;

use super::{DnsError, SpfError};

// MX/PTR au plus par mécanisme
pub const DEFAULT_RECORD_LIMIT: usize = 10;

const MAX_HOSTNAME_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Mx,
    Ptr,
    Txt,
    Spf,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Mx => "MX",
            Self::Ptr => "PTR",
            Self::Txt => "TXT",
            Self::Spf => "SPF",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRequest {
    hostname: String,
    record_type: RecordType,
}

impl DnsRequest {
    pub fn new(hostname: impl Into<String>, record_type: RecordType) -> Result<Self, SpfError> {
        let hostname = hostname.into();
        if matches!(record_type, RecordType::A | RecordType::Aaaa | RecordType::Mx) {
            validate_hostname(&hostname)?;
        }
        Ok(Self {
            hostname,
            record_type,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }
}

impl fmt::Display for DnsRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.hostname, self.record_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsResponse {
    outcome: Result<Vec<String>, DnsError>,
}

impl DnsResponse {
    pub fn new(records: Vec<String>) -> Self {
        Self {
            outcome: Ok(records),
        }
    }

    pub fn error(error: DnsError) -> Self {
        Self {
            outcome: Err(error),
        }
    }

    pub fn records(&self) -> Result<&[String], DnsError> {
        self.outcome.as_deref().map_err(Clone::clone)
    }

    pub fn into_records(self) -> Result<Vec<String>, DnsError> {
        self.outcome
    }
}

impl From<Result<Vec<String>, DnsError>> for DnsResponse {
    fn from(outcome: Result<Vec<String>, DnsError>) -> Self {
        Self { outcome }
    }
}

/// Blocking DNS access used by the evaluation engine.
///
/// Implementations return textual records: dotted or compressed addresses for
/// A/AAAA, host names for MX and PTR, and the concatenated character strings
/// of each TXT/SPF record. NXDOMAIN and empty answers are `Ok(vec![])`.
pub trait DnsService: Send + Sync {
    fn get_records(&self, request: &DnsRequest) -> Result<Vec<String>, DnsError>;

    fn local_domain_names(&self) -> Vec<String> {
        local_host_names()
    }

    fn set_timeout(&self, _timeout: Duration) {}

    fn record_limit(&self) -> usize {
        DEFAULT_RECORD_LIMIT
    }
}

pub fn local_host_names() -> Vec<String> {
    match hostname::get() {
        Ok(name) => name.into_string().into_iter().collect(),
        Err(err) => {
            debug!(error = %err, "unable to read local host name");
            Vec::new()
        }
    }
}

fn validate_hostname(name: &str) -> Result<(), SpfError> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    if trimmed.is_empty() || trimmed.len() > MAX_HOSTNAME_LENGTH {
        return Err(SpfError::none(format!("Invalid hostname: {name}")));
    }
    let valid = trimmed.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LENGTH
            && label.bytes().all(|byte| byte.is_ascii_graphic())
    });
    if valid {
        Ok(())
    } else {
        Err(SpfError::none(format!("Invalid hostname: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_requests_validate_names() {
        assert!(DnsRequest::new("mail.example.com", RecordType::A).is_ok());
        assert!(DnsRequest::new("mail.example.com.", RecordType::Mx).is_ok());
        assert!(matches!(
            DnsRequest::new("bad..example.com", RecordType::Aaaa),
            Err(SpfError::None(_))
        ));
        let long_label = format!("{}.example.com", "x".repeat(64));
        assert!(DnsRequest::new(long_label, RecordType::A).is_err());
    }

    #[test]
    fn text_requests_are_not_validated() {
        let request = DnsRequest::new("1.2.0.192.in-addr.arpa", RecordType::Ptr).unwrap();
        assert_eq!(request.to_string(), "1.2.0.192.in-addr.arpa#PTR");
        assert!(DnsRequest::new("weird name", RecordType::Txt).is_ok());
    }

    #[test]
    fn response_exposes_failure() {
        let response = DnsResponse::error(DnsError::timeout("example.com"));
        assert!(response.records().is_err());
        assert_eq!(DnsResponse::new(vec![]).records().unwrap().len(), 0);
    }
}

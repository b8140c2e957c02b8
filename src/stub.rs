//! In-memory DNS zone for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::core::{DnsError, DnsRequest, DnsService, RecordType};

#[derive(Debug, Default)]
pub(crate) struct StubDns {
    records: HashMap<(String, RecordType), Vec<String>>,
    timeouts: HashSet<(String, RecordType)>,
    local_names: Vec<String>,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
}

impl StubDns {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_records(mut self, name: &str, record_type: RecordType, records: &[&str]) -> Self {
        let values = records.iter().map(|record| record.to_string()).collect();
        self.records.insert((normalize_name(name), record_type), values);
        self
    }

    pub(crate) fn with_txt(self, name: &str, record: &str) -> Self {
        self.with_records(name, RecordType::Txt, &[record])
    }

    pub(crate) fn with_timeout(mut self, name: &str, record_type: RecordType) -> Self {
        self.timeouts.insert((normalize_name(name), record_type));
        self
    }

    pub(crate) fn with_local_names(mut self, names: &[&str]) -> Self {
        self.local_names = names.iter().map(|name| name.to_string()).collect();
        self
    }

    /// Each answer is held back by `delay`, like a slow resolver.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every question asked so far, as `host#TYPE`.
    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DnsService for StubDns {
    fn get_records(&self, request: &DnsRequest) -> Result<Vec<String>, DnsError> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.to_string());
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let key = (normalize_name(request.hostname()), request.record_type());
        if self.timeouts.contains(&key) {
            return Err(DnsError::timeout(request.to_string()));
        }
        Ok(self.records.get(&key).cloned().unwrap_or_default())
    }

    fn local_domain_names(&self) -> Vec<String> {
        self.local_names.clone()
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::warn;

use crate::core::SpfSession;

/// Name of the trace header written for every check.
pub const HEADER_NAME: &str = "Received-SPF";

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "with-serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    None,
    PermError,
    TempError,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::SoftFail => "softfail",
            Self::Neutral => "neutral",
            Self::None => "none",
            Self::PermError => "permerror",
            Self::TempError => "temperror",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "softfail" => Ok(Self::SoftFail),
            "neutral" => Ok(Self::Neutral),
            "none" => Ok(Self::None),
            "permerror" => Ok(Self::PermError),
            "temperror" => Ok(Self::TempError),
            other => Err(format!("unknown SPF result: {other}")),
        }
    }
}

#[cfg_attr(feature = "with-serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfResult {
    result: ResultCode,
    explanation: String,
    header_text: String,
}

impl SpfResult {
    pub(crate) fn from_session(session: &SpfSession) -> Self {
        let result = session
            .current_result_expanded()
            .unwrap_or(ResultCode::PermError);
        Self {
            result,
            explanation: session.explanation().unwrap_or_default().to_string(),
            header_text: header_text(result, session),
        }
    }

    pub fn result(&self) -> ResultCode {
        self.result
    }

    /// Explanation published for `fail` results, empty otherwise.
    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn header_name(&self) -> &'static str {
        HEADER_NAME
    }

    pub fn header_text(&self) -> &str {
        &self.header_text
    }

    /// The complete `Received-SPF: ...` header line.
    pub fn header(&self) -> String {
        format!("{HEADER_NAME}: {}", self.header_text)
    }
}

fn header_text(result: ResultCode, session: &SpfSession) -> String {
    let ip = session.ip_address();
    let domain = session.current_domain();
    let comment = match result {
        ResultCode::Pass => format!("domain of {domain} designates {ip} as permitted sender"),
        ResultCode::Fail => {
            format!("domain of {domain} does not designate {ip} as permitted sender")
        }
        ResultCode::SoftFail => format!(
            "transitioning domain of {domain} does not designate {ip} as permitted sender"
        ),
        ResultCode::Neutral | ResultCode::None => {
            format!("{ip} is neither permitted nor denied by domain of {domain}")
        }
        ResultCode::PermError => "Error in processing SPF Record".to_string(),
        ResultCode::TempError => "Error in retrieving data from DNS".to_string(),
    };
    format!(
        "{result} (spfCheck: {comment}) client-ip={ip}; envelope-from={}; helo={};",
        session.mail_from(),
        session.host_name()
    )
}

type ResultListener = Box<dyn FnOnce(&SpfResult) + Send>;

#[derive(Default)]
struct FutureState {
    result: Option<SpfResult>,
    listeners: Vec<ResultListener>,
}

/// A result that is filled in once, possibly from another thread.
///
/// Readers block in [`wait`](Self::wait) or register a listener that runs
/// when the result is set. A panicking listener is logged and does not keep
/// the others from running.
#[derive(Default)]
pub struct FutureSpfResult {
    state: Mutex<FutureState>,
    ready: Condvar,
}

impl FutureSpfResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_result(&self, result: SpfResult) {
        let listeners = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.result.is_some() {
                return;
            }
            state.result = Some(result.clone());
            std::mem::take(&mut state.listeners)
        };
        self.ready.notify_all();
        for listener in listeners {
            notify(listener, &result);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .result
            .is_some()
    }

    pub fn wait(&self) -> SpfResult {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = &state.result {
                return result.clone();
            }
            state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<SpfResult> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |state| state.result.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.result.clone()
    }

    /// Runs `listener` with the result, immediately when it is already set.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&SpfResult) + Send + 'static,
    {
        let ready = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.result.is_none() {
                state.listeners.push(Box::new(listener));
                return;
            }
            state.result.clone()
        };
        if let Some(result) = ready {
            notify(Box::new(listener), &result);
        }
    }
}

impl fmt::Debug for FutureSpfResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureSpfResult")
            .field("ready", &self.is_ready())
            .finish()
    }
}

fn notify(listener: ResultListener, result: &SpfResult) {
    if catch_unwind(AssertUnwindSafe(|| listener(result))).is_err() {
        warn!(result = %result.result(), "SPF result listener panicked");
    }
}

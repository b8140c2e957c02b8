use thiserror::Error;

use crate::executor::ResultCode;

/// Failures raised while evaluating an SPF policy.
///
/// Every variant maps onto the result code reported when no checker on the
/// stack handles it, see [`SpfError::result`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpfError {
    #[error("none: {0}")]
    None(String),
    #[error("neutral: {0}")]
    Neutral(String),
    #[error("permerror: {0}")]
    PermError(String),
    #[error("temperror: {0}")]
    TempError(String),
}

impl SpfError {
    pub(crate) fn none(message: impl Into<String>) -> Self {
        Self::None(message.into())
    }

    pub(crate) fn neutral(message: impl Into<String>) -> Self {
        Self::Neutral(message.into())
    }

    pub(crate) fn perm(message: impl Into<String>) -> Self {
        Self::PermError(message.into())
    }

    pub(crate) fn temp(message: impl Into<String>) -> Self {
        Self::TempError(message.into())
    }

    pub fn result(&self) -> ResultCode {
        match self {
            Self::None(_) => ResultCode::None,
            Self::Neutral(_) => ResultCode::Neutral,
            Self::PermError(_) => ResultCode::PermError,
            Self::TempError(_) => ResultCode::TempError,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::None(message)
            | Self::Neutral(message)
            | Self::PermError(message)
            | Self::TempError(message) => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("DNS lookup timed out: {0}")]
    Timeout(String),
}

impl DnsError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }
}

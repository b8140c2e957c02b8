//! Pile d'évaluation: chaque [`Checker`] termine, empile d'autres checkers
//! ou demande une résolution DNS via une [`DnsLookupContinuation`].

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, warn};

use crate::core::{
    DnsRequest, DnsResponse, RecordSlot, SpfError, SpfSession, on_client_domain_forward,
    on_client_domain_ptr,
};
use crate::executor::ResultCode;
use crate::policies::{self, PolicyStage};
use crate::spf::Engine;
use crate::terms::mechanisms::{self, IncludeState};
use crate::terms::{
    Directive, DualCidr, Mechanism, Modifier, Qualifier, RecordHook, modifiers,
};

pub(crate) type CheckResult = Result<Option<DnsLookupContinuation>, SpfError>;

/// A DNS question together with the listener that resumes evaluation once
/// the answer is known.
#[derive(Debug)]
pub struct DnsLookupContinuation {
    request: DnsRequest,
    listener: Listener,
}

impl DnsLookupContinuation {
    pub(crate) fn new(request: DnsRequest, listener: Listener) -> Self {
        Self { request, listener }
    }

    pub fn request(&self) -> &DnsRequest {
        &self.request
    }

    pub(crate) fn into_parts(self) -> (DnsRequest, Listener) {
        (self.request, self.listener)
    }
}

#[derive(Debug)]
pub(crate) enum Checker {
    /// Bottom of every stack: turns the collected result into the final one.
    Default,
    /// Starts evaluation of the session's current domain.
    Spf,
    Policy(PolicyStage),
    Record,
    Directive(Directive),
    DirectiveResult(Qualifier),
    Mechanism(Mechanism),
    MechanismExpanded(Mechanism),
    IncludeCleanup(IncludeState),
    Modifier(Modifier),
    RedirectExpanded(String),
    RedirectCleanup,
    ExpExpanded(String),
    Explain(String),
    ExplanationGuard,
    Hook(RecordHook),
}

impl Checker {
    pub(crate) fn is_exception_catcher(&self) -> bool {
        matches!(
            self,
            Self::Default | Self::IncludeCleanup(_) | Self::RedirectCleanup | Self::ExplanationGuard
        )
    }

    pub(crate) fn check(self, session: &mut SpfSession, engine: &Engine) -> CheckResult {
        match self {
            Self::Default => {
                let result = session
                    .current_result()
                    .map(Qualifier::result_code)
                    .unwrap_or(ResultCode::Neutral);
                session.set_current_result_expanded(result);
                Ok(None)
            }
            Self::Spf => {
                if session.current_result().is_none() && session.current_result_expanded().is_none()
                {
                    session.record = None;
                    session.push_checker(Self::Record);
                    for stage in engine.policies.stages().iter().rev() {
                        session.push_checker(Self::Policy(*stage));
                    }
                }
                Ok(None)
            }
            Self::Policy(stage) => policies::check(stage, session, engine),
            Self::Record => {
                let Some(RecordSlot::Parsed(record)) = session.record.take() else {
                    return Err(SpfError::perm("No parsed SPF record to evaluate"));
                };
                debug!(domain = session.current_domain(), record = %record, "evaluating record");
                for hook in record.hooks.iter().rev() {
                    session.push_checker(Self::Hook(hook.clone()));
                }
                for modifier in record.modifiers().iter().rev() {
                    session.push_checker(Self::Modifier(modifier.clone()));
                }
                for directive in record.directives().iter().rev() {
                    session.push_checker(Self::Directive(directive.clone()));
                }
                Ok(None)
            }
            Self::Directive(directive) => {
                if session.current_result().is_none() && session.current_result_expanded().is_none()
                {
                    let (qualifier, mechanism) = directive.into_parts();
                    session.mechanism_result = None;
                    session.push_checker(Self::DirectiveResult(qualifier));
                    session.push_checker(Self::Mechanism(mechanism));
                }
                Ok(None)
            }
            Self::DirectiveResult(qualifier) => {
                if session.mechanism_result.take().unwrap_or(false) {
                    debug!(qualifier = ?qualifier, "directive matched");
                    session.set_current_result(Some(qualifier));
                }
                Ok(None)
            }
            Self::Mechanism(mechanism) => mechanisms::check(mechanism, session, engine),
            Self::MechanismExpanded(mechanism) => {
                mechanisms::check_expanded(mechanism, session, engine)
            }
            Self::IncludeCleanup(state) => {
                mechanisms::include_finished(state, session);
                Ok(None)
            }
            Self::Modifier(modifier) => modifiers::check(modifier, session, engine),
            Self::RedirectExpanded(domain) => modifiers::redirect_expanded(&domain, session, engine),
            Self::RedirectCleanup | Self::ExplanationGuard => Ok(None),
            Self::ExpExpanded(domain) => modifiers::exp_expanded(&domain, session, engine),
            Self::Explain(text) => modifiers::explain(&text, session, engine),
            Self::Hook(hook) => policies::run_hook(hook, session, engine),
        }
    }

    /// Handles `error` for a catcher. Returning `Err` keeps unwinding.
    pub(crate) fn on_exception(
        self,
        error: SpfError,
        session: &mut SpfSession,
    ) -> Result<(), SpfError> {
        match self {
            Self::Default => {
                if !matches!(error, SpfError::Neutral(_) | SpfError::None(_)) {
                    warn!(error = %error, domain = session.current_domain(), "SPF evaluation failed");
                }
                session.set_current_result_expanded(error.result());
                Ok(())
            }
            Self::IncludeCleanup(state) => mechanisms::include_failed(state, error, session),
            Self::RedirectCleanup => modifiers::redirect_failed(error, session),
            Self::ExplanationGuard => {
                debug!(error = %error, "ignoring explanation failure");
                Ok(())
            }
            _ => Err(error),
        }
    }
}

impl fmt::Display for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Spf => f.write_str("spf"),
            Self::Policy(stage) => write!(f, "policy:{stage:?}"),
            Self::Record => f.write_str("record"),
            Self::Directive(directive) => write!(f, "directive:{directive}"),
            Self::DirectiveResult(qualifier) => write!(f, "directive-result:{}", qualifier.as_char()),
            Self::Mechanism(mechanism) => write!(f, "mechanism:{mechanism}"),
            Self::MechanismExpanded(mechanism) => write!(f, "expanded:{mechanism}"),
            Self::IncludeCleanup(state) => write!(f, "include-cleanup:{}", state.domain()),
            Self::Modifier(modifier) => write!(f, "modifier:{modifier}"),
            Self::RedirectExpanded(domain) => write!(f, "redirect:{domain}"),
            Self::RedirectCleanup => f.write_str("redirect-cleanup"),
            Self::ExpExpanded(domain) => write!(f, "exp:{domain}"),
            Self::Explain(_) => f.write_str("explain"),
            Self::ExplanationGuard => f.write_str("explanation-guard"),
            Self::Hook(hook) => write!(f, "hook:{hook:?}"),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Listener {
    SpfRecords,
    TxtRecords,
    StrictSpf,
    StrictTxt {
        spf: Option<String>,
    },
    AddressMatch {
        cidr: DualCidr,
    },
    MxTargets {
        cidr: DualCidr,
    },
    MxAddresses {
        cidr: DualCidr,
        pending: VecDeque<String>,
    },
    PtrNames {
        target: String,
    },
    PtrForward {
        target: String,
        candidate: String,
        pending: VecDeque<String>,
    },
    Exists,
    ExpText,
    ClientDomainPtr,
    ClientDomainForward {
        candidate: String,
        pending: VecDeque<String>,
    },
}

impl Listener {
    pub(crate) fn on_dns_response(
        self,
        response: DnsResponse,
        session: &mut SpfSession,
        engine: &Engine,
    ) -> CheckResult {
        match self {
            Self::SpfRecords => policies::on_spf_records(response, session),
            Self::TxtRecords => policies::on_txt_records(response, session),
            Self::StrictSpf => policies::on_strict_spf(response, session),
            Self::StrictTxt { spf } => policies::on_strict_txt(response, spf, session),
            Self::AddressMatch { cidr } => mechanisms::on_address_records(response, cidr, session),
            Self::MxTargets { cidr } => {
                mechanisms::on_mx_targets(response, cidr, session, engine.dns.as_ref())
            }
            Self::MxAddresses { cidr, pending } => {
                mechanisms::on_mx_addresses(response, cidr, pending, session)
            }
            Self::PtrNames { target } => {
                mechanisms::on_ptr_names(response, target, session, engine.dns.as_ref())
            }
            Self::PtrForward {
                target,
                candidate,
                pending,
            } => mechanisms::on_ptr_forward(response, target, candidate, pending, session),
            Self::Exists => mechanisms::on_exists(response, session),
            Self::ExpText => modifiers::on_exp_text(response, session, engine),
            Self::ClientDomainPtr => {
                on_client_domain_ptr(response, session, engine.dns.as_ref())
            }
            Self::ClientDomainForward { candidate, pending } => {
                on_client_domain_forward(response, candidate, pending, session)
            }
        }
    }
}

use tracing::debug;

use super::mechanisms::expand_host;
use super::{Modifier, Qualifier};
use crate::checker::{CheckResult, Checker, DnsLookupContinuation, Listener};
use crate::core::{DnsRequest, DnsResponse, ExpansionMode, RecordType, SpfError, SpfSession};
use crate::spf::Engine;

/// True when a `fail` result still needs an explanation.
pub(crate) fn wants_explanation(session: &SpfSession) -> bool {
    session.current_result() == Some(Qualifier::Fail)
        && session.explanation().is_none()
        && !session.ignore_explanation()
}

pub(crate) fn check(modifier: Modifier, session: &mut SpfSession, engine: &Engine) -> CheckResult {
    match modifier {
        Modifier::Redirect { domain } => {
            if session.current_result().is_some() || session.current_result_expanded().is_some() {
                return Ok(None);
            }
            session.increase_current_depth()?;
            session.push_checker(Checker::RedirectExpanded(domain.clone()));
            engine
                .macro_expand
                .check_expand(Some(&domain), session, ExpansionMode::Domain)
        }
        Modifier::Exp { domain } => {
            if !wants_explanation(session) {
                return Ok(None);
            }
            session.push_checker(Checker::ExplanationGuard);
            session.push_checker(Checker::ExpExpanded(domain.clone()));
            engine
                .macro_expand
                .check_expand(Some(&domain), session, ExpansionMode::Domain)
        }
        Modifier::Unknown { name, .. } => {
            debug!(modifier = %name, "ignoring unknown modifier");
            Ok(None)
        }
    }
}

/// Switches evaluation to the redirect target.
pub(crate) fn redirect_expanded(domain: &str, session: &mut SpfSession, engine: &Engine) -> CheckResult {
    let target = expand_host(Some(domain), session, engine)?;
    debug!(from = session.current_domain(), to = %target, "following redirect");
    session.set_current_domain(target);
    session.push_checker(Checker::RedirectCleanup);
    session.push_checker(Checker::Spf);
    Ok(None)
}

/// A redirect target without a policy is a permanent error; one with an
/// empty policy yields `neutral`.
pub(crate) fn redirect_failed(error: SpfError, session: &mut SpfSession) -> Result<(), SpfError> {
    match error {
        SpfError::None(message) => Err(SpfError::perm(format!(
            "Redirect target has no SPF record: {message}"
        ))),
        SpfError::Neutral(_) => {
            session.set_current_result(Some(Qualifier::Neutral));
            Ok(())
        }
        other => Err(other),
    }
}

pub(crate) fn exp_expanded(domain: &str, session: &mut SpfSession, engine: &Engine) -> CheckResult {
    let host = expand_host(Some(domain), session, engine)?;
    let request = DnsRequest::new(host, RecordType::Txt)?;
    Ok(Some(DnsLookupContinuation::new(request, Listener::ExpText)))
}

pub(crate) fn on_exp_text(response: DnsResponse, session: &mut SpfSession, engine: &Engine) -> CheckResult {
    let records = match response.into_records() {
        Ok(records) => records,
        Err(err) => {
            debug!(error = %err, "explanation lookup failed");
            return Ok(None);
        }
    };
    let [text] = records.as_slice() else {
        debug!(count = records.len(), "explanation needs exactly one TXT record");
        return Ok(None);
    };
    let text = text.clone();
    session.push_checker(Checker::Explain(text.clone()));
    engine
        .macro_expand
        .check_expand(Some(&text), session, ExpansionMode::Explanation)
}

pub(crate) fn explain(text: &str, session: &mut SpfSession, engine: &Engine) -> CheckResult {
    let explanation = engine
        .macro_expand
        .expand(text, session, ExpansionMode::Explanation)?
        .ok_or_else(|| SpfError::perm("Unable to expand explanation"))?;
    debug!(explanation = %explanation, "explanation set");
    session.set_explanation(explanation);
    Ok(None)
}

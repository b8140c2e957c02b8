use regex::Captures;

use super::{DualCidr, Mechanism, Modifier};
use crate::core::grammar::{
    IP4_ADDRESS, IP4_CIDR, IP6_ADDRESS, IP6_CIDR, MODIFIER_NAME, domain_spec, dual_cidr,
    macro_string,
};
use crate::core::{IpAddress, SpfError};

/// Result of building one matched term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Term {
    Mechanism(Mechanism),
    Modifier(Modifier),
}

type TermBuilder = fn(&MatcherConfiguration<'_>) -> Result<Term, SpfError>;

/// A term kind: its name, the regex fragment matching its text after the
/// name, and a builder fed with the fragment's own capture groups.
pub(crate) struct TermDefinition {
    name: &'static str,
    pattern: String,
    match_size: usize,
    build: TermBuilder,
}

impl TermDefinition {
    fn new(name: &'static str, pattern: String, build: TermBuilder) -> Self {
        let match_size = count_capture_groups(&pattern);
        Self {
            name,
            pattern,
            match_size,
            build,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Number of capturing groups in [`pattern`](Self::pattern).
    pub(crate) fn match_size(&self) -> usize {
        self.match_size
    }

    pub(crate) fn build(&self, config: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
        (self.build)(config)
    }
}

/// View over the capture groups belonging to one term definition inside the
/// composite record regex. Groups are numbered from 1.
pub(crate) struct MatcherConfiguration<'a> {
    groups: Vec<Option<&'a str>>,
}

impl<'a> MatcherConfiguration<'a> {
    pub(crate) fn new(captures: &Captures<'a>, start: usize, size: usize) -> Self {
        let groups = (1..=size)
            .map(|offset| captures.get(start + offset).map(|m| m.as_str()))
            .collect();
        Self { groups }
    }

    pub(crate) fn group(&self, index: usize) -> Option<&'a str> {
        index
            .checked_sub(1)
            .and_then(|slot| self.groups.get(slot).copied().flatten())
    }
}

/// Counts capturing groups in a regex fragment, skipping escaped
/// parentheses, character classes and `(?...)` groups.
pub(crate) fn count_capture_groups(pattern: &str) -> usize {
    let bytes = pattern.as_bytes();
    let mut count = 0;
    let mut in_class = false;
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'\\' => index += 1,
            b'[' if !in_class => in_class = true,
            b']' if in_class => in_class = false,
            b'(' if !in_class && bytes.get(index + 1) != Some(&b'?') => count += 1,
            _ => {}
        }
        index += 1;
    }
    count
}

/// Mechanism kinds, in the order they are tried.
pub(crate) fn mechanism_definitions() -> Vec<TermDefinition> {
    vec![
        TermDefinition::new("all", "(?i:all)".to_string(), build_all),
        TermDefinition::new(
            "include",
            format!("(?i:include):{}", domain_spec()),
            build_include,
        ),
        TermDefinition::new(
            "a",
            format!("(?i:a)(?::{})?{}", domain_spec(), dual_cidr()),
            build_a,
        ),
        TermDefinition::new(
            "mx",
            format!("(?i:mx)(?::{})?{}", domain_spec(), dual_cidr()),
            build_mx,
        ),
        TermDefinition::new(
            "ptr",
            format!("(?i:ptr)(?::{})?", domain_spec()),
            build_ptr,
        ),
        TermDefinition::new(
            "ip4",
            format!("(?i:ip4):{IP4_ADDRESS}(?:{IP4_CIDR})?"),
            build_ip4,
        ),
        TermDefinition::new(
            "ip6",
            format!("(?i:ip6):{IP6_ADDRESS}(?:{IP6_CIDR})?"),
            build_ip6,
        ),
        TermDefinition::new(
            "exists",
            format!("(?i:exists):{}", domain_spec()),
            build_exists,
        ),
    ]
}

/// Modifier kinds. The unknown-modifier catch-all must stay last.
pub(crate) fn modifier_definitions() -> Vec<TermDefinition> {
    vec![
        TermDefinition::new(
            "redirect",
            format!("(?i:redirect)={}", domain_spec()),
            build_redirect,
        ),
        TermDefinition::new("exp", format!("(?i:exp)={}", domain_spec()), build_exp),
        TermDefinition::new(
            "unknown",
            format!("{MODIFIER_NAME}=({})", macro_string()),
            build_unknown,
        ),
    ]
}

fn required<'a>(
    config: &MatcherConfiguration<'a>,
    index: usize,
    term: &str,
) -> Result<&'a str, SpfError> {
    config
        .group(index)
        .ok_or_else(|| SpfError::perm(format!("Missing domain for {term}")))
}

fn cidr_length(group: Option<&str>, max: u32, family: &str) -> Result<u32, SpfError> {
    match group {
        None => Ok(max),
        Some(text) => match text.parse::<u32>() {
            Ok(length) if length <= max => Ok(length),
            _ => Err(SpfError::perm(format!("Invalid {family} CIDR length: {text}"))),
        },
    }
}

fn dual_cidr_lengths(
    config: &MatcherConfiguration<'_>,
    ip4: usize,
    ip6: usize,
) -> Result<DualCidr, SpfError> {
    Ok(DualCidr {
        ip4: cidr_length(config.group(ip4), 32, "IP4")?,
        ip6: cidr_length(config.group(ip6), 128, "IP6")?,
    })
}

fn build_all(_: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
    Ok(Term::Mechanism(Mechanism::All))
}

fn build_include(config: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
    let domain = required(config, 1, "include")?.to_string();
    Ok(Term::Mechanism(Mechanism::Include { domain }))
}

fn build_a(config: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
    Ok(Term::Mechanism(Mechanism::A {
        domain: config.group(1).map(str::to_string),
        cidr: dual_cidr_lengths(config, 2, 3)?,
    }))
}

fn build_mx(config: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
    Ok(Term::Mechanism(Mechanism::Mx {
        domain: config.group(1).map(str::to_string),
        cidr: dual_cidr_lengths(config, 2, 3)?,
    }))
}

fn build_ptr(config: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
    Ok(Term::Mechanism(Mechanism::Ptr {
        domain: config.group(1).map(str::to_string),
    }))
}

fn build_ip4(config: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
    let address = required(config, 1, "ip4")?;
    let length = cidr_length(config.group(2), 32, "IP4")?;
    let network = IpAddress::parse_with_mask(address, Some(length))?;
    if !network.is_ipv4() {
        return Err(SpfError::perm(format!("Not an IPv4 address: {address}")));
    }
    Ok(Term::Mechanism(Mechanism::Ip4 { network }))
}

fn build_ip6(config: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
    let address = required(config, 1, "ip6")?;
    let length = cidr_length(config.group(2), 128, "IP6")?;
    let network = IpAddress::parse_with_mask(address, Some(length))?;
    if !network.is_ipv6() {
        return Err(SpfError::perm(format!("Not an IPv6 address: {address}")));
    }
    Ok(Term::Mechanism(Mechanism::Ip6 { network }))
}

fn build_exists(config: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
    let domain = required(config, 1, "exists")?.to_string();
    Ok(Term::Mechanism(Mechanism::Exists { domain }))
}

fn build_redirect(config: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
    let domain = required(config, 1, "redirect")?.to_string();
    Ok(Term::Modifier(Modifier::Redirect { domain }))
}

fn build_exp(config: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
    let domain = required(config, 1, "exp")?.to_string();
    Ok(Term::Modifier(Modifier::Exp { domain }))
}

fn build_unknown(config: &MatcherConfiguration<'_>) -> Result<Term, SpfError> {
    let name = required(config, 1, "modifier")?;
    if name.eq_ignore_ascii_case("redirect") || name.eq_ignore_ascii_case("exp") {
        return Err(SpfError::perm(format!("Invalid {name} modifier")));
    }
    Ok(Term::Modifier(Modifier::Unknown {
        name: name.to_string(),
        value: config.group(2).unwrap_or_default().to_string(),
    }))
}

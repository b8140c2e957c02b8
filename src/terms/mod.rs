//! Parsed representation of an SPF record and the evaluation logic of each
//! term kind.

mod definition;
pub(crate) mod mechanisms;
pub(crate) mod modifiers;

use std::fmt;

use crate::core::IpAddress;
use crate::executor::ResultCode;

pub(crate) use definition::{MatcherConfiguration, Term, TermDefinition};
pub(crate) use definition::{mechanism_definitions, modifier_definitions};

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qualifier {
    #[default]
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

impl Qualifier {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "" | "+" => Some(Self::Pass),
            "-" => Some(Self::Fail),
            "~" => Some(Self::SoftFail),
            "?" => Some(Self::Neutral),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Pass => '+',
            Self::Fail => '-',
            Self::SoftFail => '~',
            Self::Neutral => '?',
        }
    }

    pub fn result_code(self) -> ResultCode {
        match self {
            Self::Pass => ResultCode::Pass,
            Self::Fail => ResultCode::Fail,
            Self::SoftFail => ResultCode::SoftFail,
            Self::Neutral => ResultCode::Neutral,
        }
    }
}

/// CIDR lengths of `a` and `mx` mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DualCidr {
    pub ip4: u32,
    pub ip6: u32,
}

impl Default for DualCidr {
    fn default() -> Self {
        Self { ip4: 32, ip6: 128 }
    }
}

impl fmt::Display for DualCidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip4 != 32 {
            write!(f, "/{}", self.ip4)?;
        }
        if self.ip6 != 128 {
            write!(f, "//{}", self.ip6)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    All,
    Include { domain: String },
    A { domain: Option<String>, cidr: DualCidr },
    Mx { domain: Option<String>, cidr: DualCidr },
    Ptr { domain: Option<String> },
    Ip4 { network: IpAddress },
    Ip6 { network: IpAddress },
    Exists { domain: String },
}

impl Mechanism {
    /// The unexpanded domain-spec, when the mechanism carries one.
    pub fn domain(&self) -> Option<&str> {
        match self {
            Self::Include { domain } | Self::Exists { domain } => Some(domain),
            Self::A { domain, .. } | Self::Mx { domain, .. } | Self::Ptr { domain } => {
                domain.as_deref()
            }
            Self::All | Self::Ip4 { .. } | Self::Ip6 { .. } => None,
        }
    }

    /// Mechanisms that query DNS and count against the lookup limit.
    pub fn queries_dns(&self) -> bool {
        !matches!(self, Self::All | Self::Ip4 { .. } | Self::Ip6 { .. })
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Include { domain } => write!(f, "include:{domain}"),
            Self::A { domain, cidr } => {
                f.write_str("a")?;
                if let Some(domain) = domain {
                    write!(f, ":{domain}")?;
                }
                write!(f, "{cidr}")
            }
            Self::Mx { domain, cidr } => {
                f.write_str("mx")?;
                if let Some(domain) = domain {
                    write!(f, ":{domain}")?;
                }
                write!(f, "{cidr}")
            }
            Self::Ptr { domain } => match domain {
                Some(domain) => write!(f, "ptr:{domain}"),
                None => f.write_str("ptr"),
            },
            Self::Ip4 { network } => write!(f, "ip4:{network}/{}", network.mask_length()),
            Self::Ip6 { network } => write!(f, "ip6:{network}/{}", network.mask_length()),
            Self::Exists { domain } => write!(f, "exists:{domain}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    qualifier: Qualifier,
    mechanism: Mechanism,
}

impl Directive {
    pub fn new(qualifier: Qualifier, mechanism: Mechanism) -> Self {
        Self {
            qualifier,
            mechanism,
        }
    }

    pub fn qualifier(&self) -> Qualifier {
        self.qualifier
    }

    pub fn mechanism(&self) -> &Mechanism {
        &self.mechanism
    }

    pub(crate) fn into_parts(self) -> (Qualifier, Mechanism) {
        (self.qualifier, self.mechanism)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.qualifier.as_char(), self.mechanism)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    Redirect { domain: String },
    Exp { domain: String },
    Unknown { name: String, value: String },
}

impl Modifier {
    /// `redirect` and `exp` may appear at most once per record.
    pub fn is_single_instance(&self) -> bool {
        !matches!(self, Self::Unknown { .. })
    }

    pub fn same_kind(&self, other: &Modifier) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Redirect { .. } => "redirect",
            Self::Exp { .. } => "exp",
            Self::Unknown { name, .. } => name,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redirect { domain } | Self::Exp { domain } => write!(f, "{}={domain}", self.name()),
            Self::Unknown { name, value } => write!(f, "{name}={value}"),
        }
    }
}

/// Checks the policy layer appends to a record after its own terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecordHook {
    /// Turns "no directive matched" into `neutral`.
    NeutralIfUnmatched,
    /// Explanation used for `fail` results when the record has none.
    DefaultExplanation(String),
}

/// A parsed `v=spf1` record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpfRecord {
    directives: Vec<Directive>,
    modifiers: Vec<Modifier>,
    pub(crate) hooks: Vec<RecordHook>,
}

impl SpfRecord {
    pub fn new(directives: Vec<Directive>, modifiers: Vec<Modifier>) -> Self {
        Self {
            directives,
            modifiers,
            hooks: Vec::new(),
        }
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    /// Inserts `directive` in front of the last directive.
    pub(crate) fn insert_before_last(&mut self, directive: Directive) {
        let at = self.directives.len().saturating_sub(1);
        self.directives.insert(at, directive);
    }
}

impl fmt::Display for SpfRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("v=spf1")?;
        for directive in &self.directives {
            write!(f, " {directive}")?;
        }
        for modifier in &self.modifiers {
            write!(f, " {modifier}")?;
        }
        Ok(())
    }
}

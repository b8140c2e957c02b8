//! Regular expression fragments for the SPF record and macro grammar.
//!
//! Fragments are plain strings so term definitions can be composed into the
//! single record regex built by the parser.

use std::sync::LazyLock;

use regex::Regex;

pub(crate) const ALPHA: &str = "[a-zA-Z]";
pub(crate) const ALPHA_DIGIT: &str = "[a-zA-Z0-9]";
pub(crate) const MACRO_LETTER_EXP: &str = "[rctlsodipvhRCTLSODIPVH]";
pub(crate) const TRANSFORMERS: &str = r"\d*r?";
pub(crate) const DELIMITER: &str = r"[.\-+,/_=]";
pub(crate) const MACRO_LITERAL: &str = r"[\x21-\x24\x26-\x7e]";
pub(crate) const QUALIFIER: &str = r"[+\-~?]";

pub(crate) const IP4_ADDRESS: &str =
    r"((?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d))";
pub(crate) const IP6_ADDRESS: &str = r"([0-9A-Fa-f:.]+)";
pub(crate) const IP4_CIDR: &str = r"/(0|[1-9]\d*)";
pub(crate) const IP6_CIDR: &str = r"/(0|[1-9]\d*)";

pub(crate) const MODIFIER_NAME: &str = r"([a-zA-Z][a-zA-Z0-9\-_.]*)";

pub(crate) fn macro_expand() -> String {
    [r"%(?:\{", MACRO_LETTER_EXP, TRANSFORMERS, DELIMITER, r"*\}|%|_|-)"].concat()
}

pub(crate) fn macro_string_token() -> String {
    [macro_expand().as_str(), "|", MACRO_LITERAL].concat()
}

pub(crate) fn macro_string() -> String {
    ["(?:", macro_string_token().as_str(), ")*"].concat()
}

pub(crate) fn top_label() -> String {
    format!("(?:{ALPHA_DIGIT}*{ALPHA}{ALPHA_DIGIT}*|(?:{ALPHA_DIGIT}+-(?:{ALPHA_DIGIT}|-)*{ALPHA_DIGIT}))")
}

pub(crate) fn domain_end() -> String {
    format!(r"(?:\.{}\.?|{})", top_label(), macro_expand())
}

pub(crate) fn domain_spec() -> String {
    format!("({}{})", macro_string(), domain_end())
}

/// Optional `/ip4-cidr` and `//ip6-cidr` suffix, two capturing groups.
pub(crate) fn dual_cidr() -> String {
    format!("(?:{IP4_CIDR})?(?:/{IP6_CIDR})?")
}

static FQDN: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"^(?:(?:{ALPHA_DIGIT}|_)(?:(?:{ALPHA_DIGIT}|[-_])*(?:{ALPHA_DIGIT}|_))?\.)+{}\.?$",
        top_label()
    );
    Regex::new(&pattern).expect("FQDN grammar compiles")
});

pub(crate) fn is_fqdn(name: &str) -> bool {
    FQDN.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchored(fragment: &str) -> Regex {
        Regex::new(&format!("^{fragment}$")).unwrap()
    }

    #[test]
    fn domain_spec_accepts_macros() {
        let spec = anchored(&domain_spec());
        for domain in [
            "example.com",
            "%{ir}.%{v}._spf.%{d2}",
            "%{d}",
            "_spf.example.com.",
            "%{l1r-}.lp._spf.example.com",
        ] {
            assert!(spec.is_match(domain), "{domain}");
        }
        for domain in ["example.123", "%{k}.example.com", "", "example.com%"] {
            assert!(!spec.is_match(domain), "{domain}");
        }
    }

    #[test]
    fn fqdn_check() {
        assert!(is_fqdn("example.com"));
        assert!(is_fqdn("_spf.example.com."));
        assert!(is_fqdn("mail-1.example.co.uk"));
        assert!(!is_fqdn("localhost"));
        assert!(!is_fqdn("[192.0.2.1]"));
        assert!(!is_fqdn("example.-com"));
    }
}

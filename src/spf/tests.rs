use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{Spf, SpfOptions};
use crate::executor::{ResultCode, SpfResult, ThreadedDnsLookup};
use crate::policies::{RecordSource, StaticRecords};
use crate::core::RecordType;
use crate::stub::StubDns;

const HELO: &str = "mail.example.com";

fn check(dns: StubDns, ip: &str, sender: &str) -> SpfResult {
    check_with(dns, SpfOptions::default(), ip, sender)
}

fn check_with(dns: StubDns, options: SpfOptions, ip: &str, sender: &str) -> SpfResult {
    Spf::with_options(Arc::new(dns), options).check_spf(ip, sender, HELO)
}

fn check_staged(dns: StubDns, options: SpfOptions, ip: &str, sender: &str) -> SpfResult {
    let dns = Arc::new(dns);
    let spf = Spf::staged(
        dns.clone(),
        Arc::new(ThreadedDnsLookup::new(dns)),
        options,
    )
    .expect("executor starts");
    spf.check_spf(ip, sender, HELO)
}

fn example_zone() -> StubDns {
    StubDns::new().with_txt("example.com", "v=spf1 ip4:192.0.2.0/24 -all")
}

#[test]
fn ip4_pass_and_fail() {
    let pass = check(example_zone(), "192.0.2.5", "user@example.com");
    assert_eq!(pass.result(), ResultCode::Pass);
    assert_eq!(pass.explanation(), "");
    insta::assert_snapshot!(pass.header(), @"Received-SPF: pass (spfCheck: domain of example.com designates 192.0.2.5 as permitted sender) client-ip=192.0.2.5; envelope-from=user@example.com; helo=mail.example.com;");

    let fail = check(example_zone(), "198.51.100.1", "user@example.com");
    assert_eq!(fail.result(), ResultCode::Fail);
    insta::assert_snapshot!(fail.header(), @"Received-SPF: fail (spfCheck: domain of example.com does not designate 198.51.100.1 as permitted sender) client-ip=198.51.100.1; envelope-from=user@example.com; helo=mail.example.com;");
}

#[test]
fn spf_type_is_queried_before_txt() {
    let dns = Arc::new(example_zone());
    let spf = Spf::new(dns.clone());
    assert_eq!(
        spf.check_spf("192.0.2.5", "user@example.com", HELO).result(),
        ResultCode::Pass
    );
    assert_eq!(dns.queries(), vec!["example.com#SPF", "example.com#TXT"]);
}

#[test]
fn spf_type_answer_wins() {
    let dns = StubDns::new()
        .with_records("example.com", RecordType::Spf, &["v=spf1 +all"])
        .with_txt("example.com", "v=spf1 -all");
    assert_eq!(
        check(dns, "192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );
}

#[test]
fn fail_carries_default_explanation() {
    let result = check(example_zone(), "198.51.100.1", "user@example.com");
    assert_eq!(
        result.explanation(),
        "http://www.openspf.org/why.html?sender=user%40example.com&ip=198.51.100.1"
    );

    let options = SpfOptions::default().with_default_explanation("%{i} rejected by %{d}");
    let custom = check_with(example_zone(), options, "198.51.100.1", "user@example.com");
    assert_eq!(custom.explanation(), "198.51.100.1 rejected by example.com");
}

#[test]
fn exp_modifier_supplies_explanation() {
    let dns = StubDns::new()
        .with_txt("example.com", "v=spf1 mx -all exp=explain.example.com")
        .with_txt(
            "explain.example.com",
            "%{i} is not one of %{d}'s designated mail servers.",
        );
    let result = check(dns, "198.51.100.1", "user@example.com");
    assert_eq!(result.result(), ResultCode::Fail);
    assert_eq!(
        result.explanation(),
        "198.51.100.1 is not one of example.com's designated mail servers."
    );
}

#[test]
fn broken_exp_falls_back_to_default() {
    let dns = StubDns::new()
        .with_txt("example.com", "v=spf1 -all exp=explain.example.com")
        .with_records(
            "explain.example.com",
            RecordType::Txt,
            &["first", "second"],
        );
    let result = check(dns, "198.51.100.1", "user@example.com");
    assert_eq!(result.result(), ResultCode::Fail);
    assert!(result.explanation().starts_with("http://www.openspf.org/why.html?"));
}

#[test]
fn missing_record_is_none() {
    let result = check(StubDns::new(), "192.0.2.5", "user@example.com");
    assert_eq!(result.result(), ResultCode::None);
    insta::assert_snapshot!(result.header(), @"Received-SPF: none (spfCheck: 192.0.2.5 is neither permitted nor denied by domain of example.com) client-ip=192.0.2.5; envelope-from=user@example.com; helo=mail.example.com;");
}

#[test]
fn non_spf1_records_are_ignored() {
    let dns = StubDns::new().with_records(
        "example.com",
        RecordType::Txt,
        &["spf2.0/pra ip4:192.0.2.0/24 -all", "v=spf10 +all"],
    );
    assert_eq!(
        check(dns, "192.0.2.5", "user@example.com").result(),
        ResultCode::None
    );
}

#[test]
fn multiple_records_are_permerror() {
    let dns = StubDns::new().with_records(
        "example.com",
        RecordType::Txt,
        &["v=spf1 +all", "v=spf1 -all"],
    );
    let result = check(dns, "192.0.2.5", "user@example.com");
    assert_eq!(result.result(), ResultCode::PermError);
    insta::assert_snapshot!(result.header(), @"Received-SPF: permerror (spfCheck: Error in processing SPF Record) client-ip=192.0.2.5; envelope-from=user@example.com; helo=mail.example.com;");
}

#[test]
fn txt_timeout_is_temperror() {
    let dns = StubDns::new().with_timeout("example.com", RecordType::Txt);
    let result = check(dns, "192.0.2.5", "user@example.com");
    assert_eq!(result.result(), ResultCode::TempError);
    insta::assert_snapshot!(result.header(), @"Received-SPF: temperror (spfCheck: Error in retrieving data from DNS) client-ip=192.0.2.5; envelope-from=user@example.com; helo=mail.example.com;");
}

#[test]
fn empty_record_is_neutral() {
    let dns = StubDns::new().with_txt("example.com", "v=spf1");
    assert_eq!(
        check(dns, "192.0.2.5", "user@example.com").result(),
        ResultCode::Neutral
    );
}

#[test]
fn unmatched_record_is_neutral() {
    let dns = StubDns::new().with_txt("example.com", "v=spf1 ip4:203.0.113.0/24");
    assert_eq!(
        check(dns, "192.0.2.5", "user@example.com").result(),
        ResultCode::Neutral
    );
}

#[test]
fn syntax_error_is_permerror() {
    let dns = StubDns::new().with_txt("example.com", "v=spf1 ip4:192.0.2.0/33 -all");
    assert_eq!(
        check(dns, "192.0.2.5", "user@example.com").result(),
        ResultCode::PermError
    );
}

#[test]
fn invalid_client_ip_is_permerror() {
    let result = check(example_zone(), "not-an-ip", "user@example.com");
    assert_eq!(result.result(), ResultCode::PermError);
}

#[test]
fn invalid_sender_domain_is_none() {
    let dns = StubDns::new().with_txt("localhost", "v=spf1 +all");
    assert_eq!(
        check(dns, "192.0.2.5", "user@localhost").result(),
        ResultCode::None
    );
}

#[test]
fn null_sender_uses_helo() {
    let dns = StubDns::new().with_txt(HELO, "v=spf1 ip4:192.0.2.5 -all");
    let result = check(dns, "192.0.2.5", "");
    assert_eq!(result.result(), ResultCode::Pass);
    assert!(result.header_text().contains("envelope-from=postmaster@mail.example.com;"));
}

#[test]
fn ip6_and_mapped_ip4_clients() {
    let dns = StubDns::new().with_txt(
        "example.com",
        "v=spf1 ip4:192.0.2.0/24 ip6:2001:db8::/32 -all",
    );
    assert_eq!(
        check(dns, "2001:db8::1", "user@example.com").result(),
        ResultCode::Pass
    );
    let dns = StubDns::new().with_txt("example.com", "v=spf1 ip4:192.0.2.0/24 -all");
    assert_eq!(
        check(dns, "::ffff:192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );
    let dns = StubDns::new().with_txt("example.com", "v=spf1 ip6:2001:db8::/32 -all");
    assert_eq!(
        check(dns, "2001:db9::1", "user@example.com").result(),
        ResultCode::Fail
    );
}

#[test]
fn a_mechanism_with_prefix() {
    let zone = || {
        StubDns::new()
            .with_txt("example.com", "v=spf1 a/24 -all")
            .with_records("example.com", RecordType::A, &["192.0.2.1"])
    };
    assert_eq!(
        check(zone(), "192.0.2.77", "user@example.com").result(),
        ResultCode::Pass
    );
    assert_eq!(
        check(zone(), "198.51.100.1", "user@example.com").result(),
        ResultCode::Fail
    );
}

#[test]
fn a_mechanism_with_address_literal_host() {
    let dns = Arc::new(StubDns::new().with_txt("example.com", "v=spf1 a:%{i} -all"));
    let result = Spf::new(dns.clone()).check_spf("192.0.2.9", "user@example.com", HELO);
    assert_eq!(result.result(), ResultCode::Pass);
    assert!(!dns.queries().iter().any(|query| query.starts_with("192.0.2.9#")));
}

#[test]
fn mx_mechanism() {
    let zone = || {
        StubDns::new()
            .with_txt("example.com", "v=spf1 mx -all")
            .with_records("example.com", RecordType::Mx, &["mx1.example.com", "mx2.example.com"])
            .with_records("mx1.example.com", RecordType::A, &["192.0.2.10"])
            .with_records("mx2.example.com", RecordType::A, &["192.0.2.20"])
    };
    assert_eq!(
        check(zone(), "192.0.2.20", "user@example.com").result(),
        ResultCode::Pass
    );
    assert_eq!(
        check(zone(), "192.0.2.30", "user@example.com").result(),
        ResultCode::Fail
    );
}

#[test]
fn too_many_mx_hosts_is_permerror() {
    let hosts: Vec<String> = (0..11).map(|i| format!("mx{i}.example.com")).collect();
    let hosts: Vec<&str> = hosts.iter().map(String::as_str).collect();
    let dns = StubDns::new()
        .with_txt("example.com", "v=spf1 mx -all")
        .with_records("example.com", RecordType::Mx, &hosts);
    assert_eq!(
        check(dns, "192.0.2.5", "user@example.com").result(),
        ResultCode::PermError
    );
}

#[test]
fn ptr_mechanism_validates_names() {
    let zone = |forward: &str| {
        StubDns::new()
            .with_txt("example.com", "v=spf1 ptr -all")
            .with_records("5.2.0.192.in-addr.arpa", RecordType::Ptr, &["mail.example.com"])
            .with_records("mail.example.com", RecordType::A, &[forward])
    };
    assert_eq!(
        check(zone("192.0.2.5"), "192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );
    assert_eq!(
        check(zone("192.0.2.99"), "192.0.2.5", "user@example.com").result(),
        ResultCode::Fail
    );
}

#[test]
fn exists_with_ip_macro() {
    let zone = || {
        StubDns::new()
            .with_txt("example.com", "v=spf1 exists:%{i}.bl.example.com -all")
            .with_records("192.0.2.5.bl.example.com", RecordType::A, &["127.0.0.2"])
    };
    assert_eq!(
        check(zone(), "192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );
    assert_eq!(
        check(zone(), "192.0.2.6", "user@example.com").result(),
        ResultCode::Fail
    );

    let timeout = zone().with_timeout("192.0.2.5.bl.example.com", RecordType::A);
    assert_eq!(
        check(timeout, "192.0.2.5", "user@example.com").result(),
        ResultCode::TempError
    );
}

#[test]
fn exists_with_validated_client_domain() {
    let zone = || {
        StubDns::new()
            .with_txt("example.com", "v=spf1 exists:%{p}.allow.example.com -all")
            .with_records("mail.example.org.allow.example.com", RecordType::A, &["127.0.0.2"])
    };
    let validated = zone()
        .with_records("5.2.0.192.in-addr.arpa", RecordType::Ptr, &["mail.example.org"])
        .with_records("mail.example.org", RecordType::A, &["192.0.2.5"]);
    assert_eq!(
        check(validated, "192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );

    let dns = Arc::new(zone());
    let result = Spf::new(dns.clone()).check_spf("192.0.2.5", "user@example.com", HELO);
    assert_eq!(result.result(), ResultCode::Fail);
    assert!(dns
        .queries()
        .contains(&"unknown.allow.example.com#A".to_string()));
}

#[test]
fn include_matches_only_on_pass() {
    let zone = |included: &str| {
        StubDns::new()
            .with_txt("example.com", "v=spf1 include:other.example.net ~all")
            .with_txt("other.example.net", included)
    };
    assert_eq!(
        check(zone("v=spf1 +all"), "192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );
    assert_eq!(
        check(zone("v=spf1 -all"), "192.0.2.5", "user@example.com").result(),
        ResultCode::SoftFail
    );
    assert_eq!(
        check(zone("v=spf1 ?all"), "192.0.2.5", "user@example.com").result(),
        ResultCode::SoftFail
    );
    assert_eq!(
        check(zone("v=spf1 bogus"), "192.0.2.5", "user@example.com").result(),
        ResultCode::PermError
    );
}

#[test]
fn include_of_missing_domain_does_not_match() {
    let dns = StubDns::new().with_txt("example.com", "v=spf1 include:missing.example.net ~all");
    let result = check(dns, "192.0.2.5", "user@example.com");
    assert_eq!(result.result(), ResultCode::SoftFail);
    assert!(result.header_text().contains("domain of example.com"));
}

#[test]
fn include_timeout_is_temperror() {
    let dns = StubDns::new()
        .with_txt("example.com", "v=spf1 include:slow.example.net -all")
        .with_timeout("slow.example.net", RecordType::Txt);
    assert_eq!(
        check(dns, "192.0.2.5", "user@example.com").result(),
        ResultCode::TempError
    );
}

#[test]
fn included_fail_does_not_set_explanation() {
    let dns = StubDns::new()
        .with_txt("example.com", "v=spf1 include:other.example.net ?all")
        .with_txt("other.example.net", "v=spf1 -all exp=explain.example.net")
        .with_txt("explain.example.net", "from the included domain");
    let result = check(dns, "192.0.2.5", "user@example.com");
    assert_eq!(result.result(), ResultCode::Neutral);
    assert_eq!(result.explanation(), "");
}

fn include_chain(links: usize) -> StubDns {
    let mut dns = StubDns::new().with_txt(
        "example.com",
        "v=spf1 include:d1.example.com -all",
    );
    for i in 1..links {
        dns = dns.with_txt(
            &format!("d{i}.example.com"),
            &format!("v=spf1 include:d{}.example.com -all", i + 1),
        );
    }
    dns.with_txt(&format!("d{links}.example.com"), "v=spf1 +all")
}

#[test]
fn include_depth_limit() {
    assert_eq!(
        check(include_chain(10), "192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );
    assert_eq!(
        check(include_chain(11), "192.0.2.5", "user@example.com").result(),
        ResultCode::PermError
    );
}

#[test]
fn dns_mechanisms_count_towards_depth() {
    let mechanisms: Vec<String> = (0..11).map(|i| format!("a:h{i}.example.com")).collect();
    let record = format!("v=spf1 {} -all", mechanisms.join(" "));
    let dns = StubDns::new().with_txt("example.com", &record);
    assert_eq!(
        check(dns, "192.0.2.5", "user@example.com").result(),
        ResultCode::PermError
    );
}

#[test]
fn redirect_follows_target_policy() {
    let zone = || {
        StubDns::new()
            .with_txt("example.com", "v=spf1 redirect=spf.example.net")
            .with_txt("spf.example.net", "v=spf1 ip4:192.0.2.0/24 -all")
    };
    assert_eq!(
        check(zone(), "192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );
    let fail = check(zone(), "198.51.100.1", "user@example.com");
    assert_eq!(fail.result(), ResultCode::Fail);
    assert!(!fail.explanation().is_empty());
}

#[test]
fn redirect_is_ignored_after_a_match() {
    let dns = StubDns::new()
        .with_txt("example.com", "v=spf1 +all redirect=spf.example.net")
        .with_txt("spf.example.net", "v=spf1 -all");
    assert_eq!(
        check(dns, "192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );
}

#[test]
fn redirect_failures() {
    let missing = StubDns::new().with_txt("example.com", "v=spf1 redirect=missing.example.net");
    assert_eq!(
        check(missing, "192.0.2.5", "user@example.com").result(),
        ResultCode::PermError
    );

    let empty = StubDns::new()
        .with_txt("example.com", "v=spf1 redirect=empty.example.net")
        .with_txt("empty.example.net", "v=spf1");
    assert_eq!(
        check(empty, "192.0.2.5", "user@example.com").result(),
        ResultCode::Neutral
    );

    let looping = StubDns::new().with_txt("example.com", "v=spf1 redirect=example.com");
    assert_eq!(
        check(looping, "192.0.2.5", "user@example.com").result(),
        ResultCode::PermError
    );
}

#[test]
fn strict_mode_requires_identical_records() {
    let options = || SpfOptions::default().with_strict_txt(true);
    let differing = StubDns::new()
        .with_records("example.com", RecordType::Spf, &["v=spf1 +all"])
        .with_txt("example.com", "v=spf1 -all");
    assert_eq!(
        check_with(differing, options(), "192.0.2.5", "user@example.com").result(),
        ResultCode::PermError
    );

    let identical = StubDns::new()
        .with_records("example.com", RecordType::Spf, &["v=spf1 +all"])
        .with_txt("example.com", "v=spf1 +all");
    assert_eq!(
        check_with(identical, options(), "192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );

    assert_eq!(
        check_with(example_zone(), options(), "192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );
}

#[test]
fn best_guess_applies_without_record() {
    let zone = || StubDns::new().with_records("example.com", RecordType::A, &["192.0.2.1"]);
    let options = || SpfOptions::default().with_best_guess(true);
    assert_eq!(
        check_with(zone(), options(), "192.0.2.5", "user@example.com").result(),
        ResultCode::Pass
    );
    assert_eq!(
        check_with(zone(), options(), "198.51.100.1", "user@example.com").result(),
        ResultCode::SoftFail
    );
    assert_eq!(
        check(zone(), "192.0.2.5", "user@example.com").result(),
        ResultCode::None
    );
}

#[test]
fn trusted_forwarder_is_included_before_final_all() {
    let zone = || {
        StubDns::new()
            .with_txt("example.com", "v=spf1 ip4:192.0.2.0/24 -all")
            .with_txt("spf.trusted-forwarder.org", "v=spf1 ip4:198.51.100.0/24 -all")
    };
    let options = || SpfOptions::default().with_trusted_forwarder(true);
    assert_eq!(
        check_with(zone(), options(), "198.51.100.7", "user@example.com").result(),
        ResultCode::Pass
    );
    assert_eq!(
        check(zone(), "198.51.100.7", "user@example.com").result(),
        ResultCode::Fail
    );
    // client absent des deux politiques: le -all du domaine s'applique
    assert_eq!(
        check_with(zone(), options(), "203.0.113.1", "user@example.com").result(),
        ResultCode::Fail
    );
}

#[test]
fn trusted_forwarder_leaves_included_records_alone() {
    let zone = || {
        StubDns::new()
            .with_txt("example.com", "v=spf1 include:partner.example -all")
            .with_txt("partner.example", "v=spf1 ip4:192.0.2.0/24 -all")
            .with_txt("spf.trusted-forwarder.org", "v=spf1 ip4:198.51.100.0/24 -all")
    };
    let options = || SpfOptions::default().with_trusted_forwarder(true);
    assert_eq!(
        check_with(zone(), options(), "192.0.2.1", "user@example.com").result(),
        ResultCode::Pass
    );
    assert_eq!(
        check_with(zone(), options(), "198.51.100.7", "user@example.com").result(),
        ResultCode::Pass
    );
    let dns = Arc::new(zone());
    let result = Spf::with_options(dns.clone(), options()).check_spf(
        "203.0.113.1",
        "user@example.com",
        HELO,
    );
    assert_eq!(result.result(), ResultCode::Fail);
    let forwarder_lookups = dns
        .queries()
        .iter()
        .filter(|query| query.as_str() == "spf.trusted-forwarder.org#TXT")
        .count();
    assert_eq!(forwarder_lookups, 1);
}

#[test]
fn override_replaces_published_record() {
    let overrides: Arc<dyn RecordSource> = Arc::new(
        StaticRecords::new()
            .with_entry("example.com", "v=spf1 +all")
            .unwrap(),
    );
    let options = SpfOptions::default().with_override_policy(overrides);
    let dns = Arc::new(example_zone());
    let result = Spf::with_options(dns.clone(), options).check_spf(
        "198.51.100.1",
        "user@example.com",
        HELO,
    );
    assert_eq!(result.result(), ResultCode::Pass);
    assert!(dns.queries().is_empty());
}

#[test]
fn fallback_applies_only_without_record() {
    let fallback: Arc<dyn RecordSource> = Arc::new(
        StaticRecords::new()
            .with_entry("*.example.org", "v=spf1 -all")
            .unwrap(),
    );
    let options = || SpfOptions::default().with_fallback_policy(Arc::clone(&fallback));
    assert_eq!(
        check_with(StubDns::new(), options(), "192.0.2.5", "user@mail.example.org").result(),
        ResultCode::Fail
    );

    let published = StubDns::new().with_txt("mail.example.org", "v=spf1 +all");
    assert_eq!(
        check_with(published, options(), "192.0.2.5", "user@mail.example.org").result(),
        ResultCode::Pass
    );
}

#[test]
fn repeated_checks_agree() {
    let spf = Spf::new(Arc::new(example_zone()));
    let first = spf.check_spf("198.51.100.1", "user@example.com", HELO);
    let second = spf.check_spf("198.51.100.1", "user@example.com", HELO);
    assert_eq!(first, second);
}

#[test]
fn staged_executor_matches_synchronous() {
    let zones: [(fn() -> StubDns, &str); 6] = [
        (example_zone, "192.0.2.5"),
        (example_zone, "198.51.100.1"),
        (StubDns::new, "192.0.2.5"),
        (
            || StubDns::new().with_timeout("example.com", RecordType::Txt),
            "192.0.2.5",
        ),
        (
            || {
                StubDns::new()
                    .with_txt("example.com", "v=spf1 mx include:other.example.net -all")
                    .with_records("example.com", RecordType::Mx, &["mx.example.com"])
                    .with_records("mx.example.com", RecordType::A, &["192.0.2.10"])
                    .with_txt("other.example.net", "v=spf1 ip4:198.51.100.0/24 -all")
            },
            "198.51.100.1",
        ),
        (|| include_chain(11), "192.0.2.5"),
    ];
    for (zone, ip) in zones {
        let sync = check(zone(), ip, "user@example.com");
        let staged = check_staged(zone(), SpfOptions::default(), ip, "user@example.com");
        assert_eq!(sync, staged, "client {ip}");
    }
}

#[test]
fn staged_executor_serves_concurrent_callers() {
    let dns = Arc::new(
        StubDns::new()
            .with_txt("example.com", "v=spf1 a -all")
            .with_records("example.com", RecordType::A, &["192.0.2.1"]),
    );
    let spf = Arc::new(
        Spf::staged(
            dns.clone(),
            Arc::new(ThreadedDnsLookup::new(dns)),
            SpfOptions::default(),
        )
        .unwrap(),
    );
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let spf = Arc::clone(&spf);
            thread::spawn(move || {
                let ip = if i % 2 == 0 { "192.0.2.1" } else { "192.0.2.2" };
                (i, spf.check_spf(ip, "user@example.com", HELO).result())
            })
        })
        .collect();
    for handle in handles {
        let (i, result) = handle.join().unwrap();
        let expected = if i % 2 == 0 { ResultCode::Pass } else { ResultCode::Fail };
        assert_eq!(result, expected);
    }
}

#[test]
fn dropping_staged_executor_completes_pending_checks() {
    let dns = Arc::new(
        StubDns::new()
            .with_txt("example.com", "v=spf1 a -all")
            .with_records("example.com", RecordType::A, &["192.0.2.1"])
            .with_delay(Duration::from_millis(100)),
    );
    let spf = Spf::staged(
        dns.clone(),
        Arc::new(ThreadedDnsLookup::new(dns)),
        SpfOptions::default(),
    )
    .unwrap();
    let pass = spf.check_spf_future("192.0.2.1", "user@example.com", HELO);
    let fail = spf.check_spf_future("192.0.2.2", "user@example.com", HELO);
    assert!(!pass.is_ready());
    drop(spf);
    assert_eq!(pass.wait().result(), ResultCode::Pass);
    assert_eq!(fail.wait().result(), ResultCode::Fail);
}

#[test]
fn future_listeners_see_the_result() {
    let spf = Spf::new(Arc::new(example_zone()));
    let future = spf.check_spf_future("192.0.2.5", "user@example.com", HELO);
    assert!(future.is_ready());
    let (tx, rx) = std::sync::mpsc::channel();
    future.add_listener(move |result| {
        let _ = tx.send(result.result());
    });
    assert_eq!(rx.recv().unwrap(), ResultCode::Pass);
}

#[test]
fn explanation_names_the_receiving_host() {
    let dns = example_zone().with_local_names(&["localhost", "mx.receiver.example"]);
    let options = SpfOptions::default().with_default_explanation("rejected by %{r}");
    let result = check_with(dns, options, "198.51.100.1", "user@example.com");
    assert_eq!(result.explanation(), "rejected by mx.receiver.example");
}

#[test]
fn ip4_network_admits_members_and_fails_outsiders() {
    let zone = || StubDns::new().with_txt("example.org", "v=spf1 ip4:203.0.113.0/24 -all");
    assert_eq!(
        check(zone(), "203.0.113.5", "user@example.org").result(),
        ResultCode::Pass
    );
    assert_eq!(
        check(zone(), "198.51.100.9", "user@example.org").result(),
        ResultCode::Fail
    );
}

//! Template propagation from domain and record templates to records.

mod common;

use common::*;
use dnsaas_core::{write, AutoPtr, DomainData, DomainStage, DomainTemplateData, DomainType, RecordType};

fn soa_content(domain: &str) -> String {
    format!("ns1.{domain} hostmaster.{domain} 0 43200 600 1209600 600")
}

// =========================================================================
// Binding
// =========================================================================

#[test]
fn binding_materializes_every_record_template() {
    let world = TestWorld::new();
    let template = world.domain_template("basic");
    let soa = world.record_template(&template, RecordType::Soa, "{domain-name}", SOA_TEMPLATE);
    let ns = world.record_template(&template, RecordType::Ns, "{domain-name}", "ns1.{domain-name}");

    let mut data = DomainData::new("example.com");
    data.template = Some(template.id);
    let domain = world.domain_with(data);

    let records = world.records_in(&domain);
    assert_eq!(records.len(), 2);
    let soa_record = world
        .find_record("example.com", RecordType::Soa, &soa_content("example.com"))
        .expect("SOA materialized");
    assert_eq!(soa_record.data.template, Some(soa.id));
    let ns_record = world
        .find_record("example.com", RecordType::Ns, "ns1.example.com")
        .expect("NS materialized");
    assert_eq!(ns_record.data.template, Some(ns.id));
}

#[test]
fn resaving_bound_domain_is_a_no_op() {
    let world = TestWorld::new();
    let template = world.domain_template("basic");
    world.record_template(&template, RecordType::Soa, "{domain-name}", SOA_TEMPLATE);
    world.record_template(&template, RecordType::Ns, "{domain-name}", "ns1.{domain-name}");

    let mut data = DomainData::new("example.com");
    data.template = Some(template.id);
    let domain = world.domain_with(data);
    let before = world.records_in(&domain);

    let mut domain = world.reload_domain(&domain);
    domain.data.remarks = "touched".into();
    let domain = world.update_domain(domain);

    let after = world.records_in(&domain);
    assert_eq!(
        before.iter().map(|r| r.id).collect::<Vec<_>>(),
        after.iter().map(|r| r.id).collect::<Vec<_>>()
    );
}

#[test]
fn templated_records_inherit_domain_owner() {
    let world = TestWorld::new();
    let alice = world.user("alice");
    let template = world.domain_template("basic");
    world.record_template(&template, RecordType::Ns, "{domain-name}", "ns1.{domain-name}");

    let mut data = DomainData::new("example.com");
    data.template = Some(template.id);
    data.owner = Some(alice.id);
    world.domain_with(data);

    let ns = world
        .find_record("example.com", RecordType::Ns, "ns1.example.com")
        .unwrap();
    assert_eq!(ns.data.owner, Some(alice.id));
}

#[test]
fn switching_template_replaces_records() {
    let world = TestWorld::new();
    let first = world.domain_template("first");
    world.record_template(&first, RecordType::Ns, "{domain-name}", "ns1.{domain-name}");
    let second = world.domain_template("second");
    world.record_template(&second, RecordType::Ns, "{domain-name}", "ns2.{domain-name}");

    let mut data = DomainData::new("example.com");
    data.template = Some(first.id);
    let mut domain = world.domain_with(data);

    domain.data.template = Some(second.id);
    world.update_domain(domain);

    assert!(world
        .find_record("example.com", RecordType::Ns, "ns1.example.com")
        .is_none());
    assert!(world
        .find_record("example.com", RecordType::Ns, "ns2.example.com")
        .is_some());
}

#[test]
fn hand_made_record_is_adopted_by_template() {
    let world = TestWorld::new();
    let domain = world.domain("example.com", None);
    let manual = world.record(&domain, "example.com", RecordType::Ns, "ns1.example.com", None);

    let template = world.domain_template("basic");
    let ns = world.record_template(&template, RecordType::Ns, "{domain-name}", "ns1.{domain-name}");
    let mut domain = world.reload_domain(&domain);
    domain.data.template = Some(template.id);
    world.update_domain(domain);

    let adopted = world.reload_record(&manual).expect("record kept");
    assert_eq!(adopted.data.template, Some(ns.id));
    assert_eq!(world.records_named("example.com").len(), 1);
}

#[test]
fn new_domain_takes_settings_from_its_template() {
    let world = TestWorld::new();
    let admin = world.superuser("admin");
    let mut data = DomainTemplateData::new("internal");
    data.domain_type = Some(DomainType::Native);
    data.auto_ptr = AutoPtr::OnlyIfDomain;
    data.unrestricted = true;
    let template = world
        .workflow
        .create_domain_template(&admin.actor(), data)
        .unwrap();

    let mut stage = DomainStage::new("example.com");
    stage.template = Some(template.id);
    let outcome = world
        .workflow
        .create_domain(&admin.actor(), stage)
        .unwrap();
    let domain = outcome.entity().expect("domain created");

    assert_eq!(domain.data.domain_type, Some(DomainType::Native));
    assert_eq!(domain.data.auto_ptr, AutoPtr::OnlyIfDomain);
    assert!(domain.data.unrestricted);
}

#[test]
fn explicit_domain_settings_win_over_template() {
    let world = TestWorld::new();
    let admin = world.superuser("admin");
    let mut data = DomainTemplateData::new("internal");
    data.auto_ptr = AutoPtr::Never;
    let template = world
        .workflow
        .create_domain_template(&admin.actor(), data)
        .unwrap();

    let mut stage = DomainStage::new("example.com");
    stage.template = Some(template.id);
    stage.auto_ptr = Some(AutoPtr::Always);
    let outcome = world
        .workflow
        .create_domain(&admin.actor(), stage)
        .unwrap();
    let domain = outcome.entity().expect("domain created");

    assert_eq!(domain.data.auto_ptr, AutoPtr::Always);
}

// =========================================================================
// Template changes
// =========================================================================

#[test]
fn new_record_template_reaches_bound_domains() {
    let world = TestWorld::new();
    let template = world.domain_template("basic");
    let mut first = DomainData::new("example.com");
    first.template = Some(template.id);
    world.domain_with(first);
    let mut second = DomainData::new("example.org");
    second.template = Some(template.id);
    world.domain_with(second);

    world.record_template(&template, RecordType::Txt, "{domain-name}", "v=spf1 -all");

    assert!(world
        .find_record("example.com", RecordType::Txt, "v=spf1 -all")
        .is_some());
    assert!(world
        .find_record("example.org", RecordType::Txt, "v=spf1 -all")
        .is_some());
}

#[test]
fn record_template_update_propagates() {
    let world = TestWorld::new();
    let template = world.domain_template("basic");
    let mut ns = world.record_template(&template, RecordType::Ns, "{domain-name}", "ns1.{domain-name}");
    let mut data = DomainData::new("example.com");
    data.template = Some(template.id);
    world.domain_with(data);
    let before = world
        .find_record("example.com", RecordType::Ns, "ns1.example.com")
        .unwrap();

    ns.data.content = "ns2.{domain-name}".into();
    ns.data.ttl = Some(600);
    world
        .store
        .transaction(|tx| write::update_record_template(tx, ns))
        .unwrap();

    let after = world.reload_record(&before).expect("same record updated");
    assert_eq!(after.data.content, "ns2.example.com");
    assert_eq!(after.data.ttl, Some(600));
}

#[test]
fn record_template_delete_removes_instances() {
    let world = TestWorld::new();
    let template = world.domain_template("basic");
    let soa = world.record_template(&template, RecordType::Soa, "{domain-name}", SOA_TEMPLATE);
    world.record_template(&template, RecordType::Ns, "{domain-name}", "ns1.{domain-name}");
    let mut data = DomainData::new("example.com");
    data.template = Some(template.id);
    let domain = world.domain_with(data);

    world
        .store
        .transaction(|tx| write::delete_record_template(tx, soa.id))
        .unwrap();

    let records = world.records_in(&domain);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data.record_type, RecordType::Ns);
}

#[test]
fn domain_template_delete_detaches_and_cleans_up() {
    let world = TestWorld::new();
    let admin = world.superuser("admin");
    let template = world.domain_template("basic");
    world.record_template(&template, RecordType::Ns, "{domain-name}", "ns1.{domain-name}");
    let mut data = DomainData::new("example.com");
    data.template = Some(template.id);
    let domain = world.domain_with(data);
    let manual = world.record(&domain, "www.example.com", RecordType::Txt, "kept", None);

    world
        .workflow
        .delete_domain_template(&admin.actor(), template.id)
        .unwrap();

    let domain = world.reload_domain(&domain);
    assert_eq!(domain.data.template, None);
    let records = world.records_in(&domain);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, manual.id);
}

#[test]
fn template_management_requires_superuser() {
    let world = TestWorld::new();
    let alice = world.user("alice");
    let template = world.domain_template("basic");

    let err = world
        .workflow
        .delete_domain_template(&alice.actor(), template.id)
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[test]
fn invalid_pattern_is_rejected() {
    let world = TestWorld::new();
    let template = world.domain_template("basic");
    let data = dnsaas_core::RecordTemplateData::new(
        template.id,
        RecordType::Ns,
        "{domain}",
        "ns1.{domain-name}",
    );

    let err = world
        .store
        .transaction(|tx| write::create_record_template(tx, data))
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

//! Shared test infrastructure for workflow integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use dnsaas_core::model::{OwnershipType, ServiceId};
use dnsaas_core::notify::NotifyError;
use dnsaas_core::{
    write, Domain, DomainData, DomainTemplate, DomainTemplateData, Notifier, OwnerNotice, Record,
    RecordData, RecordTemplate, RecordTemplateData, RecordType, Store, User, Workflow,
    WorkflowConfig,
};

// --- Constants ---

pub const SOA_TEMPLATE: &str = "ns1.{domain-name} hostmaster.{domain-name} 0 43200 600 1209600 600";

// --- Notifiers ---

/// Keeps every notice it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<OwnerNotice>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<OwnerNotice> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn email_owner(&self, notice: &OwnerNotice) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// Fails every delivery.
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn email_owner(&self, notice: &OwnerNotice) -> Result<(), NotifyError> {
        Err(NotifyError {
            recipient: notice.owner.email.clone(),
            reason: "smtp unavailable".into(),
        })
    }
}

// --- TestWorld ---

/// An in-memory store plus a workflow over it, with shortcuts that write
/// fixtures through the hooked write path.
pub struct TestWorld {
    pub store: Store,
    pub workflow: Workflow,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_settings(WorkflowConfig::default())
    }

    pub fn with_settings(settings: WorkflowConfig) -> Self {
        let store = Store::in_memory(settings).expect("failed to open in-memory store");
        let workflow = Workflow::new(store.clone());
        Self { store, workflow }
    }

    pub fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
        let store =
            Store::in_memory(WorkflowConfig::default()).expect("failed to open in-memory store");
        let workflow = Workflow::with_notifier(store.clone(), notifier);
        Self { store, workflow }
    }

    // --- Users and services ---

    pub fn user(&self, username: &str) -> User {
        self.insert_user(username, false)
    }

    pub fn superuser(&self, username: &str) -> User {
        self.insert_user(username, true)
    }

    fn insert_user(&self, username: &str, is_superuser: bool) -> User {
        let email = format!("{username}@example.com");
        self.store
            .transaction(|tx| tx.insert_user(username, &email, is_superuser))
            .expect("failed to insert user")
    }

    /// A service owned (technically) by `owners`.
    pub fn service(&self, name: &str, owners: &[&User]) -> ServiceId {
        self.store
            .transaction(|tx| {
                let service = tx.insert_service(name, &format!("uid-{name}"))?;
                for owner in owners {
                    tx.add_service_owner(service.id, owner.id, OwnershipType::Technical)?;
                }
                Ok(service.id)
            })
            .expect("failed to insert service")
    }

    // --- Domains and records ---

    pub fn domain(&self, name: &str, owner: Option<&User>) -> Domain {
        let mut data = DomainData::new(name);
        data.owner = owner.map(|user| user.id);
        self.domain_with(data)
    }

    pub fn domain_with(&self, data: DomainData) -> Domain {
        self.store
            .transaction(|tx| write::create_domain(tx, data))
            .expect("failed to create domain")
    }

    pub fn update_domain(&self, domain: Domain) -> Domain {
        self.store
            .transaction(|tx| write::update_domain(tx, domain))
            .expect("failed to update domain")
    }

    pub fn record(
        &self,
        domain: &Domain,
        name: &str,
        record_type: RecordType,
        content: &str,
        owner: Option<&User>,
    ) -> Record {
        let mut data = RecordData::new(domain.id, name, record_type, content);
        data.owner = owner.map(|user| user.id);
        self.record_with(data)
    }

    pub fn record_with(&self, data: RecordData) -> Record {
        self.store
            .transaction(|tx| write::create_record(tx, data))
            .expect("failed to create record")
    }

    pub fn update_record(&self, record: Record) -> Record {
        self.store
            .transaction(|tx| write::update_record(tx, record))
            .expect("failed to update record")
    }

    pub fn delete_record(&self, record: &Record) {
        self.store
            .transaction(|tx| write::delete_record(tx, record.id))
            .expect("failed to delete record")
    }

    // --- Templates ---

    pub fn domain_template(&self, name: &str) -> DomainTemplate {
        self.store
            .transaction(|tx| write::create_domain_template(tx, DomainTemplateData::new(name)))
            .expect("failed to create domain template")
    }

    pub fn record_template(
        &self,
        template: &DomainTemplate,
        record_type: RecordType,
        name: &str,
        content: &str,
    ) -> RecordTemplate {
        let data = RecordTemplateData::new(template.id, record_type, name, content);
        self.store
            .transaction(|tx| write::create_record_template(tx, data))
            .expect("failed to create record template")
    }

    // --- Lookups ---

    pub fn find_record(&self, name: &str, record_type: RecordType, content: &str) -> Option<Record> {
        self.store
            .transaction(|tx| tx.find_record(name, record_type, content))
            .expect("failed to look up record")
    }

    pub fn reload_record(&self, record: &Record) -> Option<Record> {
        self.store
            .transaction(|tx| tx.find_record_by_id(record.id))
            .expect("failed to look up record")
    }

    pub fn records_named(&self, name: &str) -> Vec<Record> {
        self.store
            .transaction(|tx| tx.records_named(name))
            .expect("failed to look up records")
    }

    pub fn records_in(&self, domain: &Domain) -> Vec<Record> {
        self.store
            .transaction(|tx| tx.records_in_domain(domain.id))
            .expect("failed to look up records")
    }

    pub fn find_domain(&self, name: &str) -> Option<Domain> {
        self.store
            .transaction(|tx| tx.find_domain_by_name(name))
            .expect("failed to look up domain")
    }

    pub fn reload_domain(&self, domain: &Domain) -> Domain {
        self.store
            .transaction(|tx| tx.domain(domain.id))
            .expect("failed to look up domain")
    }

    /// PTR records pointing back at `hostname`.
    pub fn ptrs_for(&self, hostname: &str) -> Vec<Record> {
        self.store
            .transaction(|tx| {
                let mut ptrs = Vec::new();
                for domain in tx.domains()? {
                    ptrs.extend(tx.records_in_domain(domain.id)?.into_iter().filter(|r| {
                        r.data.record_type == RecordType::Ptr && r.data.content == hostname
                    }));
                }
                Ok(ptrs)
            })
            .expect("failed to look up PTR records")
    }
}

//! Change requests.
//!
//! A [`Request`] stages a proposed create, update or delete of a domain or
//! record. It starts `OPEN` and moves exactly once, to `ACCEPTED` through
//! [`accept`] or to `REJECTED` through [`reject`]. Staged values live in the
//! request row, next to the list of fields the request is allowed to copy
//! onto its target.
//!
//! ```text
//!   submit ──► OPEN ──accept──► ACCEPTED   (target written, history frozen)
//!                 └───reject──► REJECTED   (target untouched, history frozen)
//! ```

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::error::{DnsaasError, Result};
use crate::metrics;
use crate::model::{
    Actor, AutoPtr, Domain, DomainData, DomainId, DomainTemplateId, DomainType, EntityRef,
    Record, RecordData, RecordId, RecordType, RequestId, RequestState, ServiceId, UserId,
};
use crate::permissions::{self, Target, AUTO_ACCEPT, AUTO_ACCEPT_DELETE};
use crate::store::{unix_now, Tx};
use crate::validators;
use crate::write;

/// What a request does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// The target does not exist yet.
    Create,
    /// The target exists and is changed.
    Update,
    /// The target is removed.
    Delete,
}

/// Record columns a request may copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    /// Owning zone.
    Domain,
    /// Owner name.
    Name,
    /// Record type.
    Type,
    /// Payload.
    Content,
    /// Time to live.
    Ttl,
    /// Priority.
    Prio,
    /// Authoritative flag.
    Auth,
    /// Disabled flag.
    Disabled,
    /// Free text.
    Remarks,
    /// DNSSEC ordering name.
    Ordername,
    /// Owning user.
    Owner,
    /// Owning service.
    Service,
    /// PTR policy override.
    AutoPtr,
}

impl RecordField {
    /// Every field, in column order.
    pub const ALL: &'static [RecordField] = &[
        RecordField::Domain,
        RecordField::Name,
        RecordField::Type,
        RecordField::Content,
        RecordField::Ttl,
        RecordField::Prio,
        RecordField::Auth,
        RecordField::Disabled,
        RecordField::Remarks,
        RecordField::Ordername,
        RecordField::Owner,
        RecordField::Service,
        RecordField::AutoPtr,
    ];
}

/// Domain columns a request may copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainField {
    /// Zone name.
    Name,
    /// PowerDNS kind.
    Type,
    /// Master server.
    Master,
    /// Account column.
    Account,
    /// Free text.
    Remarks,
    /// Domain template.
    Template,
    /// Reverse zone template.
    ReverseTemplate,
    /// PTR policy.
    AutoPtr,
    /// Unrestricted flag.
    Unrestricted,
    /// Owning user.
    Owner,
    /// Owning service.
    Service,
}

impl DomainField {
    /// Every field, in column order.
    pub const ALL: &'static [DomainField] = &[
        DomainField::Name,
        DomainField::Type,
        DomainField::Master,
        DomainField::Account,
        DomainField::Remarks,
        DomainField::Template,
        DomainField::ReverseTemplate,
        DomainField::AutoPtr,
        DomainField::Unrestricted,
        DomainField::Owner,
        DomainField::Service,
    ];
}

/// Proposed record values. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStage {
    /// Move the record to this zone.
    pub domain: Option<DomainId>,
    /// Owner name.
    pub name: Option<String>,
    /// Record type.
    pub record_type: Option<RecordType>,
    /// Payload.
    pub content: Option<String>,
    /// Time to live.
    pub ttl: Option<u32>,
    /// Priority.
    pub prio: Option<u32>,
    /// Authoritative flag.
    pub auth: Option<bool>,
    /// Disabled flag.
    pub disabled: Option<bool>,
    /// Free text.
    pub remarks: Option<String>,
    /// DNSSEC ordering name.
    pub ordername: Option<String>,
    /// Owning user; the requester when unset on creation.
    pub owner: Option<UserId>,
    /// Owning service.
    pub service: Option<ServiceId>,
    /// PTR policy override.
    pub auto_ptr: Option<AutoPtr>,
}

impl RecordStage {
    /// The three fields every new record needs.
    pub fn new(name: impl Into<String>, record_type: RecordType, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            record_type: Some(record_type),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Fields carrying a value.
    pub fn staged_fields(&self) -> Vec<RecordField> {
        RecordField::ALL
            .iter()
            .copied()
            .filter(|field| match field {
                RecordField::Domain => self.domain.is_some(),
                RecordField::Name => self.name.is_some(),
                RecordField::Type => self.record_type.is_some(),
                RecordField::Content => self.content.is_some(),
                RecordField::Ttl => self.ttl.is_some(),
                RecordField::Prio => self.prio.is_some(),
                RecordField::Auth => self.auth.is_some(),
                RecordField::Disabled => self.disabled.is_some(),
                RecordField::Remarks => self.remarks.is_some(),
                RecordField::Ordername => self.ordername.is_some(),
                RecordField::Owner => self.owner.is_some(),
                RecordField::Service => self.service.is_some(),
                RecordField::AutoPtr => self.auto_ptr.is_some(),
            })
            .collect()
    }

    /// Copy the staged values named in `fields` onto `data`.
    pub fn apply(&self, fields: &[RecordField], data: &mut RecordData) {
        for field in fields {
            match field {
                RecordField::Domain => set(&mut data.domain, self.domain),
                RecordField::Name => set(&mut data.name, self.name.clone()),
                RecordField::Type => set(&mut data.record_type, self.record_type),
                RecordField::Content => set(&mut data.content, self.content.clone()),
                RecordField::Ttl => set_some(&mut data.ttl, self.ttl),
                RecordField::Prio => set_some(&mut data.prio, self.prio),
                RecordField::Auth => set_some(&mut data.auth, self.auth),
                RecordField::Disabled => set(&mut data.disabled, self.disabled),
                RecordField::Remarks => set(&mut data.remarks, self.remarks.clone()),
                RecordField::Ordername => set_some(&mut data.ordername, self.ordername.clone()),
                RecordField::Owner => set_some(&mut data.owner, self.owner),
                RecordField::Service => set_some(&mut data.service, self.service),
                RecordField::AutoPtr => set_some(&mut data.auto_ptr, self.auto_ptr),
            }
        }
    }
}

/// Proposed domain values. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStage {
    /// Zone name.
    pub name: Option<String>,
    /// PowerDNS kind.
    pub domain_type: Option<DomainType>,
    /// Master server.
    pub master: Option<String>,
    /// Account column.
    pub account: Option<String>,
    /// Free text.
    pub remarks: Option<String>,
    /// Domain template.
    pub template: Option<DomainTemplateId>,
    /// Reverse zone template.
    pub reverse_template: Option<DomainTemplateId>,
    /// PTR policy.
    pub auto_ptr: Option<AutoPtr>,
    /// Unrestricted flag.
    pub unrestricted: Option<bool>,
    /// Owning user; the requester when unset on creation.
    pub owner: Option<UserId>,
    /// Owning service.
    pub service: Option<ServiceId>,
}

impl DomainStage {
    /// Stage only a name; enough for a new domain.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Fields carrying a value.
    pub fn staged_fields(&self) -> Vec<DomainField> {
        DomainField::ALL
            .iter()
            .copied()
            .filter(|field| match field {
                DomainField::Name => self.name.is_some(),
                DomainField::Type => self.domain_type.is_some(),
                DomainField::Master => self.master.is_some(),
                DomainField::Account => self.account.is_some(),
                DomainField::Remarks => self.remarks.is_some(),
                DomainField::Template => self.template.is_some(),
                DomainField::ReverseTemplate => self.reverse_template.is_some(),
                DomainField::AutoPtr => self.auto_ptr.is_some(),
                DomainField::Unrestricted => self.unrestricted.is_some(),
                DomainField::Owner => self.owner.is_some(),
                DomainField::Service => self.service.is_some(),
            })
            .collect()
    }

    /// Copy the staged values named in `fields` onto `data`.
    pub fn apply(&self, fields: &[DomainField], data: &mut DomainData) {
        for field in fields {
            match field {
                DomainField::Name => set(&mut data.name, self.name.clone()),
                DomainField::Type => set_some(&mut data.domain_type, self.domain_type),
                DomainField::Master => set_some(&mut data.master, self.master.clone()),
                DomainField::Account => set_some(&mut data.account, self.account.clone()),
                DomainField::Remarks => set(&mut data.remarks, self.remarks.clone()),
                DomainField::Template => set_some(&mut data.template, self.template),
                DomainField::ReverseTemplate => {
                    set_some(&mut data.reverse_template, self.reverse_template)
                }
                DomainField::AutoPtr => set(&mut data.auto_ptr, self.auto_ptr),
                DomainField::Unrestricted => set(&mut data.unrestricted, self.unrestricted),
                DomainField::Owner => set_some(&mut data.owner, self.owner),
                DomainField::Service => set_some(&mut data.service, self.service),
            }
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn set_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Staged create or update of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChange {
    /// Domain the record lives in once the change is applied.
    pub domain: DomainId,
    /// The updated record; filled in on accept for creations.
    pub record: Option<RecordId>,
    /// Proposed values.
    pub stage: RecordStage,
    /// Fields copied onto the target on accept.
    pub copy_fields: Vec<RecordField>,
}

impl RecordChange {
    /// Create a record in `domain`. Every staged field is copied.
    pub fn create(domain: DomainId, stage: RecordStage) -> Self {
        Self {
            domain,
            record: None,
            stage,
            copy_fields: RecordField::ALL.to_vec(),
        }
    }

    /// Update `record`. Only the fields present in `stage` are copied.
    pub fn update(record: &Record, stage: RecordStage) -> Self {
        Self {
            domain: stage.domain.unwrap_or(record.data.domain),
            record: Some(record.id),
            copy_fields: stage.staged_fields(),
            stage,
        }
    }
}

/// Staged create or update of a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainChange {
    /// The updated domain; filled in on accept for creations.
    pub domain: Option<DomainId>,
    /// Closest managed superdomain of a new domain.
    pub parent: Option<DomainId>,
    /// Proposed values.
    pub stage: DomainStage,
    /// Fields copied onto the target on accept.
    pub copy_fields: Vec<DomainField>,
}

impl DomainChange {
    /// Create a domain, optionally under a managed superdomain.
    pub fn create(parent: Option<DomainId>, stage: DomainStage) -> Self {
        Self {
            domain: None,
            parent,
            stage,
            copy_fields: DomainField::ALL.to_vec(),
        }
    }

    /// Update `domain`. Only the fields present in `stage` are copied.
    pub fn update(domain: &Domain, stage: DomainStage) -> Self {
        Self {
            domain: Some(domain.id),
            parent: None,
            copy_fields: stage.staged_fields(),
            stage,
        }
    }
}

/// The staged mutation of a create-or-update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A domain change.
    Domain(DomainChange),
    /// A record change.
    Record(RecordChange),
}

/// What a request does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Create or update a domain or record.
    CreateOrUpdate(Change),
    /// Delete a domain or record.
    Delete(EntityRef),
}

impl RequestKind {
    /// Whether accepting creates, updates or deletes the target.
    pub fn operation(&self) -> Operation {
        match self {
            RequestKind::CreateOrUpdate(Change::Domain(change)) if change.domain.is_some() => {
                Operation::Update
            }
            RequestKind::CreateOrUpdate(Change::Record(change)) if change.record.is_some() => {
                Operation::Update
            }
            RequestKind::CreateOrUpdate(_) => Operation::Create,
            RequestKind::Delete(_) => Operation::Delete,
        }
    }

    /// Stored discriminator.
    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::CreateOrUpdate(Change::Domain(_)) => "domain",
            RequestKind::CreateOrUpdate(Change::Record(_)) => "record",
            RequestKind::Delete(_) => "delete",
        }
    }

    /// The live entity this request points at, if it exists yet.
    pub fn target(&self) -> Option<EntityRef> {
        match self {
            RequestKind::CreateOrUpdate(Change::Domain(change)) => {
                change.domain.map(EntityRef::Domain)
            }
            RequestKind::CreateOrUpdate(Change::Record(change)) => {
                change.record.map(EntityRef::Record)
            }
            RequestKind::Delete(target) => Some(*target),
        }
    }
}

/// Old and new rendering of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Value before, empty on creation.
    pub old: String,
    /// Value after.
    pub new: String,
}

/// Per-field diff of a request, changed fields only.
pub type History = BTreeMap<String, FieldChange>;

/// A stored change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Primary key.
    pub id: RequestId,
    /// Lifecycle state.
    pub state: RequestState,
    /// The requesting user.
    pub owner: UserId,
    /// Caller-supplied correlation token.
    pub key: Option<String>,
    /// Diff frozen when the request left OPEN.
    pub last_change: Option<History>,
    /// Unix time of submission.
    pub created_at: i64,
    /// What the request does.
    pub kind: RequestKind,
}

/// Result of accepting a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// The created or updated domain.
    Domain(Domain),
    /// The created or updated record.
    Record(Record),
    /// The removed entity.
    Deleted(EntityRef),
}

// --- Persistence ---

const REQUEST_COLUMNS: &str = "id, kind, state, owner_id, key, last_change, copy_fields, \
     created_at, domain_id, record_id, parent_domain_id, target_kind, target_id, target_name, \
     target_type, target_content, target_ttl, target_prio, target_auth, target_disabled, \
     target_remarks, target_ordername, target_owner, target_service, target_auto_ptr, \
     target_master, target_account, target_template, target_reverse_template, \
     target_unrestricted";

/// Column indices for [`REQUEST_COLUMNS`].
mod request_cols {
    pub const ID: usize = 0;
    pub const KIND: usize = 1;
    pub const STATE: usize = 2;
    pub const OWNER: usize = 3;
    pub const KEY: usize = 4;
    pub const LAST_CHANGE: usize = 5;
    pub const COPY_FIELDS: usize = 6;
    pub const CREATED_AT: usize = 7;
    pub const DOMAIN: usize = 8;
    pub const RECORD: usize = 9;
    pub const PARENT_DOMAIN: usize = 10;
    pub const TARGET_KIND: usize = 11;
    pub const TARGET_ID: usize = 12;
    pub const NAME: usize = 13;
    pub const TYPE: usize = 14;
    pub const CONTENT: usize = 15;
    pub const TTL: usize = 16;
    pub const PRIO: usize = 17;
    pub const AUTH: usize = 18;
    pub const DISABLED: usize = 19;
    pub const REMARKS: usize = 20;
    pub const ORDERNAME: usize = 21;
    pub const TARGET_OWNER: usize = 22;
    pub const SERVICE: usize = 23;
    pub const AUTO_PTR: usize = 24;
    pub const MASTER: usize = 25;
    pub const ACCOUNT: usize = 26;
    pub const TEMPLATE: usize = 27;
    pub const REVERSE_TEMPLATE: usize = 28;
    pub const UNRESTRICTED: usize = 29;
}

/// A request row before its JSON and enum columns are decoded.
struct RawRequest {
    id: RequestId,
    kind: String,
    state: RequestState,
    owner: UserId,
    key: Option<String>,
    last_change: Option<String>,
    copy_fields: String,
    created_at: i64,
    domain: Option<DomainId>,
    record: Option<RecordId>,
    parent: Option<DomainId>,
    target_kind: Option<String>,
    target_id: Option<i64>,
    name: Option<String>,
    type_text: Option<String>,
    content: Option<String>,
    ttl: Option<u32>,
    prio: Option<u32>,
    auth: Option<bool>,
    disabled: Option<bool>,
    remarks: Option<String>,
    ordername: Option<String>,
    target_owner: Option<UserId>,
    service: Option<ServiceId>,
    auto_ptr: Option<AutoPtr>,
    master: Option<String>,
    account: Option<String>,
    template: Option<DomainTemplateId>,
    reverse_template: Option<DomainTemplateId>,
    unrestricted: Option<bool>,
}

fn parse_request_row(row: &Row<'_>) -> rusqlite::Result<RawRequest> {
    Ok(RawRequest {
        id: row.get(request_cols::ID)?,
        kind: row.get(request_cols::KIND)?,
        state: row.get(request_cols::STATE)?,
        owner: row.get(request_cols::OWNER)?,
        key: row.get(request_cols::KEY)?,
        last_change: row.get(request_cols::LAST_CHANGE)?,
        copy_fields: row.get(request_cols::COPY_FIELDS)?,
        created_at: row.get(request_cols::CREATED_AT)?,
        domain: row.get(request_cols::DOMAIN)?,
        record: row.get(request_cols::RECORD)?,
        parent: row.get(request_cols::PARENT_DOMAIN)?,
        target_kind: row.get(request_cols::TARGET_KIND)?,
        target_id: row.get(request_cols::TARGET_ID)?,
        name: row.get(request_cols::NAME)?,
        type_text: row.get(request_cols::TYPE)?,
        content: row.get(request_cols::CONTENT)?,
        ttl: row.get(request_cols::TTL)?,
        prio: row.get(request_cols::PRIO)?,
        auth: row.get(request_cols::AUTH)?,
        disabled: row.get(request_cols::DISABLED)?,
        remarks: row.get(request_cols::REMARKS)?,
        ordername: row.get(request_cols::ORDERNAME)?,
        target_owner: row.get(request_cols::TARGET_OWNER)?,
        service: row.get(request_cols::SERVICE)?,
        auto_ptr: row.get(request_cols::AUTO_PTR)?,
        master: row.get(request_cols::MASTER)?,
        account: row.get(request_cols::ACCOUNT)?,
        template: row.get(request_cols::TEMPLATE)?,
        reverse_template: row.get(request_cols::REVERSE_TEMPLATE)?,
        unrestricted: row.get(request_cols::UNRESTRICTED)?,
    })
}

fn corrupt(id: RequestId, what: impl std::fmt::Display) -> DnsaasError {
    DnsaasError::Validation(format!("request {id} is malformed: {what}"))
}

impl RawRequest {
    fn decode(self) -> Result<Request> {
        let id = self.id;
        let last_change = self
            .last_change
            .as_deref()
            .map(serde_json::from_str::<History>)
            .transpose()?;

        let kind = match self.kind.as_str() {
            "record" => {
                let copy_fields: Vec<RecordField> = serde_json::from_str(&self.copy_fields)?;
                let domain = self.domain.ok_or_else(|| corrupt(id, "missing domain"))?;
                let record_type = self
                    .type_text
                    .as_deref()
                    .map(str::parse::<RecordType>)
                    .transpose()
                    .map_err(|e| corrupt(id, e))?;
                RequestKind::CreateOrUpdate(Change::Record(RecordChange {
                    domain,
                    record: self.record,
                    stage: RecordStage {
                        domain: copy_fields
                            .contains(&RecordField::Domain)
                            .then_some(domain),
                        name: self.name,
                        record_type,
                        content: self.content,
                        ttl: self.ttl,
                        prio: self.prio,
                        auth: self.auth,
                        disabled: self.disabled,
                        remarks: self.remarks,
                        ordername: self.ordername,
                        owner: self.target_owner,
                        service: self.service,
                        auto_ptr: self.auto_ptr,
                    },
                    copy_fields,
                }))
            }
            "domain" => {
                let copy_fields: Vec<DomainField> = serde_json::from_str(&self.copy_fields)?;
                let domain_type = self
                    .type_text
                    .as_deref()
                    .map(str::parse::<DomainType>)
                    .transpose()
                    .map_err(|e| corrupt(id, e))?;
                RequestKind::CreateOrUpdate(Change::Domain(DomainChange {
                    domain: self.domain,
                    parent: self.parent,
                    stage: DomainStage {
                        name: self.name,
                        domain_type,
                        master: self.master,
                        account: self.account,
                        remarks: self.remarks,
                        template: self.template,
                        reverse_template: self.reverse_template,
                        auto_ptr: self.auto_ptr,
                        unrestricted: self.unrestricted,
                        owner: self.target_owner,
                        service: self.service,
                    },
                    copy_fields,
                }))
            }
            "delete" => {
                let target = match (self.target_kind.as_deref(), self.target_id) {
                    (Some(kind), Some(raw)) => EntityRef::from_parts(kind, raw),
                    _ => None,
                }
                .ok_or_else(|| corrupt(id, "missing delete target"))?;
                RequestKind::Delete(target)
            }
            other => return Err(corrupt(id, format!("unknown kind {other}"))),
        };

        Ok(Request {
            id,
            state: self.state,
            owner: self.owner,
            key: self.key,
            last_change,
            created_at: self.created_at,
            kind,
        })
    }
}

fn insert_row(tx: &Tx<'_>, kind: &RequestKind, owner: UserId, key: Option<&str>, created_at: i64) -> Result<RequestId> {
    let conn = tx.conn();
    match kind {
        RequestKind::CreateOrUpdate(Change::Record(change)) => {
            let stage = &change.stage;
            conn.execute(
                "INSERT INTO requests (kind, state, owner_id, key, copy_fields, created_at, \
                 domain_id, record_id, target_name, target_type, target_content, target_ttl, \
                 target_prio, target_auth, target_disabled, target_remarks, target_ordername, \
                 target_owner, target_service, target_auto_ptr) \
                 VALUES ('record', 'OPEN', ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
                 ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    owner,
                    key,
                    serde_json::to_string(&change.copy_fields)?,
                    created_at,
                    change.domain,
                    change.record,
                    stage.name,
                    stage.record_type,
                    stage.content,
                    stage.ttl,
                    stage.prio,
                    stage.auth,
                    stage.disabled,
                    stage.remarks,
                    stage.ordername,
                    stage.owner,
                    stage.service,
                    stage.auto_ptr,
                ],
            )?;
        }
        RequestKind::CreateOrUpdate(Change::Domain(change)) => {
            let stage = &change.stage;
            conn.execute(
                "INSERT INTO requests (kind, state, owner_id, key, copy_fields, created_at, \
                 domain_id, parent_domain_id, target_name, target_type, target_master, \
                 target_account, target_remarks, target_template, target_reverse_template, \
                 target_auto_ptr, target_unrestricted, target_owner, target_service) \
                 VALUES ('domain', 'OPEN', ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
                 ?13, ?14, ?15, ?16, ?17)",
                params![
                    owner,
                    key,
                    serde_json::to_string(&change.copy_fields)?,
                    created_at,
                    change.domain,
                    change.parent,
                    stage.name,
                    stage.domain_type,
                    stage.master,
                    stage.account,
                    stage.remarks,
                    stage.template,
                    stage.reverse_template,
                    stage.auto_ptr,
                    stage.unrestricted,
                    stage.owner,
                    stage.service,
                ],
            )?;
        }
        RequestKind::Delete(target) => {
            conn.execute(
                "INSERT INTO requests (kind, state, owner_id, key, created_at, target_kind, \
                 target_id) VALUES ('delete', 'OPEN', ?1, ?2, ?3, ?4, ?5)",
                params![owner, key, created_at, target.kind(), target.raw_id()],
            )?;
        }
    }
    Ok(RequestId(conn.last_insert_rowid()))
}

fn save_transition(tx: &Tx<'_>, request: &Request) -> Result<()> {
    let (domain, record) = match &request.kind {
        RequestKind::CreateOrUpdate(Change::Record(change)) => (Some(change.domain), change.record),
        RequestKind::CreateOrUpdate(Change::Domain(change)) => (change.domain, None),
        RequestKind::Delete(_) => (None, None),
    };
    let last_change = request
        .last_change
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    tx.conn().execute(
        "UPDATE requests SET state = ?2, last_change = ?3, domain_id = ?4, record_id = ?5 \
         WHERE id = ?1",
        params![request.id, request.state, last_change, domain, record],
    )?;
    Ok(())
}

/// Stage a change as a new OPEN request owned by `owner`.
pub fn submit(tx: &Tx<'_>, kind: RequestKind, owner: UserId, key: Option<String>) -> Result<Request> {
    let created_at = unix_now();
    let id = insert_row(tx, &kind, owner, key.as_deref(), created_at)?;
    info!(%id, kind = kind.label(), %owner, "request submitted");
    Ok(Request {
        id,
        state: RequestState::Open,
        owner,
        key,
        last_change: None,
        created_at,
        kind,
    })
}

/// Fetch a request by id.
pub fn find(tx: &Tx<'_>, id: RequestId) -> Result<Request> {
    tx.conn()
        .query_row(
            &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"),
            params![id],
            parse_request_row,
        )
        .optional()?
        .ok_or(DnsaasError::NotFound {
            kind: "request",
            id: id.0,
        })?
        .decode()
}

/// Requests in `state` (all requests for `None`), oldest first.
pub fn list(tx: &Tx<'_>, state: Option<RequestState>) -> Result<Vec<Request>> {
    let mut stmt = tx.conn().prepare(&format!(
        "SELECT {REQUEST_COLUMNS} FROM requests \
         WHERE ?1 IS NULL OR state = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![state], parse_request_row)?;
    rows.map(|row| row?.decode()).collect()
}

/// OPEN requests that would change or delete `target`.
pub fn open_for(tx: &Tx<'_>, target: EntityRef) -> Result<Vec<RequestId>> {
    let sql = match target {
        EntityRef::Record(_) => {
            "SELECT id FROM requests WHERE state = 'OPEN' AND \
             ((kind = 'record' AND record_id = ?1) OR \
              (kind = 'delete' AND target_kind = 'record' AND target_id = ?1)) ORDER BY id"
        }
        EntityRef::Domain(_) => {
            "SELECT id FROM requests WHERE state = 'OPEN' AND \
             ((kind = 'domain' AND domain_id = ?1) OR \
              (kind = 'delete' AND target_kind = 'domain' AND target_id = ?1)) ORDER BY id"
        }
    };
    let mut stmt = tx.conn().prepare(sql)?;
    let rows = stmt.query_map(params![target.raw_id()], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// --- Decisions ---

/// Name of the predicate letting `actor` apply `request` without review.
pub fn auto_accept_reason(
    tx: &Tx<'_>,
    request: &Request,
    actor: &Actor,
) -> Result<Option<&'static str>> {
    let (rules, target) = match &request.kind {
        RequestKind::CreateOrUpdate(Change::Record(change)) => {
            let target = match change.record {
                Some(id) => Target::for_record(tx, &tx.record(id)?)?,
                None => Target::for_domain(tx, &tx.domain(change.domain)?)?,
            };
            (AUTO_ACCEPT, Some(target))
        }
        RequestKind::CreateOrUpdate(Change::Domain(change)) => {
            let target = match change.domain.or(change.parent) {
                Some(id) => Some(Target::for_domain(tx, &tx.domain(id)?)?.restricted()),
                None => None,
            };
            (AUTO_ACCEPT, target)
        }
        RequestKind::Delete(EntityRef::Record(id)) => (
            AUTO_ACCEPT_DELETE,
            Some(Target::for_record(tx, &tx.record(*id)?)?),
        ),
        RequestKind::Delete(EntityRef::Domain(id)) => (
            AUTO_ACCEPT_DELETE,
            Some(Target::for_domain(tx, &tx.domain(*id)?)?),
        ),
    };
    Ok(permissions::evaluate(rules, actor, target.as_ref()))
}

/// Whether `actor` may apply `request` without review.
pub fn can_auto_accept(tx: &Tx<'_>, request: &Request, actor: &Actor) -> Result<bool> {
    Ok(auto_accept_reason(tx, request, actor)?.is_some())
}

// --- Staged views ---

fn staged_record(
    tx: &Tx<'_>,
    requester: UserId,
    change: &RecordChange,
    current: Option<&Record>,
) -> RecordData {
    let mut data = match current {
        Some(record) => record.data.clone(),
        None => {
            let mut draft = RecordData::new(
                change.domain,
                "",
                change.stage.record_type.unwrap_or(RecordType::A),
                "",
            );
            draft.ttl = Some(tx.settings().default_ttl);
            draft.owner = Some(requester);
            draft
        }
    };
    change.stage.apply(&change.copy_fields, &mut data);
    data
}

fn staged_domain(requester: UserId, change: &DomainChange, current: Option<&Domain>) -> DomainData {
    let mut data = match current {
        Some(domain) => domain.data.clone(),
        None => {
            let mut draft = DomainData::new("");
            draft.owner = Some(requester);
            draft
        }
    };
    change.stage.apply(&change.copy_fields, &mut data);
    data
}

/// Check a staged change the way the write path will check it on accept,
/// plus the rules that only apply to requests.
pub fn validate(tx: &Tx<'_>, change: &Change, requester: UserId, actor: &Actor) -> Result<()> {
    match change {
        Change::Record(change) => {
            let current = change.record.map(|id| tx.record(id)).transpose()?;
            if current.is_none() {
                if change.stage.name.is_none() {
                    return Err(DnsaasError::Validation("Record name is required".into()));
                }
                if change.stage.record_type.is_none() {
                    return Err(DnsaasError::Validation("Record type is required".into()));
                }
            }

            let mut staged = staged_record(tx, requester, change, current.as_ref());
            write::check_record(tx, &mut staged, change.record)?;

            let domain = tx.domain(staged.domain)?;
            if staged.record_type == RecordType::A {
                if let Some(template) = domain.data.template {
                    if tx.domain_template(template)?.data.is_public_domain {
                        validators::validate_public_address(&staged.content)?;
                    }
                }
            }
        }
        Change::Domain(change) => {
            let current = change.domain.map(|id| tx.domain(id)).transpose()?;
            if current.is_none() && change.stage.name.is_none() {
                return Err(DnsaasError::Validation("Domain name is required".into()));
            }

            let mut staged = staged_domain(requester, change, current.as_ref());
            write::check_domain(tx, &mut staged, change.domain)?;
            if current.is_none() && !actor.is_superuser {
                permissions::check_subdomain(tx, actor, &staged.name)?;
            }
            for template in [staged.template, staged.reverse_template].into_iter().flatten() {
                tx.domain_template(template)?;
            }
        }
    }
    Ok(())
}

// --- History ---

type Dump = BTreeMap<&'static str, String>;

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn username(tx: &Tx<'_>, user: Option<UserId>) -> Result<String> {
    match user {
        Some(id) => Ok(tx.user(id)?.username),
        None => Ok(String::new()),
    }
}

/// History fields of a record; all empty for `None`.
fn record_dump(tx: &Tx<'_>, data: Option<&RecordData>) -> Result<Dump> {
    let Some(data) = data else {
        return Ok(["content", "name", "owner", "prio", "remarks", "ttl", "type"]
            .into_iter()
            .map(|key| (key, String::new()))
            .collect());
    };
    Ok(Dump::from([
        ("content", data.content.clone()),
        ("name", data.name.clone()),
        ("owner", username(tx, data.owner)?),
        ("prio", opt(data.prio)),
        ("remarks", data.remarks.clone()),
        ("ttl", opt(data.ttl)),
        ("type", data.record_type.to_string()),
    ]))
}

/// History fields of a domain; all empty for `None`.
fn domain_dump(tx: &Tx<'_>, data: Option<&DomainData>) -> Result<Dump> {
    let Some(data) = data else {
        return Ok([
            "account",
            "auto_ptr",
            "master",
            "name",
            "owner",
            "remarks",
            "type",
            "unrestricted",
        ]
        .into_iter()
        .map(|key| (key, String::new()))
        .collect());
    };
    Ok(Dump::from([
        ("account", opt(data.account.as_ref())),
        ("auto_ptr", data.auto_ptr.to_string()),
        ("master", opt(data.master.as_ref())),
        ("name", data.name.clone()),
        ("owner", username(tx, data.owner)?),
        ("remarks", data.remarks.clone()),
        ("type", opt(data.domain_type)),
        ("unrestricted", data.unrestricted.to_string()),
    ]))
}

/// Fields whose rendering differs between `old` and `new`.
pub fn diff(old: &Dump, new: &Dump) -> History {
    let mut history = History::new();
    for (field, new_value) in new {
        let old_value = old.get(field).cloned().unwrap_or_default();
        if &old_value != new_value {
            history.insert(
                field.to_string(),
                FieldChange {
                    old: old_value,
                    new: new_value.clone(),
                },
            );
        }
    }
    history
}

fn live_history(tx: &Tx<'_>, request: &Request) -> Result<History> {
    match &request.kind {
        RequestKind::CreateOrUpdate(Change::Record(change)) => {
            let current = change.record.map(|id| tx.record(id)).transpose()?;
            let staged = staged_record(tx, request.owner, change, current.as_ref());
            Ok(diff(
                &record_dump(tx, current.as_ref().map(|r| &r.data))?,
                &record_dump(tx, Some(&staged))?,
            ))
        }
        RequestKind::CreateOrUpdate(Change::Domain(change)) => {
            let current = change.domain.map(|id| tx.domain(id)).transpose()?;
            let staged = staged_domain(request.owner, change, current.as_ref());
            Ok(diff(
                &domain_dump(tx, current.as_ref().map(|d| &d.data))?,
                &domain_dump(tx, Some(&staged))?,
            ))
        }
        RequestKind::Delete(EntityRef::Record(id)) => {
            let record = tx.record(*id)?;
            Ok(diff(
                &record_dump(tx, Some(&record.data))?,
                &record_dump(tx, None)?,
            ))
        }
        RequestKind::Delete(EntityRef::Domain(id)) => {
            let domain = tx.domain(*id)?;
            Ok(diff(
                &domain_dump(tx, Some(&domain.data))?,
                &domain_dump(tx, None)?,
            ))
        }
    }
}

/// The request's diff: frozen once it left OPEN, computed against the
/// live target while it is OPEN. A request rejected after its target
/// vanished has an empty diff.
pub fn history(tx: &Tx<'_>, request: &Request) -> Result<History> {
    match request.state {
        RequestState::Open => live_history(tx, request),
        _ => Ok(request.last_change.clone().unwrap_or_default()),
    }
}

// --- Transitions ---

fn ensure_open(request: &Request) -> Result<()> {
    if request.state == RequestState::Open {
        Ok(())
    } else {
        Err(DnsaasError::InvalidState {
            id: request.id,
            state: request.state.into(),
        })
    }
}

/// Apply an OPEN request to its target and mark it ACCEPTED.
///
/// The diff is frozen before the target changes. Must run inside the same
/// transaction as any permission decision that led to it.
pub fn accept(tx: &Tx<'_>, request: &mut Request) -> Result<Accepted> {
    ensure_open(request)?;
    let history = live_history(tx, request)?;
    let requester = request.owner;

    let accepted = match &mut request.kind {
        RequestKind::CreateOrUpdate(Change::Record(change)) => {
            let current = change.record.map(|id| tx.record(id)).transpose()?;
            let staged = staged_record(tx, requester, change, current.as_ref());
            let record = match current {
                Some(mut record) => {
                    record.data = staged;
                    write::update_record(tx, record)?
                }
                None => write::create_record(tx, staged)?,
            };
            change.record = Some(record.id);
            change.domain = record.data.domain;
            Accepted::Record(record)
        }
        RequestKind::CreateOrUpdate(Change::Domain(change)) => {
            let current = change.domain.map(|id| tx.domain(id)).transpose()?;
            let staged = staged_domain(requester, change, current.as_ref());
            let domain = match current {
                Some(mut domain) => {
                    domain.data = staged;
                    write::update_domain(tx, domain)?
                }
                None => write::create_domain(tx, staged)?,
            };
            change.domain = Some(domain.id);
            Accepted::Domain(domain)
        }
        RequestKind::Delete(target) => {
            match *target {
                EntityRef::Record(id) => write::delete_record(tx, id)?,
                EntityRef::Domain(id) => write::delete_domain(tx, id)?,
            }
            Accepted::Deleted(*target)
        }
    };

    request.last_change = Some(history);
    request.state = RequestState::Accepted;
    save_transition(tx, request)?;
    info!(id = %request.id, kind = request.kind.label(), "request accepted");
    metrics::record_transition(RequestState::Accepted.into());
    Ok(accepted)
}

/// Mark an OPEN request REJECTED without touching its target.
pub fn reject(tx: &Tx<'_>, request: &mut Request) -> Result<()> {
    ensure_open(request)?;
    request.last_change = match live_history(tx, request) {
        Ok(history) => Some(history),
        // The target vanished since submission; there is nothing to compare.
        Err(DnsaasError::NotFound { .. }) => None,
        Err(e) => return Err(e),
    };
    request.state = RequestState::Rejected;
    save_transition(tx, request)?;
    info!(id = %request.id, kind = request.kind.label(), "request rejected");
    metrics::record_transition(RequestState::Rejected.into());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_fields_follow_present_values() {
        let stage = RecordStage {
            content: Some("10.0.0.2".into()),
            ttl: Some(60),
            ..RecordStage::default()
        };
        assert_eq!(
            stage.staged_fields(),
            vec![RecordField::Content, RecordField::Ttl]
        );
    }

    #[test]
    fn test_apply_skips_unset_and_uncopied_fields() {
        let mut data = RecordData::new(DomainId(1), "www.example.com", RecordType::A, "10.0.0.1");
        data.owner = Some(UserId(7));
        let stage = RecordStage {
            content: Some("10.0.0.2".into()),
            remarks: Some("moved".into()),
            ..RecordStage::default()
        };

        stage.apply(&[RecordField::Content, RecordField::Owner], &mut data);
        assert_eq!(data.content, "10.0.0.2");
        assert_eq!(data.owner, Some(UserId(7)));
        assert_eq!(data.remarks, "");
    }

    #[test]
    fn test_diff_keeps_changed_fields_only() {
        let old = Dump::from([("name", "a.example.com".to_string()), ("ttl", "3600".to_string())]);
        let new = Dump::from([("name", "a.example.com".to_string()), ("ttl", "60".to_string())]);
        let history = diff(&old, &new);
        assert_eq!(history.len(), 1);
        assert_eq!(
            history["ttl"],
            FieldChange {
                old: "3600".into(),
                new: "60".into()
            }
        );
    }

    #[test]
    fn test_copy_fields_serialize_as_names() {
        let json = serde_json::to_string(&[RecordField::AutoPtr, RecordField::Type]).unwrap();
        assert_eq!(json, r#"["auto_ptr","type"]"#);
    }

    #[test]
    fn test_operation_of_kinds() {
        let create = RequestKind::CreateOrUpdate(Change::Record(RecordChange::create(
            DomainId(1),
            RecordStage::new("a.example.com", RecordType::A, "10.0.0.1"),
        )));
        assert_eq!(create.operation(), Operation::Create);
        assert_eq!(create.label(), "record");
        assert_eq!(create.target(), None);

        let delete = RequestKind::Delete(EntityRef::Record(RecordId(4)));
        assert_eq!(delete.operation(), Operation::Delete);
        assert_eq!(delete.target(), Some(EntityRef::Record(RecordId(4))));
    }
}

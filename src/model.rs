//! Zone data entities and the value types shared by every component.
//!
//! Persisted entities are split into an id and a `*Data` body so that the
//! write path can take either a draft (no id yet) or a stored row.

use hickory_proto::rr as proto;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

/// TTL applied to records when nothing else is configured.
pub const DEFAULT_TTL: u32 = 3600;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value.as_i64().map($name)
            }
        }
    };
}

id_type!(
    /// Primary key of a user row.
    UserId
);
id_type!(
    /// Primary key of a service row.
    ServiceId
);
id_type!(
    /// Primary key of a domain row.
    DomainId
);
id_type!(
    /// Primary key of a record row.
    RecordId
);
id_type!(
    /// Primary key of a domain template row.
    DomainTemplateId
);
id_type!(
    /// Primary key of a record template row.
    RecordTemplateId
);
id_type!(
    /// Primary key of a change request row.
    RequestId
);
id_type!(
    /// Primary key of an authorisation row.
    AuthorisationId
);

macro_rules! sql_text_enum {
    ($($name:ident),+ $(,)?) => {$(
        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(<&'static str>::from(self)))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: strum::ParseError| FromSqlError::Other(Box::new(e)))
            }
        }
    )+};
}

sql_text_enum!(RecordType, DomainType, AutoPtr, OwnershipType, RequestState);

/// DNS resource record types accepted in the `records` table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum RecordType {
    /// `A`
    A,
    /// `AAAA`
    Aaaa,
    /// `AFSDB`
    Afsdb,
    /// `CERT`
    Cert,
    /// `CNAME`
    Cname,
    /// `DNSKEY`
    Dnskey,
    /// `DS`
    Ds,
    /// `HINFO`
    Hinfo,
    /// `KEY`
    Key,
    /// `LOC`
    Loc,
    /// `MX`
    Mx,
    /// `NAPTR`
    Naptr,
    /// `NS`
    Ns,
    /// `NSEC`
    Nsec,
    /// `PTR`
    Ptr,
    /// `RP`
    Rp,
    /// `RRSIG`
    Rrsig,
    /// `SOA`
    Soa,
    /// `SPF`
    Spf,
    /// `SRV`
    Srv,
    /// `SSHFP`
    Sshfp,
    /// `TXT`
    Txt,
}

impl RecordType {
    /// IANA type code.
    pub fn code(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ns => 2,
            RecordType::Cname => 5,
            RecordType::Soa => 6,
            RecordType::Ptr => 12,
            RecordType::Hinfo => 13,
            RecordType::Mx => 15,
            RecordType::Txt => 16,
            RecordType::Rp => 17,
            RecordType::Afsdb => 18,
            RecordType::Key => 25,
            RecordType::Aaaa => 28,
            RecordType::Loc => 29,
            RecordType::Srv => 33,
            RecordType::Naptr => 35,
            RecordType::Cert => 37,
            RecordType::Ds => 43,
            RecordType::Sshfp => 44,
            RecordType::Rrsig => 46,
            RecordType::Nsec => 47,
            RecordType::Dnskey => 48,
            RecordType::Spf => 99,
        }
    }

    /// A and AAAA records drive automatic PTR maintenance.
    pub fn is_address(&self) -> bool {
        proto::RecordType::from(*self).is_ip_addr()
    }
}

impl From<RecordType> for proto::RecordType {
    fn from(record_type: RecordType) -> Self {
        proto::RecordType::from(record_type.code())
    }
}

/// PowerDNS domain kind.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum DomainType {
    /// Primary zone replicated by AXFR.
    Master,
    /// Replicated by the database backend.
    Native,
    /// Secondary zone pulled from `master`.
    Slave,
}

/// Policy for automatic PTR records of A/AAAA records.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AutoPtr {
    /// Never keep a PTR.
    Never,
    /// Keep a PTR, creating the reverse domain when missing.
    #[default]
    Always,
    /// Keep a PTR only when the reverse domain is already managed.
    OnlyIfDomain,
}

/// Role of a service owner.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum OwnershipType {
    /// Business owner.
    #[serde(rename = "BO")]
    #[strum(serialize = "BO")]
    Business,
    /// Technical owner.
    #[serde(rename = "TO")]
    #[strum(serialize = "TO")]
    Technical,
}

/// Lifecycle state of a change request. Only `OPEN` may transition.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum RequestState {
    /// Waiting for review.
    Open,
    /// Applied to its target.
    Accepted,
    /// Closed without touching its target.
    Rejected,
}

/// A user known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Primary key.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Address owner notifications go to.
    pub email: String,
    /// Bypasses every permission check.
    pub is_superuser: bool,
}

impl User {
    /// The principal passed explicitly through every operation.
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            is_superuser: self.is_superuser,
        }
    }
}

/// The acting principal of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    /// The acting user.
    pub id: UserId,
    /// Copied from the user row.
    pub is_superuser: bool,
}

/// A co-ownership group for domains and records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Primary key.
    pub id: ServiceId,
    /// Display name.
    pub name: String,
    /// External service identifier.
    pub uid: String,
    /// Inactive services keep their rows but grant nothing new.
    pub is_active: bool,
}

/// Entity kinds a delete request or an authorisation can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityRef {
    /// A domain row.
    Domain(DomainId),
    /// A record row.
    Record(RecordId),
}

impl EntityRef {
    /// Stored kind discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            EntityRef::Domain(_) => "domain",
            EntityRef::Record(_) => "record",
        }
    }

    /// Raw numeric id.
    pub fn raw_id(&self) -> i64 {
        match self {
            EntityRef::Domain(id) => id.0,
            EntityRef::Record(id) => id.0,
        }
    }

    /// Rebuild from the stored `(kind, id)` pair.
    pub fn from_parts(kind: &str, id: i64) -> Option<Self> {
        match kind {
            "domain" => Some(EntityRef::Domain(DomainId(id))),
            "record" => Some(EntityRef::Record(RecordId(id))),
            _ => None,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.raw_id())
    }
}

/// A revocable grant letting `authorised` act on `target` as if owning it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorisation {
    /// Primary key.
    pub id: AuthorisationId,
    /// User who granted it.
    pub owner: UserId,
    /// User who gains the rights.
    pub authorised: UserId,
    /// Domain or record covered.
    pub target: EntityRef,
}

/// Mutable columns of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainData {
    /// Zone name, no trailing dot.
    pub name: String,
    /// PowerDNS kind, unset for plain zones.
    pub domain_type: Option<DomainType>,
    /// Master server of a slave zone.
    pub master: Option<String>,
    /// PowerDNS account column.
    pub account: Option<String>,
    /// Free text.
    pub remarks: String,
    /// Template whose records this domain carries.
    pub template: Option<DomainTemplateId>,
    /// Template for reverse zones created on behalf of this domain.
    pub reverse_template: Option<DomainTemplateId>,
    /// Default PTR policy of the domain's records.
    pub auto_ptr: AutoPtr,
    /// Anyone may add records without review.
    pub unrestricted: bool,
    /// Owning user.
    pub owner: Option<UserId>,
    /// Owning service.
    pub service: Option<ServiceId>,
}

impl DomainData {
    /// A domain with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain_type: None,
            master: None,
            account: None,
            remarks: String::new(),
            template: None,
            reverse_template: None,
            auto_ptr: AutoPtr::default(),
            unrestricted: false,
            owner: None,
            service: None,
        }
    }
}

/// A stored domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Primary key.
    pub id: DomainId,
    #[serde(flatten)]
    pub data: DomainData,
}

/// Mutable columns of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordData {
    /// Zone holding the record.
    pub domain: DomainId,
    /// Owner name, no trailing dot.
    pub name: String,
    /// Resource record type.
    pub record_type: RecordType,
    /// Type-specific payload.
    pub content: String,
    /// Time to live in seconds.
    pub ttl: Option<u32>,
    /// MX/SRV priority.
    pub prio: Option<u32>,
    /// PowerDNS authoritative flag.
    pub auth: Option<bool>,
    /// Hidden from resolution.
    pub disabled: bool,
    /// Free text.
    pub remarks: String,
    /// DNSSEC ordering name.
    pub ordername: Option<String>,
    /// Unix time of the last write.
    pub change_date: Option<i64>,
    /// Owning user.
    pub owner: Option<UserId>,
    /// Owning service.
    pub service: Option<ServiceId>,
    /// Record this one is derived from (PTRs).
    pub depends_on: Option<RecordId>,
    /// Record template this one materializes.
    pub template: Option<RecordTemplateId>,
    /// PTR policy override; falls back to the domain's.
    pub auto_ptr: Option<AutoPtr>,
}

impl RecordData {
    /// A record with default TTL and flags.
    pub fn new(
        domain: DomainId,
        name: impl Into<String>,
        record_type: RecordType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            domain,
            name: name.into(),
            record_type,
            content: content.into(),
            ttl: Some(DEFAULT_TTL),
            prio: None,
            auth: Some(true),
            disabled: false,
            remarks: String::new(),
            ordername: None,
            change_date: None,
            owner: None,
            service: None,
            depends_on: None,
            template: None,
            auto_ptr: None,
        }
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key.
    pub id: RecordId,
    #[serde(flatten)]
    pub data: RecordData,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data.prio {
            Some(prio) => write!(
                f,
                "{} IN {} {} {}",
                self.data.name, self.data.record_type, prio, self.data.content
            ),
            None => write!(
                f,
                "{} IN {} {}",
                self.data.name, self.data.record_type, self.data.content
            ),
        }
    }
}

/// Mutable columns of a domain template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTemplateData {
    /// Unique template name.
    pub name: String,
    /// Kind given to new domains bound to the template.
    pub domain_type: Option<DomainType>,
    /// Unrestricted flag given to new domains bound to the template.
    pub unrestricted: bool,
    /// Bound domains may not point A records at private addresses.
    pub is_public_domain: bool,
    /// PTR policy given to new domains bound to the template.
    pub auto_ptr: AutoPtr,
}

impl DomainTemplateData {
    /// A public template with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain_type: None,
            unrestricted: false,
            is_public_domain: true,
            auto_ptr: AutoPtr::default(),
        }
    }
}

/// A stored domain template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTemplate {
    /// Primary key.
    pub id: DomainTemplateId,
    #[serde(flatten)]
    pub data: DomainTemplateData,
}

/// Mutable columns of a record template.
///
/// `name` and `content` may contain `{domain-name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTemplateData {
    /// Template this record belongs to.
    pub domain_template: DomainTemplateId,
    /// Type of the materialized record.
    pub record_type: RecordType,
    /// Name pattern.
    pub name: String,
    /// Content pattern.
    pub content: String,
    /// TTL of the materialized record.
    pub ttl: Option<u32>,
    /// Priority of the materialized record.
    pub prio: Option<u32>,
    /// Authoritative flag of the materialized record.
    pub auth: Option<bool>,
    /// Free text.
    pub remarks: String,
}

impl RecordTemplateData {
    /// A record template with default TTL.
    pub fn new(
        domain_template: DomainTemplateId,
        record_type: RecordType,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            domain_template,
            record_type,
            name: name.into(),
            content: content.into(),
            ttl: Some(DEFAULT_TTL),
            prio: None,
            auth: Some(true),
            remarks: String::new(),
        }
    }
}

/// A stored record template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTemplate {
    /// Primary key.
    pub id: RecordTemplateId,
    #[serde(flatten)]
    pub data: RecordTemplateData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_parse_is_case_insensitive() {
        assert_eq!("aaaa".parse::<RecordType>().unwrap(), RecordType::Aaaa);
        assert_eq!("CNAME".parse::<RecordType>().unwrap(), RecordType::Cname);
        assert!("BOGUS".parse::<RecordType>().is_err());
    }

    #[test]
    fn test_stored_spellings() {
        assert_eq!(RecordType::Aaaa.to_string(), "AAAA");
        assert_eq!(AutoPtr::OnlyIfDomain.as_ref(), "ONLY_IF_DOMAIN");
        assert_eq!(<&str>::from(OwnershipType::Technical), "TO");
        assert_eq!("bo".parse::<OwnershipType>().unwrap(), OwnershipType::Business);
    }

    #[test]
    fn test_record_type_maps_onto_wire_type() {
        assert_eq!(proto::RecordType::from(RecordType::Aaaa), proto::RecordType::AAAA);
        assert_eq!(proto::RecordType::from(RecordType::Soa), proto::RecordType::SOA);
        assert!(RecordType::A.is_address());
        assert!(!RecordType::Ptr.is_address());
    }

    #[test]
    fn test_auto_ptr_round_trips_through_json() {
        let json = serde_json::to_string(&AutoPtr::OnlyIfDomain).unwrap();
        assert_eq!(json, "\"ONLY_IF_DOMAIN\"");
        let back: AutoPtr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AutoPtr::OnlyIfDomain);
    }

    #[test]
    fn test_entity_ref_parts() {
        let target = EntityRef::from_parts("record", 12).unwrap();
        assert_eq!(target, EntityRef::Record(RecordId(12)));
        assert_eq!(target.kind(), "record");
        assert!(EntityRef::from_parts("zone", 1).is_none());
    }

    #[test]
    fn test_record_display_includes_prio() {
        let mut data = RecordData::new(DomainId(1), "example.com", RecordType::Mx, "mx.example.com");
        data.prio = Some(10);
        let record = Record {
            id: RecordId(1),
            data,
        };
        assert_eq!(record.to_string(), "example.com IN MX 10 mx.example.com");
    }
}

//! dnsaas-core - change-request workflow and derived-record consistency
//! engine for PowerDNS zone data.
//!
//! Users never write domains or records directly. Every mutation is
//! proposed as a [`Request`] on behalf of an explicit [`Actor`]; the
//! request is applied immediately when the actor's rights allow it and is
//! otherwise left OPEN for a reviewer. Applying a request goes through the
//! hooked write path, which keeps derived data consistent:
//!
//! - CNAME exclusivity is enforced before any record row is written
//! - A/AAAA records own an automatically maintained PTR record
//! - domains bound to a template carry the template's records
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          dnsaas-core                             │
//! │                                                                  │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │  Workflow    │──▶│  requests    │──▶│  write (hooked)      │  │
//! │  │  (actors,    │   │  (submit,    │   │  ├─ conflicts        │  │
//! │  │   guards)    │   │   accept,    │   │  ├─ autoptr          │  │
//! │  └──────┬───────┘   │   history)   │   │  └─ templates        │  │
//! │         │           └──────┬───────┘   └──────────┬───────────┘  │
//! │         ▼                  │                      │              │
//! │  ┌──────────────┐          ▼                      ▼              │
//! │  │ permissions  │   ┌──────────────────────────────────────────┐ │
//! │  └──────────────┘   │  Store (SQLite, one transaction/call)    │ │
//! │                     └──────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use dnsaas_core::{Outcome, RecordStage, RecordType, Store, Workflow, WorkflowConfig};
//!
//! let store = Store::in_memory(WorkflowConfig::default())?;
//! let workflow = Workflow::new(store.clone());
//!
//! let admin = store.transaction(|tx| tx.insert_user("admin", "admin@example.com", true))?;
//! let outcome = workflow.create_record(
//!     &admin.actor(),
//!     RecordStage::new("www.example.com", RecordType::A, "192.0.2.10"),
//! )?;
//! assert!(matches!(outcome, Outcome::Created(_)));
//! ```

#![warn(missing_docs)]

pub mod autoptr;
pub mod config;
pub mod conflicts;
pub mod error;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod permissions;
pub mod requests;
pub mod store;
pub mod telemetry;
pub mod templates;
pub mod validators;
pub mod workflow;
pub mod write;

// Re-export main types
pub use config::{Config, DatabaseConfig, TelemetryConfig, WorkflowConfig};
pub use error::{DnsaasError, Result};
pub use model::{
    Actor, AutoPtr, Domain, DomainData, DomainId, DomainTemplate, DomainTemplateData,
    DomainTemplateId, DomainType, EntityRef, Record, RecordData, RecordId, RecordTemplate,
    RecordTemplateData, RecordTemplateId, RecordType, RequestId, RequestState, User, UserId,
};
pub use notify::{LogNotifier, Notifier, OwnerNotice};
pub use requests::{
    Accepted, DomainField, DomainStage, FieldChange, History, RecordField, RecordStage, Request,
    RequestKind,
};
pub use store::{Store, Tx};
pub use workflow::{Outcome, Proposal, Workflow};

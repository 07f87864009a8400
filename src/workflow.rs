//! Caller-facing entry points.
//!
//! Every mutation arrives here as a proposal from an explicit [`Actor`],
//! becomes a [`Request`], and is either applied in the same transaction
//! (auto-accept) or left OPEN for review. Reviewers later call
//! [`Workflow::accept_request`] or [`Workflow::reject_request`].
//!
//! ```text
//!   create/update/delete ──► guard ──► validate ──► submit ──┬─► accept ──► Outcome::Created/Updated/Deleted
//!                                                           └─────────────► Outcome::Pending(id)
//! ```
//!
//! Owner notifications are sent after the transaction commits.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::autoptr;
use crate::error::{DnsaasError, Result};
use crate::metrics::{self, RequestKindLabel, SubmissionOutcome};
use crate::model::{
    Actor, Authorisation, Domain, DomainId, DomainTemplate, DomainTemplateData, DomainTemplateId,
    EntityRef, Record, RecordId, RecordTemplate, RecordTemplateData, RecordTemplateId,
    RequestId, RequestState, UserId,
};
use crate::notify::{LogNotifier, Notifier, OwnerNotice};
use crate::permissions::{self, Target, CAN_GRANT};
use crate::requests::{
    self, Accepted, Change, DomainChange, DomainStage, History, Operation, RecordChange,
    RecordStage, Request, RequestKind,
};
use crate::store::{Store, Tx};
use crate::templates;
use crate::write;

/// Staged values plus an optional correlation key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proposal<S> {
    /// Proposed values.
    pub stage: S,
    /// Correlation token stored on the request.
    pub key: Option<String>,
}

impl<S> Proposal<S> {
    /// A proposal without a key.
    pub fn new(stage: S) -> Self {
        Self { stage, key: None }
    }

    /// Attach a correlation key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl<S> From<S> for Proposal<S> {
    fn from(stage: S) -> Self {
        Self::new(stage)
    }
}

/// What happened to a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Applied; a new entity exists.
    Created(T),
    /// Applied to an existing entity.
    Updated(T),
    /// Applied; the entity is gone.
    Deleted,
    /// Waiting for review.
    Pending(RequestId),
}

impl<T> Outcome<T> {
    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self {
            Outcome::Created(_) => 201,
            Outcome::Updated(_) => 200,
            Outcome::Deleted => 204,
            Outcome::Pending(_) => 202,
        }
    }

    /// The applied entity, if any.
    pub fn entity(&self) -> Option<&T> {
        match self {
            Outcome::Created(entity) | Outcome::Updated(entity) => Some(entity),
            Outcome::Deleted | Outcome::Pending(_) => None,
        }
    }

    /// The pending request, if the proposal was queued.
    pub fn pending(&self) -> Option<RequestId> {
        match self {
            Outcome::Pending(id) => Some(*id),
            _ => None,
        }
    }
}

/// The request workflow over one store.
#[derive(Clone)]
pub struct Workflow {
    store: Store,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Result of a submission inside its transaction.
struct Submitted {
    request: Request,
    operation: Operation,
    accepted: Option<Accepted>,
    notice: Option<OwnerNotice>,
}

impl Workflow {
    /// Workflow logging notifications instead of sending them.
    pub fn new(store: Store) -> Self {
        Self::with_notifier(store, Arc::new(LogNotifier))
    }

    /// Workflow handing owner notices to `notifier`.
    pub fn with_notifier(store: Store, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// The underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    // --- Records ---

    /// Propose a new record. Without a staged domain the record name is
    /// resolved to the managed domain with the longest matching suffix.
    pub fn create_record(
        &self,
        actor: &Actor,
        proposal: impl Into<Proposal<RecordStage>>,
    ) -> Result<Outcome<Record>> {
        let Proposal { stage, key } = proposal.into();
        let submitted = self.store.transaction(|tx| {
            let domain = match stage.domain {
                Some(id) => tx.domain(id)?,
                None => resolve_domain(tx, stage.name.as_deref())?,
            };
            let change = Change::Record(RecordChange::create(domain.id, stage));
            self.submit(tx, actor, change, key)
        })?;
        Ok(self.finish(submitted))
    }

    /// Propose changes to a record. Fails with a precondition error while
    /// other requests on it are OPEN, unless `actor` is a superuser.
    pub fn update_record(
        &self,
        actor: &Actor,
        id: RecordId,
        proposal: impl Into<Proposal<RecordStage>>,
    ) -> Result<Outcome<Record>> {
        let Proposal { stage, key } = proposal.into();
        let submitted = self.store.transaction(|tx| {
            let record = tx.record(id)?;
            guard_open_requests(tx, actor, EntityRef::Record(id))?;
            let change = Change::Record(RecordChange::update(&record, stage));
            self.submit(tx, actor, change, key)
        })?;
        Ok(self.finish(submitted))
    }

    /// Propose deleting a record.
    pub fn delete_record(&self, actor: &Actor, id: RecordId) -> Result<Outcome<Record>> {
        let submitted = self.store.transaction(|tx| {
            let record = tx.record(id)?;
            if !actor.is_superuser && record.data.owner.is_none() && record.data.service.is_none()
            {
                return Err(DnsaasError::Validation(
                    "Record requires owner to be deletable. Please contact DNS support.".into(),
                ));
            }
            guard_open_requests(tx, actor, EntityRef::Record(id))?;
            self.submit_delete(tx, actor, EntityRef::Record(id))
        })?;
        Ok(self.finish(submitted))
    }

    // --- Domains ---

    /// Propose a new domain.
    pub fn create_domain(
        &self,
        actor: &Actor,
        proposal: impl Into<Proposal<DomainStage>>,
    ) -> Result<Outcome<Domain>> {
        let Proposal { mut stage, key } = proposal.into();
        let submitted = self.store.transaction(|tx| {
            if let Some(id) = stage.template {
                templates::prefill_domain(&tx.domain_template(id)?, &mut stage);
            }
            let name = stage
                .name
                .as_deref()
                .map(|name| name.trim().to_ascii_lowercase())
                .unwrap_or_default();
            let parent = match name.split_once('.') {
                Some((_, parent_name)) => tx.find_domain_for_hostname(parent_name)?,
                None => None,
            };
            let change = Change::Domain(DomainChange::create(parent.map(|d| d.id), stage));
            self.submit(tx, actor, change, key)
        })?;
        Ok(self.finish(submitted))
    }

    /// Propose changes to a domain the actor can edit.
    pub fn update_domain(
        &self,
        actor: &Actor,
        id: DomainId,
        proposal: impl Into<Proposal<DomainStage>>,
    ) -> Result<Outcome<Domain>> {
        let Proposal { stage, key } = proposal.into();
        let submitted = self.store.transaction(|tx| {
            let domain = tx.domain(id)?;
            let target = Target::for_domain(tx, &domain)?;
            if !permissions::can_edit(actor, Some(&target)) {
                return Err(DnsaasError::Permission(format!(
                    "You cannot edit domain {}",
                    domain.data.name
                )));
            }
            guard_open_requests(tx, actor, EntityRef::Domain(id))?;
            let change = Change::Domain(DomainChange::update(&domain, stage));
            self.submit(tx, actor, change, key)
        })?;
        Ok(self.finish(submitted))
    }

    /// Propose deleting a domain the actor can delete.
    pub fn delete_domain(&self, actor: &Actor, id: DomainId) -> Result<Outcome<Domain>> {
        let submitted = self.store.transaction(|tx| {
            let domain = tx.domain(id)?;
            let target = Target::for_domain(tx, &domain)?;
            if !permissions::can_delete(actor, Some(&target)) {
                return Err(DnsaasError::Permission(format!(
                    "You cannot delete domain {}",
                    domain.data.name
                )));
            }
            guard_open_requests(tx, actor, EntityRef::Domain(id))?;
            self.submit_delete(tx, actor, EntityRef::Domain(id))
        })?;
        Ok(self.finish(submitted))
    }

    // --- Review ---

    /// Apply an OPEN request. The reviewer must be allowed to apply it
    /// without review themselves.
    pub fn accept_request(&self, reviewer: &Actor, id: RequestId) -> Result<Accepted> {
        let (accepted, notice) = self.store.transaction(|tx| {
            let mut request = requests::find(tx, id)?;
            check_reviewer(tx, &request, reviewer)?;
            let operation = request.kind.operation();
            let accepted = requests::accept(tx, &mut request)?;
            let notice = owner_notice(tx, &request, operation, &accepted)?;
            Ok((accepted, notice))
        })?;
        self.notify(notice);
        Ok(accepted)
    }

    /// Discard an OPEN request.
    pub fn reject_request(&self, reviewer: &Actor, id: RequestId) -> Result<Request> {
        self.store.transaction(|tx| {
            let mut request = requests::find(tx, id)?;
            check_reviewer(tx, &request, reviewer)?;
            requests::reject(tx, &mut request)?;
            Ok(request)
        })
    }

    /// Load one request.
    pub fn request(&self, id: RequestId) -> Result<Request> {
        self.store.transaction(|tx| requests::find(tx, id))
    }

    /// Requests in `state`, or all of them.
    pub fn requests(&self, state: Option<RequestState>) -> Result<Vec<Request>> {
        self.store.transaction(|tx| requests::list(tx, state))
    }

    /// Field diff of a request: live while OPEN, frozen afterwards.
    pub fn request_history(&self, id: RequestId) -> Result<History> {
        self.store.transaction(|tx| {
            let request = requests::find(tx, id)?;
            requests::history(tx, &request)
        })
    }

    /// OPEN requests targeting an entity.
    pub fn open_requests(&self, target: EntityRef) -> Result<Vec<RequestId>> {
        self.store.transaction(|tx| requests::open_for(tx, target))
    }

    // --- Administration ---

    /// Let `user` act on `target` as if owning it.
    pub fn authorise(&self, actor: &Actor, target: EntityRef, user: UserId) -> Result<Authorisation> {
        self.store.transaction(|tx| {
            let facts = match target {
                EntityRef::Domain(id) => Target::for_domain(tx, &tx.domain(id)?)?,
                EntityRef::Record(id) => Target::for_record(tx, &tx.record(id)?)?,
            };
            if permissions::evaluate(CAN_GRANT, actor, Some(&facts)).is_none() {
                return Err(DnsaasError::Permission(format!(
                    "Only the owner can authorise others on {target}"
                )));
            }
            tx.user(user)?;
            let owner = facts.owner.unwrap_or(actor.id);
            let authorisation = tx.insert_authorisation(owner, user, target)?;
            info!(%target, authorised = %user, "authorisation granted");
            Ok(authorisation)
        })
    }

    /// Re-evaluate the PTR of every A/AAAA record of a domain.
    pub fn resync_ptr(&self, actor: &Actor, domain: DomainId) -> Result<()> {
        require_superuser(actor, "re-synchronize PTR records")?;
        self.store.transaction(|tx| {
            let domain = tx.domain(domain)?;
            autoptr::resync_domain(tx, &domain)
        })
    }

    /// Add a domain template.
    pub fn create_domain_template(
        &self,
        actor: &Actor,
        data: DomainTemplateData,
    ) -> Result<DomainTemplate> {
        require_superuser(actor, "manage templates")?;
        self.store
            .transaction(|tx| write::create_domain_template(tx, data))
    }

    /// Remove a domain template and the records it materialized.
    pub fn delete_domain_template(&self, actor: &Actor, id: DomainTemplateId) -> Result<()> {
        require_superuser(actor, "manage templates")?;
        self.store
            .transaction(|tx| write::delete_domain_template(tx, id))
    }

    /// Add a record template and materialize it on bound domains.
    pub fn create_record_template(
        &self,
        actor: &Actor,
        data: RecordTemplateData,
    ) -> Result<RecordTemplate> {
        require_superuser(actor, "manage templates")?;
        self.store
            .transaction(|tx| write::create_record_template(tx, data))
    }

    /// Change a record template and rewrite its instances.
    pub fn update_record_template(
        &self,
        actor: &Actor,
        template: RecordTemplate,
    ) -> Result<RecordTemplate> {
        require_superuser(actor, "manage templates")?;
        self.store
            .transaction(|tx| write::update_record_template(tx, template))
    }

    /// Remove a record template and its instances.
    pub fn delete_record_template(&self, actor: &Actor, id: RecordTemplateId) -> Result<()> {
        require_superuser(actor, "manage templates")?;
        self.store
            .transaction(|tx| write::delete_record_template(tx, id))
    }

    // --- Internals ---

    fn submit(
        &self,
        tx: &Tx<'_>,
        actor: &Actor,
        change: Change,
        key: Option<String>,
    ) -> Result<Submitted> {
        requests::validate(tx, &change, actor.id, actor)?;
        self.submit_kind(tx, actor, RequestKind::CreateOrUpdate(change), key)
    }

    fn submit_delete(&self, tx: &Tx<'_>, actor: &Actor, target: EntityRef) -> Result<Submitted> {
        self.submit_kind(tx, actor, RequestKind::Delete(target), None)
    }

    fn submit_kind(
        &self,
        tx: &Tx<'_>,
        actor: &Actor,
        kind: RequestKind,
        key: Option<String>,
    ) -> Result<Submitted> {
        let label = kind_label(&kind);
        let operation = kind.operation();
        let mut request = requests::submit(tx, kind, actor.id, key)?;

        let Some(reason) = requests::auto_accept_reason(tx, &request, actor)? else {
            debug!(id = %request.id, "request left open for review");
            metrics::record_submission(label, SubmissionOutcome::Pending);
            return Ok(Submitted {
                request,
                operation,
                accepted: None,
                notice: None,
            });
        };

        debug!(id = %request.id, reason, "auto-accepting request");
        let accepted = requests::accept(tx, &mut request)?;
        let notice = owner_notice(tx, &request, operation, &accepted)?;
        metrics::record_submission(label, SubmissionOutcome::AutoAccepted);
        Ok(Submitted {
            request,
            operation,
            accepted: Some(accepted),
            notice,
        })
    }

    fn finish<T: FromAccepted>(&self, submitted: Submitted) -> Outcome<T> {
        let Submitted {
            request,
            operation,
            accepted,
            notice,
        } = submitted;
        self.notify(notice);
        match accepted {
            None => Outcome::Pending(request.id),
            Some(accepted) => T::outcome(accepted, operation),
        }
    }

    fn notify(&self, notice: Option<OwnerNotice>) {
        let Some(notice) = notice else {
            return;
        };
        if let Err(e) = self.notifier.email_owner(&notice) {
            warn!(error = %e, entity = %notice.entity, "owner notification failed");
        }
    }
}

/// Conversion of an accepted request into the caller's outcome type.
trait FromAccepted: Sized {
    fn unwrap_accepted(accepted: Accepted) -> Option<Self>;

    fn outcome(accepted: Accepted, operation: Operation) -> Outcome<Self> {
        match (Self::unwrap_accepted(accepted), operation) {
            (Some(entity), Operation::Create) => Outcome::Created(entity),
            (Some(entity), _) => Outcome::Updated(entity),
            (None, _) => Outcome::Deleted,
        }
    }
}

impl FromAccepted for Record {
    fn unwrap_accepted(accepted: Accepted) -> Option<Self> {
        match accepted {
            Accepted::Record(record) => Some(record),
            _ => None,
        }
    }
}

impl FromAccepted for Domain {
    fn unwrap_accepted(accepted: Accepted) -> Option<Self> {
        match accepted {
            Accepted::Domain(domain) => Some(domain),
            _ => None,
        }
    }
}

fn kind_label(kind: &RequestKind) -> RequestKindLabel {
    match kind {
        RequestKind::CreateOrUpdate(Change::Domain(_)) => RequestKindLabel::Domain,
        RequestKind::CreateOrUpdate(Change::Record(_)) => RequestKindLabel::Record,
        RequestKind::Delete(_) => RequestKindLabel::Delete,
    }
}

fn resolve_domain(tx: &Tx<'_>, name: Option<&str>) -> Result<Domain> {
    let hostname = name
        .map(|name| name.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if hostname.is_empty() {
        return Err(DnsaasError::Validation("Record name is required".into()));
    }
    tx.find_domain_for_hostname(&hostname)?
        .ok_or(DnsaasError::Referential { hostname })
}

fn guard_open_requests(tx: &Tx<'_>, actor: &Actor, target: EntityRef) -> Result<()> {
    let request_ids = requests::open_for(tx, target)?;
    if request_ids.is_empty() || actor.is_superuser {
        return Ok(());
    }
    debug!(%target, ?request_ids, "open requests block the change");
    metrics::record_precondition_failure();
    Err(DnsaasError::Precondition { request_ids })
}

fn check_reviewer(tx: &Tx<'_>, request: &Request, reviewer: &Actor) -> Result<()> {
    if request.state != RequestState::Open {
        return Err(DnsaasError::InvalidState {
            id: request.id,
            state: request.state.into(),
        });
    }
    if reviewer.is_superuser || requests::can_auto_accept(tx, request, reviewer)? {
        Ok(())
    } else {
        Err(DnsaasError::Permission(format!(
            "You cannot review request {}",
            request.id
        )))
    }
}

fn require_superuser(actor: &Actor, what: &str) -> Result<()> {
    if actor.is_superuser {
        Ok(())
    } else {
        Err(DnsaasError::Permission(format!(
            "Only superusers may {what}"
        )))
    }
}

/// Notice for the owner of a freshly created entity, when the requester
/// created it on someone else's behalf.
fn owner_notice(
    tx: &Tx<'_>,
    request: &Request,
    operation: Operation,
    accepted: &Accepted,
) -> Result<Option<OwnerNotice>> {
    if operation != Operation::Create {
        return Ok(None);
    }
    let (entity, name, owner) = match accepted {
        Accepted::Record(record) => (
            EntityRef::Record(record.id),
            record.data.name.clone(),
            record.data.owner,
        ),
        Accepted::Domain(domain) => (
            EntityRef::Domain(domain.id),
            domain.data.name.clone(),
            domain.data.owner,
        ),
        Accepted::Deleted(_) => return Ok(None),
    };
    match owner {
        Some(owner) if owner != request.owner => Ok(Some(OwnerNotice {
            entity,
            name,
            owner: tx.user(owner)?,
            creator: tx.user(request.owner)?,
        })),
        _ => Ok(None),
    }
}

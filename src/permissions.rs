//! Permission predicates.
//!
//! Every decision is an ordered list of named predicates evaluated with
//! OR semantics and short-circuit: the first predicate that holds grants the
//! permission and names the reason.
//!
//! | table                | predicates                                                           |
//! |----------------------|----------------------------------------------------------------------|
//! | [`CAN_EDIT`]         | superuser, no object, owner, authorised                              |
//! | [`CAN_DELETE`]       | superuser, owner, authorised                                         |
//! | [`AUTO_ACCEPT`]      | superuser, unrestricted domain, owner, authorised, service owner     |
//! | [`AUTO_ACCEPT_DELETE`] | superuser, owner, authorised, service owner                        |
//! | [`CAN_GRANT`]        | superuser, owner                                                     |

use crate::error::{DnsaasError, Result};
use crate::model::{Actor, Domain, EntityRef, Record, UserId};
use crate::store::Tx;

/// Facts about an entity that permission predicates look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    /// Owning user.
    pub owner: Option<UserId>,
    /// Users holding a delegated authorisation on the entity.
    pub authorised: Vec<UserId>,
    /// Owners of the entity's service.
    pub service_owners: Vec<UserId>,
    /// The entity is (or lives in) an unrestricted domain.
    pub unrestricted: bool,
}

impl Target {
    /// Facts of a stored domain.
    pub fn for_domain(tx: &Tx<'_>, domain: &Domain) -> Result<Self> {
        Ok(Self {
            owner: domain.data.owner,
            authorised: tx.authorised_user_ids(EntityRef::Domain(domain.id))?,
            service_owners: match domain.data.service {
                Some(service) => tx.service_owner_ids(service)?,
                None => Vec::new(),
            },
            unrestricted: domain.data.unrestricted,
        })
    }

    /// Facts of a stored record; `unrestricted` comes from its domain.
    pub fn for_record(tx: &Tx<'_>, record: &Record) -> Result<Self> {
        let domain = tx.domain(record.data.domain)?;
        Ok(Self {
            owner: record.data.owner,
            authorised: tx.authorised_user_ids(EntityRef::Record(record.id))?,
            service_owners: match record.data.service {
                Some(service) => tx.service_owner_ids(service)?,
                None => Vec::new(),
            },
            unrestricted: domain.data.unrestricted,
        })
    }

    /// Same facts with the unrestricted shortcut removed.
    pub fn restricted(mut self) -> Self {
        self.unrestricted = false;
        self
    }
}

/// A predicate over the acting user and the (possibly absent) target.
pub type Predicate = fn(&Actor, Option<&Target>) -> bool;

/// A named predicate.
#[derive(Clone, Copy)]
pub struct Rule {
    /// Reported when the rule grants access.
    pub name: &'static str,
    /// The predicate itself.
    pub check: Predicate,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// The actor is a superuser.
pub fn is_superuser(actor: &Actor, _target: Option<&Target>) -> bool {
    actor.is_superuser
}

/// There is no target yet, e.g. a new top-level domain.
pub fn no_object(_actor: &Actor, target: Option<&Target>) -> bool {
    target.is_none()
}

/// The actor owns the target.
pub fn is_owner(actor: &Actor, target: Option<&Target>) -> bool {
    target.is_some_and(|t| t.owner == Some(actor.id))
}

/// The target's owner authorised the actor.
pub fn is_authorised(actor: &Actor, target: Option<&Target>) -> bool {
    target.is_some_and(|t| t.authorised.contains(&actor.id))
}

/// The actor owns the target's active service.
pub fn is_service_owner(actor: &Actor, target: Option<&Target>) -> bool {
    target.is_some_and(|t| t.service_owners.contains(&actor.id))
}

/// The target domain accepts anyone's records.
pub fn is_unrestricted(_actor: &Actor, target: Option<&Target>) -> bool {
    target.is_some_and(|t| t.unrestricted)
}

macro_rules! rules {
    ($($check:ident),+ $(,)?) => {
        &[$(Rule { name: stringify!($check), check: $check }),+]
    };
}

/// Raw edit access to an entity.
pub const CAN_EDIT: &[Rule] = rules![is_superuser, no_object, is_owner, is_authorised];

/// Raw delete access to an entity.
pub const CAN_DELETE: &[Rule] = rules![is_superuser, is_owner, is_authorised];

/// A create or update may be applied without review.
pub const AUTO_ACCEPT: &[Rule] = rules![
    is_superuser,
    is_unrestricted,
    is_owner,
    is_authorised,
    is_service_owner,
];

/// A delete may be applied without review.
pub const AUTO_ACCEPT_DELETE: &[Rule] =
    rules![is_superuser, is_owner, is_authorised, is_service_owner];

/// Handing out an authorisation on an entity.
pub const CAN_GRANT: &[Rule] = rules![is_superuser, is_owner];

/// Name of the first rule granting access, if any.
pub fn evaluate(rules: &[Rule], actor: &Actor, target: Option<&Target>) -> Option<&'static str> {
    rules
        .iter()
        .find(|rule| (rule.check)(actor, target))
        .map(|rule| rule.name)
}

/// Any [`CAN_EDIT`] rule holds.
pub fn can_edit(actor: &Actor, target: Option<&Target>) -> bool {
    evaluate(CAN_EDIT, actor, target).is_some()
}

/// Any [`CAN_DELETE`] rule holds.
pub fn can_delete(actor: &Actor, target: Option<&Target>) -> bool {
    evaluate(CAN_DELETE, actor, target).is_some()
}

/// A new domain under a managed superdomain needs edit rights on the
/// closest such superdomain.
pub fn check_subdomain(tx: &Tx<'_>, actor: &Actor, name: &str) -> Result<()> {
    let Some((_, parent_name)) = name.split_once('.') else {
        return Ok(());
    };
    let Some(parent) = tx.find_domain_for_hostname(parent_name)? else {
        return Ok(());
    };

    let target = Target::for_domain(tx, &parent)?;
    if can_edit(actor, Some(&target)) {
        Ok(())
    } else {
        Err(DnsaasError::Permission(format!(
            "You don't have permission to create a subdomain in {}",
            parent.data.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(id: i64, is_superuser: bool) -> Actor {
        Actor {
            id: UserId(id),
            is_superuser,
        }
    }

    fn owned_by(id: i64) -> Target {
        Target {
            owner: Some(UserId(id)),
            ..Target::default()
        }
    }

    #[test]
    fn test_superuser_passes_every_table() {
        let admin = actor(1, true);
        let target = owned_by(2);
        for table in [CAN_EDIT, CAN_DELETE, AUTO_ACCEPT, AUTO_ACCEPT_DELETE] {
            assert_eq!(evaluate(table, &admin, Some(&target)), Some("is_superuser"));
        }
    }

    #[test]
    fn test_no_object_only_grants_edit() {
        let user = actor(2, false);
        assert!(can_edit(&user, None));
        assert!(!can_delete(&user, None));
    }

    #[test]
    fn test_owner_and_authorised() {
        let owner = actor(2, false);
        let helper = actor(3, false);
        let stranger = actor(4, false);
        let mut target = owned_by(2);
        target.authorised.push(UserId(3));

        assert_eq!(evaluate(CAN_EDIT, &owner, Some(&target)), Some("is_owner"));
        assert_eq!(
            evaluate(CAN_DELETE, &helper, Some(&target)),
            Some("is_authorised")
        );
        assert!(!can_edit(&stranger, Some(&target)));
    }

    #[test]
    fn test_unrestricted_only_shortcuts_auto_accept() {
        let stranger = actor(4, false);
        let target = Target {
            unrestricted: true,
            ..owned_by(2)
        };
        assert_eq!(
            evaluate(AUTO_ACCEPT, &stranger, Some(&target)),
            Some("is_unrestricted")
        );
        assert_eq!(evaluate(AUTO_ACCEPT_DELETE, &stranger, Some(&target)), None);
        assert!(!can_edit(&stranger, Some(&target)));
    }

    #[test]
    fn test_service_owner_auto_accepts() {
        let colleague = actor(5, false);
        let target = Target {
            service_owners: vec![UserId(5)],
            ..owned_by(2)
        };
        assert_eq!(
            evaluate(AUTO_ACCEPT, &colleague, Some(&target)),
            Some("is_service_owner")
        );
        assert!(!can_edit(&colleague, Some(&target)));
    }
}

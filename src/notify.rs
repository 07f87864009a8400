//! Owner notifications.
//!
//! When someone creates a domain or record on behalf of another user, that
//! user is told about it. Delivery is best-effort: the workflow logs a
//! failure and carries on, the data change is already committed.

use thiserror::Error;
use tracing::info;

use crate::model::{EntityRef, User};

/// Delivery of a notification failed.
#[derive(Debug, Error)]
#[error("failed to notify {recipient}: {reason}")]
pub struct NotifyError {
    /// Address that was not reached.
    pub recipient: String,
    /// Transport error text.
    pub reason: String,
}

/// A created entity now belongs to someone other than its creator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerNotice {
    /// The created entity.
    pub entity: EntityRef,
    /// Domain or record name.
    pub name: String,
    /// New owner, the recipient.
    pub owner: User,
    /// User who made the change.
    pub creator: User,
}

impl OwnerNotice {
    /// Mail subject line.
    pub fn subject(&self) -> String {
        format!("{} {} was created for you", self.entity.kind(), self.name)
    }

    /// Mail body.
    pub fn body(&self) -> String {
        format!(
            "{} created {} {} and set you ({}) as its owner.",
            self.creator.username,
            self.entity.kind(),
            self.name,
            self.owner.username
        )
    }
}

/// Outbound notification channel.
pub trait Notifier: Send + Sync {
    fn email_owner(&self, notice: &OwnerNotice) -> Result<(), NotifyError>;
}

/// Writes notices to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn email_owner(&self, notice: &OwnerNotice) -> Result<(), NotifyError> {
        info!(
            to = %notice.owner.email,
            subject = %notice.subject(),
            "owner notification"
        );
        Ok(())
    }
}

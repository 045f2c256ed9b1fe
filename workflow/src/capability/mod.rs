//! Collaborator interfaces the engine consumes
//!
//! The engine owns workflow state only. Who may do what, who works at which
//! tier, and how people are told about changes are answered by these traits,
//! injected once at construction:
//!
//! - [`TicketAuthorization`]: synchronous capability checks
//! - [`UserCapability`]: user levels, departments, agent pools
//! - [`Notifier`]: async delivery of notifications

pub mod authorization;
pub mod notify;
pub mod users;

pub use authorization::{
    BasicTicketAuthorization, OpenAuthorization, TicketAccess, TicketAuthorization,
};
pub use notify::{LogNotifier, Notifier, NotifyError};
pub use users::{UserCapability, UserDirectory, UserProfile};

#[cfg(test)]
pub use notify::MockNotifier;

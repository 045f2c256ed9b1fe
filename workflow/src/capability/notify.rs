//! Notification seam
//!
//! A [`Notifier`] delivers human-facing notifications for committed events.
//! It is driven by the [`NotificationDispatcher`](crate::events::NotificationDispatcher)
//! off the event bus, so delivery never blocks or fails a workflow operation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::users::UserCapability;
use crate::state::{EscalationRequest, Ticket, TicketEvaluation, UserRef};

/// Error type for notification delivery
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Delivery failed on channel {channel}: {message}")]
    Delivery { channel: String, message: String },

    #[error("Notifier unavailable: {0}")]
    Unavailable(String),
}

/// Delivery target for workflow notifications.
///
/// Every method receives the channels configured for its event.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn ticket_created(&self, ticket: &Ticket, channels: &[String]) -> Result<(), NotifyError>;

    async fn ticket_assigned(
        &self,
        ticket: &Ticket,
        agent: &UserRef,
        channels: &[String],
    ) -> Result<(), NotifyError>;

    async fn ticket_closed(&self, ticket: &Ticket, channels: &[String]) -> Result<(), NotifyError>;

    async fn escalation_requested(
        &self,
        request: &EscalationRequest,
        channels: &[String],
    ) -> Result<(), NotifyError>;

    async fn escalation_approved(
        &self,
        request: &EscalationRequest,
        ticket: &Ticket,
        channels: &[String],
    ) -> Result<(), NotifyError>;

    async fn escalation_rejected(
        &self,
        request: &EscalationRequest,
        channels: &[String],
    ) -> Result<(), NotifyError>;

    async fn evaluation_received(
        &self,
        ticket: &Ticket,
        evaluation: &TicketEvaluation,
        channels: &[String],
    ) -> Result<(), NotifyError>;

    async fn sla_breached(
        &self,
        ticket: &Ticket,
        overdue_minutes: i64,
        channels: &[String],
    ) -> Result<(), NotifyError>;
}

/// Writes notifications to the tracing log
#[derive(Default)]
pub struct LogNotifier {
    users: Option<Arc<dyn UserCapability>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve user display names through a directory
    pub fn with_users(users: Arc<dyn UserCapability>) -> Self {
        Self { users: Some(users) }
    }

    fn display(&self, user: &UserRef) -> String {
        self.users
            .as_ref()
            .and_then(|users| users.resolve_user(user))
            .map(|profile| profile.display_name)
            .unwrap_or_else(|| user.to_string())
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn ticket_created(&self, ticket: &Ticket, channels: &[String]) -> Result<(), NotifyError> {
        info!(
            ticket_id = %ticket.id,
            creator = %self.display(&ticket.created_by),
            ?channels,
            "Notify: ticket created: {}",
            ticket.subject
        );
        Ok(())
    }

    async fn ticket_assigned(
        &self,
        ticket: &Ticket,
        agent: &UserRef,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        info!(
            ticket_id = %ticket.id,
            agent = %self.display(agent),
            ?channels,
            "Notify: ticket assigned"
        );
        Ok(())
    }

    async fn ticket_closed(&self, ticket: &Ticket, channels: &[String]) -> Result<(), NotifyError> {
        info!(ticket_id = %ticket.id, ?channels, "Notify: ticket closed");
        Ok(())
    }

    async fn escalation_requested(
        &self,
        request: &EscalationRequest,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        let requester = request
            .requester
            .as_ref()
            .map(|user| self.display(user))
            .unwrap_or_else(|| "system".to_string());
        info!(
            ticket_id = %request.ticket_id,
            request_id = %request.id,
            %requester,
            automatic = request.is_automatic,
            ?channels,
            "Notify: escalation requested to {}",
            request.to_level_id
        );
        Ok(())
    }

    async fn escalation_approved(
        &self,
        request: &EscalationRequest,
        ticket: &Ticket,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        info!(
            ticket_id = %ticket.id,
            request_id = %request.id,
            level = %ticket.current_level_id,
            ?channels,
            "Notify: escalation approved"
        );
        Ok(())
    }

    async fn escalation_rejected(
        &self,
        request: &EscalationRequest,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        info!(
            ticket_id = %request.ticket_id,
            request_id = %request.id,
            reason = request.rejection_reason.as_deref().unwrap_or(""),
            ?channels,
            "Notify: escalation rejected"
        );
        Ok(())
    }

    async fn evaluation_received(
        &self,
        ticket: &Ticket,
        evaluation: &TicketEvaluation,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        info!(
            ticket_id = %ticket.id,
            score = evaluation.score,
            ?channels,
            "Notify: evaluation received"
        );
        Ok(())
    }

    async fn sla_breached(
        &self,
        ticket: &Ticket,
        overdue_minutes: i64,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        info!(
            ticket_id = %ticket.id,
            overdue_minutes,
            ?channels,
            "Notify: SLA breached"
        );
        Ok(())
    }
}

//! Authorization seam
//!
//! Every mutating operation asks a [`TicketAuthorization`] before touching
//! state. Checks are synchronous and see a read-only [`TicketAccess`] view
//! of the ticket and its assignments.

use crate::state::{Assignment, EscalationRequest, Tables, Ticket, TicketId, UserRef};

/// Read-only view of a ticket and its assignment history
#[derive(Debug, Clone, Copy)]
pub struct TicketAccess<'a> {
    ticket: &'a Ticket,
    tables: &'a Tables,
}

impl<'a> TicketAccess<'a> {
    /// Build a view from the tables, `None` if the ticket does not exist
    pub fn load(tables: &'a Tables, ticket_id: TicketId) -> Option<Self> {
        tables.ticket(ticket_id).map(|ticket| Self { ticket, tables })
    }

    pub fn ticket(&self) -> &'a Ticket {
        self.ticket
    }

    pub fn assignments(&self) -> impl Iterator<Item = &'a Assignment> {
        self.tables.assignments_for(self.ticket.id)
    }

    pub fn is_creator(&self, user: &UserRef) -> bool {
        &self.ticket.created_by == user
    }

    /// User holds an active assignment on the ticket
    pub fn is_assigned(&self, user: &UserRef) -> bool {
        self.tables.active_assignment(self.ticket.id, user).is_some()
    }

    /// User holds or held any assignment on the ticket
    pub fn has_participated(&self, user: &UserRef) -> bool {
        self.tables.has_participated(self.ticket.id, user)
    }
}

/// Capability checks consulted by the engine
pub trait TicketAuthorization: Send + Sync {
    fn can_view_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool;

    fn can_create_ticket(&self, user: &UserRef) -> bool;

    fn can_update_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool;

    fn can_delete_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool;

    fn can_close_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool;

    fn can_request_escalation(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool;

    fn can_approve_escalation(
        &self,
        user: &UserRef,
        request: &EscalationRequest,
        ticket: &TicketAccess<'_>,
    ) -> bool;

    fn can_evaluate_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool;

    fn can_rate_agent(&self, user: &UserRef, ticket: &TicketAccess<'_>, agent: &UserRef) -> bool;

    fn can_assess_risk(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool;

    fn can_view_statistics(&self, user: &UserRef) -> bool;
}

/// Creator/assignee rules suitable for a customer-facing deployment.
///
/// | Capability | Granted when |
/// |---|---|
/// | view, update | user created the ticket |
/// | delete | user created the ticket and it is still open |
/// | close | user created the ticket or ever worked it |
/// | request escalation | user holds an active assignment |
/// | evaluate, rate agent | user created the ticket and it is closed |
/// | approve escalation, assess risk, statistics, create | always |
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicTicketAuthorization;

impl TicketAuthorization for BasicTicketAuthorization {
    fn can_view_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
        ticket.is_creator(user)
    }

    fn can_create_ticket(&self, _user: &UserRef) -> bool {
        true
    }

    fn can_update_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
        ticket.is_creator(user)
    }

    fn can_delete_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
        ticket.is_creator(user) && ticket.ticket().is_open()
    }

    fn can_close_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
        ticket.is_creator(user) || ticket.has_participated(user)
    }

    fn can_request_escalation(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
        ticket.is_assigned(user)
    }

    fn can_approve_escalation(
        &self,
        _user: &UserRef,
        _request: &EscalationRequest,
        _ticket: &TicketAccess<'_>,
    ) -> bool {
        true
    }

    fn can_evaluate_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
        ticket.is_creator(user) && ticket.ticket().is_closed()
    }

    fn can_rate_agent(&self, user: &UserRef, ticket: &TicketAccess<'_>, _agent: &UserRef) -> bool {
        ticket.is_creator(user) && ticket.ticket().is_closed()
    }

    fn can_assess_risk(&self, _user: &UserRef, _ticket: &TicketAccess<'_>) -> bool {
        true
    }

    fn can_view_statistics(&self, _user: &UserRef) -> bool {
        true
    }
}

/// Grants everything; used by the operator console and in tests
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAuthorization;

impl TicketAuthorization for OpenAuthorization {
    fn can_view_ticket(&self, _: &UserRef, _: &TicketAccess<'_>) -> bool {
        true
    }

    fn can_create_ticket(&self, _: &UserRef) -> bool {
        true
    }

    fn can_update_ticket(&self, _: &UserRef, _: &TicketAccess<'_>) -> bool {
        true
    }

    fn can_delete_ticket(&self, _: &UserRef, _: &TicketAccess<'_>) -> bool {
        true
    }

    fn can_close_ticket(&self, _: &UserRef, _: &TicketAccess<'_>) -> bool {
        true
    }

    fn can_request_escalation(&self, _: &UserRef, _: &TicketAccess<'_>) -> bool {
        true
    }

    fn can_approve_escalation(
        &self,
        _: &UserRef,
        _: &EscalationRequest,
        _: &TicketAccess<'_>,
    ) -> bool {
        true
    }

    fn can_evaluate_ticket(&self, _: &UserRef, _: &TicketAccess<'_>) -> bool {
        true
    }

    fn can_rate_agent(&self, _: &UserRef, _: &TicketAccess<'_>, _: &UserRef) -> bool {
        true
    }

    fn can_assess_risk(&self, _: &UserRef, _: &TicketAccess<'_>) -> bool {
        true
    }

    fn can_view_statistics(&self, _: &UserRef) -> bool {
        true
    }
}

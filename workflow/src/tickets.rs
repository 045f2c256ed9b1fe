//! Ticket service - creation, the status machine, and listings
//!
//! ```text
//!   NEW ──► ASSIGNED ──► IN_PROGRESS ──► RESOLVED ──► CLOSED
//!    │                    ▲   │  ▲           │
//!    └────────────────────┘   │  └─reject────┤ (reopen)
//!                             ▼              │
//!                 ESCALATION_REQUESTED ──approve──► ESCALATED ──► IN_PROGRESS
//!
//!   any open status ──► CANCELLED
//! ```
//!
//! Statuses on the escalation path are entered only through
//! [`EscalationService`](crate::escalation::EscalationService).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{SharedContext, UnitOfWork};
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::WorkflowEvent;
use crate::state::{
    DepartmentId, Priority, Tables, Ticket, TicketId, TicketStatus, UserRef,
};

/// Longest accepted subject
pub const MAX_SUBJECT_CHARS: usize = 255;

/// Input for [`TicketService::create`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTicket {
    pub subject: String,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    pub department_id: DepartmentId,
}

/// Criteria for [`TicketService::list`]; empty matches every live ticket
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    /// `Some(true)` for open tickets only, `Some(false)` for closed only
    pub open: Option<bool>,
    pub level_rank: Option<u32>,
    pub department_id: Option<DepartmentId>,
    pub created_by: Option<UserRef>,
    /// Only tickets with an active assignment for this agent
    pub assigned_to: Option<UserRef>,
    /// Only tickets overdue at this instant
    pub overdue_at: Option<DateTime<Utc>>,
    pub include_deleted: bool,
}

impl TicketFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TicketStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn open_only(mut self) -> Self {
        self.open = Some(true);
        self
    }

    pub fn closed_only(mut self) -> Self {
        self.open = Some(false);
        self
    }

    pub fn level_rank(mut self, rank: u32) -> Self {
        self.level_rank = Some(rank);
        self
    }

    pub fn department(mut self, department_id: DepartmentId) -> Self {
        self.department_id = Some(department_id);
        self
    }

    pub fn created_by(mut self, user: UserRef) -> Self {
        self.created_by = Some(user);
        self
    }

    pub fn assigned_to(mut self, agent: UserRef) -> Self {
        self.assigned_to = Some(agent);
        self
    }

    pub fn overdue_at(mut self, now: DateTime<Utc>) -> Self {
        self.overdue_at = Some(now);
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn matches(&self, ticket: &Ticket, tables: &Tables) -> bool {
        if ticket.is_deleted() && !self.include_deleted {
            return false;
        }
        if self.status.is_some_and(|status| ticket.status != status) {
            return false;
        }
        if self.open.is_some_and(|open| ticket.is_open() != open) {
            return false;
        }
        if let Some(rank) = self.level_rank {
            if tables.ticket_rank(ticket) != Some(rank) {
                return false;
            }
        }
        if self
            .department_id
            .is_some_and(|department| ticket.department_id != department)
        {
            return false;
        }
        if let Some(ref creator) = self.created_by {
            if &ticket.created_by != creator {
                return false;
            }
        }
        if let Some(ref agent) = self.assigned_to {
            if tables.active_assignment(ticket.id, agent).is_none() {
                return false;
            }
        }
        if let Some(now) = self.overdue_at {
            if !ticket.is_overdue(now) {
                return false;
            }
        }
        true
    }
}

/// Ticket lifecycle operations
#[derive(Clone)]
pub struct TicketService {
    ctx: SharedContext,
}

impl TicketService {
    pub(crate) fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }

    /// Open a ticket at the rank-1 tier with the tier's SLA deadline
    pub fn create(&self, new: NewTicket, creator: &UserRef) -> WorkflowResult<Ticket> {
        if !self.ctx.authorization.can_create_ticket(creator) {
            return Err(WorkflowError::denied(creator, "create tickets"));
        }
        validate_new_ticket(&new)?;

        self.ctx.transact(|uow| {
            let level = uow
                .tables
                .level_by_rank(1)
                .filter(|level| level.active)
                .cloned()
                .ok_or_else(|| WorkflowError::not_found("active level rank", 1))?;

            let ticket = Ticket {
                id: TicketId::new(),
                subject: new.subject.trim().to_string(),
                description: new.description,
                status: TicketStatus::New,
                user_priority: new.priority,
                assessed_risk: None,
                current_level_id: level.id,
                requested_level_id: None,
                department_id: new.department_id,
                created_by: creator.clone(),
                resolved_by: None,
                global_score: None,
                total_evaluations: 0,
                estimated_deadline: Some(level.deadline_from(uow.now)),
                resolved_at: None,
                closed_at: None,
                created_at: uow.now,
                updated_at: uow.now,
                deleted_at: None,
            };
            uow.tables.tickets.insert(ticket.id, ticket.clone());

            info!(ticket_id = %ticket.id, creator = %creator, level = %level.name, "Ticket created");
            uow.emit(WorkflowEvent::TicketCreated {
                ticket: ticket.clone(),
                timestamp: uow.now,
            });
            Ok(ticket)
        })
    }

    pub fn get(&self, id: TicketId) -> WorkflowResult<Ticket> {
        self.ctx
            .read(|t| t.ticket(id).cloned())?
            .ok_or_else(|| WorkflowError::not_found("ticket", id))
    }

    /// Fetch a ticket on behalf of `user`, subject to the view capability
    pub fn view(&self, id: TicketId, user: &UserRef) -> WorkflowResult<Ticket> {
        self.ctx
            .read(|tables| {
                let access = crate::capability::TicketAccess::load(tables, id)
                    .ok_or_else(|| WorkflowError::not_found("ticket", id))?;
                if !self.ctx.authorization.can_view_ticket(user, &access) {
                    return Err(WorkflowError::denied(user, "view this ticket"));
                }
                Ok(access.ticket().clone())
            })?
    }

    /// Tickets matching `filter`, oldest first
    pub fn list(&self, filter: &TicketFilter) -> WorkflowResult<Vec<Ticket>> {
        self.ctx.read(|tables| {
            tables
                .tickets
                .values()
                .filter(|ticket| filter.matches(ticket, tables))
                .cloned()
                .collect()
        })
    }

    /// Mark an open ticket resolved. Active assignments are left untouched.
    pub fn resolve(&self, id: TicketId, resolver: &UserRef) -> WorkflowResult<Ticket> {
        self.ctx.transact(|uow| resolve_in(&self.ctx, uow, id, resolver))
    }

    /// Close a ticket, completing every active assignment
    pub fn close(&self, id: TicketId, resolver: &UserRef) -> WorkflowResult<Ticket> {
        self.ctx.transact(|uow| close_in(&self.ctx, uow, id, resolver))
    }

    /// Cancel an open ticket, completing every active assignment
    pub fn cancel(&self, id: TicketId, user: &UserRef, reason: Option<&str>) -> WorkflowResult<Ticket> {
        self.ctx.transact(|uow| cancel_in(&self.ctx, uow, id, user, reason))
    }

    /// Move a ticket along the generic transition table.
    ///
    /// Resolve, close and cancel targets run their dedicated operation. An
    /// unchanged status is a silent no-op.
    pub fn update_status(
        &self,
        id: TicketId,
        new_status: TicketStatus,
        user: &UserRef,
    ) -> WorkflowResult<Ticket> {
        self.ctx.transact(|uow| {
            let access = uow.access(id)?;
            if !self.ctx.authorization.can_update_ticket(user, &access) {
                return Err(WorkflowError::denied(user, "update this ticket"));
            }
            let old_status = access.ticket().status;

            if old_status == new_status {
                debug!(ticket_id = %id, status = %new_status, "Status unchanged");
                return Ok(access.ticket().clone());
            }
            if !old_status.allows_transition_to(new_status) {
                return Err(WorkflowError::InvalidTransition {
                    ticket_id: id,
                    from: old_status,
                    to: new_status,
                });
            }

            let ticket = match new_status {
                TicketStatus::Resolved => resolve_in(&self.ctx, uow, id, user)?,
                TicketStatus::Closed => close_in(&self.ctx, uow, id, user)?,
                TicketStatus::Cancelled => cancel_in(&self.ctx, uow, id, user, None)?,
                _ => {
                    let now = uow.now;
                    let ticket = ticket_mut(uow, id)?;
                    if old_status == TicketStatus::Resolved {
                        ticket.resolved_at = None;
                        ticket.resolved_by = None;
                    }
                    ticket.status = new_status;
                    ticket.touch(now);
                    ticket.clone()
                }
            };

            info!(ticket_id = %id, from = %old_status, to = %new_status, user = %user, "Ticket status changed");
            uow.emit(WorkflowEvent::TicketStatusChanged {
                ticket_id: id,
                old_status,
                new_status,
                changed_by: user.clone(),
                timestamp: uow.now,
            });
            Ok(ticket)
        })
    }

    /// Override the SLA deadline; `None` clears it
    pub fn update_estimated_deadline(
        &self,
        id: TicketId,
        deadline: Option<DateTime<Utc>>,
        user: &UserRef,
    ) -> WorkflowResult<Ticket> {
        self.ctx.transact(|uow| {
            let access = uow.access(id)?;
            if !self.ctx.authorization.can_update_ticket(user, &access) {
                return Err(WorkflowError::denied(user, "update this ticket"));
            }
            let now = uow.now;
            let ticket = ticket_mut(uow, id)?;
            ticket.estimated_deadline = deadline;
            ticket.touch(now);
            info!(ticket_id = %id, deadline = ?deadline, "Deadline updated");
            Ok(ticket.clone())
        })
    }

    /// Hide a ticket from listings. Idempotent.
    pub fn soft_delete(&self, id: TicketId, user: &UserRef) -> WorkflowResult<Ticket> {
        self.ctx.transact(|uow| {
            let access = uow.access(id)?;
            if !self.ctx.authorization.can_delete_ticket(user, &access) {
                return Err(WorkflowError::denied(user, "delete this ticket"));
            }
            let now = uow.now;
            let ticket = ticket_mut(uow, id)?;
            if ticket.deleted_at.is_none() {
                ticket.deleted_at = Some(now);
                ticket.touch(now);
                info!(ticket_id = %id, user = %user, "Ticket soft-deleted");
            }
            Ok(ticket.clone())
        })
    }
}

fn validate_new_ticket(new: &NewTicket) -> WorkflowResult<()> {
    let subject = new.subject.trim();
    if subject.is_empty() {
        return Err(WorkflowError::invalid_input("subject", "must not be empty"));
    }
    if subject.chars().count() > MAX_SUBJECT_CHARS {
        return Err(WorkflowError::invalid_input(
            "subject",
            format!("must be at most {MAX_SUBJECT_CHARS} characters"),
        ));
    }
    if new.description.trim().is_empty() {
        return Err(WorkflowError::invalid_input("description", "must not be empty"));
    }
    Ok(())
}

pub(crate) fn ticket_mut<'t>(uow: &'t mut UnitOfWork<'_>, id: TicketId) -> WorkflowResult<&'t mut Ticket> {
    uow.tables
        .ticket_mut(id)
        .ok_or_else(|| WorkflowError::not_found("ticket", id))
}

/// Reject a pending escalation because the ticket left the open states
fn withdraw_pending_escalation(uow: &mut UnitOfWork<'_>, id: TicketId, reason: &str) {
    let Some(request_id) = uow.tables.pending_escalation(id).map(|r| r.id) else {
        return;
    };
    let now = uow.now;
    if let Some(request) = uow.tables.escalations.get_mut(&request_id) {
        request.reject(None, reason, now);
        let request = request.clone();
        info!(ticket_id = %id, request_id = %request_id, "Pending escalation withdrawn");
        uow.emit(WorkflowEvent::EscalationRejected {
            request,
            timestamp: now,
        });
    }
    if let Some(ticket) = uow.tables.ticket_mut(id) {
        ticket.requested_level_id = None;
    }
}

fn require_open(ticket: &Ticket, to: TicketStatus) -> WorkflowResult<()> {
    if !ticket.is_open() {
        return Err(WorkflowError::InvalidTransition {
            ticket_id: ticket.id,
            from: ticket.status,
            to,
        });
    }
    Ok(())
}

pub(crate) fn resolve_in(
    ctx: &SharedContext,
    uow: &mut UnitOfWork<'_>,
    id: TicketId,
    resolver: &UserRef,
) -> WorkflowResult<Ticket> {
    let access = uow.access(id)?;
    if !ctx.authorization.can_update_ticket(resolver, &access) {
        return Err(WorkflowError::denied(resolver, "resolve this ticket"));
    }
    require_open(access.ticket(), TicketStatus::Resolved)?;

    withdraw_pending_escalation(uow, id, "Ticket resolved before escalation decision");
    let now = uow.now;
    let ticket = ticket_mut(uow, id)?;
    ticket.status = TicketStatus::Resolved;
    ticket.resolved_at = Some(now);
    ticket.resolved_by = Some(resolver.clone());
    ticket.touch(now);
    let ticket = ticket.clone();

    info!(ticket_id = %id, resolver = %resolver, "Ticket resolved");
    uow.emit(WorkflowEvent::TicketResolved {
        ticket: ticket.clone(),
        timestamp: now,
    });
    Ok(ticket)
}

pub(crate) fn close_in(
    ctx: &SharedContext,
    uow: &mut UnitOfWork<'_>,
    id: TicketId,
    resolver: &UserRef,
) -> WorkflowResult<Ticket> {
    let access = uow.access(id)?;
    if !ctx.authorization.can_close_ticket(resolver, &access) {
        return Err(WorkflowError::denied(resolver, "close this ticket"));
    }
    let current = access.ticket();
    if current.status.is_terminal() {
        return Err(WorkflowError::InvalidTransition {
            ticket_id: id,
            from: current.status,
            to: TicketStatus::Closed,
        });
    }
    if ctx.config.evaluation.required_on_close && uow.tables.evaluations_for(id).next().is_none() {
        return Err(WorkflowError::EvaluationRequired(id));
    }

    withdraw_pending_escalation(uow, id, "Ticket closed before escalation decision");
    let now = uow.now;
    let completed = uow.tables.complete_assignments(id, now);
    let ticket = ticket_mut(uow, id)?;
    ticket.status = TicketStatus::Closed;
    ticket.closed_at = Some(now);
    ticket.resolved_by = Some(resolver.clone());
    ticket.touch(now);
    let ticket = ticket.clone();

    info!(ticket_id = %id, resolver = %resolver, completed_assignments = completed, "Ticket closed");
    uow.emit(WorkflowEvent::TicketClosed {
        ticket: ticket.clone(),
        completed_assignments: completed,
        timestamp: now,
    });
    Ok(ticket)
}

pub(crate) fn cancel_in(
    ctx: &SharedContext,
    uow: &mut UnitOfWork<'_>,
    id: TicketId,
    user: &UserRef,
    reason: Option<&str>,
) -> WorkflowResult<Ticket> {
    let access = uow.access(id)?;
    if !ctx.authorization.can_update_ticket(user, &access) {
        return Err(WorkflowError::denied(user, "cancel this ticket"));
    }
    require_open(access.ticket(), TicketStatus::Cancelled)?;

    withdraw_pending_escalation(uow, id, "Ticket cancelled before escalation decision");
    let now = uow.now;
    let completed = uow.tables.complete_assignments(id, now);
    let ticket = ticket_mut(uow, id)?;
    ticket.status = TicketStatus::Cancelled;
    ticket.closed_at = Some(now);
    ticket.touch(now);
    let ticket = ticket.clone();

    info!(ticket_id = %id, user = %user, completed_assignments = completed, "Ticket cancelled");
    uow.emit(WorkflowEvent::TicketCancelled {
        ticket: ticket.clone(),
        reason: reason.map(str::to_string),
        timestamp: now,
    });
    Ok(ticket)
}

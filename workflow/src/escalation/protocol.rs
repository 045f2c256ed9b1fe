//! Escalation request operations

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::engine::{SharedContext, UnitOfWork};
use crate::error::{require_min_chars, WorkflowError, WorkflowResult};
use crate::events::WorkflowEvent;
use crate::state::{
    EscalationId, EscalationRequest, EscalationStatus, LevelId, TicketId, TicketStatus, UserRef,
};
use crate::tickets::ticket_mut;

/// Justification recorded on timeout-driven requests
pub const SLA_BREACH_JUSTIFICATION: &str = "Automatic escalation due to SLA breach";

/// Justification recorded on risk-driven requests
pub const CRITICAL_RISK_JUSTIFICATION: &str =
    "Automatic escalation due to critical risk assessment";

/// Request, approve and reject escalations
#[derive(Clone)]
pub struct EscalationService {
    ctx: SharedContext,
}

impl EscalationService {
    pub(crate) fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }

    /// Open an escalation request towards `target_level_id`.
    ///
    /// Manual requests (`is_automatic == false`) need a requester holding the
    /// escalate capability and a justification of at least 10 characters.
    pub fn request_escalation(
        &self,
        ticket_id: TicketId,
        target_level_id: LevelId,
        justification: &str,
        requester: Option<&UserRef>,
        is_automatic: bool,
    ) -> WorkflowResult<EscalationRequest> {
        self.ctx.transact(|uow| {
            self.open_request_in(
                uow,
                ticket_id,
                target_level_id,
                justification,
                requester,
                is_automatic,
            )
        })
    }

    /// Approve a pending request: the ticket moves to the target tier and
    /// its SLA deadline restarts from now.
    pub fn approve_escalation(
        &self,
        request_id: EscalationId,
        approver: &UserRef,
    ) -> WorkflowResult<EscalationRequest> {
        self.ctx.transact(|uow| {
            let request = find_request(uow, request_id)?;
            let access = uow.access(request.ticket_id)?;
            if !self
                .ctx
                .authorization
                .can_approve_escalation(approver, &request, &access)
            {
                return Err(WorkflowError::denied(approver, "approve escalations"));
            }
            self.approve_in(uow, request_id, Some(approver))
        })
    }

    /// Reject a pending request; the ticket returns to IN_PROGRESS
    pub fn reject_escalation(
        &self,
        request_id: EscalationId,
        approver: &UserRef,
        reason: &str,
    ) -> WorkflowResult<EscalationRequest> {
        require_min_chars("reason", reason)?;

        self.ctx.transact(|uow| {
            let request = find_request(uow, request_id)?;
            let access = uow.access(request.ticket_id)?;
            if !self
                .ctx
                .authorization
                .can_approve_escalation(approver, &request, &access)
            {
                return Err(WorkflowError::denied(approver, "reject escalations"));
            }
            if !request.is_pending() {
                return Err(WorkflowError::NotPending(request_id));
            }

            let now = uow.now;
            let request = {
                let stored = request_mut(uow, request_id)?;
                stored.reject(Some(approver.clone()), reason.trim(), now);
                stored.clone()
            };
            let ticket = ticket_mut(uow, request.ticket_id)?;
            ticket.status = TicketStatus::InProgress;
            ticket.requested_level_id = None;
            ticket.touch(now);

            info!(
                ticket_id = %request.ticket_id,
                request_id = %request_id,
                approver = %approver,
                "Escalation rejected"
            );
            uow.emit(WorkflowEvent::EscalationRejected {
                request: request.clone(),
                timestamp: now,
            });
            Ok(request)
        })
    }

    /// Request an escalation to the next tier if the ticket is overdue now
    pub fn auto_escalate_by_timeout(
        &self,
        ticket_id: TicketId,
    ) -> WorkflowResult<Option<EscalationRequest>> {
        self.auto_escalate_by_timeout_at(ticket_id, Utc::now())
    }

    /// Request an escalation to the next tier if the ticket is overdue at
    /// `now`.
    ///
    /// Returns `Ok(None)` without side effects when automatic escalation is
    /// disabled, the ticket is not overdue, a decision is already pending,
    /// its tier forbids escalation, or no higher active tier exists.
    pub fn auto_escalate_by_timeout_at(
        &self,
        ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Option<EscalationRequest>> {
        if !self.ctx.config.levels.auto_escalation_enabled {
            debug!(ticket_id = %ticket_id, "Automatic escalation disabled");
            return Ok(None);
        }

        self.ctx.transact(|uow| {
            let ticket = uow
                .tables
                .ticket(ticket_id)
                .ok_or_else(|| WorkflowError::not_found("ticket", ticket_id))?;
            if !ticket.is_overdue(now) || ticket.has_active_escalation() {
                return Ok(None);
            }
            let Some(level) = uow.tables.level(ticket.current_level_id) else {
                return Ok(None);
            };
            if !level.can_escalate {
                debug!(ticket_id = %ticket_id, rank = level.rank, "Tier forbids escalation");
                return Ok(None);
            }
            let Some(target) = uow.tables.next_higher_level(level.rank).map(|l| l.id) else {
                debug!(ticket_id = %ticket_id, rank = level.rank, "No higher tier");
                return Ok(None);
            };

            self.open_request_in(uow, ticket_id, target, SLA_BREACH_JUSTIFICATION, None, true)
                .map(Some)
        })
    }

    /// Approve a pending automatic request without an approver.
    pub fn auto_approve_system_escalation(
        &self,
        request_id: EscalationId,
    ) -> WorkflowResult<EscalationRequest> {
        self.ctx.transact(|uow| {
            let request = find_request(uow, request_id)?;
            if !(request.is_automatic && request.is_pending()) {
                return Err(WorkflowError::InvalidAutoApprove(request_id));
            }
            self.approve_in(uow, request_id, None)
        })
    }

    pub fn get(&self, request_id: EscalationId) -> WorkflowResult<EscalationRequest> {
        self.ctx
            .read(|t| t.escalation(request_id).cloned())?
            .ok_or_else(|| WorkflowError::not_found("escalation request", request_id))
    }

    /// Requests of one ticket, oldest first
    pub fn requests_for(&self, ticket_id: TicketId) -> WorkflowResult<Vec<EscalationRequest>> {
        self.ctx.read(|t| {
            t.escalations
                .values()
                .filter(|r| r.ticket_id == ticket_id)
                .cloned()
                .collect()
        })
    }

    /// Every pending request, oldest first
    pub fn pending_requests(&self) -> WorkflowResult<Vec<EscalationRequest>> {
        self.ctx.read(|t| {
            t.escalations
                .values()
                .filter(|r| r.is_pending())
                .cloned()
                .collect()
        })
    }

    // =========================================================================
    // In-transaction steps, shared with risk assessment and the SLA monitor
    // =========================================================================

    pub(crate) fn open_request_in(
        &self,
        uow: &mut UnitOfWork<'_>,
        ticket_id: TicketId,
        target_level_id: LevelId,
        justification: &str,
        requester: Option<&UserRef>,
        is_automatic: bool,
    ) -> WorkflowResult<EscalationRequest> {
        if !is_automatic {
            let requester = requester.ok_or_else(|| {
                WorkflowError::invalid_input("requester", "manual escalation needs a requester")
            })?;
            let access = uow.access(ticket_id)?;
            if !self.ctx.authorization.can_request_escalation(requester, &access) {
                return Err(WorkflowError::denied(requester, "request escalation"));
            }
            require_min_chars("justification", justification)?;
        }

        let ticket = uow
            .tables
            .ticket(ticket_id)
            .ok_or_else(|| WorkflowError::not_found("ticket", ticket_id))?;
        let current = uow
            .tables
            .level(ticket.current_level_id)
            .ok_or_else(|| WorkflowError::not_found("level", ticket.current_level_id))?;

        if !ticket.can_escalate(current) || uow.tables.pending_escalation(ticket_id).is_some() {
            return Err(WorkflowError::InvalidTransition {
                ticket_id,
                from: ticket.status,
                to: TicketStatus::EscalationRequested,
            });
        }

        let target = uow
            .tables
            .level(target_level_id)
            .ok_or_else(|| WorkflowError::not_found("level", target_level_id))?;
        if target.rank <= current.rank {
            return Err(WorkflowError::InvalidTargetLevel {
                target_rank: target.rank,
                reason: format!("must be above current rank {}", current.rank),
            });
        }
        if !target.active {
            return Err(WorkflowError::InvalidTargetLevel {
                target_rank: target.rank,
                reason: "level is inactive".to_string(),
            });
        }
        if !is_automatic {
            if let Some(requester) = requester {
                let own = self.ctx.user_level(uow.tables, requester);
                if !self.ctx.users.can_user_escalate_to(requester, own, target) {
                    return Err(WorkflowError::denied(requester, "escalate to this level"));
                }
            }
        }

        let now = uow.now;
        let request = EscalationRequest {
            id: EscalationId::new(),
            ticket_id,
            from_level_id: current.id,
            to_level_id: target.id,
            requester: requester.cloned(),
            approver: None,
            justification: justification.trim().to_string(),
            status: EscalationStatus::Pending,
            rejection_reason: None,
            is_automatic,
            requested_at: now,
            resolved_at: None,
        };
        let target_rank = target.rank;
        uow.tables.escalations.insert(request.id, request.clone());

        let ticket = ticket_mut(uow, ticket_id)?;
        ticket.status = TicketStatus::EscalationRequested;
        ticket.requested_level_id = Some(target_level_id);
        ticket.touch(now);

        info!(
            ticket_id = %ticket_id,
            request_id = %request.id,
            target_rank,
            automatic = is_automatic,
            "Escalation requested"
        );
        uow.emit(WorkflowEvent::EscalationRequested {
            request: request.clone(),
            timestamp: now,
        });
        Ok(request)
    }

    pub(crate) fn approve_in(
        &self,
        uow: &mut UnitOfWork<'_>,
        request_id: EscalationId,
        approver: Option<&UserRef>,
    ) -> WorkflowResult<EscalationRequest> {
        let request = find_request(uow, request_id)?;
        if !request.is_pending() {
            return Err(WorkflowError::NotPending(request_id));
        }
        let target = uow
            .tables
            .level(request.to_level_id)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("level", request.to_level_id))?;

        let now = uow.now;
        let request = {
            let stored = request_mut(uow, request_id)?;
            stored.approve(approver.cloned(), now);
            stored.clone()
        };

        let ticket = ticket_mut(uow, request.ticket_id)?;
        ticket.current_level_id = target.id;
        ticket.requested_level_id = None;
        ticket.status = TicketStatus::Escalated;
        ticket.estimated_deadline = Some(target.deadline_from(now));
        ticket.touch(now);
        let ticket = ticket.clone();

        info!(
            ticket_id = %ticket.id,
            request_id = %request_id,
            level = %target.name,
            approver = approver.map(UserRef::as_str).unwrap_or("system"),
            "Escalation approved"
        );
        uow.emit(WorkflowEvent::EscalationApproved {
            request: request.clone(),
            ticket,
            timestamp: now,
        });
        Ok(request)
    }
}

fn find_request(uow: &UnitOfWork<'_>, request_id: EscalationId) -> WorkflowResult<EscalationRequest> {
    uow.tables
        .escalation(request_id)
        .cloned()
        .ok_or_else(|| WorkflowError::not_found("escalation request", request_id))
}

fn request_mut<'t>(
    uow: &'t mut UnitOfWork<'_>,
    request_id: EscalationId,
) -> WorkflowResult<&'t mut EscalationRequest> {
    uow.tables
        .escalations
        .get_mut(&request_id)
        .ok_or_else(|| WorkflowError::not_found("escalation request", request_id))
}

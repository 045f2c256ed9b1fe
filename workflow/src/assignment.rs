//! Assignment tracker - which agents are working which tickets
//!
//! An assignment is active until `completed_at` is set. At most one active
//! assignment exists per (ticket, agent): the existence check and the insert
//! run in the same store transaction, so duplicate calls (including
//! concurrent ones) get the existing row back.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AutoAssignStrategy;
use crate::engine::{SharedContext, UnitOfWork};
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::WorkflowEvent;
use crate::state::{
    Assignment, AssignmentId, LevelId, Ticket, TicketId, TicketStatus, UserRef,
};
use crate::tickets::ticket_mut;

// ============================================================================
// Strategies
// ============================================================================

/// Workload snapshot of one candidate agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateLoad {
    pub agent: UserRef,
    pub active_assignments: usize,
    /// Most recent assignment of any kind, `None` if never assigned
    pub last_assigned_at: Option<DateTime<Utc>>,
}

/// Picks one agent out of the eligible candidates
pub trait AssignmentStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// `candidates` is non-empty and ordered by agent id
    fn select(&self, candidates: &[CandidateLoad]) -> Option<UserRef>;
}

/// Rotates through agents: whoever was assigned longest ago goes next
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl AssignmentStrategy for RoundRobin {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn select(&self, candidates: &[CandidateLoad]) -> Option<UserRef> {
        // None sorts before Some, so never-assigned agents win
        candidates
            .iter()
            .min_by_key(|c| c.last_assigned_at)
            .map(|c| c.agent.clone())
    }
}

/// Picks the agent with the fewest active assignments
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoaded;

impl AssignmentStrategy for LeastLoaded {
    fn name(&self) -> &str {
        "least_loaded"
    }

    fn select(&self, candidates: &[CandidateLoad]) -> Option<UserRef> {
        candidates
            .iter()
            .min_by_key(|c| (c.active_assignments, c.last_assigned_at))
            .map(|c| c.agent.clone())
    }
}

pub fn strategy_for(kind: AutoAssignStrategy) -> Arc<dyn AssignmentStrategy> {
    match kind {
        AutoAssignStrategy::RoundRobin => Arc::new(RoundRobin),
        AutoAssignStrategy::LeastLoaded => Arc::new(LeastLoaded),
    }
}

// ============================================================================
// Service
// ============================================================================

/// Agent assignment operations
#[derive(Clone)]
pub struct AssignmentService {
    ctx: SharedContext,
    strategy: Arc<dyn AssignmentStrategy>,
}

impl AssignmentService {
    pub(crate) fn new(ctx: SharedContext) -> Self {
        let strategy = strategy_for(ctx.config.assignment.strategy);
        Self { ctx, strategy }
    }

    /// Replace the strategy chosen by configuration
    pub fn with_strategy(mut self, strategy: Arc<dyn AssignmentStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Assign an agent to a ticket. Returns the existing active assignment
    /// unchanged if there is one.
    pub fn assign_agent(
        &self,
        ticket_id: TicketId,
        agent: &UserRef,
        assigner: Option<&UserRef>,
    ) -> WorkflowResult<Assignment> {
        self.ctx
            .transact(|uow| self.assign_in(uow, ticket_id, agent, assigner))
    }

    /// Complete an agent's active assignment
    pub fn unassign_agent(&self, ticket_id: TicketId, agent: &UserRef) -> WorkflowResult<Assignment> {
        self.ctx.transact(|uow| unassign_in(uow, ticket_id, agent))
    }

    /// Hand a ticket from one agent to another in a single transaction
    pub fn reassign(
        &self,
        ticket_id: TicketId,
        old_agent: &UserRef,
        new_agent: &UserRef,
        assigner: &UserRef,
    ) -> WorkflowResult<Assignment> {
        self.ctx.transact(|uow| {
            let access = uow.access(ticket_id)?;
            if !self.ctx.authorization.can_update_ticket(assigner, &access) {
                return Err(WorkflowError::denied(assigner, "reassign this ticket"));
            }
            unassign_in(uow, ticket_id, old_agent)?;
            self.assign_in(uow, ticket_id, new_agent, Some(assigner))
        })
    }

    /// Pick an agent with the configured strategy and assign them.
    ///
    /// `Ok(None)` when automatic assignment is disabled or nobody is eligible.
    pub fn auto_assign_by_workload(&self, ticket_id: TicketId) -> WorkflowResult<Option<Assignment>> {
        let config = &self.ctx.config.assignment;
        if !config.auto_assign_enabled {
            debug!(ticket_id = %ticket_id, "Automatic assignment disabled");
            return Ok(None);
        }

        self.ctx.transact(|uow| {
            let ticket = uow
                .tables
                .ticket(ticket_id)
                .ok_or_else(|| WorkflowError::not_found("ticket", ticket_id))?;
            if !ticket.is_open() {
                return Ok(None);
            }
            let level = uow
                .tables
                .level(ticket.current_level_id)
                .cloned()
                .ok_or_else(|| WorkflowError::not_found("level", ticket.current_level_id))?;

            let eligible: BTreeSet<LevelId> = uow
                .tables
                .levels
                .values()
                .filter(|l| l.active && l.rank >= level.rank)
                .map(|l| l.id)
                .collect();
            let mut candidates: Vec<CandidateLoad> = self
                .ctx
                .users
                .available_agents(&eligible)
                .into_iter()
                .filter(|agent| {
                    self.ctx
                        .user_level(uow.tables, agent)
                        .is_some_and(|l| l.rank >= level.rank)
                })
                .map(|agent| CandidateLoad {
                    active_assignments: uow.tables.active_load(&agent),
                    last_assigned_at: uow.tables.last_assigned_at(&agent),
                    agent,
                })
                .filter(|c| {
                    config
                        .max_concurrent_tickets
                        .map_or(true, |limit| c.active_assignments < limit)
                })
                .collect();
            candidates.sort_by(|a, b| a.agent.cmp(&b.agent));

            if candidates.is_empty() {
                debug!(ticket_id = %ticket_id, level = level.rank, "No eligible agent for automatic assignment");
                return Ok(None);
            }
            let Some(agent) = self.strategy.select(&candidates) else {
                return Ok(None);
            };

            info!(ticket_id = %ticket_id, agent = %agent, strategy = self.strategy.name(), "Auto-assigning ticket");
            self.assign_in(uow, ticket_id, &agent, None).map(Some)
        })
    }

    pub fn active_assignments(&self, ticket_id: TicketId) -> WorkflowResult<Vec<Assignment>> {
        self.ctx.read(|t| {
            t.assignments_for(ticket_id)
                .filter(|a| a.is_active())
                .cloned()
                .collect()
        })
    }

    /// Every assignment of a ticket, active and completed
    pub fn assignments(&self, ticket_id: TicketId) -> WorkflowResult<Vec<Assignment>> {
        self.ctx
            .read(|t| t.assignments_for(ticket_id).cloned().collect())
    }

    /// Tickets the agent is actively assigned to
    pub fn active_tickets(&self, agent: &UserRef) -> WorkflowResult<Vec<Ticket>> {
        self.ctx.read(|t| {
            t.assignments
                .values()
                .filter(|a| a.is_active() && &a.agent == agent)
                .filter_map(|a| t.ticket(a.ticket_id).cloned())
                .collect()
        })
    }

    pub fn active_load(&self, agent: &UserRef) -> WorkflowResult<usize> {
        self.ctx.read(|t| t.active_load(agent))
    }

    pub(crate) fn assign_in(
        &self,
        uow: &mut UnitOfWork<'_>,
        ticket_id: TicketId,
        agent: &UserRef,
        assigner: Option<&UserRef>,
    ) -> WorkflowResult<Assignment> {
        let access = uow.access(ticket_id)?;
        if let Some(assigner) = assigner {
            if !self.ctx.authorization.can_update_ticket(assigner, &access) {
                return Err(WorkflowError::denied(assigner, "assign agents to this ticket"));
            }
        }
        let ticket = access.ticket();

        let required_rank = uow
            .tables
            .ticket_rank(ticket)
            .ok_or_else(|| WorkflowError::not_found("level", ticket.current_level_id))?;
        let agent_rank = self.ctx.user_level(uow.tables, agent).map(|l| l.rank);
        if agent_rank.map_or(true, |rank| rank < required_rank) {
            return Err(WorkflowError::InsufficientLevel {
                user: agent.clone(),
                required: format!("level rank {required_rank} or higher"),
            });
        }

        if let Some(existing) = uow.tables.active_assignment(ticket_id, agent) {
            debug!(ticket_id = %ticket_id, agent = %agent, "Agent already assigned");
            return Ok(existing.clone());
        }

        if !ticket.is_open() {
            return Err(WorkflowError::InvalidTransition {
                ticket_id,
                from: ticket.status,
                to: TicketStatus::Assigned,
            });
        }

        if let Some(limit) = self.ctx.config.assignment.max_concurrent_tickets {
            let active = uow.tables.active_load(agent);
            if active >= limit {
                return Err(WorkflowError::CapacityExceeded {
                    agent: agent.clone(),
                    active,
                    limit,
                });
            }
        }

        let now = uow.now;
        let assignment = Assignment {
            id: AssignmentId::new(),
            ticket_id,
            agent: agent.clone(),
            assigned_at: now,
            completed_at: None,
            individual_rating: None,
        };
        uow.tables
            .assignments
            .insert(assignment.id, assignment.clone());

        let ticket = ticket_mut(uow, ticket_id)?;
        if ticket.status == TicketStatus::New {
            ticket.status = TicketStatus::Assigned;
        }
        ticket.touch(now);
        let ticket = ticket.clone();

        info!(ticket_id = %ticket_id, agent = %agent, "Agent assigned");
        uow.emit(WorkflowEvent::TicketAssigned {
            ticket,
            assignment: assignment.clone(),
            timestamp: now,
        });
        Ok(assignment)
    }
}

pub(crate) fn unassign_in(
    uow: &mut UnitOfWork<'_>,
    ticket_id: TicketId,
    agent: &UserRef,
) -> WorkflowResult<Assignment> {
    let id = uow
        .tables
        .active_assignment(ticket_id, agent)
        .map(|a| a.id)
        .ok_or_else(|| WorkflowError::NotAssigned {
            ticket_id,
            agent: agent.clone(),
        })?;
    let now = uow.now;
    let assignment = uow
        .tables
        .assignments
        .get_mut(&id)
        .ok_or_else(|| WorkflowError::not_found("assignment", id))?;
    assignment.complete(now);
    info!(ticket_id = %ticket_id, agent = %agent, "Agent unassigned");
    Ok(assignment.clone())
}

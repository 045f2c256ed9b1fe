//! Table set held by the state store, plus the lookups every service shares

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::*;

/// All workflow records, keyed by id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tables {
    pub levels: BTreeMap<LevelId, Level>,
    pub tickets: BTreeMap<TicketId, Ticket>,
    pub assignments: BTreeMap<AssignmentId, Assignment>,
    pub escalations: BTreeMap<EscalationId, EscalationRequest>,
    pub risk_assessments: BTreeMap<AssessmentId, RiskAssessment>,
    pub evaluations: BTreeMap<EvaluationId, TicketEvaluation>,
    pub agent_ratings: BTreeMap<RatingId, AgentRating>,
}

impl Tables {
    // =========================================================================
    // Levels
    // =========================================================================

    pub fn level(&self, id: LevelId) -> Option<&Level> {
        self.levels.get(&id)
    }

    pub fn level_by_rank(&self, rank: u32) -> Option<&Level> {
        self.levels.values().find(|level| level.rank == rank)
    }

    /// Smallest active rank strictly above `rank`
    pub fn next_higher_level(&self, rank: u32) -> Option<&Level> {
        self.levels
            .values()
            .filter(|level| level.active && level.rank > rank)
            .min_by_key(|level| level.rank)
    }

    pub fn levels_by_rank(&self) -> Vec<&Level> {
        let mut levels: Vec<&Level> = self.levels.values().collect();
        levels.sort_by_key(|level| level.rank);
        levels
    }

    pub fn next_level_id(&self) -> LevelId {
        LevelId(self.levels.keys().map(|id| id.0).max().unwrap_or(0) + 1)
    }

    // =========================================================================
    // Tickets
    // =========================================================================

    pub fn ticket(&self, id: TicketId) -> Option<&Ticket> {
        self.tickets.get(&id)
    }

    pub fn ticket_mut(&mut self, id: TicketId) -> Option<&mut Ticket> {
        self.tickets.get_mut(&id)
    }

    /// Rank of the level a ticket currently sits at
    pub fn ticket_rank(&self, ticket: &Ticket) -> Option<u32> {
        self.level(ticket.current_level_id).map(|level| level.rank)
    }

    // =========================================================================
    // Assignments
    // =========================================================================

    pub fn assignments_for(&self, ticket_id: TicketId) -> impl Iterator<Item = &Assignment> {
        self.assignments
            .values()
            .filter(move |a| a.ticket_id == ticket_id)
    }

    pub fn active_assignment(&self, ticket_id: TicketId, agent: &UserRef) -> Option<&Assignment> {
        self.assignments_for(ticket_id)
            .find(|a| a.is_active() && &a.agent == agent)
    }

    pub fn has_participated(&self, ticket_id: TicketId, agent: &UserRef) -> bool {
        self.assignments_for(ticket_id).any(|a| &a.agent == agent)
    }

    /// Number of active assignments held by an agent
    pub fn active_load(&self, agent: &UserRef) -> usize {
        self.assignments
            .values()
            .filter(|a| a.is_active() && &a.agent == agent)
            .count()
    }

    pub fn last_assigned_at(&self, agent: &UserRef) -> Option<DateTime<Utc>> {
        self.assignments
            .values()
            .filter(|a| &a.agent == agent)
            .map(|a| a.assigned_at)
            .max()
    }

    /// Complete every active assignment of a ticket, returning how many
    pub fn complete_assignments(&mut self, ticket_id: TicketId, now: DateTime<Utc>) -> usize {
        let mut completed = 0;
        for assignment in self
            .assignments
            .values_mut()
            .filter(|a| a.ticket_id == ticket_id && a.is_active())
        {
            assignment.complete(now);
            completed += 1;
        }
        completed
    }

    // =========================================================================
    // Escalations
    // =========================================================================

    pub fn escalation(&self, id: EscalationId) -> Option<&EscalationRequest> {
        self.escalations.get(&id)
    }

    pub fn pending_escalation(&self, ticket_id: TicketId) -> Option<&EscalationRequest> {
        self.escalations
            .values()
            .find(|r| r.ticket_id == ticket_id && r.is_pending())
    }

    // =========================================================================
    // Evaluations and ratings
    // =========================================================================

    pub fn evaluations_for(&self, ticket_id: TicketId) -> impl Iterator<Item = &TicketEvaluation> {
        self.evaluations
            .values()
            .filter(move |e| e.ticket_id == ticket_id)
    }

    pub fn ratings_for(
        &self,
        ticket_id: TicketId,
        agent: &UserRef,
    ) -> impl Iterator<Item = &AgentRating> {
        let agent = agent.clone();
        self.agent_ratings
            .values()
            .filter(move |r| r.ticket_id == ticket_id && r.agent == agent)
    }
}

/// Mean of a set of scores, `None` when empty
pub fn mean(scores: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = scores
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), score| (sum + score, count + 1));
    (count > 0).then(|| sum / count as f64)
}

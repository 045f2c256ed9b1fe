//! Evaluation and rating subsystem
//!
//! Ticket evaluations are upserted per (ticket, evaluator) and roll up into
//! `Ticket::global_score`. Agent ratings are upserted per
//! (ticket, agent, rater) and roll up into `Assignment::individual_rating`.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{SharedContext, UnitOfWork};
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::WorkflowEvent;
use crate::state::tables::mean;
use crate::state::{
    AgentRating, EvaluationId, RatingId, Ticket, TicketEvaluation, TicketId, UserRef,
};
use crate::tickets::ticket_mut;

/// Scores at or above this count as high
pub const HIGH_RATING_THRESHOLD: f64 = 4.0;

/// Scores at or below this count as low
pub const LOW_RATING_THRESHOLD: f64 = 2.0;

/// Longest accepted comment
pub const MAX_COMMENT_CHARS: usize = 1000;

/// Aggregates over every evaluation and rating
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketStatistics {
    pub total_evaluations: usize,
    pub average_score: Option<f64>,
    pub high_rated: usize,
    pub low_rated: usize,
    pub total_agent_ratings: usize,
    pub average_agent_score: Option<f64>,
}

/// Aggregates for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatistics {
    pub agent: UserRef,
    pub total_ratings: usize,
    pub average_rating: Option<f64>,
    pub high_ratings: usize,
    pub low_ratings: usize,
    /// Distinct tickets the agent was ever assigned to
    pub tickets_participated: usize,
}

#[derive(Clone)]
pub struct EvaluationService {
    ctx: SharedContext,
}

impl EvaluationService {
    pub(crate) fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }

    /// Record or update `evaluator`'s score for a ticket
    pub fn evaluate_ticket(
        &self,
        ticket_id: TicketId,
        evaluator: &UserRef,
        score: f64,
        comment: Option<&str>,
    ) -> WorkflowResult<TicketEvaluation> {
        let config = &self.ctx.config.evaluation;
        if !config.enabled {
            return Err(WorkflowError::FeatureDisabled("ticket evaluation"));
        }
        self.check_score(score)?;
        let comment = normalize_comment(comment)?;

        self.ctx.transact(|uow| {
            let access = uow.access(ticket_id)?;
            if !self.ctx.authorization.can_evaluate_ticket(evaluator, &access) {
                return Err(WorkflowError::denied(evaluator, "evaluate this ticket"));
            }

            let now = uow.now;
            let existing = uow
                .tables
                .evaluations_for(ticket_id)
                .find(|e| &e.evaluator == evaluator)
                .map(|e| e.id);
            let evaluation = match existing.and_then(|id| uow.tables.evaluations.get_mut(&id)) {
                Some(stored) => {
                    stored.score = score;
                    stored.comment = comment;
                    stored.updated_at = now;
                    stored.clone()
                }
                None => {
                    let evaluation = TicketEvaluation {
                        id: EvaluationId::new(),
                        ticket_id,
                        evaluator: evaluator.clone(),
                        score,
                        comment,
                        created_at: now,
                        updated_at: now,
                    };
                    uow.tables
                        .evaluations
                        .insert(evaluation.id, evaluation.clone());
                    evaluation
                }
            };

            let ticket = refresh_global_score(uow, ticket_id)?;
            info!(
                ticket_id = %ticket_id,
                evaluator = %evaluator,
                score,
                global_score = ?ticket.global_score,
                "Ticket evaluated"
            );
            uow.emit(WorkflowEvent::TicketEvaluated {
                ticket,
                evaluation: evaluation.clone(),
                timestamp: now,
            });
            Ok(evaluation)
        })
    }

    /// Record or update `rater`'s score for an agent who worked the ticket
    pub fn rate_agent(
        &self,
        ticket_id: TicketId,
        agent: &UserRef,
        rater: &UserRef,
        score: f64,
        comment: Option<&str>,
    ) -> WorkflowResult<AgentRating> {
        let config = &self.ctx.config.evaluation;
        if !config.agent_rating_enabled {
            return Err(WorkflowError::FeatureDisabled("agent rating"));
        }
        self.check_score(score)?;
        let comment = normalize_comment(comment)?;

        self.ctx.transact(|uow| {
            let access = uow.access(ticket_id)?;
            if !self.ctx.authorization.can_rate_agent(rater, &access, agent) {
                return Err(WorkflowError::denied(rater, "rate agents on this ticket"));
            }
            if !access.has_participated(agent) {
                return Err(WorkflowError::AgentNotParticipant {
                    ticket_id,
                    agent: agent.clone(),
                });
            }

            let now = uow.now;
            let existing = uow
                .tables
                .ratings_for(ticket_id, agent)
                .find(|r| &r.rater == rater)
                .map(|r| r.id);
            let rating = match existing.and_then(|id| uow.tables.agent_ratings.get_mut(&id)) {
                Some(stored) => {
                    stored.score = score;
                    stored.comment = comment;
                    stored.updated_at = now;
                    stored.clone()
                }
                None => {
                    let rating = AgentRating {
                        id: RatingId::new(),
                        ticket_id,
                        agent: agent.clone(),
                        rater: rater.clone(),
                        score,
                        comment,
                        created_at: now,
                        updated_at: now,
                    };
                    uow.tables.agent_ratings.insert(rating.id, rating.clone());
                    rating
                }
            };

            let individual = mean(uow.tables.ratings_for(ticket_id, agent).map(|r| r.score));
            for assignment in uow
                .tables
                .assignments
                .values_mut()
                .filter(|a| a.ticket_id == ticket_id && &a.agent == agent)
            {
                assignment.individual_rating = individual;
            }

            info!(ticket_id = %ticket_id, agent = %agent, rater = %rater, score, "Agent rated");
            uow.emit(WorkflowEvent::AgentRated {
                rating: rating.clone(),
                timestamp: now,
            });
            Ok(rating)
        })
    }

    /// Evaluations of one ticket, oldest first
    pub fn evaluations(&self, ticket_id: TicketId) -> WorkflowResult<Vec<TicketEvaluation>> {
        self.ctx
            .read(|t| t.evaluations_for(ticket_id).cloned().collect())
    }

    /// Agent ratings left on one ticket, oldest first
    pub fn ratings(&self, ticket_id: TicketId) -> WorkflowResult<Vec<AgentRating>> {
        self.ctx.read(|t| {
            t.agent_ratings
                .values()
                .filter(|r| r.ticket_id == ticket_id)
                .cloned()
                .collect()
        })
    }

    /// Mean of every rating the agent received; 0.0 when unrated
    pub fn agent_average_rating(&self, agent: &UserRef) -> WorkflowResult<f64> {
        self.ctx.read(|t| {
            mean(
                t.agent_ratings
                    .values()
                    .filter(|r| &r.agent == agent)
                    .map(|r| r.score),
            )
            .unwrap_or(0.0)
        })
    }

    pub fn ticket_statistics(&self) -> WorkflowResult<TicketStatistics> {
        self.ctx.read(|t| {
            let scores: Vec<f64> = t.evaluations.values().map(|e| e.score).collect();
            TicketStatistics {
                total_evaluations: scores.len(),
                average_score: mean(scores.iter().copied()),
                high_rated: scores.iter().filter(|s| **s >= HIGH_RATING_THRESHOLD).count(),
                low_rated: scores.iter().filter(|s| **s <= LOW_RATING_THRESHOLD).count(),
                total_agent_ratings: t.agent_ratings.len(),
                average_agent_score: mean(t.agent_ratings.values().map(|r| r.score)),
            }
        })
    }

    pub fn agent_statistics(&self, agent: &UserRef) -> WorkflowResult<AgentStatistics> {
        self.ctx.read(|t| {
            let scores: Vec<f64> = t
                .agent_ratings
                .values()
                .filter(|r| &r.agent == agent)
                .map(|r| r.score)
                .collect();
            let mut tickets: Vec<TicketId> = t
                .assignments
                .values()
                .filter(|a| &a.agent == agent)
                .map(|a| a.ticket_id)
                .collect();
            tickets.sort();
            tickets.dedup();

            AgentStatistics {
                agent: agent.clone(),
                total_ratings: scores.len(),
                average_rating: mean(scores.iter().copied()),
                high_ratings: scores.iter().filter(|s| **s >= HIGH_RATING_THRESHOLD).count(),
                low_ratings: scores.iter().filter(|s| **s <= LOW_RATING_THRESHOLD).count(),
                tickets_participated: tickets.len(),
            }
        })
    }

    fn check_score(&self, score: f64) -> WorkflowResult<()> {
        let config = &self.ctx.config.evaluation;
        if !config.score_in_range(score) {
            return Err(WorkflowError::ScoreOutOfRange {
                score,
                min: config.min_score,
                max: config.max_score,
            });
        }
        Ok(())
    }
}

fn normalize_comment(comment: Option<&str>) -> WorkflowResult<Option<String>> {
    let Some(comment) = comment.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    if comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(WorkflowError::invalid_input(
            "comment",
            format!("must be at most {MAX_COMMENT_CHARS} characters"),
        ));
    }
    Ok(Some(comment.to_string()))
}

fn refresh_global_score(
    uow: &mut UnitOfWork<'_>,
    ticket_id: TicketId,
) -> WorkflowResult<Ticket> {
    let scores: Vec<f64> = uow.tables.evaluations_for(ticket_id).map(|e| e.score).collect();
    let now = uow.now;
    let ticket = ticket_mut(uow, ticket_id)?;
    ticket.global_score = mean(scores.iter().copied());
    ticket.total_evaluations = u32::try_from(scores.len()).unwrap_or(u32::MAX);
    ticket.touch(now);
    Ok(ticket.clone())
}

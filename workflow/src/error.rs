//! Error type shared by every workflow operation

use crate::state::{EscalationId, StoreError, TicketId, TicketStatus, UserRef};

/// Error type for workflow operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("User {user} is not authorized to {action}")]
    AuthorizationDenied { user: UserRef, action: &'static str },

    #[error("Ticket {ticket_id} cannot move from {from} to {to}")]
    InvalidTransition {
        ticket_id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
    },

    #[error("Invalid target level rank {target_rank}: {reason}")]
    InvalidTargetLevel { target_rank: u32, reason: String },

    #[error("Escalation request {0} is not pending")]
    NotPending(EscalationId),

    #[error("Escalation request {0} is not a pending automatic escalation")]
    InvalidAutoApprove(EscalationId),

    #[error("User {user} does not hold a sufficient level: requires {required}")]
    InsufficientLevel { user: UserRef, required: String },

    #[error("Agent {agent} already holds {active} active tickets (limit {limit})")]
    CapacityExceeded {
        agent: UserRef,
        active: usize,
        limit: usize,
    },

    #[error("Agent {agent} has no active assignment on ticket {ticket_id}")]
    NotAssigned { ticket_id: TicketId, agent: UserRef },

    #[error("Agent {agent} never worked ticket {ticket_id}")]
    AgentNotParticipant { ticket_id: TicketId, agent: UserRef },

    #[error("Feature disabled: {0}")]
    FeatureDisabled(&'static str),

    #[error("Score {score} outside allowed range [{min}, {max}]")]
    ScoreOutOfRange { score: f64, min: f64, max: f64 },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("Level rank {0} already exists")]
    DuplicateRank(u32),

    #[error("Ticket {0} must be evaluated before it can be closed")]
    EvaluationRequired(TicketId),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl WorkflowError {
    /// Stable machine-readable code for each kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthorizationDenied { .. } => "authorization_denied",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidTargetLevel { .. } => "invalid_target_level",
            Self::NotPending(_) => "not_pending",
            Self::InvalidAutoApprove(_) => "invalid_auto_approve",
            Self::InsufficientLevel { .. } => "insufficient_level",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::NotAssigned { .. } => "not_assigned",
            Self::AgentNotParticipant { .. } => "agent_not_participant",
            Self::FeatureDisabled(_) => "feature_disabled",
            Self::ScoreOutOfRange { .. } => "score_out_of_range",
            Self::NotFound { .. } => "not_found",
            Self::InvalidInput { .. } => "invalid_input",
            Self::DuplicateRank(_) => "duplicate_rank",
            Self::EvaluationRequired(_) => "evaluation_required",
            Self::Persistence(_) => "persistence_failure",
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn denied(user: &UserRef, action: &'static str) -> Self {
        Self::AuthorizationDenied {
            user: user.clone(),
            action,
        }
    }

    pub(crate) fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Minimum length of free-text justifications and rejection reasons
pub(crate) const MIN_JUSTIFICATION_CHARS: usize = 10;

pub(crate) fn require_min_chars(field: &'static str, text: &str) -> WorkflowResult<()> {
    if text.trim().chars().count() < MIN_JUSTIFICATION_CHARS {
        return Err(WorkflowError::invalid_input(
            field,
            format!("must be at least {MIN_JUSTIFICATION_CHARS} characters"),
        ));
    }
    Ok(())
}

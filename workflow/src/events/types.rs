//! Domain events emitted by workflow operations
//!
//! Events carry snapshots of the records as committed, so subscribers never
//! need to read the store to act on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{
    AgentRating, Assignment, EscalationRequest, RiskAssessment, Ticket, TicketEvaluation,
    TicketId, TicketStatus, UserRef,
};

/// All workflow events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A ticket was opened at the entry tier
    TicketCreated {
        ticket: Ticket,
        timestamp: DateTime<Utc>,
    },

    /// An agent received a new active assignment
    TicketAssigned {
        ticket: Ticket,
        assignment: Assignment,
        timestamp: DateTime<Utc>,
    },

    /// Generic status update outside the escalation protocol
    TicketStatusChanged {
        ticket_id: TicketId,
        old_status: TicketStatus,
        new_status: TicketStatus,
        changed_by: UserRef,
        timestamp: DateTime<Utc>,
    },

    TicketResolved {
        ticket: Ticket,
        timestamp: DateTime<Utc>,
    },

    TicketClosed {
        ticket: Ticket,
        /// Assignments force-completed by the close
        completed_assignments: usize,
        timestamp: DateTime<Utc>,
    },

    TicketCancelled {
        ticket: Ticket,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    EscalationRequested {
        request: EscalationRequest,
        timestamp: DateTime<Utc>,
    },

    EscalationApproved {
        request: EscalationRequest,
        ticket: Ticket,
        timestamp: DateTime<Utc>,
    },

    EscalationRejected {
        request: EscalationRequest,
        timestamp: DateTime<Utc>,
    },

    RiskAssessed {
        assessment: RiskAssessment,
        timestamp: DateTime<Utc>,
    },

    TicketEvaluated {
        ticket: Ticket,
        evaluation: TicketEvaluation,
        timestamp: DateTime<Utc>,
    },

    AgentRated {
        rating: AgentRating,
        timestamp: DateTime<Utc>,
    },

    /// Deadline is approaching
    SlaWarning {
        ticket: Ticket,
        remaining_minutes: i64,
        timestamp: DateTime<Utc>,
    },

    /// Deadline has passed on an open ticket
    SlaBreached {
        ticket: Ticket,
        overdue_minutes: i64,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TicketCreated { .. } => "ticket_created",
            Self::TicketAssigned { .. } => "ticket_assigned",
            Self::TicketStatusChanged { .. } => "ticket_status_changed",
            Self::TicketResolved { .. } => "ticket_resolved",
            Self::TicketClosed { .. } => "ticket_closed",
            Self::TicketCancelled { .. } => "ticket_cancelled",
            Self::EscalationRequested { .. } => "escalation_requested",
            Self::EscalationApproved { .. } => "escalation_approved",
            Self::EscalationRejected { .. } => "escalation_rejected",
            Self::RiskAssessed { .. } => "risk_assessed",
            Self::TicketEvaluated { .. } => "ticket_evaluated",
            Self::AgentRated { .. } => "agent_rated",
            Self::SlaWarning { .. } => "sla_warning",
            Self::SlaBreached { .. } => "sla_breached",
        }
    }

    /// Key into the notification channel map, for events that notify
    pub fn notification_key(&self) -> Option<&'static str> {
        match self {
            Self::TicketCreated { .. } => Some("ticket_created"),
            Self::TicketAssigned { .. } => Some("ticket_assigned"),
            Self::TicketClosed { .. } => Some("ticket_closed"),
            Self::EscalationRequested { .. } => Some("escalation_requested"),
            Self::EscalationApproved { .. } => Some("escalation_approved"),
            Self::EscalationRejected { .. } => Some("escalation_rejected"),
            Self::TicketEvaluated { .. } => Some("evaluation_received"),
            Self::SlaBreached { .. } => Some("sla_breached"),
            _ => None,
        }
    }

    /// Ticket the event concerns
    pub fn ticket_id(&self) -> TicketId {
        match self {
            Self::TicketCreated { ticket, .. }
            | Self::TicketAssigned { ticket, .. }
            | Self::TicketResolved { ticket, .. }
            | Self::TicketClosed { ticket, .. }
            | Self::TicketCancelled { ticket, .. }
            | Self::EscalationApproved { ticket, .. }
            | Self::TicketEvaluated { ticket, .. }
            | Self::SlaWarning { ticket, .. }
            | Self::SlaBreached { ticket, .. } => ticket.id,
            Self::TicketStatusChanged { ticket_id, .. } => *ticket_id,
            Self::EscalationRequested { request, .. } | Self::EscalationRejected { request, .. } => {
                request.ticket_id
            }
            Self::RiskAssessed { assessment, .. } => assessment.ticket_id,
            Self::AgentRated { rating, .. } => rating.ticket_id,
        }
    }

    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TicketCreated { timestamp, .. }
            | Self::TicketAssigned { timestamp, .. }
            | Self::TicketStatusChanged { timestamp, .. }
            | Self::TicketResolved { timestamp, .. }
            | Self::TicketClosed { timestamp, .. }
            | Self::TicketCancelled { timestamp, .. }
            | Self::EscalationRequested { timestamp, .. }
            | Self::EscalationApproved { timestamp, .. }
            | Self::EscalationRejected { timestamp, .. }
            | Self::RiskAssessed { timestamp, .. }
            | Self::TicketEvaluated { timestamp, .. }
            | Self::AgentRated { timestamp, .. }
            | Self::SlaWarning { timestamp, .. }
            | Self::SlaBreached { timestamp, .. } => *timestamp,
        }
    }
}

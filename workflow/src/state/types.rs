//! Core records for the ticket workflow
//!
//! These types are held by the [`StateStore`](super::StateStore) and written
//! into its JSON snapshot. Identifiers for tickets and everything hanging off
//! a ticket are UUID v7, so ordering by id is ordering by creation time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh time-ordered identifier
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

record_id!(
    /// Unique identifier for tickets
    TicketId
);
record_id!(
    /// Unique identifier for agent assignments
    AssignmentId
);
record_id!(
    /// Unique identifier for escalation requests
    EscalationId
);
record_id!(
    /// Unique identifier for risk assessments
    AssessmentId
);
record_id!(
    /// Unique identifier for ticket evaluations
    EvaluationId
);
record_id!(
    /// Unique identifier for agent ratings
    RatingId
);

/// Identifier of a support level, allocated by the level registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelId(pub u32);

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level-{}", self.0)
    }
}

/// Identifier of the department owning a ticket (opaque to the engine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepartmentId(pub u32);

impl fmt::Display for DepartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dept-{}", self.0)
    }
}

/// Opaque reference to a user of the surrounding application.
///
/// The host may identify users by integer, UUID or ULID; the engine only
/// stores and compares the textual form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRef(String);

impl UserRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Error returned when parsing one of the workflow enums from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// Levels
// ============================================================================

/// A support tier. Rank 1 is front-line support; higher ranks handle
/// escalated work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub id: LevelId,
    /// Ordinal rank, unique across the registry
    pub rank: u32,
    pub name: String,
    pub description: String,
    /// Tickets owned by this tier may be escalated further
    pub can_escalate: bool,
    /// Agents of this tier may record risk assessments
    pub can_assess_risk: bool,
    /// SLA window applied when a ticket arrives at this tier
    pub default_sla_hours: u32,
    pub active: bool,
}

impl Level {
    pub fn is_higher_than(&self, other: &Level) -> bool {
        self.rank > other.rank
    }

    pub fn can_escalate_to(&self, target: &Level) -> bool {
        self.can_escalate && target.rank > self.rank
    }

    /// Deadline for a ticket entering this tier at `from`
    pub fn deadline_from(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + Duration::hours(i64::from(self.default_sla_hours))
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Status of a ticket in the workflow state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    Assigned,
    InProgress,
    EscalationRequested,
    Escalated,
    Resolved,
    Closed,
    Cancelled,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 8] = [
        TicketStatus::New,
        TicketStatus::Assigned,
        TicketStatus::InProgress,
        TicketStatus::EscalationRequested,
        TicketStatus::Escalated,
        TicketStatus::Resolved,
        TicketStatus::Closed,
        TicketStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::EscalationRequested => "escalation_requested",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Assigned => "Assigned",
            Self::InProgress => "In Progress",
            Self::EscalationRequested => "Escalation Requested",
            Self::Escalated => "Escalated",
            Self::Resolved => "Resolved",
            Self::Closed => "Closed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::New
                | Self::Assigned
                | Self::InProgress
                | Self::EscalationRequested
                | Self::Escalated
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed | Self::Cancelled)
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }

    /// Transitions a caller may request through a generic status update.
    ///
    /// `EscalationRequested` and `Escalated` are only entered through the
    /// escalation protocol, never directly.
    pub fn allows_transition_to(&self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        match (*self, next) {
            (New, Assigned | InProgress) => true,
            (Assigned, InProgress) => true,
            (Escalated, InProgress) => true,
            (Resolved, InProgress) => true,
            (from, Resolved | Cancelled) => from.is_open(),
            (from, Closed) => from.is_open() || from == Resolved,
            _ => false,
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        TicketStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseEnumError::new("ticket status", s))
    }
}

/// Priority chosen by the ticket creator. Informational only: routing is
/// driven by levels and assessed risk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }

    pub fn numeric_value(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ParseEnumError::new("priority", s)),
        }
    }
}

/// Risk classification recorded by an assessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low Risk",
            Self::Medium => "Medium Risk",
            Self::High => "High Risk",
            Self::Critical => "Critical Risk",
        }
    }

    pub fn numeric_value(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// Only critical risk bypasses human approval
    pub fn should_auto_escalate(&self) -> bool {
        *self == Self::Critical
    }

    pub fn is_high(&self) -> bool {
        *self >= Self::High
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        RiskLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| ParseEnumError::new("risk level", s))
    }
}

/// A support ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub subject: String,
    pub description: String,
    pub status: TicketStatus,
    pub user_priority: Priority,
    /// Mirrors the most recent risk assessment
    pub assessed_risk: Option<RiskLevel>,
    pub current_level_id: LevelId,
    /// Set only while an escalation request is pending
    pub requested_level_id: Option<LevelId>,
    pub department_id: DepartmentId,
    pub created_by: UserRef,
    pub resolved_by: Option<UserRef>,
    /// Mean of all evaluation scores
    pub global_score: Option<f64>,
    pub total_evaluations: u32,
    pub estimated_deadline: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft deletion marker; deleted tickets are hidden from listings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Overdue means a deadline exists, has passed, and the ticket is still open
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open()
            && self
                .estimated_deadline
                .map(|deadline| deadline < now)
                .unwrap_or(false)
    }

    pub fn has_active_escalation(&self) -> bool {
        self.status == TicketStatus::EscalationRequested
    }

    /// Whether a new escalation request may be opened while the ticket sits
    /// at `current_level`
    pub fn can_escalate(&self, current_level: &Level) -> bool {
        self.is_open() && !self.has_active_escalation() && current_level.can_escalate
    }

    /// `requested_level_id` is set exactly while an escalation is pending
    pub fn escalation_invariant_holds(&self) -> bool {
        self.requested_level_id.is_some() == self.has_active_escalation()
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

// ============================================================================
// Assignments
// ============================================================================

/// An agent working a ticket. `completed_at == None` means active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub ticket_id: TicketId,
    pub agent: UserRef,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Mean of the ratings this agent received on this ticket
    pub individual_rating: Option<f64>,
}

impl Assignment {
    pub fn is_active(&self) -> bool {
        self.completed_at.is_none()
    }

    pub(crate) fn complete(&mut self, now: DateTime<Utc>) {
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
    }
}

// ============================================================================
// Escalation requests
// ============================================================================

/// Lifecycle of an escalation request: pending, then exactly one terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// A request to move a ticket to a higher tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub id: EscalationId,
    pub ticket_id: TicketId,
    pub from_level_id: LevelId,
    pub to_level_id: LevelId,
    /// `None` when the system raised the request
    pub requester: Option<UserRef>,
    /// `None` until resolved, and for self-approved system escalations
    pub approver: Option<UserRef>,
    pub justification: String,
    pub status: EscalationStatus,
    pub rejection_reason: Option<String>,
    pub is_automatic: bool,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl EscalationRequest {
    pub fn is_pending(&self) -> bool {
        self.status == EscalationStatus::Pending
    }

    pub fn is_approved(&self) -> bool {
        self.status == EscalationStatus::Approved
    }

    pub fn is_rejected(&self) -> bool {
        self.status == EscalationStatus::Rejected
    }

    pub(crate) fn approve(&mut self, approver: Option<UserRef>, now: DateTime<Utc>) {
        self.status = EscalationStatus::Approved;
        self.approver = approver;
        self.resolved_at = Some(now);
    }

    pub(crate) fn reject(
        &mut self,
        approver: Option<UserRef>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.status = EscalationStatus::Rejected;
        self.approver = approver;
        self.rejection_reason = Some(reason.into());
        self.resolved_at = Some(now);
    }
}

// ============================================================================
// Risk, evaluations, ratings
// ============================================================================

/// One entry of a ticket's append-only risk history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub id: AssessmentId,
    pub ticket_id: TicketId,
    pub assessor: UserRef,
    pub risk_level: RiskLevel,
    pub justification: String,
    pub created_at: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn should_auto_escalate(&self) -> bool {
        self.risk_level.should_auto_escalate()
    }
}

/// Satisfaction score left on a ticket, one per evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketEvaluation {
    pub id: EvaluationId,
    pub ticket_id: TicketId,
    pub evaluator: UserRef,
    pub score: f64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Score given to one agent on one ticket, one per rater
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRating {
    pub id: RatingId,
    pub ticket_id: TicketId,
    pub agent: UserRef,
    pub rater: UserRef,
    pub score: f64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(rank: u32, can_escalate: bool) -> Level {
        Level {
            id: LevelId(rank),
            rank,
            name: format!("Level {rank}"),
            description: String::new(),
            can_escalate,
            can_assess_risk: false,
            default_sla_hours: 24,
            active: true,
        }
    }

    fn ticket(status: TicketStatus) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: TicketId::new(),
            subject: "Printer on fire".to_string(),
            description: "Smoke visible".to_string(),
            status,
            user_priority: Priority::default(),
            assessed_risk: None,
            current_level_id: LevelId(1),
            requested_level_id: None,
            department_id: DepartmentId(1),
            created_by: UserRef::from("customer"),
            resolved_by: None,
            global_score: None,
            total_evaluations: 0,
            estimated_deadline: Some(now + Duration::hours(24)),
            resolved_at: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_open_and_closed_partition_statuses() {
        for status in TicketStatus::ALL {
            assert_ne!(status.is_open(), status.is_closed(), "{status}");
        }
        assert!(TicketStatus::EscalationRequested.is_open());
        assert!(TicketStatus::Resolved.is_closed());
        assert!(!TicketStatus::Resolved.is_terminal());
    }

    #[test]
    fn test_protocol_statuses_not_directly_reachable() {
        for status in TicketStatus::ALL {
            assert!(!status.allows_transition_to(TicketStatus::EscalationRequested));
            assert!(!status.allows_transition_to(TicketStatus::Escalated));
        }
    }

    #[test]
    fn test_terminal_statuses_allow_nothing() {
        for next in TicketStatus::ALL {
            assert!(!TicketStatus::Closed.allows_transition_to(next));
            assert!(!TicketStatus::Cancelled.allows_transition_to(next));
        }
        assert!(TicketStatus::Resolved.allows_transition_to(TicketStatus::Closed));
        assert!(TicketStatus::Resolved.allows_transition_to(TicketStatus::InProgress));
        assert!(!TicketStatus::Resolved.allows_transition_to(TicketStatus::Cancelled));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            "in-progress".parse::<TicketStatus>().unwrap(),
            TicketStatus::InProgress
        );
        assert_eq!("CLOSED".parse::<TicketStatus>().unwrap(), TicketStatus::Closed);
        assert!("archived".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(RiskLevel::Critical.numeric_value(), 4);
        assert!(RiskLevel::Critical.should_auto_escalate());
        assert!(!RiskLevel::High.should_auto_escalate());
        assert!(RiskLevel::High.is_high());
        assert!(!RiskLevel::Medium.is_high());
    }

    #[test]
    fn test_priority_defaults_to_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
    }

    #[test]
    fn test_overdue_requires_open_ticket() {
        let now = Utc::now();
        let mut t = ticket(TicketStatus::InProgress);
        t.estimated_deadline = Some(now - Duration::minutes(5));
        assert!(t.is_overdue(now));

        t.status = TicketStatus::Resolved;
        assert!(!t.is_overdue(now));

        t.status = TicketStatus::InProgress;
        t.estimated_deadline = None;
        assert!(!t.is_overdue(now));
    }

    #[test]
    fn test_can_escalate_rules() {
        let escalating = level(1, true);
        let top = level(4, false);

        assert!(ticket(TicketStatus::InProgress).can_escalate(&escalating));
        assert!(!ticket(TicketStatus::InProgress).can_escalate(&top));
        assert!(!ticket(TicketStatus::EscalationRequested).can_escalate(&escalating));
        assert!(!ticket(TicketStatus::Closed).can_escalate(&escalating));
    }

    #[test]
    fn test_level_deadline_and_ordering() {
        let l1 = level(1, true);
        let l2 = level(2, true);
        let start = Utc::now();
        assert_eq!(l1.deadline_from(start), start + Duration::hours(24));
        assert!(l2.is_higher_than(&l1));
        assert!(l1.can_escalate_to(&l2));
        assert!(!l2.can_escalate_to(&l1));
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let first = TicketId::new();
        let second = TicketId::new();
        assert!(first < second);
        assert_eq!(first.to_string().parse::<TicketId>().unwrap(), first);
    }
}

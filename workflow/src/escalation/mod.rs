//! Escalation protocol: moving tickets up the support ladder
//!
//! A ticket climbs tiers through escalation requests. Every request is
//! created pending and resolved exactly once.
//!
//! # Request Lifecycle
//!
//! ```text
//! IN_PROGRESS / ASSIGNED / NEW / ESCALATED
//!     │  request (manual: assignee + justification,
//!     │           automatic: SLA breach or critical risk)
//!     ▼
//! ESCALATION_REQUESTED   requested_level_id = target
//!     │
//!     ├─ approve ──► ESCALATED at target tier, SLA clock restarts
//!     │
//!     └─ reject ───► IN_PROGRESS at the same tier
//! ```
//!
//! A tier with `can_escalate = false` is the top of the ladder: tickets
//! there never acquire a pending request.

pub mod protocol;

pub use protocol::{EscalationService, CRITICAL_RISK_JUSTIFICATION, SLA_BREACH_JUSTIFICATION};

//! Tiered support ticket workflow
//!
//! This library provides:
//! - Support tiers with per-tier SLA windows and an escalation ladder
//! - Ticket lifecycle with a checked status machine
//! - Agent assignment with level and capacity checks, plus automatic
//!   round-robin or least-loaded selection
//! - Escalation requests (manual, SLA breach, critical risk) with
//!   approve/reject decisions
//! - Risk assessments, ticket evaluations and agent ratings
//! - An SLA monitor that sweeps deadlines on a timer
//! - Post-commit domain events on a broadcast bus, fanned out to
//!   notification channels
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tierdesk_workflow::capability::{BasicTicketAuthorization, UserDirectory};
//! use tierdesk_workflow::state::{DepartmentId, Priority};
//! use tierdesk_workflow::tickets::NewTicket;
//! use tierdesk_workflow::{UserRef, WorkflowConfig, WorkflowEngine};
//!
//! # fn main() -> Result<(), tierdesk_workflow::WorkflowError> {
//! let directory = Arc::new(UserDirectory::new());
//! let engine = WorkflowEngine::new(
//!     WorkflowConfig::default(),
//!     Arc::new(BasicTicketAuthorization),
//!     directory,
//! );
//! engine.levels().seed_defaults()?;
//!
//! let ticket = engine.tickets().create(
//!     NewTicket {
//!         subject: "VPN drops every hour".into(),
//!         description: "Since the client update".into(),
//!         priority: Priority::High,
//!         department_id: DepartmentId(1),
//!     },
//!     &UserRef::from("customer-17"),
//! )?;
//! println!("{} due {:?}", ticket.id, ticket.estimated_deadline);
//! # Ok(())
//! # }
//! ```

pub mod assignment;
pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod evaluation;
pub mod events;
pub mod levels;
pub mod risk;
pub mod sla;
pub mod state;
pub mod tickets;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, WorkflowConfig};
pub use engine::WorkflowEngine;
pub use error::{WorkflowError, WorkflowResult};
pub use events::{EventBus, EventFilter, WorkflowEvent};
pub use state::{
    Level, LevelId, Priority, RiskLevel, StateStore, Ticket, TicketId, TicketStatus, UserRef,
};

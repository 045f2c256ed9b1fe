//! State for the ticket workflow
//!
//! This module provides the records the engine manages and the store that
//! holds them:
//! - Support levels (reference data)
//! - Tickets with their status and SLA deadline
//! - Agent assignments
//! - Escalation requests
//! - Risk assessments, evaluations and agent ratings
//!
//! # Architecture
//!
//! The store keeps one set of tables in memory and, when file-backed,
//! mirrors every committed transaction to a JSON snapshot:
//!
//! ```text
//!   service op ──► StateStore::transaction(f)
//!                     │  write lock held
//!                     ├─ clone tables ──► f(&mut working)
//!                     ├─ write snapshot (temp + rename)
//!                     └─ swap working copy in
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tierdesk_workflow::state::StateStore;
//!
//! let store = StateStore::open("./tierdesk-state.json")?.shared();
//! let open = store.read(|t| t.tickets.values().filter(|t| t.is_open()).count())?;
//! ```

pub mod store;
pub mod tables;
pub mod types;

pub use store::{SharedStateStore, StateStore, StoreError, StoreResult};
pub use tables::Tables;
pub use types::*;

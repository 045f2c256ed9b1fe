//! Domain events and their delivery
//!
//! # Architecture
//!
//! 1. **Event Types** (`types.rs`): one variant per observable change,
//!    carrying snapshots of the committed records.
//!
//! 2. **Event Bus** (`bus.rs`): Tokio broadcast pub/sub with filtered
//!    subscriptions.
//!
//! 3. **Dispatcher** (`dispatch.rs`): background task turning notifiable
//!    events into [`Notifier`](crate::capability::Notifier) calls.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐ commit ┌──────────────┐     ┌──────────────┐
//! │  Operation   │───────▶│  Event Bus   │────▶│  Dispatcher  │──▶ Notifier
//! │ (transaction)│        │  (broadcast) │     └──────────────┘
//! └──────────────┘        └──────┬───────┘
//!                                └────────────▶ other subscribers
//! ```
//!
//! Events are collected while a transaction runs and published only once
//! it has committed; a rolled-back operation publishes nothing.

pub mod bus;
pub mod dispatch;
pub mod types;

pub use bus::{EventBus, EventFilter, FilteredReceiver, SharedEventBus};
pub use dispatch::NotificationDispatcher;
pub use types::WorkflowEvent;

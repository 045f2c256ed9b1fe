//! Workflow engine - composes the services over one shared context
//!
//! Every service holds the same [`WorkflowContext`]: store, event bus,
//! collaborators and configuration. Mutations go through
//! [`WorkflowContext::transact`], which runs the unit of work inside a store
//! transaction and publishes the events it collected only after commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::assignment::AssignmentService;
use crate::capability::{TicketAccess, TicketAuthorization, UserCapability};
use crate::config::WorkflowConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::escalation::EscalationService;
use crate::events::{EventBus, SharedEventBus, WorkflowEvent};
use crate::evaluation::EvaluationService;
use crate::levels::LevelRegistry;
use crate::risk::RiskService;
use crate::sla::SlaMonitor;
use crate::state::{Level, SharedStateStore, StateStore, Tables, TicketId, UserRef};
use crate::tickets::TicketService;

/// Shared reference to a workflow context
pub type SharedContext = Arc<WorkflowContext>;

/// Everything an operation needs besides its arguments
pub struct WorkflowContext {
    pub(crate) store: SharedStateStore,
    pub(crate) bus: SharedEventBus,
    pub(crate) authorization: Arc<dyn TicketAuthorization>,
    pub(crate) users: Arc<dyn UserCapability>,
    pub(crate) config: WorkflowConfig,
}

/// Working copy handed to one transaction, with its event outbox
pub(crate) struct UnitOfWork<'a> {
    pub(crate) tables: &'a mut Tables,
    events: &'a mut Vec<WorkflowEvent>,
    /// Clock reading shared by every write in the transaction
    pub(crate) now: DateTime<Utc>,
}

impl UnitOfWork<'_> {
    pub(crate) fn emit(&mut self, event: WorkflowEvent) {
        self.events.push(event);
    }

    /// Read-only access view for capability checks
    pub(crate) fn access(&self, ticket_id: TicketId) -> WorkflowResult<TicketAccess<'_>> {
        TicketAccess::load(&*self.tables, ticket_id)
            .ok_or_else(|| WorkflowError::not_found("ticket", ticket_id))
    }
}

impl WorkflowContext {
    /// Run `f` as one transaction; publish its events after commit
    pub(crate) fn transact<R>(
        &self,
        f: impl FnOnce(&mut UnitOfWork<'_>) -> WorkflowResult<R>,
    ) -> WorkflowResult<R> {
        let mut events = Vec::new();
        let now = Utc::now();
        let output = self.store.transaction(|tables| {
            let mut uow = UnitOfWork {
                tables,
                events: &mut events,
                now,
            };
            f(&mut uow)
        })?;

        for event in events {
            self.bus.publish(event);
        }
        Ok(output)
    }

    /// Run a read-only query against committed state
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> WorkflowResult<R> {
        Ok(self.store.read(f)?)
    }

    /// The user's support level as currently recorded in `tables`. Agents on
    /// a deactivated tier resolve to `None`.
    pub(crate) fn user_level<'t>(&self, tables: &'t Tables, user: &UserRef) -> Option<&'t Level> {
        self.users
            .user_level(user)
            .and_then(|id| tables.level(id))
            .filter(|level| level.active)
    }
}

/// Facade over the workflow services
pub struct WorkflowEngine {
    context: SharedContext,
    levels: LevelRegistry,
    tickets: TicketService,
    assignments: AssignmentService,
    escalations: EscalationService,
    risk: RiskService,
    evaluations: EvaluationService,
    sla_monitor: SlaMonitor,
}

impl WorkflowEngine {
    /// Create an engine over an in-memory store and a fresh event bus
    pub fn new(
        config: WorkflowConfig,
        authorization: Arc<dyn TicketAuthorization>,
        users: Arc<dyn UserCapability>,
    ) -> Self {
        Self::from_parts(
            StateStore::in_memory().shared(),
            EventBus::new().shared(),
            authorization,
            users,
            config,
        )
    }

    /// Create an engine over an existing store and bus
    pub fn from_parts(
        store: SharedStateStore,
        bus: SharedEventBus,
        authorization: Arc<dyn TicketAuthorization>,
        users: Arc<dyn UserCapability>,
        config: WorkflowConfig,
    ) -> Self {
        let context = Arc::new(WorkflowContext {
            store,
            bus,
            authorization,
            users,
            config,
        });

        let escalations = EscalationService::new(context.clone());
        Self {
            levels: LevelRegistry::new(context.clone()),
            tickets: TicketService::new(context.clone()),
            assignments: AssignmentService::new(context.clone()),
            risk: RiskService::new(context.clone(), escalations.clone()),
            evaluations: EvaluationService::new(context.clone()),
            sla_monitor: SlaMonitor::new(context.clone(), escalations.clone()),
            escalations,
            context,
        }
    }

    pub fn levels(&self) -> &LevelRegistry {
        &self.levels
    }

    pub fn tickets(&self) -> &TicketService {
        &self.tickets
    }

    pub fn assignments(&self) -> &AssignmentService {
        &self.assignments
    }

    pub fn escalations(&self) -> &EscalationService {
        &self.escalations
    }

    pub fn risk(&self) -> &RiskService {
        &self.risk
    }

    pub fn evaluations(&self) -> &EvaluationService {
        &self.evaluations
    }

    pub fn sla_monitor(&self) -> &SlaMonitor {
        &self.sla_monitor
    }

    pub fn store(&self) -> &SharedStateStore {
        &self.context.store
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.context.bus
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.context.config
    }

    pub fn authorization(&self) -> &Arc<dyn TicketAuthorization> {
        &self.context.authorization
    }

    pub fn users(&self) -> &Arc<dyn UserCapability> {
        &self.context.users
    }
}

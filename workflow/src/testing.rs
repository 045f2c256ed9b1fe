//! Shared fixtures for unit tests

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::capability::{OpenAuthorization, TicketAuthorization, UserDirectory, UserProfile};
use crate::config::WorkflowConfig;
use crate::engine::WorkflowEngine;
use crate::events::WorkflowEvent;
use crate::state::{DepartmentId, Level, Priority, Ticket, UserRef};
use crate::tickets::NewTicket;

pub(crate) struct Fixture {
    pub engine: WorkflowEngine,
    pub directory: Arc<UserDirectory>,
}

/// Seeded standard levels, one agent per rank (`agent-l1`..`agent-l4`) and
/// a `customer` with no level
pub(crate) fn fixture_with(
    config: WorkflowConfig,
    authorization: Arc<dyn TicketAuthorization>,
) -> Fixture {
    let directory = Arc::new(UserDirectory::new());
    let engine = WorkflowEngine::new(config, authorization, directory.clone());
    let levels = engine.levels().seed_defaults().unwrap();

    for level in levels {
        let id = format!("agent-l{}", level.rank);
        directory.add_agent(profile(&id), level.id, BTreeSet::from([DepartmentId(1)]));
    }
    directory.add_user(profile("customer"));

    Fixture { engine, directory }
}

pub(crate) fn fixture() -> Fixture {
    fixture_with(WorkflowConfig::default(), Arc::new(OpenAuthorization))
}

pub(crate) fn profile(id: &str) -> UserProfile {
    UserProfile {
        id: UserRef::from(id),
        display_name: id.to_string(),
        email: None,
    }
}

pub(crate) fn customer() -> UserRef {
    UserRef::from("customer")
}

pub(crate) fn agent(rank: u32) -> UserRef {
    UserRef::new(format!("agent-l{rank}"))
}

impl Fixture {
    pub fn level(&self, rank: u32) -> Level {
        self.engine.levels().find_by_rank(rank).unwrap().unwrap()
    }

    pub fn create_ticket(&self) -> Ticket {
        self.engine
            .tickets()
            .create(
                NewTicket {
                    subject: "Email not syncing".to_string(),
                    description: "Outlook stopped syncing this morning".to_string(),
                    priority: Priority::Medium,
                    department_id: DepartmentId(1),
                },
                &customer(),
            )
            .unwrap()
    }

    pub fn ticket(&self, ticket: &Ticket) -> Ticket {
        self.engine.tickets().get(ticket.id).unwrap()
    }
}

/// Event types received so far, in publish order
pub(crate) fn drain(receiver: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<&'static str> {
    let mut types = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        types.push(event.event_type());
    }
    types
}

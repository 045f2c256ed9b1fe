//! Persistence integration tests - file-backed store behavior seen through
//! the engine.
//!
//! Tests verify:
//! - Committed state survives reopening the snapshot file
//! - A failed commit leaves neither state changes nor events behind
//! - Concurrent assignment of one agent yields one active assignment
//! - Capacity limits hold under concurrent assignment

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use tierdesk_workflow::capability::{OpenAuthorization, UserDirectory, UserProfile};
use tierdesk_workflow::events::EventBus;
use tierdesk_workflow::state::DepartmentId;
use tierdesk_workflow::tickets::NewTicket;
use tierdesk_workflow::{
    Priority, StateStore, Ticket, TicketStatus, UserRef, WorkflowConfig, WorkflowEngine,
};

fn engine_at(path: &Path, config: WorkflowConfig) -> WorkflowEngine {
    let directory = Arc::new(UserDirectory::new());
    let engine = WorkflowEngine::from_parts(
        StateStore::open(path).unwrap().shared(),
        EventBus::new().shared(),
        Arc::new(OpenAuthorization),
        directory.clone(),
        config,
    );
    for level in engine.levels().seed_defaults().unwrap() {
        let id = format!("agent{}", level.rank);
        directory.add_agent(
            UserProfile {
                id: UserRef::new(id.clone()),
                display_name: id,
                email: None,
            },
            level.id,
            BTreeSet::from([DepartmentId(1)]),
        );
    }
    engine
}

fn open_ticket(engine: &WorkflowEngine, subject: &str) -> Ticket {
    engine
        .tickets()
        .create(
            NewTicket {
                subject: subject.to_string(),
                description: "Reported by phone".to_string(),
                priority: Priority::Low,
                department_id: DepartmentId(1),
            },
            &UserRef::from("caller"),
        )
        .unwrap()
}

#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let ticket = {
        let engine = engine_at(&path, WorkflowConfig::default());
        let ticket = open_ticket(&engine, "Printer jams");
        engine
            .assignments()
            .assign_agent(ticket.id, &UserRef::from("agent1"), None)
            .unwrap();
        ticket
    };

    let reopened = engine_at(&path, WorkflowConfig::default());
    assert_eq!(reopened.levels().all().unwrap().len(), 4);
    let t = reopened.tickets().get(ticket.id).unwrap();
    assert_eq!(t.subject, "Printer jams");
    assert_eq!(t.status, TicketStatus::Assigned);
    assert_eq!(
        reopened
            .assignments()
            .active_assignments(ticket.id)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_failed_commit_leaves_no_partial_state() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    fs::create_dir(&data_dir).unwrap();
    let engine = engine_at(&data_dir.join("state.json"), WorkflowConfig::default());
    let ticket = open_ticket(&engine, "Laptop will not boot");
    let mut events = engine.event_bus().subscribe();

    fs::remove_dir_all(&data_dir).unwrap();

    let err = engine
        .assignments()
        .assign_agent(ticket.id, &UserRef::from("agent1"), None)
        .unwrap_err();
    assert_eq!(err.code(), "persistence_failure");

    let t = engine.tickets().get(ticket.id).unwrap();
    assert_eq!(t.status, TicketStatus::New);
    assert!(engine.assignments().assignments(ticket.id).unwrap().is_empty());
    assert!(events.try_recv().is_err());
}

#[test]
fn test_refresh_sees_other_writers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let watcher = engine_at(&path, WorkflowConfig::default());
    let writer = engine_at(&path, WorkflowConfig::default());

    let ticket = open_ticket(&writer, "Badge reader offline");
    assert!(watcher.tickets().get(ticket.id).is_err());

    watcher.store().refresh().unwrap();
    assert_eq!(watcher.tickets().get(ticket.id).unwrap().subject, "Badge reader offline");
}

#[test]
fn test_concurrent_assignment_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir.path().join("state.json"), WorkflowConfig::default());
    let ticket = open_ticket(&engine, "Shared drive missing");
    let agent = UserRef::from("agent2");

    let ids: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    engine
                        .assignments()
                        .assign_agent(ticket.id, &agent, None)
                        .unwrap()
                        .id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(engine.assignments().assignments(ticket.id).unwrap().len(), 1);
}

#[test]
fn test_capacity_holds_under_concurrency() {
    let mut config = WorkflowConfig::default();
    config.assignment.max_concurrent_tickets = Some(2);
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir.path().join("state.json"), config);
    let tickets: Vec<Ticket> = (0..6)
        .map(|i| open_ticket(&engine, &format!("Request {i}")))
        .collect();
    let agent = UserRef::from("agent3");

    let successes = thread::scope(|scope| {
        let handles: Vec<_> = tickets
            .iter()
            .map(|ticket| {
                let engine = &engine;
                let agent = &agent;
                scope.spawn(move || engine.assignments().assign_agent(ticket.id, agent, None))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|result| result.is_ok())
            .count()
    });

    assert_eq!(successes, 2);
    assert_eq!(engine.assignments().active_load(&agent).unwrap(), 2);
}

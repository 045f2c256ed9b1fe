//! Notification integration tests - events published after commit reach a
//! notifier through the dispatcher.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tierdesk_workflow::capability::{
    Notifier, NotifyError, OpenAuthorization, UserDirectory, UserProfile,
};
use tierdesk_workflow::config::NotificationConfig;
use tierdesk_workflow::events::NotificationDispatcher;
use tierdesk_workflow::state::{DepartmentId, EscalationRequest, TicketEvaluation};
use tierdesk_workflow::tickets::NewTicket;
use tierdesk_workflow::{Priority, Ticket, UserRef, WorkflowConfig, WorkflowEngine};
use tokio_util::sync::CancellationToken;

/// Records `(notification, channels)` pairs in delivery order
#[derive(Default)]
struct RecordingNotifier {
    delivered: Mutex<Vec<(&'static str, Vec<String>)>>,
}

impl RecordingNotifier {
    fn record(&self, kind: &'static str, channels: &[String]) -> Result<(), NotifyError> {
        self.delivered
            .lock()
            .unwrap()
            .push((kind, channels.to_vec()));
        Ok(())
    }

    fn kinds(&self) -> Vec<&'static str> {
        self.delivered.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn ticket_created(&self, _: &Ticket, channels: &[String]) -> Result<(), NotifyError> {
        self.record("ticket_created", channels)
    }

    async fn ticket_assigned(
        &self,
        _: &Ticket,
        _: &UserRef,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        self.record("ticket_assigned", channels)
    }

    async fn ticket_closed(&self, _: &Ticket, channels: &[String]) -> Result<(), NotifyError> {
        self.record("ticket_closed", channels)
    }

    async fn escalation_requested(
        &self,
        _: &EscalationRequest,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        self.record("escalation_requested", channels)
    }

    async fn escalation_approved(
        &self,
        _: &EscalationRequest,
        _: &Ticket,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        self.record("escalation_approved", channels)
    }

    async fn escalation_rejected(
        &self,
        _: &EscalationRequest,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        self.record("escalation_rejected", channels)
    }

    async fn evaluation_received(
        &self,
        _: &Ticket,
        _: &TicketEvaluation,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        self.record("evaluation_received", channels)
    }

    async fn sla_breached(
        &self,
        _: &Ticket,
        _: i64,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        self.record("sla_breached", channels)
    }
}

fn engine() -> WorkflowEngine {
    let directory = Arc::new(UserDirectory::new());
    let engine = WorkflowEngine::new(
        WorkflowConfig::default(),
        Arc::new(OpenAuthorization),
        directory.clone(),
    );
    for level in engine.levels().seed_defaults().unwrap() {
        let id = format!("support{}", level.rank);
        directory.add_agent(
            UserProfile {
                id: UserRef::new(id.clone()),
                display_name: id,
                email: None,
            },
            level.id,
            BTreeSet::from([DepartmentId(2)]),
        );
    }
    engine
}

async fn settle(notifier: &RecordingNotifier, expected: usize) {
    for _ in 0..100 {
        if notifier.delivered.lock().unwrap().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_dispatcher_delivers_committed_events() {
    let engine = engine();
    let notifier = Arc::new(RecordingNotifier::default());
    let shutdown = CancellationToken::new();
    let handle = NotificationDispatcher::new(notifier.clone(), NotificationConfig::default())
        .spawn(engine.event_bus(), shutdown.clone());

    let customer = UserRef::from("customer");
    let ticket = engine
        .tickets()
        .create(
            NewTicket {
                subject: "Cannot log in".to_string(),
                description: "Password reset mail never arrives".to_string(),
                priority: Priority::Critical,
                department_id: DepartmentId(2),
            },
            &customer,
        )
        .unwrap();
    engine
        .assignments()
        .assign_agent(ticket.id, &UserRef::from("support1"), None)
        .unwrap();
    // rejected: no notification, no event
    assert!(engine
        .tickets()
        .update_status(ticket.id, tierdesk_workflow::TicketStatus::New, &customer)
        .is_err());
    engine.tickets().close(ticket.id, &customer).unwrap();
    engine
        .evaluations()
        .evaluate_ticket(ticket.id, &customer, 5.0, None)
        .unwrap();

    settle(&notifier, 4).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(
        notifier.kinds(),
        vec![
            "ticket_created",
            "ticket_assigned",
            "ticket_closed",
            "evaluation_received"
        ]
    );
    let delivered = notifier.delivered.lock().unwrap();
    assert_eq!(delivered[1].1, vec!["mail".to_string(), "database".to_string()]);
    assert_eq!(delivered[0].1, vec!["database".to_string()]);
}

#[tokio::test]
async fn test_disabled_notifications_deliver_nothing() {
    let engine = engine();
    let notifier = Arc::new(RecordingNotifier::default());
    let config = NotificationConfig {
        enabled: false,
        ..NotificationConfig::default()
    };
    let dispatcher = NotificationDispatcher::new(notifier.clone(), config);

    let mut receiver = engine.event_bus().subscribe();
    engine
        .tickets()
        .create(
            NewTicket {
                subject: "Monitor flickers".to_string(),
                description: "Only on the docking station".to_string(),
                priority: Priority::Low,
                department_id: DepartmentId(2),
            },
            &UserRef::from("customer"),
        )
        .unwrap();

    let event = receiver.recv().await.unwrap();
    assert!(!dispatcher.dispatch(&event).await);
    assert!(notifier.kinds().is_empty());
}

//! Notification dispatcher
//!
//! Subscribes to the event bus and forwards notifiable events to a
//! [`Notifier`]. Delivery failures are logged and dropped; they never reach
//! the operation that produced the event.

use std::sync::Arc;

use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bus::EventBus;
use super::types::WorkflowEvent;
use crate::capability::{Notifier, NotifyError};
use crate::config::NotificationConfig;

/// Routes committed events to the notifier according to the channel map
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    config: NotificationConfig,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, config: NotificationConfig) -> Self {
        Self { notifier, config }
    }

    /// Channels an event would be delivered on; `None` when it is not
    /// delivered at all
    pub fn channels_for(&self, event: &WorkflowEvent) -> Option<&[String]> {
        if !self.config.enabled {
            return None;
        }
        let channels = self.config.channels_for(event.notification_key()?);
        (!channels.is_empty()).then_some(channels)
    }

    /// Deliver one event. Returns `true` if the notifier accepted it.
    pub async fn dispatch(&self, event: &WorkflowEvent) -> bool {
        let Some(channels) = self.channels_for(event) else {
            debug!(event_type = event.event_type(), "No notification configured");
            return false;
        };

        match self.deliver(event, channels).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    event_type = event.event_type(),
                    ticket_id = %event.ticket_id(),
                    "Notification failed: {}",
                    e
                );
                false
            }
        }
    }

    async fn deliver(&self, event: &WorkflowEvent, channels: &[String]) -> Result<(), NotifyError> {
        let n = &self.notifier;
        match event {
            WorkflowEvent::TicketCreated { ticket, .. } => n.ticket_created(ticket, channels).await,
            WorkflowEvent::TicketAssigned {
                ticket, assignment, ..
            } => n.ticket_assigned(ticket, &assignment.agent, channels).await,
            WorkflowEvent::TicketClosed { ticket, .. } => n.ticket_closed(ticket, channels).await,
            WorkflowEvent::EscalationRequested { request, .. } => {
                n.escalation_requested(request, channels).await
            }
            WorkflowEvent::EscalationApproved {
                request, ticket, ..
            } => n.escalation_approved(request, ticket, channels).await,
            WorkflowEvent::EscalationRejected { request, .. } => {
                n.escalation_rejected(request, channels).await
            }
            WorkflowEvent::TicketEvaluated {
                ticket, evaluation, ..
            } => n.evaluation_received(ticket, evaluation, channels).await,
            WorkflowEvent::SlaBreached {
                ticket,
                overdue_minutes,
                ..
            } => n.sla_breached(ticket, *overdue_minutes, channels).await,
            _ => Ok(()),
        }
    }

    /// Consume events until the bus closes or `shutdown` fires
    pub async fn run(self, mut receiver: broadcast::Receiver<WorkflowEvent>, shutdown: CancellationToken) {
        info!("Notification dispatcher started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(event) => {
                        self.dispatch(&event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notification dispatcher lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!("Notification dispatcher stopped");
    }

    /// Deliver every event already queued on `receiver` and return how many
    /// the notifier accepted. Used by short-lived callers that cannot keep a
    /// background task alive.
    pub async fn drain(&self, receiver: &mut broadcast::Receiver<WorkflowEvent>) -> usize {
        let mut delivered = 0;
        loop {
            match receiver.try_recv() {
                Ok(event) => {
                    if self.dispatch(&event).await {
                        delivered += 1;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification drain lagged, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        delivered
    }

    /// Subscribe to `bus` and run on a background task
    pub fn spawn(self, bus: &EventBus, shutdown: CancellationToken) -> JoinHandle<()> {
        let receiver = bus.subscribe();
        tokio::spawn(self.run(receiver, shutdown))
    }
}

//! SLA monitor - periodic deadline sweep
//!
//! ```text
//! every period:
//!   refresh store ──► scan open tickets with a deadline
//!                        │
//!          ┌─────────────┴──────────────┐
//!          ▼                            ▼
//!   deadline passed              deadline within warning window
//!   SlaBreached (once)           SlaWarning (once)
//!   auto-escalate by timeout
//! ```
//!
//! Breach and warning notices are remembered per (ticket, deadline), so a
//! ticket is reported again only after its deadline moves.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::SharedContext;
use crate::error::WorkflowResult;
use crate::escalation::EscalationService;
use crate::events::WorkflowEvent;
use crate::state::{Ticket, TicketId};

type NoticeKey = (TicketId, DateTime<Utc>);

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Open tickets with a deadline
    pub scanned: usize,
    pub overdue: usize,
    /// Escalation requests opened by this sweep
    pub escalations: usize,
    pub breaches_notified: usize,
    pub warnings: usize,
    pub failures: Vec<SweepFailure>,
}

/// A ticket the sweep could not escalate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub ticket_id: TicketId,
    pub error: String,
}

#[derive(Default)]
struct NoticeLog {
    breaches: HashSet<NoticeKey>,
    warnings: HashSet<NoticeKey>,
}

#[derive(Clone)]
pub struct SlaMonitor {
    ctx: SharedContext,
    escalations: EscalationService,
    notices: Arc<Mutex<NoticeLog>>,
}

impl SlaMonitor {
    pub(crate) fn new(ctx: SharedContext, escalations: EscalationService) -> Self {
        Self {
            ctx,
            escalations,
            notices: Arc::new(Mutex::new(NoticeLog::default())),
        }
    }

    /// Sweep interval configured for this deployment
    pub fn period(&self) -> Duration {
        self.ctx.config.levels.sla_check_frequency.period()
    }

    pub fn sweep(&self) -> WorkflowResult<SweepReport> {
        self.sweep_at(Utc::now())
    }

    /// Check every open ticket against `now`.
    ///
    /// A failed escalation is recorded in the report and does not stop the
    /// sweep.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> WorkflowResult<SweepReport> {
        let config = &self.ctx.config.sla;
        let mut report = SweepReport::default();
        if !config.enabled {
            debug!("SLA monitoring disabled");
            return Ok(report);
        }

        let tickets: Vec<(Ticket, DateTime<Utc>)> = self.ctx.read(|t| {
            t.tickets
                .values()
                .filter(|ticket| ticket.is_open() && !ticket.is_deleted())
                .filter_map(|ticket| ticket.estimated_deadline.map(|d| (ticket.clone(), d)))
                .collect()
        })?;
        report.scanned = tickets.len();

        let warning_window = chrono::Duration::hours(i64::from(config.warning_threshold_hours));
        let mut breached = Vec::new();
        let mut warned = Vec::new();

        for (ticket, deadline) in &tickets {
            let key = (ticket.id, *deadline);
            if *deadline < now {
                report.overdue += 1;
                breached.push(key);
                if config.breach_notifications && self.first_notice(key, true) {
                    let overdue_minutes = (now - *deadline).num_minutes();
                    warn!(ticket_id = %ticket.id, overdue_minutes, "SLA breached");
                    self.ctx.bus.publish(WorkflowEvent::SlaBreached {
                        ticket: ticket.clone(),
                        overdue_minutes,
                        timestamp: now,
                    });
                    report.breaches_notified += 1;
                }
                if config.auto_escalate_on_breach {
                    match self.escalations.auto_escalate_by_timeout_at(ticket.id, now) {
                        Ok(Some(request)) => {
                            info!(
                                ticket_id = %ticket.id,
                                request_id = %request.id,
                                "Escalation requested for overdue ticket"
                            );
                            report.escalations += 1;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(ticket_id = %ticket.id, error = %e, "Automatic escalation failed");
                            report.failures.push(SweepFailure {
                                ticket_id: ticket.id,
                                error: e.to_string(),
                            });
                        }
                    }
                }
            } else if config.warning_threshold_hours > 0 && *deadline - now <= warning_window {
                warned.push(key);
                if self.first_notice(key, false) {
                    let remaining_minutes = (*deadline - now).num_minutes();
                    debug!(ticket_id = %ticket.id, remaining_minutes, "SLA deadline approaching");
                    self.ctx.bus.publish(WorkflowEvent::SlaWarning {
                        ticket: ticket.clone(),
                        remaining_minutes,
                        timestamp: now,
                    });
                    report.warnings += 1;
                }
            }
        }

        self.prune(&breached, &warned);
        if report.overdue > 0 || !report.failures.is_empty() {
            info!(
                scanned = report.scanned,
                overdue = report.overdue,
                escalations = report.escalations,
                failures = report.failures.len(),
                "SLA sweep complete"
            );
        }
        Ok(report)
    }

    /// Sweep every `period` until `shutdown` fires.
    ///
    /// The store is reloaded before each sweep so commits from other
    /// processes sharing the snapshot file are seen.
    pub async fn run(&self, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_secs = period.as_secs(), "SLA monitor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("SLA monitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.ctx.store.refresh() {
                        warn!(error = %e, "Failed to reload state before sweep");
                    }
                    if let Err(e) = self.sweep() {
                        warn!(error = %e, "SLA sweep failed");
                    }
                }
            }
        }
    }

    fn first_notice(&self, key: NoticeKey, breach: bool) -> bool {
        let mut notices = self.notices.lock().unwrap_or_else(|e| e.into_inner());
        if breach {
            notices.breaches.insert(key)
        } else {
            notices.warnings.insert(key)
        }
    }

    /// Forget notices for tickets that closed or moved their deadline
    fn prune(&self, breached: &[NoticeKey], warned: &[NoticeKey]) {
        let mut notices = self.notices.lock().unwrap_or_else(|e| e.into_inner());
        notices.breaches.retain(|key| breached.contains(key));
        notices.warnings.retain(|key| warned.contains(key));
    }
}

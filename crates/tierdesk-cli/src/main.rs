//! Operator console for the tierdesk ticket workflow
//!
//! Every invocation opens the JSON state snapshot, runs one operation as the
//! acting user, and prints the result as JSON on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Seed the standard tiers
//! tierdesk --config desk.toml init
//!
//! # Open a ticket and hand it to a tier-one agent
//! tierdesk --as customer-17 create --subject "VPN drops" --description "Every hour"
//! tierdesk --as customer-17 assign <ticket-id> dana
//!
//! # Run the SLA monitor and notification dispatcher until Ctrl-C
//! RUST_LOG=tierdesk_workflow=debug tierdesk watch
//! ```

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tierdesk_workflow::capability::{LogNotifier, Notifier, UserCapability, UserDirectory};
use tierdesk_workflow::events::NotificationDispatcher;
use tierdesk_workflow::state::{DepartmentId, EscalationId};
use tierdesk_workflow::tickets::{NewTicket, TicketFilter};
use tierdesk_workflow::{
    EventBus, Priority, RiskLevel, StateStore, TicketId, TicketStatus, UserRef, WorkflowEngine,
    WorkflowError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CliConfig;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with `[workflow]` settings, `authorization` and `[[agents]]`
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON state snapshot shared by every invocation
    #[arg(long, global = true, default_value = ".tierdesk-state.json")]
    state: PathBuf,

    /// Acting user
    #[arg(long = "as", global = true, env = "TIERDESK_USER", default_value = "operator")]
    acting_user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed or refresh the standard support tiers
    Init,
    /// List support tiers by rank
    Levels,
    /// Open a ticket at the first tier
    Create {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        #[arg(long, default_value_t = 1)]
        department: u32,
    },
    /// Show a ticket with its assignments, escalations, risk and evaluations
    Show { ticket: TicketId },
    /// List tickets
    List {
        #[arg(long)]
        status: Option<TicketStatus>,
        #[arg(long, conflicts_with = "closed")]
        open: bool,
        #[arg(long)]
        closed: bool,
        #[arg(long)]
        rank: Option<u32>,
        #[arg(long)]
        department: Option<u32>,
        #[arg(long)]
        assigned_to: Option<String>,
        /// Only tickets past their deadline now
        #[arg(long)]
        overdue: bool,
        /// Include soft-deleted tickets
        #[arg(long)]
        all: bool,
    },
    /// Assign an agent
    Assign { ticket: TicketId, agent: String },
    /// Complete an agent's active assignment
    Unassign { ticket: TicketId, agent: String },
    /// Assign with the configured strategy
    AutoAssign { ticket: TicketId },
    /// Move a ticket along the status machine
    Status { ticket: TicketId, status: TicketStatus },
    /// Request escalation to a higher tier
    Escalate {
        ticket: TicketId,
        #[arg(long)]
        to_rank: u32,
        #[arg(long)]
        justification: String,
    },
    /// Approve a pending escalation request
    Approve { request: EscalationId },
    /// Reject a pending escalation request
    Reject {
        request: EscalationId,
        #[arg(long)]
        reason: String,
    },
    /// Record a risk assessment
    Assess {
        ticket: TicketId,
        level: RiskLevel,
        #[arg(long)]
        justification: String,
    },
    Resolve { ticket: TicketId },
    Close { ticket: TicketId },
    Cancel {
        ticket: TicketId,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Score a ticket
    Evaluate {
        ticket: TicketId,
        score: f64,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Score an agent who worked a ticket
    Rate {
        ticket: TicketId,
        agent: String,
        score: f64,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Risk and evaluation statistics
    Stats {
        #[arg(long)]
        agent: Option<String>,
    },
    /// Run one SLA sweep now
    Sweep,
    /// Run the SLA monitor and notification dispatcher until Ctrl-C
    Watch {
        /// Sweep period in seconds; defaults to the configured frequency
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<WorkflowError>() {
                Some(workflow) => eprintln!("error[{}]: {e:#}", workflow.code()),
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    run_with(args, |users| Arc::new(LogNotifier::with_users(users))).await
}

/// Run one invocation. Events committed by a one-shot command are handed to
/// the notifier before returning, whether or not the command succeeded.
async fn run_with(
    args: Args,
    notifier: impl FnOnce(Arc<dyn UserCapability>) -> Arc<dyn Notifier>,
) -> Result<()> {
    let config = CliConfig::load(args.config.as_deref())?;
    let store = StateStore::open(&args.state)
        .with_context(|| format!("opening state {}", args.state.display()))?
        .shared();
    let directory = Arc::new(UserDirectory::new());
    let engine = WorkflowEngine::from_parts(
        store,
        EventBus::new().shared(),
        config.authorization.build(),
        directory.clone(),
        config.workflow.clone(),
    );
    config.populate(&directory, &engine.levels().all()?);
    let dispatcher = NotificationDispatcher::new(
        notifier(engine.users().clone()),
        config.workflow.notifications.clone(),
    );
    let user = UserRef::new(args.acting_user);

    let command = match args.command {
        Command::Watch { interval } => return watch(&engine, dispatcher, interval).await,
        command => command,
    };
    let mut committed = engine.event_bus().subscribe();
    let outcome = execute(&engine, &config, &directory, &user, command);
    let delivered = dispatcher.drain(&mut committed).await;
    debug!(delivered, "Notifications delivered");
    outcome
}

fn execute(
    engine: &WorkflowEngine,
    config: &CliConfig,
    directory: &UserDirectory,
    user: &UserRef,
    command: Command,
) -> Result<()> {
    match command {
        Command::Init => {
            let levels = engine.levels().seed_defaults()?;
            config.populate(directory, &levels);
            info!(levels = levels.len(), agents = directory.len(), "Support tiers ready");
            print_json(&levels)
        }
        Command::Levels => print_json(&engine.levels().all()?),
        Command::Create {
            subject,
            description,
            priority,
            department,
        } => {
            let ticket = engine.tickets().create(
                NewTicket {
                    subject,
                    description,
                    priority,
                    department_id: DepartmentId(department),
                },
                user,
            )?;
            print_json(&ticket)
        }
        Command::Show { ticket } => {
            let t = engine.tickets().view(ticket, user)?;
            print_json(&json!({
                "ticket": t,
                "assignments": engine.assignments().assignments(ticket)?,
                "escalations": engine.escalations().requests_for(ticket)?,
                "risk_history": engine.risk().ticket_risk_history(ticket)?,
                "evaluations": engine.evaluations().evaluations(ticket)?,
                "agent_ratings": engine.evaluations().ratings(ticket)?,
            }))
        }
        Command::List {
            status,
            open,
            closed,
            rank,
            department,
            assigned_to,
            overdue,
            all,
        } => {
            let mut filter = TicketFilter::new();
            if let Some(status) = status {
                filter = filter.status(status);
            }
            if open {
                filter = filter.open_only();
            }
            if closed {
                filter = filter.closed_only();
            }
            if let Some(rank) = rank {
                filter = filter.level_rank(rank);
            }
            if let Some(department) = department {
                filter = filter.department(DepartmentId(department));
            }
            if let Some(agent) = assigned_to {
                filter = filter.assigned_to(UserRef::new(agent));
            }
            if overdue {
                filter = filter.overdue_at(chrono::Utc::now());
            }
            if all {
                filter = filter.include_deleted();
            }
            print_json(&engine.tickets().list(&filter)?)
        }
        Command::Assign { ticket, agent } => print_json(&engine.assignments().assign_agent(
            ticket,
            &UserRef::new(agent),
            Some(user),
        )?),
        Command::Unassign { ticket, agent } => {
            print_json(&engine.assignments().unassign_agent(ticket, &UserRef::new(agent))?)
        }
        Command::AutoAssign { ticket } => {
            let assignment = engine.assignments().auto_assign_by_workload(ticket)?;
            if assignment.is_none() {
                info!(ticket_id = %ticket, "No agent selected");
            }
            print_json(&assignment)
        }
        Command::Status { ticket, status } => {
            print_json(&engine.tickets().update_status(ticket, status, user)?)
        }
        Command::Escalate {
            ticket,
            to_rank,
            justification,
        } => {
            let target = engine
                .levels()
                .find_by_rank(to_rank)?
                .with_context(|| format!("no tier with rank {to_rank}"))?;
            print_json(&engine.escalations().request_escalation(
                ticket,
                target.id,
                &justification,
                Some(user),
                false,
            )?)
        }
        Command::Approve { request } => {
            print_json(&engine.escalations().approve_escalation(request, user)?)
        }
        Command::Reject { request, reason } => {
            print_json(&engine.escalations().reject_escalation(request, user, &reason)?)
        }
        Command::Assess {
            ticket,
            level,
            justification,
        } => print_json(&engine.risk().assess_risk(ticket, user, level, &justification)?),
        Command::Resolve { ticket } => print_json(&engine.tickets().resolve(ticket, user)?),
        Command::Close { ticket } => print_json(&engine.tickets().close(ticket, user)?),
        Command::Cancel { ticket, reason } => {
            print_json(&engine.tickets().cancel(ticket, user, reason.as_deref())?)
        }
        Command::Evaluate {
            ticket,
            score,
            comment,
        } => print_json(&engine.evaluations().evaluate_ticket(
            ticket,
            user,
            score,
            comment.as_deref(),
        )?),
        Command::Rate {
            ticket,
            agent,
            score,
            comment,
        } => print_json(&engine.evaluations().rate_agent(
            ticket,
            &UserRef::new(agent),
            user,
            score,
            comment.as_deref(),
        )?),
        Command::Stats { agent } => print_json(&statistics(engine, user, agent)?),
        Command::Sweep => print_json(&engine.sla_monitor().sweep()?),
        Command::Watch { .. } => {
            bail!("watch runs until interrupted, not as a one-shot command")
        }
    }
}

/// Risk and evaluation statistics, optionally with one agent's ratings
fn statistics(
    engine: &WorkflowEngine,
    user: &UserRef,
    agent: Option<String>,
) -> Result<serde_json::Value> {
    if !engine.authorization().can_view_statistics(user) {
        return Err(WorkflowError::AuthorizationDenied {
            user: user.clone(),
            action: "view statistics",
        }
        .into());
    }
    let agent_stats = match agent {
        Some(agent) => Some(engine.evaluations().agent_statistics(&UserRef::new(agent))?),
        None => None,
    };
    Ok(json!({
        "risk": engine.risk().risk_statistics()?,
        "evaluations": engine.evaluations().ticket_statistics()?,
        "agent": agent_stats,
    }))
}

async fn watch(
    engine: &WorkflowEngine,
    dispatcher: NotificationDispatcher,
    interval: Option<u64>,
) -> Result<()> {
    let shutdown = CancellationToken::new();
    let dispatcher = dispatcher.spawn(engine.event_bus(), shutdown.clone());

    let monitor = engine.sla_monitor().clone();
    let period = interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| monitor.period());
    let sweeper = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { monitor.run(period, shutdown).await }
    });

    info!(period_secs = period.as_secs(), "Watching; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    shutdown.cancel();

    let (dispatched, swept) = tokio::join!(dispatcher, sweeper);
    dispatched.context("notification dispatcher panicked")?;
    swept.context("SLA monitor panicked")?;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tierdesk_workflow::capability::{
        NotifyError, OpenAuthorization, TicketAccess, TicketAuthorization,
    };
    use tierdesk_workflow::state::{EscalationRequest, TicketEvaluation};
    use tierdesk_workflow::{Ticket, WorkflowConfig};

    #[derive(Default)]
    struct RecordingNotifier {
        delivered: Mutex<Vec<&'static str>>,
    }

    impl RecordingNotifier {
        fn record(&self, kind: &'static str) -> Result<(), NotifyError> {
            self.delivered.lock().unwrap().push(kind);
            Ok(())
        }

        fn kinds(&self) -> Vec<&'static str> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn ticket_created(&self, _: &Ticket, _: &[String]) -> Result<(), NotifyError> {
            self.record("ticket_created")
        }

        async fn ticket_assigned(
            &self,
            _: &Ticket,
            _: &UserRef,
            _: &[String],
        ) -> Result<(), NotifyError> {
            self.record("ticket_assigned")
        }

        async fn ticket_closed(&self, _: &Ticket, _: &[String]) -> Result<(), NotifyError> {
            self.record("ticket_closed")
        }

        async fn escalation_requested(
            &self,
            _: &EscalationRequest,
            _: &[String],
        ) -> Result<(), NotifyError> {
            self.record("escalation_requested")
        }

        async fn escalation_approved(
            &self,
            _: &EscalationRequest,
            _: &Ticket,
            _: &[String],
        ) -> Result<(), NotifyError> {
            self.record("escalation_approved")
        }

        async fn escalation_rejected(
            &self,
            _: &EscalationRequest,
            _: &[String],
        ) -> Result<(), NotifyError> {
            self.record("escalation_rejected")
        }

        async fn evaluation_received(
            &self,
            _: &Ticket,
            _: &TicketEvaluation,
            _: &[String],
        ) -> Result<(), NotifyError> {
            self.record("evaluation_received")
        }

        async fn sla_breached(&self, _: &Ticket, _: i64, _: &[String]) -> Result<(), NotifyError> {
            self.record("sla_breached")
        }
    }

    /// Open rules except that nobody may view statistics
    struct NoStatistics;

    impl TicketAuthorization for NoStatistics {
        fn can_view_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
            OpenAuthorization.can_view_ticket(user, ticket)
        }

        fn can_create_ticket(&self, user: &UserRef) -> bool {
            OpenAuthorization.can_create_ticket(user)
        }

        fn can_update_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
            OpenAuthorization.can_update_ticket(user, ticket)
        }

        fn can_delete_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
            OpenAuthorization.can_delete_ticket(user, ticket)
        }

        fn can_close_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
            OpenAuthorization.can_close_ticket(user, ticket)
        }

        fn can_request_escalation(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
            OpenAuthorization.can_request_escalation(user, ticket)
        }

        fn can_approve_escalation(
            &self,
            user: &UserRef,
            request: &EscalationRequest,
            ticket: &TicketAccess<'_>,
        ) -> bool {
            OpenAuthorization.can_approve_escalation(user, request, ticket)
        }

        fn can_evaluate_ticket(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
            OpenAuthorization.can_evaluate_ticket(user, ticket)
        }

        fn can_rate_agent(
            &self,
            user: &UserRef,
            ticket: &TicketAccess<'_>,
            agent: &UserRef,
        ) -> bool {
            OpenAuthorization.can_rate_agent(user, ticket, agent)
        }

        fn can_assess_risk(&self, user: &UserRef, ticket: &TicketAccess<'_>) -> bool {
            OpenAuthorization.can_assess_risk(user, ticket)
        }

        fn can_view_statistics(&self, _: &UserRef) -> bool {
            false
        }
    }

    #[test]
    fn test_parse_escalate() {
        let args = Args::try_parse_from([
            "tierdesk",
            "--as",
            "dana",
            "escalate",
            "0190c1d2-7e4a-7b1c-9d3e-2f4a5b6c7d8e",
            "--to-rank",
            "2",
            "--justification",
            "Needs database access",
        ])
        .unwrap();
        assert_eq!(args.acting_user, "dana");
        assert!(matches!(args.command, Command::Escalate { to_rank: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_bad_status() {
        assert!(Args::try_parse_from([
            "tierdesk",
            "status",
            "0190c1d2-7e4a-7b1c-9d3e-2f4a5b6c7d8e",
            "sleeping",
        ])
        .is_err());
    }

    #[test]
    fn test_list_flags_conflict() {
        assert!(Args::try_parse_from(["tierdesk", "list", "--open", "--closed"]).is_err());
    }

    #[tokio::test]
    async fn test_create_and_show_roundtrip_through_state_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = dir.path().join("state.json");
        let state_arg = state.to_str().unwrap();

        run(Args::try_parse_from(["tierdesk", "--state", state_arg, "init"]).unwrap())
            .await
            .unwrap();
        run(Args::try_parse_from([
            "tierdesk",
            "--state",
            state_arg,
            "--as",
            "customer",
            "create",
            "--subject",
            "Printer offline",
            "--description",
            "Third floor, shows paper jam",
        ])
        .unwrap())
        .await
        .unwrap();

        let tables = StateStore::open(&state).unwrap().snapshot().unwrap();
        assert_eq!(tables.levels.len(), 4);
        assert_eq!(tables.tickets.len(), 1);
    }

    #[tokio::test]
    async fn test_one_shot_command_delivers_notifications() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = dir.path().join("state.json");
        let state_arg = state.to_str().unwrap();
        run(Args::try_parse_from(["tierdesk", "--state", state_arg, "init"]).unwrap())
            .await
            .unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let recorder = notifier.clone();
        run_with(
            Args::try_parse_from([
                "tierdesk",
                "--state",
                state_arg,
                "--as",
                "customer",
                "create",
                "--subject",
                "Scanner offline",
                "--description",
                "Mailroom scanner shows no network",
            ])
            .unwrap(),
            move |_| recorder,
        )
        .await
        .unwrap();

        assert_eq!(notifier.kinds(), vec!["ticket_created"]);
    }

    #[tokio::test]
    async fn test_failed_command_delivers_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = dir.path().join("state.json");
        let notifier = Arc::new(RecordingNotifier::default());
        let recorder = notifier.clone();

        let result = run_with(
            Args::try_parse_from([
                "tierdesk",
                "--state",
                state.to_str().unwrap(),
                "close",
                "0190c1d2-7e4a-7b1c-9d3e-2f4a5b6c7d8e",
            ])
            .unwrap(),
            move |_| recorder,
        )
        .await;

        assert!(result.is_err());
        assert!(notifier.kinds().is_empty());
    }

    #[test]
    fn test_statistics_denial_keeps_error_code() {
        let engine = WorkflowEngine::new(
            WorkflowConfig::default(),
            Arc::new(NoStatistics),
            Arc::new(UserDirectory::new()),
        );

        let err = statistics(&engine, &UserRef::from("customer"), None).unwrap_err();
        let workflow = err.downcast_ref::<WorkflowError>().unwrap();
        assert_eq!(workflow.code(), "authorization_denied");
    }
}

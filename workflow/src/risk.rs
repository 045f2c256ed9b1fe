//! Risk assessment engine
//!
//! Assessments are append-only; the ticket mirrors the latest one in
//! `assessed_risk`. A critical assessment escalates the ticket one tier and
//! approves that escalation in the same transaction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{SharedContext, UnitOfWork};
use crate::error::{require_min_chars, WorkflowError, WorkflowResult};
use crate::escalation::{EscalationService, CRITICAL_RISK_JUSTIFICATION};
use crate::events::WorkflowEvent;
use crate::state::{
    AssessmentId, EscalationRequest, RiskAssessment, RiskLevel, Tables, Ticket, TicketId, UserRef,
};
use crate::tickets::ticket_mut;

/// Aggregate view over all assessments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskStatistics {
    pub total_assessments: usize,
    /// Assessment count per risk level (every level present)
    pub by_level: BTreeMap<RiskLevel, usize>,
    /// Open tickets currently assessed high or critical
    pub active_high_risk: usize,
    /// Open tickets currently assessed critical
    pub active_critical: usize,
}

/// Outcome of [`RiskService::assess_risk`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskOutcome {
    pub assessment: RiskAssessment,
    /// Approved automatic escalation, when the assessment triggered one
    pub escalation: Option<EscalationRequest>,
}

#[derive(Clone)]
pub struct RiskService {
    ctx: SharedContext,
    escalations: EscalationService,
}

impl RiskService {
    pub(crate) fn new(ctx: SharedContext, escalations: EscalationService) -> Self {
        Self { ctx, escalations }
    }

    /// Whether `user` works at a tier allowed to assess risk. Always false
    /// while risk assessment is disabled.
    pub fn can_user_assess_risk(&self, user: &UserRef) -> bool {
        self.ctx
            .read(|tables| self.qualifies(tables, user))
            .unwrap_or(false)
    }

    fn qualifies(&self, tables: &Tables, user: &UserRef) -> bool {
        let config = &self.ctx.config.risk_assessment;
        if !config.enabled {
            return false;
        }
        let Some(level) = self.ctx.user_level(tables, user) else {
            return false;
        };
        if config.required_ranks.is_empty() {
            level.can_assess_risk
        } else {
            config.required_ranks.contains(&level.rank)
        }
    }

    /// Record an assessment; on critical risk, escalate and approve in the
    /// same transaction when configured.
    pub fn assess_risk(
        &self,
        ticket_id: TicketId,
        assessor: &UserRef,
        risk_level: RiskLevel,
        justification: &str,
    ) -> WorkflowResult<RiskOutcome> {
        let config = &self.ctx.config.risk_assessment;
        if !config.enabled {
            return Err(WorkflowError::FeatureDisabled("risk assessment"));
        }

        self.ctx.transact(|uow| {
            let access = uow.access(ticket_id)?;
            if !self.ctx.authorization.can_assess_risk(assessor, &access) {
                return Err(WorkflowError::denied(assessor, "assess risk"));
            }
            if !self.qualifies(uow.tables, assessor) {
                let required = if config.required_ranks.is_empty() {
                    "a level that may assess risk".to_string()
                } else {
                    format!("level rank in {:?}", config.required_ranks)
                };
                return Err(WorkflowError::InsufficientLevel {
                    user: assessor.clone(),
                    required,
                });
            }
            require_min_chars("justification", justification)?;

            let now = uow.now;
            let assessment = RiskAssessment {
                id: AssessmentId::new(),
                ticket_id,
                assessor: assessor.clone(),
                risk_level,
                justification: justification.trim().to_string(),
                created_at: now,
            };
            uow.tables
                .risk_assessments
                .insert(assessment.id, assessment.clone());
            let ticket = ticket_mut(uow, ticket_id)?;
            ticket.assessed_risk = Some(risk_level);
            ticket.touch(now);

            info!(ticket_id = %ticket_id, assessor = %assessor, risk = %risk_level, "Risk assessed");
            uow.emit(WorkflowEvent::RiskAssessed {
                assessment: assessment.clone(),
                timestamp: now,
            });

            let escalation = if risk_level.should_auto_escalate() && config.auto_escalate_on_critical {
                self.escalate_on_critical(uow, ticket_id, assessor)?
            } else {
                None
            };

            Ok(RiskOutcome {
                assessment,
                escalation,
            })
        })
    }

    fn escalate_on_critical(
        &self,
        uow: &mut UnitOfWork<'_>,
        ticket_id: TicketId,
        assessor: &UserRef,
    ) -> WorkflowResult<Option<EscalationRequest>> {
        let target = {
            let ticket = uow
                .tables
                .ticket(ticket_id)
                .ok_or_else(|| WorkflowError::not_found("ticket", ticket_id))?;
            let level = uow
                .tables
                .level(ticket.current_level_id)
                .ok_or_else(|| WorkflowError::not_found("level", ticket.current_level_id))?;
            if !ticket.can_escalate(level) {
                debug!(ticket_id = %ticket_id, status = %ticket.status, "Critical risk but ticket cannot escalate");
                return Ok(None);
            }
            match uow.tables.next_higher_level(level.rank) {
                Some(next) => next.id,
                None => {
                    debug!(ticket_id = %ticket_id, rank = level.rank, "Critical risk at highest tier");
                    return Ok(None);
                }
            }
        };

        let request = self.escalations.open_request_in(
            uow,
            ticket_id,
            target,
            CRITICAL_RISK_JUSTIFICATION,
            Some(assessor),
            true,
        )?;
        let approved = self.escalations.approve_in(uow, request.id, None)?;
        info!(ticket_id = %ticket_id, request_id = %approved.id, "Critical risk escalated");
        Ok(Some(approved))
    }

    /// Open tickets assessed high or critical
    pub fn high_risk_tickets(&self) -> WorkflowResult<Vec<Ticket>> {
        self.open_tickets_where(|risk| risk.is_high())
    }

    /// Open tickets assessed critical
    pub fn critical_risk_tickets(&self) -> WorkflowResult<Vec<Ticket>> {
        self.open_tickets_where(|risk| risk == RiskLevel::Critical)
    }

    /// Assessments of one ticket, newest first
    pub fn ticket_risk_history(&self, ticket_id: TicketId) -> WorkflowResult<Vec<RiskAssessment>> {
        self.ctx.read(|t| {
            let mut history: Vec<RiskAssessment> = t
                .risk_assessments
                .values()
                .filter(|a| a.ticket_id == ticket_id)
                .cloned()
                .collect();
            history.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            history
        })
    }

    pub fn risk_statistics(&self) -> WorkflowResult<RiskStatistics> {
        self.ctx.read(|t| {
            let mut by_level: BTreeMap<RiskLevel, usize> =
                RiskLevel::ALL.into_iter().map(|level| (level, 0)).collect();
            for assessment in t.risk_assessments.values() {
                *by_level.entry(assessment.risk_level).or_default() += 1;
            }
            let live = || {
                t.tickets
                    .values()
                    .filter(|ticket| ticket.is_open() && !ticket.is_deleted())
            };
            RiskStatistics {
                total_assessments: t.risk_assessments.len(),
                by_level,
                active_high_risk: live()
                    .filter(|ticket| ticket.assessed_risk.is_some_and(|r| r.is_high()))
                    .count(),
                active_critical: live()
                    .filter(|ticket| ticket.assessed_risk == Some(RiskLevel::Critical))
                    .count(),
            }
        })
    }

    fn open_tickets_where(&self, pred: impl Fn(RiskLevel) -> bool) -> WorkflowResult<Vec<Ticket>> {
        self.ctx.read(|t| {
            t.tickets
                .values()
                .filter(|ticket| ticket.is_open() && !ticket.is_deleted())
                .filter(|ticket| ticket.assessed_risk.is_some_and(&pred))
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::OpenAuthorization;
    use crate::config::WorkflowConfig;
    use crate::state::TicketStatus;
    use crate::testing::{agent, drain, fixture, fixture_with, Fixture};
    use std::sync::Arc;

    const WHY: &str = "Production database exposed";

    /// Ticket escalated to rank 2 and assigned to the rank-2 agent
    fn ticket_at_level_two(fx: &Fixture) -> Ticket {
        let ticket = fx.create_ticket();
        let escalations = fx.engine.escalations();
        let req = escalations
            .request_escalation(ticket.id, fx.level(2).id, WHY, None, true)
            .unwrap();
        escalations.auto_approve_system_escalation(req.id).unwrap();
        fx.ticket(&ticket)
    }

    #[test]
    fn test_can_user_assess_risk() {
        let fx = fixture();
        let risk = fx.engine.risk();
        assert!(!risk.can_user_assess_risk(&agent(2)));
        assert!(risk.can_user_assess_risk(&agent(3)));
        assert!(risk.can_user_assess_risk(&agent(4)));
        assert!(!risk.can_user_assess_risk(&UserRef::from("customer")));
    }

    #[test]
    fn test_empty_required_ranks_defers_to_level_flag() {
        let mut config = WorkflowConfig::default();
        config.risk_assessment.required_ranks.clear();
        let fx = fixture_with(config, Arc::new(OpenAuthorization));
        assert!(!fx.engine.risk().can_user_assess_risk(&agent(1)));
        assert!(fx.engine.risk().can_user_assess_risk(&agent(3)));
    }

    #[test]
    fn test_nobody_assesses_risk_when_disabled() {
        let mut config = WorkflowConfig::default();
        config.risk_assessment.enabled = false;
        let fx = fixture_with(config, Arc::new(OpenAuthorization));
        let risk = fx.engine.risk();
        assert!(!risk.can_user_assess_risk(&agent(3)));
        assert!(!risk.can_user_assess_risk(&agent(4)));
    }

    #[test]
    fn test_deactivated_tier_loses_risk_rights() {
        let fx = fixture();
        assert!(fx.engine.risk().can_user_assess_risk(&agent(3)));

        fx.engine.levels().deactivate(3).unwrap();
        assert!(!fx.engine.risk().can_user_assess_risk(&agent(3)));
        assert!(fx.engine.risk().can_user_assess_risk(&agent(4)));
    }

    #[test]
    fn test_assessment_rules() {
        let fx = fixture();
        let ticket = fx.create_ticket();
        let risk = fx.engine.risk();

        let err = risk
            .assess_risk(ticket.id, &agent(1), RiskLevel::High, WHY)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InsufficientLevel { .. }));

        let err = risk
            .assess_risk(ticket.id, &agent(3), RiskLevel::High, "short")
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert!(risk.ticket_risk_history(ticket.id).unwrap().is_empty());
    }

    #[test]
    fn test_feature_disabled() {
        let mut config = WorkflowConfig::default();
        config.risk_assessment.enabled = false;
        let fx = fixture_with(config, Arc::new(OpenAuthorization));
        let ticket = fx.create_ticket();

        let err = fx
            .engine
            .risk()
            .assess_risk(ticket.id, &agent(3), RiskLevel::Low, WHY)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::FeatureDisabled(_)));
    }

    #[test]
    fn test_latest_assessment_mirrored_on_ticket() {
        let fx = fixture();
        let ticket = fx.create_ticket();
        let risk = fx.engine.risk();

        risk.assess_risk(ticket.id, &agent(3), RiskLevel::High, WHY)
            .unwrap();
        let outcome = risk
            .assess_risk(ticket.id, &agent(3), RiskLevel::Low, "Mitigation applied upstream")
            .unwrap();
        assert!(outcome.escalation.is_none());
        assert_eq!(fx.ticket(&ticket).assessed_risk, Some(RiskLevel::Low));

        let history = risk.ticket_risk_history(ticket.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].risk_level, RiskLevel::Low);
        assert!(risk.high_risk_tickets().unwrap().is_empty());
    }

    #[test]
    fn test_critical_risk_escalates_and_approves() {
        let fx = fixture();
        let ticket = ticket_at_level_two(&fx);
        let mut events = fx.engine.event_bus().subscribe();

        let outcome = fx
            .engine
            .risk()
            .assess_risk(ticket.id, &agent(3), RiskLevel::Critical, WHY)
            .unwrap();

        let escalation = outcome.escalation.unwrap();
        assert!(escalation.is_approved());
        assert!(escalation.is_automatic);
        assert_eq!(escalation.requester, Some(agent(3)));
        assert_eq!(escalation.approver, None);
        assert_eq!(escalation.justification, CRITICAL_RISK_JUSTIFICATION);

        let t = fx.ticket(&ticket);
        assert_eq!(t.current_level_id, fx.level(3).id);
        assert_eq!(t.status, TicketStatus::Escalated);
        assert_eq!(t.assessed_risk, Some(RiskLevel::Critical));
        assert_eq!(
            drain(&mut events),
            vec!["risk_assessed", "escalation_requested", "escalation_approved"]
        );

        let stats = fx.engine.risk().risk_statistics().unwrap();
        assert_eq!(stats.total_assessments, 1);
        assert_eq!(stats.by_level[&RiskLevel::Critical], 1);
        assert_eq!(stats.by_level[&RiskLevel::Low], 0);
        assert_eq!(stats.active_critical, 1);
        assert_eq!(stats.active_high_risk, 1);
        assert_eq!(fx.engine.risk().critical_risk_tickets().unwrap().len(), 1);
    }

    #[test]
    fn test_critical_risk_with_pending_request_still_records() {
        let fx = fixture();
        let ticket = fx.create_ticket();
        fx.engine
            .escalations()
            .request_escalation(ticket.id, fx.level(2).id, WHY, None, true)
            .unwrap();

        let outcome = fx
            .engine
            .risk()
            .assess_risk(ticket.id, &agent(3), RiskLevel::Critical, WHY)
            .unwrap();
        assert!(outcome.escalation.is_none());

        let t = fx.ticket(&ticket);
        assert_eq!(t.status, TicketStatus::EscalationRequested);
        assert_eq!(t.assessed_risk, Some(RiskLevel::Critical));
    }

    #[test]
    fn test_critical_risk_without_auto_escalation() {
        let mut config = WorkflowConfig::default();
        config.risk_assessment.auto_escalate_on_critical = false;
        let fx = fixture_with(config, Arc::new(OpenAuthorization));
        let ticket = fx.create_ticket();

        let outcome = fx
            .engine
            .risk()
            .assess_risk(ticket.id, &agent(4), RiskLevel::Critical, WHY)
            .unwrap();
        assert!(outcome.escalation.is_none());
        assert_eq!(fx.ticket(&ticket).current_level_id, fx.level(1).id);
    }
}

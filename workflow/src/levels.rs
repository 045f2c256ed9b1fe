//! Level registry - the ordered catalog of support tiers
//!
//! Levels are reference data: created at setup, occasionally retuned, never
//! deleted. Tickets reference them by id, so deactivation only removes a
//! tier from escalation targets.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::LevelConfig;
use crate::engine::SharedContext;
use crate::error::{WorkflowError, WorkflowResult};
use crate::state::{Level, LevelId};

/// Definition of a level to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLevel {
    pub rank: u32,
    pub name: String,
    pub description: String,
    pub can_escalate: bool,
    pub can_assess_risk: bool,
    pub default_sla_hours: u32,
}

/// The four standard tiers, with SLA hours taken from `config` where set
pub fn standard_levels(config: &LevelConfig) -> Vec<NewLevel> {
    let tiers = [
        (
            1,
            "Level I - Basic Support",
            "First line support for common issues and basic troubleshooting",
            true,
            false,
            24,
        ),
        (
            2,
            "Level II - Technical Support",
            "Technical support for complex issues requiring specialized knowledge",
            true,
            false,
            48,
        ),
        (
            3,
            "Level III - Expert Support",
            "Expert level support for critical issues and system-wide problems",
            true,
            true,
            72,
        ),
        (
            4,
            "Level IV - Management",
            "Management level for escalated critical issues and business decisions",
            false,
            true,
            96,
        ),
    ];

    tiers
        .into_iter()
        .map(
            |(rank, name, description, can_escalate, can_assess_risk, fallback_hours)| NewLevel {
                rank,
                name: name.to_string(),
                description: description.to_string(),
                can_escalate,
                can_assess_risk,
                default_sla_hours: config.sla_hours_for(rank).unwrap_or(fallback_hours),
            },
        )
        .collect()
}

/// Catalog operations over the level table
#[derive(Clone)]
pub struct LevelRegistry {
    ctx: SharedContext,
}

impl LevelRegistry {
    pub(crate) fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }

    pub fn get(&self, id: LevelId) -> WorkflowResult<Level> {
        self.ctx
            .read(|t| t.level(id).cloned())?
            .ok_or_else(|| WorkflowError::not_found("level", id))
    }

    pub fn find_by_rank(&self, rank: u32) -> WorkflowResult<Option<Level>> {
        self.ctx.read(|t| t.level_by_rank(rank).cloned())
    }

    /// Smallest active rank strictly above `rank`
    pub fn next_higher(&self, rank: u32) -> WorkflowResult<Option<Level>> {
        self.ctx.read(|t| t.next_higher_level(rank).cloned())
    }

    /// Every level ordered by rank, inactive included
    pub fn all(&self) -> WorkflowResult<Vec<Level>> {
        self.ctx
            .read(|t| t.levels_by_rank().into_iter().cloned().collect())
    }

    pub fn create(&self, input: NewLevel) -> WorkflowResult<Level> {
        validate(&input)?;
        self.ctx.transact(|uow| {
            if uow.tables.level_by_rank(input.rank).is_some() {
                return Err(WorkflowError::DuplicateRank(input.rank));
            }
            let level = Level {
                id: uow.tables.next_level_id(),
                rank: input.rank,
                name: input.name,
                description: input.description,
                can_escalate: input.can_escalate,
                can_assess_risk: input.can_assess_risk,
                default_sla_hours: input.default_sla_hours,
                active: true,
            };
            uow.tables.levels.insert(level.id, level.clone());
            info!(rank = level.rank, name = %level.name, "Level created");
            Ok(level)
        })
    }

    /// Install the standard tiers, updating any that already exist by rank
    pub fn seed_defaults(&self) -> WorkflowResult<Vec<Level>> {
        let templates = standard_levels(&self.ctx.config.levels);
        self.ctx.transact(|uow| {
            let mut seeded = Vec::with_capacity(templates.len());
            for input in templates {
                let existing = uow.tables.level_by_rank(input.rank).map(|l| l.id);
                let id = existing.unwrap_or_else(|| uow.tables.next_level_id());
                let active = existing
                    .and_then(|id| uow.tables.level(id))
                    .map(|l| l.active)
                    .unwrap_or(true);
                let level = Level {
                    id,
                    rank: input.rank,
                    name: input.name,
                    description: input.description,
                    can_escalate: input.can_escalate,
                    can_assess_risk: input.can_assess_risk,
                    default_sla_hours: input.default_sla_hours,
                    active,
                };
                uow.tables.levels.insert(id, level.clone());
                seeded.push(level);
            }
            info!(levels = seeded.len(), "Seeded standard levels");
            Ok(seeded)
        })
    }

    pub fn activate(&self, rank: u32) -> WorkflowResult<Level> {
        self.update(rank, |level| level.active = true)
    }

    /// Remove a tier from escalation targets. Tickets already at the tier stay.
    pub fn deactivate(&self, rank: u32) -> WorkflowResult<Level> {
        self.update(rank, |level| level.active = false)
    }

    /// Change the SLA window applied to tickets entering the tier from now on
    pub fn set_default_sla_hours(&self, rank: u32, hours: u32) -> WorkflowResult<Level> {
        if hours == 0 {
            return Err(WorkflowError::invalid_input(
                "default_sla_hours",
                "must be positive",
            ));
        }
        self.update(rank, |level| level.default_sla_hours = hours)
    }

    fn update(&self, rank: u32, f: impl FnOnce(&mut Level)) -> WorkflowResult<Level> {
        self.ctx.transact(|uow| {
            let id = uow
                .tables
                .level_by_rank(rank)
                .map(|l| l.id)
                .ok_or_else(|| WorkflowError::not_found("level rank", rank))?;
            let level = uow
                .tables
                .levels
                .get_mut(&id)
                .ok_or_else(|| WorkflowError::not_found("level", id))?;
            f(level);
            info!(rank, active = level.active, sla_hours = level.default_sla_hours, "Level updated");
            Ok(level.clone())
        })
    }
}

fn validate(input: &NewLevel) -> WorkflowResult<()> {
    if input.rank == 0 {
        return Err(WorkflowError::invalid_input("rank", "must be at least 1"));
    }
    if input.name.trim().is_empty() {
        return Err(WorkflowError::invalid_input("name", "must not be empty"));
    }
    if input.default_sla_hours == 0 {
        return Err(WorkflowError::invalid_input(
            "default_sla_hours",
            "must be positive",
        ));
    }
    Ok(())
}

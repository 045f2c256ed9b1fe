//! Operator configuration: engine settings plus the agent directory
//!
//! ```toml
//! authorization = "basic"
//!
//! [workflow.levels]
//! default_sla_hours = [8, 24, 48, 96]
//!
//! [[agents]]
//! id = "dana"
//! name = "Dana Whitfield"
//! rank = 2
//! email = "dana@helpdesk.example"
//! departments = [1, 3]
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tierdesk_workflow::capability::{
    BasicTicketAuthorization, OpenAuthorization, TicketAuthorization, UserDirectory, UserProfile,
};
use tierdesk_workflow::state::DepartmentId;
use tierdesk_workflow::{Level, UserRef, WorkflowConfig};
use tracing::warn;

/// Which authorization rules the console enforces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationPolicy {
    /// Creator and assignee rules
    #[default]
    Basic,
    /// Every user may do everything
    Open,
}

impl AuthorizationPolicy {
    pub fn build(self) -> Arc<dyn TicketAuthorization> {
        match self {
            Self::Basic => Arc::new(BasicTicketAuthorization),
            Self::Open => Arc::new(OpenAuthorization),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    pub name: String,
    pub rank: u32,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub departments: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub workflow: WorkflowConfig,
    pub authorization: AuthorizationPolicy,
    pub agents: Vec<AgentEntry>,
}

impl CliConfig {
    /// Read `path` if given, then apply `TIERDESK_*` overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str::<CliConfig>(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => CliConfig::default(),
        };
        config
            .workflow
            .apply_env()
            .context("applying environment overrides")?;
        config.workflow.validate().context("validating config")?;
        Ok(config)
    }

    /// Register every configured agent whose rank matches a tier
    pub fn populate(&self, directory: &UserDirectory, levels: &[Level]) {
        for agent in &self.agents {
            let Some(level) = levels.iter().find(|l| l.rank == agent.rank) else {
                warn!(agent = %agent.id, rank = agent.rank, "No tier with this rank, agent skipped");
                continue;
            };
            let departments: BTreeSet<DepartmentId> =
                agent.departments.iter().copied().map(DepartmentId).collect();
            directory.add_agent(
                UserProfile {
                    id: UserRef::new(agent.id.clone()),
                    display_name: agent.name.clone(),
                    email: agent.email.clone(),
                },
                level.id,
                departments,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tierdesk_workflow::capability::UserCapability;
    use tierdesk_workflow::LevelId;

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
authorization = "open"

[workflow.sla]
warning_threshold_hours = 4

[[agents]]
id = "dana"
name = "Dana"
rank = 2
departments = [1]
"#
        )
        .unwrap();

        let config = CliConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.authorization, AuthorizationPolicy::Open);
        assert_eq!(config.workflow.sla.warning_threshold_hours, 4);
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.agents[0].email, None);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(CliConfig::load(Some(Path::new("/nonexistent/tierdesk.toml"))).is_err());
    }

    #[test]
    fn test_populate_skips_unknown_rank() {
        let config = CliConfig {
            agents: vec![
                AgentEntry {
                    id: "dana".into(),
                    name: "Dana".into(),
                    rank: 1,
                    email: None,
                    departments: vec![],
                },
                AgentEntry {
                    id: "ghost".into(),
                    name: "Ghost".into(),
                    rank: 9,
                    email: None,
                    departments: vec![],
                },
            ],
            ..CliConfig::default()
        };
        let level = Level {
            id: LevelId(1),
            rank: 1,
            name: "Level I".into(),
            description: String::new(),
            can_escalate: true,
            can_assess_risk: false,
            default_sla_hours: 24,
            active: true,
        };

        let directory = UserDirectory::new();
        config.populate(&directory, &[level]);
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.user_level(&UserRef::from("dana")), Some(LevelId(1)));
    }
}

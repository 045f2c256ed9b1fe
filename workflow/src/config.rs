//! Workflow configuration
//!
//! A single [`WorkflowConfig`] is handed to the engine at construction. It is
//! read from TOML, then individual settings may be overridden from the
//! environment, then validated.
//!
//! # Environment Variables
//!
//! | Variable | Overrides |
//! |---|---|
//! | `TIERDESK_NOTIFICATIONS_ENABLED` | `notifications.enabled` |
//! | `TIERDESK_AUTO_ESCALATION_ENABLED` | `levels.auto_escalation_enabled` |
//! | `TIERDESK_SLA_CHECK_FREQUENCY` | `levels.sla_check_frequency` |
//! | `TIERDESK_EVALUATION_ENABLED` | `evaluation.enabled` |
//! | `TIERDESK_EVALUATION_REQUIRED_ON_CLOSE` | `evaluation.required_on_close` |
//! | `TIERDESK_AGENT_RATING_ENABLED` | `evaluation.agent_rating_enabled` |
//! | `TIERDESK_RISK_ASSESSMENT_ENABLED` | `risk_assessment.enabled` |
//! | `TIERDESK_RISK_AUTO_ESCALATE` | `risk_assessment.auto_escalate_on_critical` |
//! | `TIERDESK_SLA_ENABLED` | `sla.enabled` |
//! | `TIERDESK_SLA_BREACH_NOTIFICATIONS` | `sla.breach_notifications` |
//! | `TIERDESK_SLA_AUTO_ESCALATE` | `sla.auto_escalate_on_breach` |
//! | `TIERDESK_SLA_WARNING_HOURS` | `sla.warning_threshold_hours` |
//! | `TIERDESK_AUTO_ASSIGN_ENABLED` | `assignment.auto_assign_enabled` |
//! | `TIERDESK_AUTO_ASSIGN_STRATEGY` | `assignment.strategy` |
//! | `TIERDESK_MAX_CONCURRENT_TICKETS` | `assignment.max_concurrent_tickets` |
//!
//! Booleans accept "1", "true" or "yes" (case-insensitive) as enabled; any
//! other value disables.
//!
//! # Example
//!
//! ```toml
//! [levels]
//! default_sla_hours = [24, 48, 72, 96]
//! sla_check_frequency = "every_fifteen_minutes"
//!
//! [evaluation]
//! required_on_close = true
//!
//! [assignment]
//! auto_assign_enabled = true
//! strategy = "least_loaded"
//! max_concurrent_tickets = 10
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidOverride { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub notifications: NotificationConfig,
    pub levels: LevelConfig,
    pub evaluation: EvaluationConfig,
    pub risk_assessment: RiskConfig,
    pub sla: SlaConfig,
    pub assignment: AssignmentConfig,
}

/// Which events produce notifications, and over which channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Master switch for the notification dispatcher
    pub enabled: bool,
    /// Channel names per notification key (e.g. `ticket_created`)
    pub channels: BTreeMap<String, Vec<String>>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        let both = || vec!["mail".to_string(), "database".to_string()];
        let db = || vec!["database".to_string()];
        let channels = [
            ("ticket_created", db()),
            ("ticket_assigned", both()),
            ("escalation_requested", both()),
            ("escalation_approved", both()),
            ("escalation_rejected", both()),
            ("ticket_closed", db()),
            ("evaluation_received", db()),
            ("sla_breached", both()),
        ]
        .into_iter()
        .map(|(key, channels)| (key.to_string(), channels))
        .collect();

        Self {
            enabled: true,
            channels,
        }
    }
}

impl NotificationConfig {
    /// Channels configured for a notification key; empty when none
    pub fn channels_for(&self, key: &str) -> &[String] {
        self.channels.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// How often the SLA monitor sweeps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepFrequency {
    EveryMinute,
    EveryFiveMinutes,
    EveryFifteenMinutes,
    EveryThirtyMinutes,
    #[default]
    Hourly,
    Daily,
}

impl SweepFrequency {
    pub fn period(&self) -> Duration {
        let minutes = match self {
            Self::EveryMinute => 1,
            Self::EveryFiveMinutes => 5,
            Self::EveryFifteenMinutes => 15,
            Self::EveryThirtyMinutes => 30,
            Self::Hourly => 60,
            Self::Daily => 24 * 60,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl FromStr for SweepFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "every_minute" => Ok(Self::EveryMinute),
            "every_five_minutes" => Ok(Self::EveryFiveMinutes),
            "every_fifteen_minutes" => Ok(Self::EveryFifteenMinutes),
            "every_thirty_minutes" => Ok(Self::EveryThirtyMinutes),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            other => Err(other.to_string()),
        }
    }
}

/// Tier defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// SLA hours for the standard tiers; index 0 is rank 1
    pub default_sla_hours: Vec<u32>,
    /// Master switch for timeout-driven escalation
    pub auto_escalation_enabled: bool,
    pub sla_check_frequency: SweepFrequency,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            default_sla_hours: vec![24, 48, 72, 96],
            auto_escalation_enabled: true,
            sla_check_frequency: SweepFrequency::Hourly,
        }
    }
}

impl LevelConfig {
    /// Configured SLA hours for a rank, if the rank is covered
    pub fn sla_hours_for(&self, rank: u32) -> Option<u32> {
        let index = usize::try_from(rank).ok()?.checked_sub(1)?;
        self.default_sla_hours.get(index).copied()
    }
}

/// Ticket evaluations and agent ratings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub enabled: bool,
    /// Refuse to close a ticket that has no evaluation
    pub required_on_close: bool,
    pub agent_rating_enabled: bool,
    pub min_score: f64,
    pub max_score: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required_on_close: false,
            agent_rating_enabled: true,
            min_score: 1.0,
            max_score: 5.0,
        }
    }
}

impl EvaluationConfig {
    pub fn score_in_range(&self, score: f64) -> bool {
        score.is_finite() && score >= self.min_score && score <= self.max_score
    }
}

/// Risk assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub enabled: bool,
    /// Ranks whose agents may assess risk; empty defers to `Level::can_assess_risk`
    pub required_ranks: Vec<u32>,
    pub auto_escalate_on_critical: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required_ranks: vec![3, 4],
            auto_escalate_on_critical: true,
        }
    }
}

/// SLA monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    pub enabled: bool,
    pub breach_notifications: bool,
    pub auto_escalate_on_breach: bool,
    /// Emit a warning this many hours before a deadline
    pub warning_threshold_hours: u32,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            breach_notifications: true,
            auto_escalate_on_breach: true,
            warning_threshold_hours: 2,
        }
    }
}

/// Agent selection for automatic assignment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAssignStrategy {
    /// Candidate whose latest assignment is oldest; never-assigned first
    #[default]
    RoundRobin,
    /// Candidate with the fewest active assignments
    LeastLoaded,
}

impl FromStr for AutoAssignStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "least_loaded" => Ok(Self::LeastLoaded),
            other => Err(other.to_string()),
        }
    }
}

/// Assignment limits and automatic assignment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    pub auto_assign_enabled: bool,
    pub strategy: AutoAssignStrategy,
    /// Maximum active assignments per agent; unlimited when unset
    pub max_concurrent_tickets: Option<usize>,
}

impl WorkflowConfig {
    /// Parse a TOML document. Missing sections and keys take their defaults.
    pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Read a TOML file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TIERDESK_*` overrides from the process environment
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `TIERDESK_*` overrides from an arbitrary lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        let flag = |key: &str, target: &mut bool| {
            if let Some(value) = lookup(key) {
                *target = parse_bool(&value);
            }
        };

        flag("TIERDESK_NOTIFICATIONS_ENABLED", &mut self.notifications.enabled);
        flag(
            "TIERDESK_AUTO_ESCALATION_ENABLED",
            &mut self.levels.auto_escalation_enabled,
        );
        flag("TIERDESK_EVALUATION_ENABLED", &mut self.evaluation.enabled);
        flag(
            "TIERDESK_EVALUATION_REQUIRED_ON_CLOSE",
            &mut self.evaluation.required_on_close,
        );
        flag(
            "TIERDESK_AGENT_RATING_ENABLED",
            &mut self.evaluation.agent_rating_enabled,
        );
        flag("TIERDESK_RISK_ASSESSMENT_ENABLED", &mut self.risk_assessment.enabled);
        flag(
            "TIERDESK_RISK_AUTO_ESCALATE",
            &mut self.risk_assessment.auto_escalate_on_critical,
        );
        flag("TIERDESK_SLA_ENABLED", &mut self.sla.enabled);
        flag(
            "TIERDESK_SLA_BREACH_NOTIFICATIONS",
            &mut self.sla.breach_notifications,
        );
        flag("TIERDESK_SLA_AUTO_ESCALATE", &mut self.sla.auto_escalate_on_breach);
        flag(
            "TIERDESK_AUTO_ASSIGN_ENABLED",
            &mut self.assignment.auto_assign_enabled,
        );

        if let Some(value) = lookup("TIERDESK_SLA_CHECK_FREQUENCY") {
            self.levels.sla_check_frequency =
                value.parse().map_err(|_| invalid("TIERDESK_SLA_CHECK_FREQUENCY", &value))?;
        }
        if let Some(value) = lookup("TIERDESK_SLA_WARNING_HOURS") {
            self.sla.warning_threshold_hours = value
                .trim()
                .parse()
                .map_err(|_| invalid("TIERDESK_SLA_WARNING_HOURS", &value))?;
        }
        if let Some(value) = lookup("TIERDESK_AUTO_ASSIGN_STRATEGY") {
            self.assignment.strategy = value
                .parse()
                .map_err(|_| invalid("TIERDESK_AUTO_ASSIGN_STRATEGY", &value))?;
        }
        if let Some(value) = lookup("TIERDESK_MAX_CONCURRENT_TICKETS") {
            let trimmed = value.trim();
            self.assignment.max_concurrent_tickets = if trimmed.is_empty() {
                None
            } else {
                Some(
                    trimmed
                        .parse()
                        .map_err(|_| invalid("TIERDESK_MAX_CONCURRENT_TICKETS", &value))?,
                )
            };
        }
        Ok(())
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> ConfigResult<()> {
        let eval = &self.evaluation;
        if !eval.min_score.is_finite() || !eval.max_score.is_finite() {
            return Err(ConfigError::Invalid(
                "evaluation score bounds must be finite".to_string(),
            ));
        }
        if eval.min_score >= eval.max_score {
            return Err(ConfigError::Invalid(format!(
                "evaluation.min_score ({}) must be below max_score ({})",
                eval.min_score, eval.max_score
            )));
        }
        if self.levels.default_sla_hours.is_empty() {
            return Err(ConfigError::Invalid(
                "levels.default_sla_hours must list at least one tier".to_string(),
            ));
        }
        if self.levels.default_sla_hours.contains(&0) {
            return Err(ConfigError::Invalid(
                "levels.default_sla_hours entries must be positive".to_string(),
            ));
        }
        if self.assignment.max_concurrent_tickets == Some(0) {
            return Err(ConfigError::Invalid(
                "assignment.max_concurrent_tickets must be positive when set".to_string(),
            ));
        }
        if self.risk_assessment.required_ranks.contains(&0) {
            return Err(ConfigError::Invalid(
                "risk_assessment.required_ranks cannot contain rank 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Accepts "1", "true" or "yes" (case-insensitive) as enabled
fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WorkflowConfig::default();
        assert!(config.notifications.enabled);
        assert_eq!(config.levels.default_sla_hours, vec![24, 48, 72, 96]);
        assert!(config.levels.auto_escalation_enabled);
        assert_eq!(config.levels.sla_check_frequency, SweepFrequency::Hourly);
        assert!(!config.evaluation.required_on_close);
        assert_eq!(config.evaluation.min_score, 1.0);
        assert_eq!(config.evaluation.max_score, 5.0);
        assert_eq!(config.risk_assessment.required_ranks, vec![3, 4]);
        assert_eq!(config.sla.warning_threshold_hours, 2);
        assert!(!config.assignment.auto_assign_enabled);
        assert_eq!(config.assignment.max_concurrent_tickets, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_channels() {
        let config = NotificationConfig::default();
        assert_eq!(config.channels_for("ticket_created"), ["database"]);
        assert_eq!(config.channels_for("sla_breached"), ["mail", "database"]);
        assert!(config.channels_for("unknown").is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = WorkflowConfig::from_toml_str(
            r#"
            [evaluation]
            required_on_close = true

            [assignment]
            strategy = "least_loaded"
            max_concurrent_tickets = 3
            "#,
        )
        .unwrap();

        assert!(config.evaluation.required_on_close);
        assert!(config.evaluation.enabled);
        assert_eq!(config.assignment.strategy, AutoAssignStrategy::LeastLoaded);
        assert_eq!(config.assignment.max_concurrent_tickets, Some(3));
        assert_eq!(config.sla, SlaConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = WorkflowConfig::default();
        config
            .apply_overrides(lookup(&[
                ("TIERDESK_NOTIFICATIONS_ENABLED", "no"),
                ("TIERDESK_SLA_AUTO_ESCALATE", "YES"),
                ("TIERDESK_AUTO_ASSIGN_ENABLED", "1"),
                ("TIERDESK_SLA_CHECK_FREQUENCY", "every-five-minutes"),
                ("TIERDESK_MAX_CONCURRENT_TICKETS", "4"),
            ]))
            .unwrap();

        assert!(!config.notifications.enabled);
        assert!(config.sla.auto_escalate_on_breach);
        assert!(config.assignment.auto_assign_enabled);
        assert_eq!(
            config.levels.sla_check_frequency,
            SweepFrequency::EveryFiveMinutes
        );
        assert_eq!(config.assignment.max_concurrent_tickets, Some(4));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = WorkflowConfig::default();
        let err = config
            .apply_overrides(lookup(&[("TIERDESK_AUTO_ASSIGN_STRATEGY", "random")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
    }

    #[test]
    fn test_validate_rejects_inverted_scores() {
        let mut config = WorkflowConfig::default();
        config.evaluation.min_score = 5.0;
        config.evaluation.max_score = 1.0;
        assert!(config.validate().is_err());

        let mut config = WorkflowConfig::default();
        config.assignment.max_concurrent_tickets = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sla_hours_for_rank() {
        let config = LevelConfig::default();
        assert_eq!(config.sla_hours_for(1), Some(24));
        assert_eq!(config.sla_hours_for(4), Some(96));
        assert_eq!(config.sla_hours_for(0), None);
        assert_eq!(config.sla_hours_for(5), None);
    }

    #[test]
    fn test_sweep_periods() {
        assert_eq!(SweepFrequency::Hourly.period(), Duration::from_secs(3600));
        assert_eq!(SweepFrequency::EveryMinute.period(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("workflow.toml");
        std::fs::write(&path, "[sla]\nwarning_threshold_hours = 6\n").unwrap();

        let config = WorkflowConfig::load(&path).unwrap();
        assert_eq!(config.sla.warning_threshold_hours, 6);
    }
}

//! Configuration for the research orchestrator.
//!
//! Covers quality gates, supervisor mode, loop and retry budgets, backup
//! cadence, search fan-out and per-collaborator timeouts.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::llm::RetryPolicy;
use crate::quality::QualityThresholds;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// How the supervisor picks the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorMode {
    /// Deterministic rules only.
    #[default]
    RuleBased,
    /// Ask the text-generation client, falling back to the rules.
    LlmAssisted,
}

impl std::str::FromStr for SupervisorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rules" | "rule" | "rule-based" | "rule_based" => Ok(SupervisorMode::RuleBased),
            "llm" | "llm-assisted" | "llm_assisted" => Ok(SupervisorMode::LlmAssisted),
            other => Err(format!("unknown supervisor mode '{}'", other)),
        }
    }
}

/// Per-collaborator call timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    pub decision: Duration,
    pub search: Duration,
    pub extraction: Duration,
    /// Applies to analysis, planning refinement and report synthesis calls.
    pub analysis: Duration,
    pub backup: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            decision: Duration::from_secs(60),
            search: Duration::from_secs(30),
            extraction: Duration::from_secs(45),
            analysis: Duration::from_secs(120),
            backup: Duration::from_secs(15),
        }
    }
}

impl Timeouts {
    fn all(&self) -> [(&'static str, Duration); 5] {
        [
            ("decision", self.decision),
            ("search", self.search),
            ("extraction", self.extraction),
            ("analysis", self.analysis),
            ("backup", self.backup),
        ]
    }
}

/// Configuration for one orchestrator.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    // Quality and decisions
    pub thresholds: QualityThresholds,
    pub supervisor_mode: SupervisorMode,

    // Loop budgets
    /// Upper bound on orchestrator loop passes per run.
    pub max_iterations: u32,
    /// Whole-stage failures tolerated before the run fails.
    pub max_retries: u32,

    // Backups
    /// Backups retained per project.
    pub max_backups: usize,
    /// Interval trigger; `None` disables the scheduler.
    pub backup_interval: Option<Duration>,
    /// Checkpoint after every completed stage.
    pub checkpoint_each_stage: bool,
    /// Root directory for the filesystem backend.
    pub backup_dir: PathBuf,

    // Worker limits
    /// Concurrent search queries per round.
    pub search_concurrency: usize,
    /// Queries executed per search round.
    pub queries_per_round: usize,
    /// Results requested per query.
    pub results_per_query: usize,
    /// Pages extracted per extraction round.
    pub extractions_per_round: usize,

    // Collaborator calls
    pub timeouts: Timeouts,
    pub retry_policy: RetryPolicy,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            thresholds: QualityThresholds::default(),
            supervisor_mode: SupervisorMode::default(),

            max_iterations: 20,
            max_retries: 3,

            max_backups: 5,
            backup_interval: Some(Duration::from_secs(30)),
            checkpoint_each_stage: true,
            backup_dir: PathBuf::from("./backups"),

            search_concurrency: 4,
            queries_per_round: 8,
            results_per_query: 10,
            extractions_per_round: 5,

            timeouts: Timeouts::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ResearchConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RESEARCH_SUPERVISOR_MODE`: `rules` or `llm` (default: rules)
    /// - `RESEARCH_MAX_ITERATIONS`: Loop pass budget (default: 20)
    /// - `RESEARCH_MAX_RETRIES`: Stage failure budget (default: 3)
    /// - `RESEARCH_MAX_BACKUPS`: Backups kept per project (default: 5)
    /// - `RESEARCH_BACKUP_INTERVAL_SECS`: Interval backups, 0 disables (default: 30)
    /// - `RESEARCH_CHECKPOINT_EACH_STAGE`: Checkpoint after stages (default: true)
    /// - `RESEARCH_BACKUP_DIR`: Backup root directory (default: ./backups)
    /// - `RESEARCH_SEARCH_CONCURRENCY`: Concurrent searches (default: 4)
    /// - `RESEARCH_MIN_SEARCH_RESULTS`: Search gate (default: 15)
    /// - `RESEARCH_MIN_EXTRACTIONS`: Extraction gate (default: 10)
    /// - `RESEARCH_MIN_FEATURES`: Feature gate (default: 5)
    /// - `RESEARCH_MIN_COMPETITORS`: Competitor gate (default: 3)
    /// - `RESEARCH_MIN_CONFIDENCE`: Analysis confidence gate (default: 0.6)
    /// - `RESEARCH_COMPLETION_SCORE`: Completion score (default: 70)
    /// - `RESEARCH_DECISION_TIMEOUT_SECS`: Supervisor call timeout (default: 60)
    /// - `RESEARCH_SEARCH_TIMEOUT_SECS`: Search call timeout (default: 30)
    /// - `RESEARCH_EXTRACTION_TIMEOUT_SECS`: Extraction call timeout (default: 45)
    /// - `RESEARCH_ANALYSIS_TIMEOUT_SECS`: Analysis call timeout (default: 120)
    /// - `RESEARCH_BACKUP_TIMEOUT_SECS`: Backup I/O timeout (default: 15)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RESEARCH_SUPERVISOR_MODE") {
            config.supervisor_mode =
                val.parse().map_err(|message| ConfigError::InvalidValue {
                    key: "RESEARCH_SUPERVISOR_MODE".to_string(),
                    message,
                })?;
        }

        // Budgets
        if let Ok(val) = std::env::var("RESEARCH_MAX_ITERATIONS") {
            config.max_iterations = parse_env_value(&val, "RESEARCH_MAX_ITERATIONS")?;
        }

        if let Ok(val) = std::env::var("RESEARCH_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "RESEARCH_MAX_RETRIES")?;
        }

        // Backups
        if let Ok(val) = std::env::var("RESEARCH_MAX_BACKUPS") {
            config.max_backups = parse_env_value(&val, "RESEARCH_MAX_BACKUPS")?;
        }

        if let Ok(val) = std::env::var("RESEARCH_BACKUP_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "RESEARCH_BACKUP_INTERVAL_SECS")?;
            config.backup_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Ok(val) = std::env::var("RESEARCH_CHECKPOINT_EACH_STAGE") {
            config.checkpoint_each_stage = parse_env_bool(&val, "RESEARCH_CHECKPOINT_EACH_STAGE")?;
        }

        if let Ok(val) = std::env::var("RESEARCH_BACKUP_DIR") {
            config.backup_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("RESEARCH_SEARCH_CONCURRENCY") {
            config.search_concurrency = parse_env_value(&val, "RESEARCH_SEARCH_CONCURRENCY")?;
        }

        // Thresholds
        if let Ok(val) = std::env::var("RESEARCH_MIN_SEARCH_RESULTS") {
            config.thresholds.min_search_results =
                parse_env_value(&val, "RESEARCH_MIN_SEARCH_RESULTS")?;
        }

        if let Ok(val) = std::env::var("RESEARCH_MIN_EXTRACTIONS") {
            config.thresholds.min_extractions = parse_env_value(&val, "RESEARCH_MIN_EXTRACTIONS")?;
        }

        if let Ok(val) = std::env::var("RESEARCH_MIN_FEATURES") {
            config.thresholds.min_features = parse_env_value(&val, "RESEARCH_MIN_FEATURES")?;
        }

        if let Ok(val) = std::env::var("RESEARCH_MIN_COMPETITORS") {
            config.thresholds.min_competitors = parse_env_value(&val, "RESEARCH_MIN_COMPETITORS")?;
        }

        if let Ok(val) = std::env::var("RESEARCH_MIN_CONFIDENCE") {
            config.thresholds.min_confidence = parse_env_value(&val, "RESEARCH_MIN_CONFIDENCE")?;
        }

        if let Ok(val) = std::env::var("RESEARCH_COMPLETION_SCORE") {
            config.thresholds.completion_score =
                parse_env_value(&val, "RESEARCH_COMPLETION_SCORE")?;
        }

        // Timeouts
        for (key, slot) in [
            ("RESEARCH_DECISION_TIMEOUT_SECS", &mut config.timeouts.decision),
            ("RESEARCH_SEARCH_TIMEOUT_SECS", &mut config.timeouts.search),
            ("RESEARCH_EXTRACTION_TIMEOUT_SECS", &mut config.timeouts.extraction),
            ("RESEARCH_ANALYSIS_TIMEOUT_SECS", &mut config.timeouts.analysis),
            ("RESEARCH_BACKUP_TIMEOUT_SECS", &mut config.timeouts.backup),
        ] {
            if let Ok(val) = std::env::var(key) {
                let secs: u64 = parse_env_value(&val, key)?;
                *slot = Duration::from_secs(secs);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_iterations must be greater than 0".to_string(),
            ));
        }

        if self.max_backups == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_backups must be greater than 0".to_string(),
            ));
        }

        if self.backup_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "backup_interval must be greater than 0 when set".to_string(),
            ));
        }

        if self.search_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "search_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.queries_per_round == 0 || self.extractions_per_round == 0 {
            return Err(ConfigError::ValidationFailed(
                "queries_per_round and extractions_per_round must be greater than 0".to_string(),
            ));
        }

        for (name, timeout) in self.timeouts.all() {
            if timeout.is_zero() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} timeout must be greater than 0",
                    name
                )));
            }
        }

        self.thresholds
            .check()
            .map_err(ConfigError::ValidationFailed)?;

        Ok(())
    }

    pub fn with_thresholds(mut self, thresholds: QualityThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_supervisor_mode(mut self, mode: SupervisorMode) -> Self {
        self.supervisor_mode = mode;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_max_backups(mut self, max: usize) -> Self {
        self.max_backups = max;
        self
    }

    pub fn with_backup_interval(mut self, interval: Option<Duration>) -> Self {
        self.backup_interval = interval;
        self
    }

    pub fn with_checkpoint_each_stage(mut self, enabled: bool) -> Self {
        self.checkpoint_each_stage = enabled;
        self
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub fn with_search_concurrency(mut self, concurrency: usize) -> Self {
        self.search_concurrency = concurrency;
        self
    }

    pub fn with_queries_per_round(mut self, count: usize) -> Self {
        self.queries_per_round = count;
        self
    }

    pub fn with_results_per_query(mut self, count: usize) -> Self {
        self.results_per_query = count;
        self
    }

    pub fn with_extractions_per_round(mut self, count: usize) -> Self {
        self.extractions_per_round = count;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ResearchConfig::default();
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_backups, 5);
        assert_eq!(config.backup_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.search_concurrency, 4);
        assert_eq!(config.supervisor_mode, SupervisorMode::RuleBased);
        assert_eq!(config.timeouts.decision, Duration::from_secs(60));
        assert_eq!(config.timeouts.analysis, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ResearchConfig::new()
            .with_max_iterations(7)
            .with_max_backups(2)
            .with_backup_interval(None)
            .with_search_concurrency(1)
            .with_supervisor_mode(SupervisorMode::LlmAssisted)
            .with_backup_dir("/tmp/research");

        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.max_backups, 2);
        assert!(config.backup_interval.is_none());
        assert_eq!(config.search_concurrency, 1);
        assert_eq!(config.supervisor_mode, SupervisorMode::LlmAssisted);
        assert_eq!(config.backup_dir, PathBuf::from("/tmp/research"));
    }

    #[test]
    fn test_validation_rejects_zero_iterations() {
        let result = ResearchConfig::default().with_max_iterations(0).validate();
        assert!(result
            .expect_err("zero iterations")
            .to_string()
            .contains("max_iterations"));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let timeouts = Timeouts {
            search: Duration::ZERO,
            ..Timeouts::default()
        };
        let result = ResearchConfig::default().with_timeouts(timeouts).validate();
        assert!(result.expect_err("zero timeout").to_string().contains("search"));
    }

    #[test]
    fn test_validation_rejects_bad_thresholds() {
        let thresholds = QualityThresholds::default().with_min_confidence(2.0);
        assert!(ResearchConfig::default()
            .with_thresholds(thresholds)
            .validate()
            .is_err());
    }

    #[test]
    fn test_supervisor_mode_parsing() {
        assert_eq!("llm".parse::<SupervisorMode>(), Ok(SupervisorMode::LlmAssisted));
        assert_eq!("Rules".parse::<SupervisorMode>(), Ok(SupervisorMode::RuleBased));
        assert!("magic".parse::<SupervisorMode>().is_err());
    }

    #[test]
    fn test_parse_env_helpers() {
        assert_eq!(parse_env_value::<u32>(" 12 ", "K").expect("parses"), 12);
        assert!(parse_env_value::<u32>("abc", "K").is_err());
        assert!(parse_env_bool("Yes", "K").expect("parses"));
        assert!(!parse_env_bool("off", "K").expect("parses"));
        assert!(parse_env_bool("maybe", "K").is_err());
    }
}

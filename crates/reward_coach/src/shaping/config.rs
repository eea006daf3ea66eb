//! Controller configuration from a TOML file and the environment.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::{
    MilestoneSchedule, StepCount, DEFAULT_OBJECTIVE_CHECK_INTERVAL,
    DEFAULT_OBJECTIVE_TTL_STEPS, DEFAULT_PROXIMITY_CHECK_INTERVAL,
};

pub const ENV_LLM_MODEL: &str = "REWARD_COACH_LLM_MODEL";
pub const ENV_LLM_BASE_URL: &str = "REWARD_COACH_LLM_BASE_URL";
pub const ENV_LLM_TIMEOUT_MS: &str = "REWARD_COACH_LLM_TIMEOUT_MS";
pub const ENV_LLM_TEMPERATURE: &str = "REWARD_COACH_LLM_TEMPERATURE";
pub const ENV_OBJECTIVE_INTERVAL: &str = "REWARD_COACH_OBJECTIVE_INTERVAL";
pub const ENV_PROXIMITY_INTERVAL: &str = "REWARD_COACH_PROXIMITY_INTERVAL";
pub const ENV_OBJECTIVE_TTL: &str = "REWARD_COACH_OBJECTIVE_TTL";
/// Comma-separated milestone names in their stable order.
pub const ENV_MILESTONES: &str = "REWARD_COACH_MILESTONES";

pub const DEFAULT_CONFIG_FILE_NAME: &str = "coach.toml";
pub const DEFAULT_LLM_MODEL: &str = "llama3";
pub const DEFAULT_LLM_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_LLM_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_LLM_TEMPERATURE: f64 = 0.3;

// ============================================================================
// Config Types
// ============================================================================

/// Text-generation service settings. Present only when model-backed
/// extraction is enabled; absent means rule-based extraction only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LLM_MODEL.to_string(),
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            timeout_ms: DEFAULT_LLM_TIMEOUT_MS,
            temperature: DEFAULT_LLM_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachConfig {
    pub llm: Option<LlmConfig>,
    pub objective_check_interval: StepCount,
    pub proximity_check_interval: StepCount,
    pub objective_ttl_steps: StepCount,
    pub milestones: MilestoneSchedule,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            llm: None,
            objective_check_interval: DEFAULT_OBJECTIVE_CHECK_INTERVAL,
            proximity_check_interval: DEFAULT_PROXIMITY_CHECK_INTERVAL,
            objective_ttl_steps: DEFAULT_OBJECTIVE_TTL_STEPS,
            milestones: MilestoneSchedule::default(),
        }
    }
}

impl CoachConfig {
    /// `coach.toml` in the working directory when present, environment
    /// variables otherwise. Keys are spelled identically in both.
    pub fn from_default_sources() -> Result<Self, CoachConfigError> {
        let config_path = Path::new(DEFAULT_CONFIG_FILE_NAME);
        if config_path.exists() {
            return Self::from_config_file(config_path);
        }
        Self::from_env()
    }

    pub fn from_config_file(path: &Path) -> Result<Self, CoachConfigError> {
        let content = fs::read_to_string(path).map_err(|err| CoachConfigError::ReadConfigFile {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let value: toml::Value =
            toml::from_str(&content).map_err(|err| CoachConfigError::ParseConfigFile {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        let table = value
            .as_table()
            .ok_or_else(|| CoachConfigError::ParseConfigFile {
                path: path.display().to_string(),
                message: "root is not a TOML table".to_string(),
            })?;

        Self::from_env_with(|key| {
            table
                .get(key)
                .and_then(toml_value_to_string)
                .or_else(|| std::env::var(key).ok())
        })
    }

    pub fn from_env() -> Result<Self, CoachConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub fn from_env_with<F>(mut getter: F) -> Result<Self, CoachConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let objective_check_interval = parse_number(
            &mut getter,
            ENV_OBJECTIVE_INTERVAL,
            DEFAULT_OBJECTIVE_CHECK_INTERVAL,
        )?;
        let proximity_check_interval = parse_number(
            &mut getter,
            ENV_PROXIMITY_INTERVAL,
            DEFAULT_PROXIMITY_CHECK_INTERVAL,
        )?;
        let objective_ttl_steps =
            parse_number(&mut getter, ENV_OBJECTIVE_TTL, DEFAULT_OBJECTIVE_TTL_STEPS)?;

        let milestones = match getter(ENV_MILESTONES) {
            Some(raw) => MilestoneSchedule::new(
                raw.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            None => MilestoneSchedule::default(),
        };

        // The LLM section is enabled by naming a model; every other key then
        // falls back to its default.
        let llm = match getter(ENV_LLM_MODEL).filter(|value| !value.trim().is_empty()) {
            Some(model) => {
                let base_url = getter(ENV_LLM_BASE_URL)
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string());
                let timeout_ms =
                    parse_number(&mut getter, ENV_LLM_TIMEOUT_MS, DEFAULT_LLM_TIMEOUT_MS)?;
                let temperature = match getter(ENV_LLM_TEMPERATURE) {
                    Some(value) => {
                        value
                            .parse::<f64>()
                            .map_err(|_| CoachConfigError::InvalidNumber {
                                key: ENV_LLM_TEMPERATURE,
                                value,
                            })?
                    }
                    None => DEFAULT_LLM_TEMPERATURE,
                };
                Some(LlmConfig {
                    model,
                    base_url,
                    timeout_ms,
                    temperature,
                })
            }
            None => None,
        };

        Ok(Self {
            llm,
            objective_check_interval,
            proximity_check_interval,
            objective_ttl_steps,
            milestones,
        })
    }
}

fn parse_number<F, T>(getter: &mut F, key: &'static str, default: T) -> Result<T, CoachConfigError>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match getter(key) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| CoachConfigError::InvalidNumber { key, value }),
        None => Ok(default),
    }
}

fn toml_value_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(value) => Some(value.clone()),
        toml::Value::Integer(value) => Some(value.to_string()),
        toml::Value::Float(value) => Some(value.to_string()),
        toml::Value::Boolean(value) => Some(value.to_string()),
        _ => None,
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoachConfigError {
    ReadConfigFile { path: String, message: String },
    ParseConfigFile { path: String, message: String },
    InvalidNumber { key: &'static str, value: String },
}

impl fmt::Display for CoachConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoachConfigError::ReadConfigFile { path, message } => {
                write!(f, "read config file failed ({path}): {message}")
            }
            CoachConfigError::ParseConfigFile { path, message } => {
                write!(f, "parse config file failed ({path}): {message}")
            }
            CoachConfigError::InvalidNumber { key, value } => {
                write!(f, "invalid numeric value for {key}: {value}")
            }
        }
    }
}

impl Error for CoachConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn defaults_without_any_source() {
        let config = CoachConfig::from_env_with(|_| None).unwrap();
        assert_eq!(config.llm, None);
        assert_eq!(config.objective_check_interval, 1_000);
        assert_eq!(config.proximity_check_interval, 100);
        assert_eq!(config.objective_ttl_steps, 10_000);
        assert!(config.milestones.is_empty());
    }

    #[test]
    fn naming_a_model_enables_the_llm_section() {
        let mut vars = BTreeMap::new();
        vars.insert(ENV_LLM_MODEL.to_string(), "llama3".to_string());
        vars.insert(ENV_LLM_TIMEOUT_MS.to_string(), "5000".to_string());

        let config = CoachConfig::from_env_with(|key| vars.get(key).cloned()).unwrap();
        let llm = config.llm.unwrap();
        assert_eq!(llm.model, "llama3");
        assert_eq!(llm.base_url, DEFAULT_LLM_BASE_URL);
        assert_eq!(llm.timeout_ms, 5000);
        assert_eq!(llm.temperature, DEFAULT_LLM_TEMPERATURE);
    }

    #[test]
    fn milestones_parse_from_comma_list() {
        let mut vars = BTreeMap::new();
        vars.insert(
            ENV_MILESTONES.to_string(),
            "LITTLEROOT_TOWN, BIRCH_LAB_VISITED ,ROUTE_101".to_string(),
        );
        let config = CoachConfig::from_env_with(|key| vars.get(key).cloned()).unwrap();
        assert_eq!(config.milestones.len(), 3);
        assert!(config.milestones.contains("ROUTE_101"));
    }

    #[test]
    fn malformed_number_is_an_error() {
        let mut vars = BTreeMap::new();
        vars.insert(ENV_OBJECTIVE_INTERVAL.to_string(), "often".to_string());
        let err = CoachConfig::from_env_with(|key| vars.get(key).cloned()).unwrap_err();
        assert_eq!(
            err,
            CoachConfigError::InvalidNumber {
                key: ENV_OBJECTIVE_INTERVAL,
                value: "often".to_string(),
            }
        );
    }

    #[test]
    fn config_file_round_trip() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path_buf = std::env::temp_dir().join(format!("reward-coach-config-{unique}.toml"));
        let path = Path::new(&path_buf);
        let content = r#"
REWARD_COACH_LLM_MODEL = "llama3"
REWARD_COACH_LLM_BASE_URL = "http://127.0.0.1:11434"
REWARD_COACH_OBJECTIVE_INTERVAL = 500
REWARD_COACH_MILESTONES = "LITTLEROOT_TOWN,ROUTE_101"
"#;
        std::fs::write(path, content).unwrap();

        let config = CoachConfig::from_config_file(path);
        std::fs::remove_file(path).ok();
        let config = config.unwrap();

        assert_eq!(config.objective_check_interval, 500);
        assert_eq!(config.milestones.len(), 2);
        let llm = config.llm.unwrap();
        assert_eq!(llm.base_url, "http://127.0.0.1:11434");
    }
}

//! Runtime configuration (layered: defaults > TOML file > env).

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::event_stream::DropStrategy;

/// Global default config (lazy-initialized from env).
static DEFAULT_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

const ENV_EVENT_QUEUE_CAPACITY: &str = "ROCI_AGENT_EVENT_QUEUE_CAPACITY";
const ENV_DROP_STRATEGY: &str = "ROCI_AGENT_DROP_STRATEGY";
const ENV_FOLLOW_UP_GRACE_MS: &str = "ROCI_AGENT_FOLLOW_UP_GRACE_MS";
const ENV_MAX_TOOL_CONCURRENCY: &str = "ROCI_AGENT_MAX_TOOL_CONCURRENCY";
const ENV_COMMAND_BUFFER: &str = "ROCI_AGENT_COMMAND_BUFFER";

/// Tunables for agents and the event streams they consume.
///
/// Resolution order:
/// 1. Code defaults
/// 2. TOML file (`RuntimeConfig::load`, or the per-user `agent.toml`)
/// 3. Environment variables (a `.env` file is honoured)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of each run's event stream.
    pub event_queue_capacity: usize,
    /// What a run's event stream does when full.
    pub drop_strategy: DropStrategy,
    /// Bounded wait before a run concludes with an empty follow-up queue.
    pub follow_up_grace_ms: u64,
    /// Upper bound on concurrently executing tools (`None` = unbounded).
    pub max_tool_concurrency: Option<usize>,
    /// Capacity of an agent's command mailbox.
    pub command_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            drop_strategy: DropStrategy::Error,
            follow_up_grace_ms: 50,
            max_tool_concurrency: None,
            command_buffer: 64,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow-up grace period as a [`Duration`].
    pub fn follow_up_grace(&self) -> Duration {
        Duration::from_millis(self.follow_up_grace_ms)
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, AgentError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Per-user config file location (`<config_dir>/agent.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "roci", "roci")
            .map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    /// Defaults, overlaid with the per-user file if present, then env.
    pub fn discover() -> Result<Self, AgentError> {
        let base = match Self::default_path() {
            Some(path) if path.is_file() => Self::load(path)?,
            _ => Self::default(),
        };
        base.with_env_overrides()
    }

    /// Load from environment variables, keeping defaults for invalid values.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        for (key, value) in std::env::vars() {
            if let Err(err) = config.apply_env(&key, &value) {
                tracing::warn!(key = %key, error = %err, "ignoring invalid runtime config value");
            }
        }
        config
    }

    /// Load from environment variables, failing on the first invalid value.
    pub fn from_env_checked() -> Result<Self, AgentError> {
        let _ = dotenvy::dotenv();
        Self::default().with_env_overrides()
    }

    /// Get (or create) the global default config.
    pub fn global() -> &'static RuntimeConfig {
        DEFAULT_CONFIG.get_or_init(Self::from_env)
    }

    fn with_env_overrides(mut self) -> Result<Self, AgentError> {
        for (key, value) in std::env::vars() {
            self.apply_env(&key, &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Apply one environment variable. Unknown keys are ignored.
    pub fn apply_env(&mut self, key: &str, value: &str) -> Result<(), AgentError> {
        let value = value.trim();
        match key {
            ENV_EVENT_QUEUE_CAPACITY => self.event_queue_capacity = parse_env(key, value)?,
            ENV_DROP_STRATEGY => {
                self.drop_strategy = value.parse().map_err(|_| {
                    AgentError::Configuration(format!(
                        "{key}: expected error, drop_oldest or drop_newest, got '{value}'"
                    ))
                })?
            }
            ENV_FOLLOW_UP_GRACE_MS => self.follow_up_grace_ms = parse_env(key, value)?,
            ENV_MAX_TOOL_CONCURRENCY => {
                self.max_tool_concurrency = match value {
                    "" | "unbounded" => None,
                    other => Some(parse_env(key, other)?),
                }
            }
            ENV_COMMAND_BUFFER => self.command_buffer = parse_env(key, value)?,
            _ => {}
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.event_queue_capacity == 0 {
            return Err(AgentError::Configuration(
                "event_queue_capacity must be at least 1".into(),
            ));
        }
        if self.command_buffer == 0 {
            return Err(AgentError::Configuration(
                "command_buffer must be at least 1".into(),
            ));
        }
        if self.max_tool_concurrency == Some(0) {
            return Err(AgentError::Configuration(
                "max_tool_concurrency must be at least 1 (omit it for unbounded)".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AgentError> {
    value
        .parse()
        .map_err(|_| AgentError::Configuration(format!("{key}: invalid value '{value}'")))
}

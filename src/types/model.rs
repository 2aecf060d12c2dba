//! Model reference and per-request stream options.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::AgentError;

/// Provider-qualified model identifier, written `provider:model_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ModelRef {
    pub provider: String,
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model_id)
    }
}

impl FromStr for ModelRef {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model_id) = s.split_once(':').ok_or_else(|| {
            AgentError::InvalidArgument(format!("expected 'provider:model', got '{s}'"))
        })?;
        if provider.trim().is_empty() || model_id.trim().is_empty() {
            return Err(AgentError::InvalidArgument(format!(
                "expected 'provider:model', got '{s}'"
            )));
        }
        Ok(Self::new(provider.trim(), model_id.trim()))
    }
}

/// Reasoning budget requested from the model.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

/// Options forwarded to `stream_fn` on every model request.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// `None` when thinking is off.
    pub reasoning: Option<ThinkingLevel>,
    pub session_id: Option<String>,
    /// Filled per request from `get_api_key` when configured.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_ref_round_trips_through_display() {
        let model: ModelRef = "anthropic:claude-sonnet".parse().unwrap();
        assert_eq!(model.provider, "anthropic");
        assert_eq!(model.model_id, "claude-sonnet");
        assert_eq!(model.to_string(), "anthropic:claude-sonnet");
    }

    #[test]
    fn model_ref_rejects_missing_provider() {
        assert!("gpt-4o".parse::<ModelRef>().is_err());
        assert!(":gpt-4o".parse::<ModelRef>().is_err());
    }

    #[test]
    fn thinking_level_parses_lowercase() {
        assert_eq!("xhigh".parse::<ThinkingLevel>().unwrap(), ThinkingLevel::XHigh);
        assert_eq!(ThinkingLevel::Medium.to_string(), "medium");
    }

    #[test]
    fn stream_options_builder_defaults_headers() {
        let options = StreamOptions::builder().temperature(0.2).build();
        assert!(options.headers.is_empty());
        assert_eq!(options.temperature, Some(0.2));
    }
}

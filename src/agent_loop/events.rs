//! Events a run emits, in order, through its event stream.

use serde::{Deserialize, Serialize};

use crate::event_stream::Outcome;
use crate::tools::{AgentToolResult, ToolUpdate};
use crate::types::{AgentMessage, ModelStreamEvent, ToolResultMessage};

use super::types::RunId;

/// One observable state change of a run.
///
/// Exactly one of `AgentEnd`, `Error` or `Canceled` closes every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    // -- Lifecycle --
    AgentStart {
        run_id: RunId,
    },
    /// Only the messages produced by this run, not the full history.
    AgentEnd {
        run_id: RunId,
        new_messages: Vec<AgentMessage>,
    },

    // -- Turn boundaries --
    TurnStart {
        run_id: RunId,
        turn_index: usize,
    },
    TurnEnd {
        run_id: RunId,
        turn_index: usize,
        message: AgentMessage,
        tool_results: Vec<ToolResultMessage>,
    },

    // -- Message streaming --
    MessageStart {
        message: AgentMessage,
    },
    MessageUpdate {
        message: AgentMessage,
        delta: ModelStreamEvent,
    },
    MessageEnd {
        message: AgentMessage,
    },

    // -- Tool execution --
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
        partial_result: ToolUpdate,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: AgentToolResult,
        is_error: bool,
    },

    // -- Failure --
    Error {
        run_id: RunId,
        reason: String,
        partial_state: Vec<AgentMessage>,
    },
    Canceled {
        run_id: RunId,
        reason: String,
    },
}

impl AgentEvent {
    /// Whether this event closes the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AgentEnd { .. } | Self::Error { .. } | Self::Canceled { .. }
        )
    }

    /// Short snake_case name, as used in the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentStart { .. } => "agent_start",
            Self::AgentEnd { .. } => "agent_end",
            Self::TurnStart { .. } => "turn_start",
            Self::TurnEnd { .. } => "turn_end",
            Self::MessageStart { .. } => "message_start",
            Self::MessageUpdate { .. } => "message_update",
            Self::MessageEnd { .. } => "message_end",
            Self::ToolExecutionStart { .. } => "tool_execution_start",
            Self::ToolExecutionUpdate { .. } => "tool_execution_update",
            Self::ToolExecutionEnd { .. } => "tool_execution_end",
            Self::Error { .. } => "error",
            Self::Canceled { .. } => "canceled",
        }
    }

    /// The terminal event matching a stream outcome. Used when the run
    /// could not emit its own (crash, owner down, overflow).
    pub fn terminal_for(run_id: RunId, outcome: Outcome<Vec<AgentMessage>>) -> Self {
        match outcome {
            Outcome::Completed(new_messages) => Self::AgentEnd {
                run_id,
                new_messages,
            },
            Outcome::Errored { reason, partial } => Self::Error {
                run_id,
                reason,
                partial_state: partial.unwrap_or_default(),
            },
            Outcome::Canceled { reason } => Self::Canceled { run_id, reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn serializes_with_snake_case_type_tag() {
        let event = AgentEvent::TurnStart {
            run_id: Uuid::nil(),
            turn_index: 2,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.kind());
        assert_eq!(value["turn_index"], 2);
    }

    #[test]
    fn terminal_for_maps_each_outcome() {
        let run_id = Uuid::new_v4();
        let crashed = AgentEvent::terminal_for(
            run_id,
            Outcome::Errored {
                reason: "producer_crashed: boom".into(),
                partial: None,
            },
        );
        assert!(crashed.is_terminal());
        assert!(matches!(crashed, AgentEvent::Error { partial_state, .. } if partial_state.is_empty()));

        let canceled = AgentEvent::terminal_for(
            run_id,
            Outcome::Canceled {
                reason: "owner_down".into(),
            },
        );
        assert_eq!(canceled.kind(), "canceled");
        assert!(!AgentEvent::AgentStart { run_id }.is_terminal());
    }
}

//! Agent-owned conversation state and its public snapshot.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::agent_loop::RunId;
use crate::tools::ToolSet;
use crate::types::{AgentMessage, ModelRef, ThinkingLevel};

/// Whether the agent has a run in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Streaming,
}

/// How many queued messages one steering/follow-up check takes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueMode {
    /// Drain the whole queue as one batch.
    All,
    #[default]
    OneAtATime,
}

impl QueueMode {
    pub(crate) fn dequeue(self, queue: &mut VecDeque<AgentMessage>) -> Vec<AgentMessage> {
        match self {
            Self::All => queue.drain(..).collect(),
            Self::OneAtATime => queue.pop_front().into_iter().collect(),
        }
    }
}

/// Point-in-time copy of everything observable about an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub status: AgentStatus,
    pub run_id: Option<RunId>,
    pub model: ModelRef,
    pub system_prompt: Option<String>,
    pub thinking_level: ThinkingLevel,
    pub session_id: Option<String>,
    pub messages: Vec<AgentMessage>,
    pub tool_names: Vec<String>,
    pub error: Option<String>,
    pub steering_queue_len: usize,
    pub follow_up_queue_len: usize,
    pub steering_mode: QueueMode,
    pub follow_up_mode: QueueMode,
}

impl AgentSnapshot {
    pub fn is_streaming(&self) -> bool {
        self.status == AgentStatus::Streaming
    }
}

/// Mutable state owned by the actor task.
#[derive(Debug)]
pub(crate) struct AgentState {
    pub(crate) model: ModelRef,
    pub(crate) system_prompt: Option<String>,
    pub(crate) thinking_level: ThinkingLevel,
    pub(crate) session_id: Option<String>,
    pub(crate) tools: ToolSet,
    pub(crate) messages: Vec<AgentMessage>,
    pub(crate) error: Option<String>,
    pub(crate) steering_queue: VecDeque<AgentMessage>,
    pub(crate) follow_up_queue: VecDeque<AgentMessage>,
    pub(crate) steering_mode: QueueMode,
    pub(crate) follow_up_mode: QueueMode,
}

impl AgentState {
    /// Clear conversation, queues and error. Configuration is kept.
    pub(crate) fn reset(&mut self) {
        self.messages.clear();
        self.error = None;
        self.steering_queue.clear();
        self.follow_up_queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(texts: &[&str]) -> VecDeque<AgentMessage> {
        texts.iter().map(|t| AgentMessage::user(*t)).collect()
    }

    #[test]
    fn one_at_a_time_takes_the_head() {
        let mut pending = queue(&["a", "b"]);
        let batch = QueueMode::OneAtATime.dequeue(&mut pending);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].text(), "a");
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn all_drains_the_queue() {
        let mut pending = queue(&["a", "b", "c"]);
        let batch = QueueMode::All.dequeue(&mut pending);
        let texts: Vec<_> = batch.iter().map(AgentMessage::text).collect();
        assert_eq!(texts, ["a", "b", "c"]);
        assert!(pending.is_empty());
        assert!(QueueMode::All.dequeue(&mut pending).is_empty());
    }

    #[test]
    fn queue_mode_defaults_and_parses() {
        assert_eq!(QueueMode::default(), QueueMode::OneAtATime);
        assert_eq!("all".parse::<QueueMode>().unwrap(), QueueMode::All);
        assert_eq!(QueueMode::OneAtATime.to_string(), "one_at_a_time");
    }
}

//! The agent actor: one long-lived conversation with serialized commands.

pub mod options;
pub mod runtime;
pub mod state;
pub mod subscription;

pub use options::AgentOptions;
pub use runtime::Agent;
pub use state::{AgentSnapshot, AgentStatus, QueueMode};
pub use subscription::Subscription;

//! roci-agent: the agent runtime core.
//!
//! Drives one conversation through repeated model turns, executes the tools
//! the model asks for on a bounded worker pool, and streams every state
//! change to observers. Runs can be steered, extended with follow-ups, or
//! aborted mid-flight without corrupting the conversation.
//!
//! The model client is supplied by the caller as a [`StreamFn`](agent_loop::StreamFn);
//! this crate never talks to a provider itself.
//!
//! # Quick Start
//!
//! ```no_run
//! use roci_agent::prelude::*;
//!
//! # async fn example(stream_fn: StreamFn) -> roci_agent::error::Result<()> {
//! let model: ModelRef = "anthropic:claude-sonnet".parse()?;
//! let agent = Agent::spawn(AgentOptions::new(model, stream_fn));
//! let _subscription = agent.subscribe(|event| println!("{}", event.kind())).await?;
//! agent.prompt_text("Hello!").await?;
//! agent.wait_for_idle(None).await?;
//! # Ok(())
//! # }
//! ```

pub mod abort;
pub mod agent;
pub mod agent_loop;
pub mod config;
pub mod error;
pub mod event_stream;
pub mod prelude;
pub mod tools;
pub mod types;
pub mod util;

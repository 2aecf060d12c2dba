//! Run driver: spawns the turn engine and wires it to an event stream.

mod control;
mod engine;
mod tooling;

pub(crate) use control::RunStream;
pub(crate) use engine::run_agent_loop;
pub use tooling::{SKIPPED_BY_ABORT, SKIPPED_BY_STEERING};

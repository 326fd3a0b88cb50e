//! External execution agent interface
//!
//! The agent is a long-running subprocess (a coding agent CLI) that receives
//! a natural-language instruction payload on stdin, works inside the task's
//! project directory, and writes progress back to the shared store through
//! its own tools. The core only launches it, streams its output, enforces
//! the timeout, and reads its exit status.

pub mod output;
pub mod prompt;
pub mod runner;

pub use output::{IdeaBlock, parse_idea_block};
pub use prompt::{IdeaLeg, PromptContext, build_idea_prompt, build_task_prompt};
pub use runner::{AgentError, AgentInvocation, AgentOutcome, AgentRunner, ProcessAgentRunner};

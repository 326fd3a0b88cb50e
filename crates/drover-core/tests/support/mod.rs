//! Shared test doubles for the integration tests: a scripted agent runner
//! and a scripted synthesis client, both driving the real in-memory store
//! through the public API.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use drover_core::agent::{AgentError, AgentInvocation, AgentOutcome, AgentRunner};
use drover_core::llm::{SynthesisClient, SynthesisError};

type InvocationHook = Box<dyn Fn(&AgentInvocation) + Send + Sync>;

/// Scripted [`AgentRunner`]. Pops one outcome per invocation and records
/// every invocation it sees. An optional hook runs while the "agent" is
/// still running, which lets a test simulate the agent writing to the
/// store through its own channel before the coordinator settles.
pub struct FakeRunner {
    outcomes: Mutex<VecDeque<Result<AgentOutcome, AgentError>>>,
    invocations: Mutex<Vec<AgentInvocation>>,
    hook: Mutex<Option<InvocationHook>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            invocations: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
        }
    }

    pub fn push(&self, exit_code: Option<i32>, stdout: &str, stderr: &str, timed_out: bool) {
        self.outcomes.lock().push_back(Ok(AgentOutcome {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            timed_out,
            duration: Duration::from_secs(1),
        }));
    }

    pub fn push_success(&self, stdout: &str) {
        self.push(Some(0), stdout, "", false);
    }

    pub fn push_failure(&self, exit_code: i32, stderr: &str) {
        self.push(Some(exit_code), "", stderr, false);
    }

    pub fn push_timeout(&self) {
        self.push(None, "", "", true);
    }

    pub fn push_spawn_error(&self, message: &str) {
        self.outcomes
            .lock()
            .push_back(Err(AgentError::Spawn(message.to_string())));
    }

    /// Run `hook` during every subsequent invocation, before the scripted
    /// outcome is returned.
    pub fn on_invocation(&self, hook: impl Fn(&AgentInvocation) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|invocation| invocation.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl AgentRunner for FakeRunner {
    async fn run(&self, invocation: AgentInvocation) -> Result<AgentOutcome, AgentError> {
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(&invocation);
        }
        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("agent invoked with no scripted outcome left"));
        self.invocations.lock().push(invocation);
        outcome
    }
}

/// Scripted [`SynthesisClient`]. Pops one canned reply per call and records
/// the prompts sent, so tests can assert both what the model was asked and
/// what happened with its answer.
pub struct ScriptedSynthesis {
    replies: Mutex<VecDeque<Result<String, SynthesisError>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedSynthesis {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: &str) {
        self.replies.lock().push_back(Ok(reply.to_string()));
    }

    pub fn push_failure(&self, error: SynthesisError) {
        self.replies.lock().push_back(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// User prompts sent so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

#[async_trait]
impl SynthesisClient for ScriptedSynthesis {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, SynthesisError> {
        self.calls
            .lock()
            .push((system.to_string(), prompt.to_string()));
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("synthesis called with no scripted reply left"))
    }
}

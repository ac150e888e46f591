//! Verification graph
//!
//! ```text
//!   start -> Verify --continue--> Working -> Done
//!              ^  \
//!              |   --interrupt--> Suspended
//!              |                     |
//!              +------ resume -------+
//! ```
//!
//! `invoke` starts a run at `Verify` with new input. A run that reaches
//! `Suspended` checkpoints the thread and returns; `resume` injects the
//! customer's reply and continues at `Verify`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chorus_ai::Message;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::checkpoint::{Checkpoint, Persistence, ThreadStatus};
use crate::error::{Error, Result};
use crate::events::AgentEvent;
use crate::memory::MemoryStore;
use crate::state::{ConversationState, ThreadId};
use crate::verify::VerificationGate;

/// Longest accepted resume payload, in characters
pub const MAX_RESUME_CHARS: usize = 8000;

/// Prompt reported when a thread suspends
pub const DEFAULT_SUSPEND_PROMPT: &str = "Please provide input.";

/// Default step budget for a work run
pub const DEFAULT_RECURSION_LIMIT: u32 = 25;

/// Graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Verify,
    Suspended,
    Working,
    Done,
}

/// Branch chosen after verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Continue,
    Interrupt,
}

/// What moves the graph out of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Routed(Route),
    Resumed,
    Completed,
}

const TRANSITIONS: &[(Node, Trigger, Node)] = &[
    (Node::Verify, Trigger::Routed(Route::Continue), Node::Working),
    (Node::Verify, Trigger::Routed(Route::Interrupt), Node::Suspended),
    (Node::Suspended, Trigger::Resumed, Node::Verify),
    (Node::Working, Trigger::Completed, Node::Done),
];

impl Node {
    /// Node every invocation starts at
    pub const ENTRY: Node = Node::Verify;

    /// Look up the successor of this node for `trigger`
    pub fn next(self, trigger: Trigger) -> Option<Node> {
        TRANSITIONS
            .iter()
            .find(|(from, on, _)| *from == self && *on == trigger)
            .map(|(_, _, to)| *to)
    }

    /// Nodes at which a run stops and checkpoints
    pub fn is_yield_point(self) -> bool {
        matches!(self, Node::Suspended | Node::Done)
    }
}

/// Continue once an account is known, otherwise wait for the customer
pub fn route(state: &ConversationState) -> Route {
    if state.is_verified() {
        Route::Continue
    } else {
        Route::Interrupt
    }
}

/// Work performed after verification succeeds
#[async_trait]
pub trait WorkPipeline: Send + Sync {
    async fn run(&self, state: &mut ConversationState, ctx: &RunContext) -> Result<()>;
}

/// Handles passed to the work pipeline for one run
#[derive(Clone)]
pub struct RunContext {
    pub thread_id: ThreadId,
    pub events: broadcast::Sender<AgentEvent>,
    pub memory: Arc<MemoryStore>,
}

impl RunContext {
    /// A context with a fresh thread id, private event channel and empty memory
    pub fn detached() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            thread_id: ThreadId::generate(),
            events,
            memory: Arc::new(MemoryStore::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Step budget granted to each work run
    pub recursion_limit: u32,
    /// Prompt reported by suspended threads
    pub suspend_prompt: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            suspend_prompt: DEFAULT_SUSPEND_PROMPT.to_string(),
        }
    }
}

/// New input for `invoke`, merged into the thread's state
#[derive(Debug, Clone, Default)]
pub struct GraphInput {
    pub messages: Vec<Message>,
    pub account_id: Option<String>,
}

impl GraphInput {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            account_id: None,
        }
    }
}

/// Customer reply supplied to a suspended thread
#[derive(Debug, Clone)]
pub struct ResumeInput(String);

impl ResumeInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Check the payload and turn it into the message to append
    pub fn validate(&self) -> Result<Message> {
        let text = self.0.trim();
        if text.is_empty() {
            return Err(Error::InvalidResume("input is empty".to_string()));
        }
        let chars = text.chars().count();
        if chars > MAX_RESUME_CHARS {
            return Err(Error::InvalidResume(format!(
                "input is {chars} characters, limit is {MAX_RESUME_CHARS}"
            )));
        }
        if text
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        {
            return Err(Error::InvalidResume(
                "input contains control characters".to_string(),
            ));
        }
        Ok(Message::user(text))
    }
}

/// Where the run stopped
pub type RunStatus = ThreadStatus;

/// Result of `invoke` or `resume`
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub thread_id: ThreadId,
    pub status: RunStatus,
    pub state: ConversationState,
    /// Messages appended during this call, input included
    pub new_messages: Vec<Message>,
}

impl RunOutcome {
    pub fn is_suspended(&self) -> bool {
        matches!(self.status, ThreadStatus::Suspended { .. })
    }

    /// Last message produced by the graph itself
    pub fn reply(&self) -> Option<&Message> {
        self.new_messages
            .iter()
            .rev()
            .find(|m| matches!(m, Message::Assistant { .. }))
    }
}

/// Marks a thread as running until dropped
struct BusyGuard<'a> {
    active: &'a Mutex<HashSet<ThreadId>>,
    thread_id: ThreadId,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.thread_id);
    }
}

/// Executes threads through the verification graph
pub struct GraphRunner {
    gate: VerificationGate,
    pipeline: Arc<dyn WorkPipeline>,
    persistence: Persistence,
    config: GraphConfig,
    event_tx: broadcast::Sender<AgentEvent>,
    active: Mutex<HashSet<ThreadId>>,
}

impl GraphRunner {
    pub fn new(
        gate: VerificationGate,
        pipeline: Arc<dyn WorkPipeline>,
        persistence: Persistence,
        config: GraphConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            gate,
            pipeline,
            persistence,
            config,
            event_tx,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Subscribe to events from every thread
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    /// Latest checkpoint of a thread
    pub fn checkpoint(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>> {
        self.persistence.checkpoints.load(thread_id)
    }

    pub fn threads(&self) -> Result<Vec<ThreadId>> {
        self.persistence.checkpoints.list()
    }

    /// Forget a thread; refuses while it is running
    pub fn delete_thread(&self, thread_id: &ThreadId) -> Result<bool> {
        let _guard = self.acquire(thread_id)?;
        self.persistence.checkpoints.delete(thread_id)
    }

    fn acquire(&self, thread_id: &ThreadId) -> Result<BusyGuard<'_>> {
        if !self.active.lock().insert(thread_id.clone()) {
            return Err(Error::ThreadBusy(thread_id.clone()));
        }
        Ok(BusyGuard {
            active: &self.active,
            thread_id: thread_id.clone(),
        })
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Start a run with new input.
    ///
    /// New threads start from empty state; finished threads continue from
    /// their saved state. Suspended threads must be resumed instead.
    pub async fn invoke(&self, thread_id: &ThreadId, input: GraphInput) -> Result<RunOutcome> {
        let _guard = self.acquire(thread_id)?;

        let mut state = match self.persistence.checkpoints.load(thread_id)? {
            Some(checkpoint) if checkpoint.is_suspended() => {
                return Err(Error::AwaitingResume(thread_id.clone()));
            }
            Some(checkpoint) => checkpoint.state,
            None => ConversationState::new(),
        };

        let mark = state.messages().len();
        if let Some(account_id) = input.account_id {
            state.set_account_id(account_id)?;
        }
        state.extend(input.messages);
        for message in state.messages_since(mark) {
            self.emit(AgentEvent::MessageAppended {
                thread_id: thread_id.clone(),
                message: message.clone(),
            });
        }

        tracing::info!(thread_id = %thread_id, "Invoking thread");
        self.execute(thread_id, state, Node::ENTRY, mark).await
    }

    /// Continue a suspended thread with the customer's reply
    pub async fn resume(&self, thread_id: &ThreadId, input: ResumeInput) -> Result<RunOutcome> {
        let _guard = self.acquire(thread_id)?;

        let checkpoint = self
            .persistence
            .checkpoints
            .load(thread_id)?
            .ok_or_else(|| Error::UnknownThread(thread_id.clone()))?;
        if !checkpoint.is_suspended() {
            return Err(Error::NotSuspended(thread_id.clone()));
        }
        let message = input.validate()?;

        let mut state = checkpoint.state;
        let mark = state.messages().len();
        state.push(message.clone());
        self.emit(AgentEvent::MessageAppended {
            thread_id: thread_id.clone(),
            message,
        });

        let node = Node::Suspended
            .next(Trigger::Resumed)
            .ok_or(Error::InvalidTransition(Node::Suspended))?;
        tracing::info!(thread_id = %thread_id, "Resuming thread");
        self.execute(thread_id, state, node, mark).await
    }

    async fn execute(
        &self,
        thread_id: &ThreadId,
        mut state: ConversationState,
        start: Node,
        mark: usize,
    ) -> Result<RunOutcome> {
        let ctx = RunContext {
            thread_id: thread_id.clone(),
            events: self.event_tx.clone(),
            memory: Arc::clone(&self.persistence.memory),
        };
        let mut node = start;

        loop {
            tracing::debug!(thread_id = %thread_id, ?node, "Entering node");
            self.emit(AgentEvent::NodeStart {
                thread_id: thread_id.clone(),
                node,
            });
            let before = state.messages().len();

            let trigger = match node {
                Node::Verify => {
                    let outcome = self.gate.run(&mut state).await?;
                    tracing::debug!(thread_id = %thread_id, ?outcome, "Verification finished");
                    let route = route(&state);
                    self.emit(AgentEvent::Routed {
                        thread_id: thread_id.clone(),
                        route,
                    });
                    Trigger::Routed(route)
                }
                Node::Working => {
                    state.remaining_steps = self.config.recursion_limit;
                    self.pipeline.run(&mut state, &ctx).await?;
                    Trigger::Completed
                }
                Node::Suspended => {
                    let status = ThreadStatus::Suspended {
                        prompt: self.config.suspend_prompt.clone(),
                    };
                    return self.finish(thread_id, state, status, mark);
                }
                Node::Done => return self.finish(thread_id, state, ThreadStatus::Done, mark),
            };

            for message in state.messages_since(before) {
                self.emit(AgentEvent::MessageAppended {
                    thread_id: thread_id.clone(),
                    message: message.clone(),
                });
            }
            node = node.next(trigger).ok_or(Error::InvalidTransition(node))?;
        }
    }

    fn finish(
        &self,
        thread_id: &ThreadId,
        state: ConversationState,
        status: ThreadStatus,
        mark: usize,
    ) -> Result<RunOutcome> {
        let checkpoint = Checkpoint::new(thread_id.clone(), state, status.clone());
        self.persistence.checkpoints.save(&checkpoint)?;

        match &status {
            ThreadStatus::Suspended { prompt } => {
                tracing::info!(thread_id = %thread_id, "Thread suspended awaiting input");
                self.emit(AgentEvent::Suspended {
                    thread_id: thread_id.clone(),
                    prompt: prompt.clone(),
                });
            }
            ThreadStatus::Done => {
                tracing::info!(thread_id = %thread_id, "Thread finished");
                self.emit(AgentEvent::Done {
                    thread_id: thread_id.clone(),
                });
            }
        }

        Ok(RunOutcome {
            thread_id: thread_id.clone(),
            status,
            new_messages: checkpoint.state.messages_since(mark).to_vec(),
            state: checkpoint.state,
        })
    }
}

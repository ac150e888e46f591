//! chorus-agent: verification graph and multi-agent work pipeline
//!
//! The human-in-the-loop verification graph is an explicit state machine
//! (`graph`) that gates a supervisor-driven work pipeline (`supervisor`,
//! `react`) behind account verification (`verify`). Thread state survives
//! suspend/resume cycles through a `CheckpointStore`.

pub mod checkpoint;
pub mod error;
pub mod events;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod react;
pub mod state;
pub mod supervisor;
pub mod tool;
pub mod transport;
pub mod verify;

pub use checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, Persistence,
    ThreadStatus,
};
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use graph::{
    GraphConfig, GraphInput, GraphRunner, MAX_RESUME_CHARS, Node, ResumeInput, Route, RunContext,
    RunOutcome, RunStatus, Trigger, WorkPipeline, route,
};
pub use llm::ChatModel;
pub use memory::{MemoryStore, UserProfile};
pub use react::{NEED_MORE_STEPS, ReactAgent};
pub use state::{ConversationState, ThreadId};
pub use supervisor::{OutputMode, Supervisor};
pub use tool::{BoxedTool, Tool, ToolContext, ToolResult};
pub use transport::{ModelSettings, ProviderTransport, RetryConfig, Transport, TurnRequest};
pub use verify::{
    AccountResolver, ClarifyingResponder, GateOutcome, IdentifierExtractor, LlmClarifyingResponder,
    LlmIdentifierExtractor, VerificationGate,
};

//! Graph and agent event types

use chorus_ai::{Message, Usage};
use serde::{Deserialize, Serialize};

use crate::graph::{Node, Route};
use crate::state::ThreadId;

/// Events emitted while a thread executes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A model turn started
    TurnStart,

    /// Partial assistant text during streaming
    MessageUpdate { text: String },

    /// A model response completed
    MessageEnd { message: Message },

    /// A model turn completed
    TurnEnd { usage: Usage },

    /// The graph entered a node
    NodeStart { thread_id: ThreadId, node: Node },

    /// The verification router picked a branch
    Routed { thread_id: ThreadId, route: Route },

    /// A message was appended to the thread's log
    MessageAppended { thread_id: ThreadId, message: Message },

    /// The supervisor delegated to a sub-agent
    Handoff { from: String, to: String },

    /// Tool execution started
    ToolExecutionStart {
        agent: String,
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        agent: String,
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// The thread is waiting for human input
    Suspended { thread_id: ThreadId, prompt: String },

    /// The thread reached its terminal node
    Done { thread_id: ThreadId },

    /// Error occurred
    Error { message: String },
}

impl AgentEvent {
    /// Check if this event ends an invocation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::Suspended { .. } | AgentEvent::Done { .. } | AgentEvent::Error { .. }
        )
    }
}

//! Supervisor that routes work to sub-agents through handoff tools

use std::sync::Arc;

use async_trait::async_trait;
use chorus_ai::{Content, Message, ToolCall};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::AgentEvent;
use crate::graph::{RunContext, WorkPipeline};
use crate::llm::ChatModel;
use crate::react::{NEED_MORE_STEPS, ReactAgent};
use crate::state::ConversationState;
use crate::transport::TurnRequest;

const HANDOFF_PREFIX: &str = "transfer_to_";

/// How much of a sub-agent's output is merged back into the thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Every message the sub-agent produced, tool traffic included
    #[default]
    FullHistory,
    /// Only the sub-agent's final answer
    LastMessage,
}

impl OutputMode {
    fn select(self, produced: Vec<Message>) -> Vec<Message> {
        match self {
            OutputMode::FullHistory => produced,
            OutputMode::LastMessage => produced
                .into_iter()
                .rev()
                .find(|m| matches!(m, Message::Assistant { .. }))
                .into_iter()
                .collect(),
        }
    }
}

pub struct Supervisor {
    name: String,
    system_prompt: String,
    model: ChatModel,
    agents: Vec<Arc<ReactAgent>>,
    output_mode: OutputMode,
}

impl Supervisor {
    pub fn new(system_prompt: impl Into<String>, model: ChatModel) -> Self {
        Self {
            name: "supervisor".to_string(),
            system_prompt: system_prompt.into(),
            model,
            agents: Vec::new(),
            output_mode: OutputMode::default(),
        }
    }

    pub fn with_agent(mut self, agent: ReactAgent) -> Self {
        self.agents.push(Arc::new(agent));
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    fn handoff_tools(&self) -> Vec<chorus_ai::Tool> {
        self.agents
            .iter()
            .map(|agent| {
                chorus_ai::Tool::new(
                    format!("{HANDOFF_PREFIX}{}", agent.name()),
                    format!("Hand the conversation to {}. {}", agent.name(), agent.description()),
                    serde_json::json!({ "type": "object", "properties": {} }),
                )
            })
            .collect()
    }

    fn agent_for_tool(&self, tool_name: &str) -> Option<&Arc<ReactAgent>> {
        let target = tool_name.strip_prefix(HANDOFF_PREFIX)?;
        self.agents.iter().find(|a| a.name() == target)
    }

    /// Answer every handoff call and pick the first valid target.
    ///
    /// Each call gets a tool result so the transcript stays well formed.
    fn answer_handoffs(
        &self,
        calls: &[ToolCall],
        state: &mut ConversationState,
    ) -> Option<Arc<ReactAgent>> {
        let mut target: Option<Arc<ReactAgent>> = None;
        for ToolCall { id, name, .. } in calls {
            let (text, is_error) = match self.agent_for_tool(name) {
                Some(agent) if target.is_none() => {
                    target = Some(Arc::clone(agent));
                    (format!("Successfully transferred to {}", agent.name()), false)
                }
                Some(_) => (
                    "Only one transfer is handled per turn; this one was skipped.".to_string(),
                    true,
                ),
                None => (format!("Unknown handoff target: {name}"), true),
            };
            state.push(Message::tool_result(id, name, vec![Content::text(text)], is_error));
        }
        target
    }
}

#[async_trait]
impl WorkPipeline for Supervisor {
    async fn run(&self, state: &mut ConversationState, ctx: &RunContext) -> Result<()> {
        let tools = self.handoff_tools();

        loop {
            if state.remaining_steps < 2 {
                state.push(Message::assistant(NEED_MORE_STEPS).with_name(&self.name));
                return Ok(());
            }
            state.remaining_steps -= 1;

            let request = TurnRequest {
                system_prompt: Some(self.system_prompt.clone()),
                messages: state.messages().to_vec(),
                tools: tools.clone(),
                response_format: None,
            };
            let reply = self
                .model
                .invoke(request, Some(&ctx.events))
                .await?
                .with_name(&self.name);
            let calls = reply.tool_calls();
            state.push(reply);

            if calls.is_empty() {
                return Ok(());
            }

            let Some(agent) = self.answer_handoffs(&calls, state) else {
                continue;
            };

            tracing::debug!(to = agent.name(), "Supervisor handoff");
            let _ = ctx.events.send(AgentEvent::Handoff {
                from: self.name.clone(),
                to: agent.name().to_string(),
            });

            let mut budget = state.remaining_steps;
            let produced = agent
                .run(state.messages(), state.account_id(), &mut budget, ctx)
                .await?;
            state.remaining_steps = budget;
            state.extend(self.output_mode.select(produced));
        }
    }
}

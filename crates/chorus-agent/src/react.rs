//! Tool-calling sub-agent

use std::collections::HashMap;
use std::sync::Arc;

use chorus_ai::{Message, ToolCall};

use crate::error::Result;
use crate::events::AgentEvent;
use crate::graph::RunContext;
use crate::llm::ChatModel;
use crate::tool::{BoxedTool, ToolContext, ToolResult};
use crate::transport::TurnRequest;

/// Appended when the step budget runs out before the agent finishes
pub const NEED_MORE_STEPS: &str = "Sorry, need more steps to process this request.";

/// An agent that alternates model turns and tool executions until the
/// model answers without calling a tool.
pub struct ReactAgent {
    name: String,
    description: String,
    system_prompt: String,
    tools: Vec<BoxedTool>,
    /// Cached compiled JSON schema validators keyed by tool name
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
    model: ChatModel,
    recall_preferences: bool,
}

impl ReactAgent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
        model: ChatModel,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
            schema_cache: HashMap::new(),
            model,
            recall_preferences: false,
        }
    }

    pub fn with_tools(mut self, tools: Vec<BoxedTool>) -> Self {
        self.schema_cache.clear();
        for tool in &tools {
            self.cache_tool_schema(tool);
        }
        self.tools = tools;
        self
    }

    /// Include the customer's saved music preferences in the system prompt
    pub fn with_preference_recall(mut self) -> Self {
        self.recall_preferences = true;
        self
    }

    fn cache_tool_schema(&mut self, tool: &BoxedTool) {
        let schema = tool.parameters();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    fn system_prompt_for(&self, account_id: Option<&str>, ctx: &RunContext) -> String {
        if !self.recall_preferences {
            return self.system_prompt.clone();
        }
        let preferences = account_id
            .and_then(|id| ctx.memory.profile(id))
            .map(|p| p.music_preferences)
            .filter(|p| !p.is_empty())
            .map(|p| p.join(", "))
            .unwrap_or_else(|| "None".to_string());
        format!(
            "{}\n\nPrior saved music preferences for this customer: {}",
            self.system_prompt, preferences
        )
    }

    /// Run the agent over `history` and return the messages it produced.
    ///
    /// Each model turn consumes one step from `remaining_steps`. When fewer
    /// than two steps remain the agent stops with [`NEED_MORE_STEPS`].
    pub async fn run(
        &self,
        history: &[Message],
        account_id: Option<&str>,
        remaining_steps: &mut u32,
        ctx: &RunContext,
    ) -> Result<Vec<Message>> {
        let system_prompt = self.system_prompt_for(account_id, ctx);
        let tools: Vec<_> = self.tools.iter().map(|t| t.definition()).collect();
        let tool_ctx = ToolContext::for_account(account_id);
        let mut produced: Vec<Message> = Vec::new();

        loop {
            if *remaining_steps < 2 {
                tracing::debug!(agent = %self.name, "Step budget exhausted");
                produced.push(Message::assistant(NEED_MORE_STEPS).with_name(&self.name));
                break;
            }
            *remaining_steps -= 1;

            let request = TurnRequest {
                system_prompt: Some(system_prompt.clone()),
                messages: history.iter().chain(produced.iter()).cloned().collect(),
                tools: tools.clone(),
                response_format: None,
            };
            let reply = self
                .model
                .invoke(request, Some(&ctx.events))
                .await?
                .with_name(&self.name);

            let tool_calls = reply.tool_calls();
            produced.push(reply);

            if tool_calls.is_empty() {
                break;
            }
            let results = self.execute_tool_calls(tool_calls, &tool_ctx, ctx).await;
            produced.extend(results);
        }

        Ok(produced)
    }

    async fn execute_tool_calls(
        &self,
        tool_calls: Vec<ToolCall>,
        tool_ctx: &ToolContext,
        ctx: &RunContext,
    ) -> Vec<Message> {
        let mut results = Vec::with_capacity(tool_calls.len());

        for ToolCall { id, name, arguments: args } in tool_calls {
            let _ = ctx.events.send(AgentEvent::ToolExecutionStart {
                agent: self.name.clone(),
                tool_call_id: id.clone(),
                tool_name: name.clone(),
                arguments: args.clone(),
            });

            let result = match self.tools.iter().find(|t| t.name() == name) {
                Some(tool) => {
                    let validation_error = self
                        .schema_cache
                        .get(&name)
                        .and_then(|validator| validate_with_validator(&args, validator));
                    match validation_error {
                        Some(err) => ToolResult::error(err),
                        None => tool.execute(args, tool_ctx).await,
                    }
                }
                None => ToolResult::error(format!("Tool not found: {}", name)),
            };

            let _ = ctx.events.send(AgentEvent::ToolExecutionEnd {
                agent: self.name.clone(),
                tool_call_id: id.clone(),
                tool_name: name.clone(),
                result: result.text_content(),
                is_error: result.is_error,
            });

            results.push(Message::tool_result(id, name, result.content, result.is_error));
        }

        results
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RunContext;
    use crate::llm::testing::{ScriptedTransport, chat_model, tool_call};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Looks up albums; records the account it ran for
    #[derive(Default)]
    struct AlbumsTool {
        seen_accounts: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl crate::tool::Tool for AlbumsTool {
        fn name(&self) -> &str {
            "get_albums_by_artist"
        }
        fn description(&self) -> &str {
            "Albums by an artist"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "artist": { "type": "string" } },
                "required": ["artist"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            ctx: &ToolContext,
        ) -> ToolResult {
            self.seen_accounts.lock().push(ctx.account_id.clone());
            let artist = arguments["artist"].as_str().unwrap_or_default();
            ToolResult::text(format!("[{{\"Title\": \"Back in Black\", \"ArtistName\": \"{artist}\"}}]"))
        }
    }

    fn agent(transport: Arc<ScriptedTransport>, tool: Arc<AlbumsTool>) -> ReactAgent {
        ReactAgent::new(
            "music_catalog_subagent",
            "Music catalog questions",
            "You answer music questions.",
            chat_model(transport),
        )
        .with_tools(vec![tool as BoxedTool])
    }

    #[tokio::test]
    async fn test_tool_loop_runs_until_plain_answer() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            tool_call("c1", "get_albums_by_artist", serde_json::json!({"artist": "AC/DC"})),
            Message::assistant("AC/DC released Back in Black."),
        ]));
        let tool = Arc::new(AlbumsTool::default());
        let agent = agent(transport.clone(), tool.clone());
        let ctx = RunContext::detached();
        let mut steps = 10;

        let produced = agent
            .run(&[Message::user("albums by AC/DC?")], Some("10"), &mut steps, &ctx)
            .await
            .unwrap();

        assert_eq!(produced.len(), 3);
        assert!(matches!(produced[1], Message::ToolResult { is_error: false, .. }));
        assert_eq!(produced[2].text(), "AC/DC released Back in Black.");
        assert_eq!(produced[2].name(), Some("music_catalog_subagent"));
        assert_eq!(steps, 8);
        assert_eq!(*tool.seen_accounts.lock(), vec![Some("10".to_string())]);
        // Second turn sees the tool result
        assert_eq!(transport.requests.lock()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_reported_to_model() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            tool_call("c1", "get_albums_by_artist", serde_json::json!({})),
            Message::assistant("Which artist?"),
        ]));
        let tool = Arc::new(AlbumsTool::default());
        let agent = agent(transport, tool.clone());
        let mut steps = 10;

        let produced = agent
            .run(&[Message::user("albums?")], None, &mut steps, &RunContext::detached())
            .await
            .unwrap();

        match &produced[1] {
            Message::ToolResult { is_error, content, .. } => {
                assert!(is_error);
                assert!(content[0].as_text().unwrap().contains("validation failed"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
        assert!(tool.seen_accounts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error_result() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            tool_call("c1", "delete_everything", serde_json::json!({})),
            Message::assistant("I can't do that."),
        ]));
        let agent = agent(transport, Arc::new(AlbumsTool::default()));
        let mut steps = 10;
        let produced = agent
            .run(&[Message::user("x")], None, &mut steps, &RunContext::detached())
            .await
            .unwrap();
        assert!(produced[1].text().contains("Tool not found"));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_appends_apology() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            tool_call("c1", "get_albums_by_artist", serde_json::json!({"artist": "U2"})),
            tool_call("c2", "get_albums_by_artist", serde_json::json!({"artist": "U2"})),
        ]));
        let agent = agent(transport.clone(), Arc::new(AlbumsTool::default()));
        let mut steps = 3;

        let produced = agent
            .run(&[Message::user("x")], None, &mut steps, &RunContext::detached())
            .await
            .unwrap();

        assert_eq!(steps, 1);
        let last = produced.last().unwrap();
        assert_eq!(last.text(), NEED_MORE_STEPS);
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn test_preference_recall_extends_prompt() {
        let transport = Arc::new(ScriptedTransport::new(vec![Message::assistant("ok")]));
        let agent = agent(transport.clone(), Arc::new(AlbumsTool::default())).with_preference_recall();
        let ctx = RunContext::detached();
        ctx.memory.remember_preferences("10", ["Jazz"]).unwrap();
        let mut steps = 5;

        agent
            .run(&[Message::user("recommend something")], Some("10"), &mut steps, &ctx)
            .await
            .unwrap();
        let prompt = transport.requests.lock()[0].system_prompt.clone().unwrap();
        assert!(prompt.ends_with("Prior saved music preferences for this customer: Jazz"));
    }
}

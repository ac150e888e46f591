//! End-to-end evaluation of the support graph against a LangSmith dataset
//!
//! Each example's question goes through the graph; when the graph stops to
//! ask for an identifier it is resumed with a fixed answer. The final reply
//! is graded for correctness by an LLM judge, the run and its score are
//! recorded under a fresh experiment, and an `evaluation_config__*.json`
//! file is written for the report step to pick up.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chorus_agent::{ChatModel, GraphInput, GraphRunner, ResumeInput, ThreadId, TurnRequest};
use chorus_ai::Message;
use chorus_ai::structured::{ResponseFormat, parse_structured};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

use crate::langsmith::{Example, LangSmithClient, LangSmithError, RunCreate};
use crate::report::EvaluationConfig;

pub const DEFAULT_DATASET: &str = "LangGraph 101 Multi-Agent: Final Response";
pub const DEFAULT_PREFIX: &str = "agent-o3mini-e2e";
pub const DEFAULT_RESUME: &str = "My customer ID is 10";
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const FEEDBACK_KEY: &str = "correctness";
pub const CORRECTNESS_THRESHOLD: &str = ">=0.75";

const TARGET_NAME: &str = "run_graph";

const CORRECTNESS_PROMPT: &str = "\
You are an expert data labeler grading answers from a customer support assistant for a digital music store.

Judge whether the output is correct for the given input, using the reference outputs as ground truth:
- Facts (names, counts, prices, dates) must agree with the reference.
- The output must answer what was asked, without contradicting the reference.
- Extra detail is fine as long as it is accurate.

Think through the comparison in `reasoning`, then set `score` to true only if the output is correct.";

#[derive(Error, Debug)]
pub enum EvalError {
    #[error(transparent)]
    LangSmith(#[from] LangSmithError),

    #[error(transparent)]
    Agent(#[from] chorus_agent::Error),

    #[error("Example {0} has no question in its inputs")]
    NoQuestion(String),

    #[error("The graph finished without a reply")]
    NoReply,

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;

/// The system under evaluation: one question in, one final answer out
#[async_trait]
pub trait Target: Send + Sync {
    async fn answer(&self, question: &str) -> Result<String>;
}

/// Scores a target's outputs against the reference outputs
#[async_trait]
pub trait Judge: Send + Sync {
    async fn grade(&self, inputs: &Value, outputs: &Value, reference: &Value) -> Result<Grade>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Grade {
    pub reasoning: String,
    pub score: bool,
}

impl Grade {
    pub fn value(&self) -> f64 {
        if self.score { 1.0 } else { 0.0 }
    }
}

/// Runs each question on its own thread, answering the identity check with
/// `resume_text`
pub struct GraphTarget {
    runner: Arc<GraphRunner>,
    resume_text: String,
}

impl GraphTarget {
    pub fn new(runner: Arc<GraphRunner>, resume_text: impl Into<String>) -> Self {
        Self {
            runner,
            resume_text: resume_text.into(),
        }
    }
}

#[async_trait]
impl Target for GraphTarget {
    async fn answer(&self, question: &str) -> Result<String> {
        let thread = ThreadId::generate();
        let mut outcome = self.runner.invoke(&thread, GraphInput::message(question)).await?;
        if outcome.is_suspended() {
            outcome = self
                .runner
                .resume(&thread, ResumeInput::new(self.resume_text.as_str()))
                .await?;
        }
        let answer = outcome
            .state
            .last_message()
            .map(Message::text)
            .filter(|text| !text.trim().is_empty())
            .ok_or(EvalError::NoReply)?;
        Ok(answer)
    }
}

fn grade_format() -> ResponseFormat {
    ResponseFormat::new(
        "score",
        json!({
            "type": "object",
            "properties": {
                "reasoning": {
                    "type": "string",
                    "description": "Step-by-step comparison of the output with the reference."
                },
                "score": {
                    "type": "boolean",
                    "description": "Whether the output is correct."
                }
            },
            "required": ["reasoning", "score"],
            "additionalProperties": false
        }),
    )
}

/// LLM-as-judge grading correctness with a structured `{reasoning, score}` answer
pub struct CorrectnessJudge {
    model: ChatModel,
}

impl CorrectnessJudge {
    pub fn new(model: ChatModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Judge for CorrectnessJudge {
    async fn grade(&self, inputs: &Value, outputs: &Value, reference: &Value) -> Result<Grade> {
        let request = TurnRequest {
            system_prompt: Some(CORRECTNESS_PROMPT.to_string()),
            messages: vec![Message::user(format!(
                "<input>\n{inputs}\n</input>\n\n<output>\n{outputs}\n</output>\n\n<reference_outputs>\n{reference}\n</reference_outputs>"
            ))],
            tools: vec![],
            response_format: Some(grade_format()),
        };
        let reply = self.model.invoke(request, None).await?;
        parse_structured(&reply).map_err(|e| EvalError::Agent(e.into()))
    }
}

/// The customer's question in an example's inputs: the last entry of
/// `messages`, or a plain `question`/`input` field
pub fn question_from_inputs(inputs: &Value) -> Option<String> {
    let from_messages = match inputs.get("messages") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(messages)) => messages.last().and_then(|m| match m {
            Value::String(text) => Some(text.clone()),
            other => other.get("content").and_then(Value::as_str).map(str::to_string),
        }),
        Some(other) => other.get("content").and_then(Value::as_str).map(str::to_string),
        None => None,
    };
    from_messages
        .or_else(|| {
            ["question", "input"]
                .iter()
                .find_map(|key| inputs.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .filter(|text| !text.trim().is_empty())
}

/// `{prefix}-{8 hex chars}`
pub fn experiment_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

/// File name for an experiment's config; `:` and `/` become `-`
pub fn config_file_name(experiment: &str) -> String {
    let safe = experiment.replace([':', '/'], "-");
    format!("evaluation_config__{}.json", safe)
}

/// Write the config the report step reads and return its path
pub fn write_config(
    dir: &Path,
    experiment: &str,
    criteria: &BTreeMap<String, String>,
) -> Result<PathBuf> {
    let config = EvaluationConfig {
        experiment_name: Some(experiment.to_string()),
        criteria: criteria.clone(),
    };
    let path = dir.join(config_file_name(experiment));
    std::fs::write(&path, serde_json::to_string(&config)?).map_err(|source| EvalError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub dataset: String,
    pub experiment_prefix: String,
    pub concurrency: usize,
    pub output_dir: PathBuf,
    pub criteria: BTreeMap<String, String>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            experiment_prefix: DEFAULT_PREFIX.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            output_dir: PathBuf::from("."),
            criteria: BTreeMap::from([(FEEDBACK_KEY.to_string(), CORRECTNESS_THRESHOLD.to_string())]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvalSummary {
    pub experiment: String,
    pub examples: usize,
    pub correct: usize,
    /// Examples whose run or grading failed
    pub failed: usize,
    pub config_path: PathBuf,
}

/// Run every example of the dataset through `target`, grade it and record
/// the experiment
pub async fn evaluate(
    client: &LangSmithClient,
    target: &dyn Target,
    judge: &dyn Judge,
    options: &EvalOptions,
) -> Result<EvalSummary> {
    let dataset_id = client.dataset_id(&options.dataset).await?;
    let examples = client.examples(&dataset_id).await?;
    let experiment = experiment_name(&options.experiment_prefix);
    client.create_experiment(&experiment, &dataset_id).await?;
    tracing::info!(%experiment, examples = examples.len(), "Starting evaluation");

    let session = experiment.as_str();
    let results: Vec<(String, Result<bool>)> = futures::stream::iter(&examples)
        .map(|example| async move {
            let result = run_example(client, session, target, judge, example).await;
            (example.id.clone(), result)
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    let mut correct = 0;
    let mut failed = 0;
    for (example_id, result) in results {
        match result {
            Ok(true) => correct += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(%example_id, "Example failed: {}", e);
                failed += 1;
            }
        }
    }

    let config_path = write_config(&options.output_dir, &experiment, &options.criteria)?;
    Ok(EvalSummary {
        experiment,
        examples: examples.len(),
        correct,
        failed,
        config_path,
    })
}

/// One example: answer, record the run, then grade it when the target succeeded
async fn run_example(
    client: &LangSmithClient,
    experiment: &str,
    target: &dyn Target,
    judge: &dyn Judge,
    example: &Example,
) -> Result<bool> {
    let start_time = Utc::now();
    let answer = match question_from_inputs(&example.inputs) {
        Some(question) => target.answer(&question).await,
        None => Err(EvalError::NoQuestion(example.id.clone())),
    };
    let end_time = Utc::now();

    let run = RunCreate {
        id: Uuid::new_v4(),
        name: TARGET_NAME.to_string(),
        run_type: "chain",
        inputs: example.inputs.clone(),
        outputs: answer.as_deref().ok().map(reply_outputs),
        error: answer.as_ref().err().map(ToString::to_string),
        session_name: experiment.to_string(),
        reference_example_id: example.id.clone(),
        start_time,
        end_time,
    };
    client.create_run(&run).await?;

    let outputs = reply_outputs(&answer?);
    let grade = judge.grade(&example.inputs, &outputs, &example.outputs).await?;
    tracing::debug!(example_id = %example.id, score = grade.score, "Graded");
    client
        .create_feedback(run.id, FEEDBACK_KEY, grade.value(), &grade.reasoning)
        .await?;
    Ok(grade.score)
}

/// Outputs in the dataset's shape: a single AI message
fn reply_outputs(text: &str) -> Value {
    json!({"messages": [{"role": "ai", "content": text}]})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::langsmith::fake::{DATASET, FakeLangSmith, spawn};
    use chorus_agent::transport::AgentEventStream;
    use chorus_agent::{
        AccountResolver, AgentEvent, ClarifyingResponder, ConversationState, GraphConfig,
        IdentifierExtractor, ModelSettings, Persistence, RunContext, Transport, VerificationGate,
        WorkPipeline,
    };
    use parking_lot::Mutex;

    /// Answers the one question it knows
    struct KnownAnswers;

    #[async_trait]
    impl Target for KnownAnswers {
        async fn answer(&self, question: &str) -> Result<String> {
            if question.contains("AC/DC") {
                Ok("AC/DC has 2 albums.".to_string())
            } else {
                Ok("I am not sure.".to_string())
            }
        }
    }

    /// Correct when the reply matches the reference text exactly
    struct ExactMatch;

    #[async_trait]
    impl Judge for ExactMatch {
        async fn grade(&self, _inputs: &Value, outputs: &Value, reference: &Value) -> Result<Grade> {
            let said = &outputs["messages"][0]["content"];
            let expected = &reference["messages"][0]["content"];
            Ok(Grade {
                reasoning: format!("expected {expected}, got {said}"),
                score: said == expected,
            })
        }
    }

    fn dataset() -> Vec<Value> {
        vec![
            json!({
                "id": "ex-1",
                "inputs": {"messages": [{"role": "user", "content": "How many albums does AC/DC have?"}]},
                "outputs": {"messages": [{"role": "ai", "content": "AC/DC has 2 albums."}]}
            }),
            json!({
                "id": "ex-2",
                "inputs": {"question": "What was my most recent purchase?"},
                "outputs": {"messages": [{"role": "ai", "content": "Your latest invoice is from 2009-04-09."}]}
            }),
            json!({"id": "ex-3", "inputs": {}, "outputs": {}}),
        ]
    }

    #[test]
    fn test_config_file_name_replaces_separators() {
        assert_eq!(
            config_file_name("agent:o3/mini-1a2b3c4d"),
            "evaluation_config__agent-o3-mini-1a2b3c4d.json"
        );
        assert_eq!(config_file_name("plain"), "evaluation_config__plain.json");
    }

    #[test]
    fn test_experiment_name_has_short_suffix() {
        let name = experiment_name(DEFAULT_PREFIX);
        let suffix = name.strip_prefix("agent-o3mini-e2e-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(name, experiment_name(DEFAULT_PREFIX));
    }

    #[test]
    fn test_question_from_inputs() {
        let chat = json!({"messages": [
            {"role": "user", "content": "hello"},
            {"role": "user", "content": "Which albums are by Miles Davis?"}
        ]});
        assert_eq!(
            question_from_inputs(&chat).as_deref(),
            Some("Which albums are by Miles Davis?")
        );
        assert_eq!(
            question_from_inputs(&json!({"messages": "Show my invoices"})).as_deref(),
            Some("Show my invoices")
        );
        assert_eq!(
            question_from_inputs(&json!({"question": "Any jazz?"})).as_deref(),
            Some("Any jazz?")
        );
        assert_eq!(question_from_inputs(&json!({"messages": []})), None);
        assert_eq!(question_from_inputs(&json!({"input": "  "})), None);
    }

    #[test]
    fn test_written_config_is_readable_by_report() {
        let dir = tempfile::tempdir().unwrap();
        let criteria = EvalOptions::default().criteria;
        let path = write_config(dir.path(), "agent:o3/mini-00ff00ff", &criteria).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "evaluation_config__agent-o3-mini-00ff00ff.json"
        );
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            r#"{"experiment_name":"agent:o3/mini-00ff00ff","criteria":{"correctness":">=0.75"}}"#
        );
        let config: EvaluationConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(config.experiment_name.as_deref(), Some("agent:o3/mini-00ff00ff"));
    }

    #[tokio::test]
    async fn test_evaluate_records_runs_and_writes_config() {
        let fake = Arc::new(FakeLangSmith {
            examples: dataset(),
            ..Default::default()
        });
        let client = spawn(fake.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let options = EvalOptions {
            dataset: DATASET.to_string(),
            experiment_prefix: "ci:o3/mini".to_string(),
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let summary = evaluate(&client, &KnownAnswers, &ExactMatch, &options)
            .await
            .unwrap();
        assert!(summary.experiment.starts_with("ci:o3/mini-"));
        assert_eq!(summary.examples, 3);
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.failed, 1);

        let experiments = fake.experiments.lock().clone();
        assert_eq!(experiments.len(), 1);
        assert_eq!(experiments[0]["name"], summary.experiment.as_str());
        assert_eq!(experiments[0]["reference_dataset_id"], "ds-1");

        let runs = fake.runs.lock().clone();
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|r| r["session_name"] == summary.experiment.as_str()));
        let unanswered = runs
            .iter()
            .find(|r| r["reference_example_id"] == "ex-3")
            .unwrap();
        assert!(unanswered["error"].as_str().unwrap().contains("no question"));
        let answered = runs
            .iter()
            .find(|r| r["reference_example_id"] == "ex-1")
            .unwrap();
        assert_eq!(
            answered["outputs"],
            json!({"messages": [{"role": "ai", "content": "AC/DC has 2 albums."}]})
        );

        let mut scores: Vec<f64> = fake
            .feedback
            .lock()
            .iter()
            .inspect(|f| assert_eq!(f["key"], FEEDBACK_KEY))
            .map(|f| f["score"].as_f64().unwrap())
            .collect();
        scores.sort_by(f64::total_cmp);
        assert_eq!(scores, vec![0.0, 1.0]);

        let file_name = summary.config_path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("evaluation_config__ci-o3-mini-"));
        assert_eq!(summary.config_path.parent(), Some(dir.path()));
        let config: EvaluationConfig =
            serde_json::from_str(&std::fs::read_to_string(&summary.config_path).unwrap()).unwrap();
        assert_eq!(config.experiment_name, Some(summary.experiment.clone()));
        assert_eq!(config.criteria.get(FEEDBACK_KEY).map(String::as_str), Some(">=0.75"));
    }

    #[tokio::test]
    async fn test_unknown_dataset_writes_nothing() {
        let fake = Arc::new(FakeLangSmith::default());
        let client = spawn(fake.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let options = EvalOptions {
            dataset: "missing".to_string(),
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let err = evaluate(&client, &KnownAnswers, &ExactMatch, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::LangSmith(LangSmithError::DatasetNotFound(_))));
        assert!(fake.experiments.lock().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    // Gate collaborators: digits are an account id, anything else gets a question back

    struct DigitsExtractor;

    #[async_trait]
    impl IdentifierExtractor for DigitsExtractor {
        async fn extract(&self, message: &Message) -> chorus_agent::Result<String> {
            let text = message.text();
            let token = text
                .split_whitespace()
                .find(|t| t.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or_default();
            Ok(token.to_string())
        }
    }

    struct SameId;

    #[async_trait]
    impl AccountResolver for SameId {
        async fn resolve(&self, identifier: &str) -> chorus_agent::Result<String> {
            Ok(identifier.to_string())
        }
    }

    struct AskForId;

    #[async_trait]
    impl ClarifyingResponder for AskForId {
        async fn respond(&self, _history: &[Message]) -> chorus_agent::Result<Message> {
            Ok(Message::assistant("Please share your customer ID."))
        }
    }

    struct InvoiceDesk;

    #[async_trait]
    impl WorkPipeline for InvoiceDesk {
        async fn run(&self, state: &mut ConversationState, _ctx: &RunContext) -> chorus_agent::Result<()> {
            let account = state.account_id().unwrap_or("nobody").to_string();
            state.push(Message::assistant(format!("Customer {account} has 7 invoices.")));
            Ok(())
        }
    }

    fn runner() -> Arc<GraphRunner> {
        let gate = VerificationGate::new(
            Box::new(DigitsExtractor),
            Box::new(SameId),
            Box::new(AskForId),
        );
        Arc::new(GraphRunner::new(
            gate,
            Arc::new(InvoiceDesk),
            Persistence::in_memory(),
            GraphConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_graph_target_answers_identity_check() {
        let target = GraphTarget::new(runner(), DEFAULT_RESUME);
        let answer = target.answer("How many invoices do I have?").await.unwrap();
        assert_eq!(answer, "Customer 10 has 7 invoices.");
    }

    #[tokio::test]
    async fn test_graph_target_skips_resume_when_verified() {
        let target = GraphTarget::new(runner(), DEFAULT_RESUME);
        let answer = target
            .answer("My ID is 42 , how many invoices do I have?")
            .await
            .unwrap();
        assert_eq!(answer, "Customer 42 has 7 invoices.");
    }

    /// Replies with fixed text and keeps the request it was sent
    struct CannedTransport {
        reply: String,
        requests: Mutex<Vec<TurnRequest>>,
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn run(
            &self,
            request: TurnRequest,
            _settings: &ModelSettings,
        ) -> chorus_agent::Result<AgentEventStream> {
            self.requests.lock().push(request);
            let message = Message::assistant(self.reply.clone());
            Ok(Box::pin(futures::stream::iter(vec![AgentEvent::MessageEnd { message }])))
        }
    }

    fn judge_with(reply: &str) -> (CorrectnessJudge, Arc<CannedTransport>) {
        let transport = Arc::new(CannedTransport {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        });
        let settings = ModelSettings::new(chorus_ai::models::resolve_model(
            chorus_ai::Provider::OpenAI,
            "o3-mini",
            None,
        ));
        (CorrectnessJudge::new(ChatModel::new(transport.clone(), settings)), transport)
    }

    #[tokio::test]
    async fn test_correctness_judge_reads_structured_grade() {
        let (judge, transport) = judge_with(r#"{"reasoning": "Counts agree.", "score": true}"#);
        let grade = judge
            .grade(
                &json!({"question": "How many albums does AC/DC have?"}),
                &reply_outputs("AC/DC has 2 albums."),
                &reply_outputs("Two albums."),
            )
            .await
            .unwrap();
        assert_eq!(grade.value(), 1.0);
        assert_eq!(grade.reasoning, "Counts agree.");

        let requests = transport.requests.lock();
        let request = &requests[0];
        assert_eq!(request.response_format.as_ref().unwrap().name, "score");
        let prompt = request.messages[0].text();
        assert!(prompt.contains("<reference_outputs>"));
        assert!(prompt.contains("Two albums."));
    }

    #[tokio::test]
    async fn test_correctness_judge_rejects_unstructured_reply() {
        let (judge, _) = judge_with("Looks right to me.");
        let err = judge
            .grade(&json!({}), &reply_outputs("x"), &reply_outputs("y"))
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Agent(_)));
    }
}

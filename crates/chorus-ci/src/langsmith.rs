//! LangSmith REST client: datasets, experiment runs and their feedback

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

use crate::config::LangSmithConfig;

const PAGE_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum LangSmithError {
    #[error("Project '{0}' not found")]
    ProjectNotFound(String),

    #[error("Dataset '{0}' not found")]
    DatasetNotFound(String),

    #[error("LangSmith API error: {status} - {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LangSmithError>;

/// One feedback score attached to a run
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub key: String,
    pub score: Option<f64>,
}

/// Where evaluation results come from
#[async_trait]
pub trait ExperimentSource: Send + Sync {
    /// IDs of every run recorded under the experiment's project
    async fn run_ids(&self, experiment: &str) -> Result<Vec<String>>;

    /// Feedback for the given runs
    async fn feedback(&self, run_ids: &[String]) -> Result<Vec<Feedback>>;
}

/// One dataset row: the target's inputs and the reference outputs
#[derive(Debug, Clone, Deserialize)]
pub struct Example {
    pub id: String,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub outputs: Value,
}

/// A finished target call recorded under an experiment
#[derive(Debug, Clone, Serialize)]
pub struct RunCreate {
    pub id: Uuid,
    pub name: String,
    pub run_type: &'static str,
    pub inputs: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub session_name: String,
    pub reference_example_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct Session {
    id: String,
}

#[derive(Deserialize)]
struct Dataset {
    id: String,
}

#[derive(Deserialize)]
struct RunPage {
    #[serde(default)]
    runs: Vec<RunRecord>,
    #[serde(default)]
    cursors: Option<Cursors>,
}

#[derive(Deserialize)]
struct RunRecord {
    id: String,
}

#[derive(Deserialize)]
struct Cursors {
    next: Option<String>,
}

#[derive(Deserialize)]
struct FeedbackRecord {
    key: String,
    #[serde(default)]
    score: Value,
}

impl From<FeedbackRecord> for Feedback {
    fn from(record: FeedbackRecord) -> Self {
        let score = match record.score {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            _ => None,
        };
        Self {
            key: record.key,
            score,
        }
    }
}

pub struct LangSmithClient {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
}

impl LangSmithClient {
    pub fn new(config: LangSmithConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| LangSmithError::Config(format!("invalid API key header: {}", e)))?;
        headers.insert("x-api-key", key);
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint,
            headers,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(LangSmithError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn project_id(&self, name: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/api/v1/sessions", self.endpoint))
            .headers(self.headers.clone())
            .query(&[("name", name)])
            .send()
            .await?;
        let sessions: Vec<Session> = Self::check(response).await?.json().await?;
        sessions
            .into_iter()
            .next()
            .map(|s| s.id)
            .ok_or_else(|| LangSmithError::ProjectNotFound(name.to_string()))
    }

    /// ID of the dataset with exactly this name
    pub async fn dataset_id(&self, name: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/api/v1/datasets", self.endpoint))
            .headers(self.headers.clone())
            .query(&[("name", name)])
            .send()
            .await?;
        let datasets: Vec<Dataset> = Self::check(response).await?.json().await?;
        datasets
            .into_iter()
            .next()
            .map(|d| d.id)
            .ok_or_else(|| LangSmithError::DatasetNotFound(name.to_string()))
    }

    /// Every example in a dataset
    pub async fn examples(&self, dataset_id: &str) -> Result<Vec<Example>> {
        let mut examples = Vec::new();
        loop {
            let response = self
                .client
                .get(format!("{}/api/v1/examples", self.endpoint))
                .headers(self.headers.clone())
                .query(&[
                    ("dataset", dataset_id.to_string()),
                    ("limit", PAGE_SIZE.to_string()),
                    ("offset", examples.len().to_string()),
                ])
                .send()
                .await?;
            let page: Vec<Example> = Self::check(response).await?.json().await?;
            let len = page.len();
            examples.extend(page);
            if len < PAGE_SIZE {
                break;
            }
        }
        tracing::debug!(dataset_id, examples = examples.len(), "Listed examples");
        Ok(examples)
    }

    /// Create the project an experiment's runs are recorded under; returns its ID
    pub async fn create_experiment(&self, name: &str, dataset_id: &str) -> Result<String> {
        let body = json!({
            "name": name,
            "reference_dataset_id": dataset_id,
            "start_time": Utc::now(),
        });
        let session: Session = self.post("/api/v1/sessions", &body).await?.json().await?;
        Ok(session.id)
    }

    pub async fn create_run(&self, run: &RunCreate) -> Result<()> {
        self.post("/api/v1/runs", run).await?;
        Ok(())
    }

    /// Attach a score to a run
    pub async fn create_feedback(&self, run_id: Uuid, key: &str, score: f64, comment: &str) -> Result<()> {
        let body = json!({
            "run_id": run_id,
            "key": key,
            "score": score,
            "comment": comment,
        });
        self.post("/api/v1/feedback", &body).await?;
        Ok(())
    }
}

#[async_trait]
impl ExperimentSource for LangSmithClient {
    async fn run_ids(&self, experiment: &str) -> Result<Vec<String>> {
        let project = self.project_id(experiment).await?;
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let body = json!({
                "session": [project],
                "limit": PAGE_SIZE,
                "cursor": cursor,
                "select": ["id"],
            });
            let page: RunPage = self.post("/api/v1/runs/query", &body).await?.json().await?;
            ids.extend(page.runs.into_iter().map(|r| r.id));
            cursor = page.cursors.and_then(|c| c.next);
            if cursor.is_none() {
                break;
            }
        }
        tracing::debug!(experiment, runs = ids.len(), "Listed runs");
        Ok(ids)
    }

    async fn feedback(&self, run_ids: &[String]) -> Result<Vec<Feedback>> {
        let mut feedback = Vec::new();
        for chunk in run_ids.chunks(PAGE_SIZE) {
            let mut offset = 0;
            loop {
                let mut query: Vec<(&str, String)> =
                    chunk.iter().map(|id| ("run", id.clone())).collect();
                query.push(("limit", PAGE_SIZE.to_string()));
                query.push(("offset", offset.to_string()));

                let response = self
                    .client
                    .get(format!("{}/api/v1/feedback", self.endpoint))
                    .headers(self.headers.clone())
                    .query(&query)
                    .send()
                    .await?;
                let page: Vec<FeedbackRecord> = Self::check(response).await?.json().await?;
                let len = page.len();
                feedback.extend(page.into_iter().map(Feedback::from));
                if len < PAGE_SIZE {
                    break;
                }
                offset += len;
            }
        }
        Ok(feedback)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-process LangSmith API that serves one dataset and records writes

    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::extract::{Query, RawQuery, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use super::LangSmithClient;
    use crate::config::LangSmithConfig;

    pub const DATASET: &str = "Support Desk: Final Response";
    pub const EXPERIMENT: &str = "agent-o3mini-e2e-1234";

    #[derive(Default)]
    pub struct FakeLangSmith {
        pub examples: Vec<Value>,
        pub experiments: Mutex<Vec<Value>>,
        pub runs: Mutex<Vec<Value>>,
        pub feedback: Mutex<Vec<Value>>,
    }

    type Shared = State<Arc<FakeLangSmith>>;
    type Params = Query<HashMap<String, String>>;

    async fn sessions(Query(q): Params) -> Json<Value> {
        if q.get("name").map(String::as_str) == Some(EXPERIMENT) {
            Json(json!([{"id": "proj-1", "name": EXPERIMENT}]))
        } else {
            Json(json!([]))
        }
    }

    async fn create_session(State(fake): Shared, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        let mut experiments = fake.experiments.lock();
        let id = format!("proj-new-{}", experiments.len());
        let name = body["name"].clone();
        experiments.push(body);
        (StatusCode::CREATED, Json(json!({"id": id, "name": name})))
    }

    async fn query_runs(Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(body["session"], json!(["proj-1"]));
        if body["cursor"].is_null() {
            Json(json!({"runs": [{"id": "r1"}, {"id": "r2"}], "cursors": {"next": "page2"}}))
        } else {
            Json(json!({"runs": [{"id": "r3"}], "cursors": {"next": null}}))
        }
    }

    async fn create_run(State(fake): Shared, Json(body): Json<Value>) -> StatusCode {
        fake.runs.lock().push(body);
        StatusCode::ACCEPTED
    }

    async fn feedback(RawQuery(query): RawQuery) -> Json<Value> {
        let query = query.unwrap_or_default();
        assert!(query.contains("run=r1") && query.contains("run=r3"));
        Json(json!([
            {"key": "correctness", "score": 1},
            {"key": "correctness", "score": 0.5},
            {"key": "concise", "score": true},
            {"key": "note", "score": null}
        ]))
    }

    async fn create_feedback(State(fake): Shared, Json(body): Json<Value>) -> Json<Value> {
        fake.feedback.lock().push(body);
        Json(json!({"id": "fb"}))
    }

    async fn datasets(Query(q): Params) -> Json<Value> {
        if q.get("name").map(String::as_str) == Some(DATASET) {
            Json(json!([{"id": "ds-1", "name": DATASET}]))
        } else {
            Json(json!([]))
        }
    }

    async fn examples(State(fake): Shared, Query(q): Params) -> Json<Value> {
        if q.get("dataset").map(String::as_str) != Some("ds-1") {
            return Json(json!([]));
        }
        let number = |key: &str| q.get(key).and_then(|v| v.parse::<usize>().ok());
        let page = fake
            .examples
            .iter()
            .skip(number("offset").unwrap_or(0))
            .take(number("limit").unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Json(Value::Array(page))
    }

    /// Serve `fake` on an ephemeral port and return a client pointed at it
    pub async fn spawn(fake: Arc<FakeLangSmith>) -> LangSmithClient {
        let app = Router::new()
            .route("/api/v1/sessions", get(sessions).post(create_session))
            .route("/api/v1/runs", post(create_run))
            .route("/api/v1/runs/query", post(query_runs))
            .route("/api/v1/feedback", get(feedback).post(create_feedback))
            .route("/api/v1/datasets", get(datasets))
            .route("/api/v1/examples", get(examples))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        LangSmithClient::new(LangSmithConfig {
            api_key: "lsv2_test".to_string(),
            endpoint: format!("http://{}", addr),
        })
        .unwrap()
    }
}

//! GitHub contents API client

use std::io;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter};
use thiserror::Error;

use crate::config::GithubConfig;

const API_VERSION: &str = "2022-11-28";

/// Which request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    GetSha,
    PutContent,
}

impl Stage {
    fn label(self) -> &'static str {
        match self {
            Stage::GetSha => "GET file SHA",
            Stage::PutContent => "PUT content",
        }
    }
}

#[derive(Error, Debug)]
pub enum GithubError {
    #[error("GitHub API error ({}): {status} - {body}", .stage.label())]
    Status {
        stage: Stage,
        status: StatusCode,
        body: String,
    },

    #[error("Network error connecting to GitHub ({}): {source}", .stage.label())]
    Network {
        stage: Stage,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid GitHub configuration: {0}")]
    Config(String),
}

#[derive(Debug, Serialize)]
struct PutContents<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

/// Commits a single file through the contents API
pub struct GithubClient {
    client: reqwest::Client,
    config: GithubConfig,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &GithubConfig {
        &self.config
    }

    fn headers(&self) -> Result<HeaderMap, GithubError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.config.token))
            .map_err(|e| GithubError::Config(format!("invalid token header: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github.v3+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        headers.insert(USER_AGENT, HeaderValue::from_static("chorus-ci"));
        Ok(headers)
    }

    /// SHA of the file on the configured branch; `None` when it doesn't exist yet
    pub async fn current_sha(&self) -> Result<Option<String>, GithubError> {
        let stage = Stage::GetSha;
        let response = self
            .client
            .get(self.config.contents_url())
            .headers(self.headers()?)
            .query(&[("ref", self.config.branch.as_str())])
            .send()
            .await
            .map_err(|source| GithubError::Network { stage, source })?;

        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|source| GithubError::Network { stage, source })?;
                Ok(body.get("sha").and_then(|v| v.as_str()).map(str::to_string))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(GithubError::Status {
                stage,
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Create or replace the manifest file with `manifest` as 2-space JSON.
    ///
    /// Returns GitHub's response body (`commit` and `content` objects).
    pub async fn commit_manifest(
        &self,
        manifest: &serde_json::Value,
        commit_hash: &str,
    ) -> Result<serde_json::Value, GithubError> {
        let sha = self.current_sha().await?;

        let pretty = manifest_json(manifest)
            .map_err(|e| GithubError::Config(format!("manifest is not serializable: {}", e)))?;
        let body = PutContents {
            message: commit_message(&self.config.file_path, commit_hash),
            content: STANDARD.encode(pretty.as_bytes()),
            branch: &self.config.branch,
            sha,
        };

        tracing::info!(
            url = %self.config.contents_url(),
            branch = %self.config.branch,
            update = body.sha.is_some(),
            "Committing manifest"
        );

        let stage = Stage::PutContent;
        let response = self
            .client
            .put(self.config.contents_url())
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|source| GithubError::Network { stage, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GithubError::Status {
                stage,
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }
        response
            .json()
            .await
            .map_err(|source| GithubError::Network { stage, source })
    }
}

pub fn commit_message(file_path: &str, commit_hash: &str) -> String {
    format!("feat: Update {} via webhook - commit {}", file_path, commit_hash)
}

/// Render a manifest as 2-space indented JSON.
///
/// Keys keep the order they arrived in. Characters outside printable ASCII
/// are written as `\uXXXX` escapes, with surrogate pairs above the BMP.
pub fn manifest_json(manifest: &serde_json::Value) -> serde_json::Result<String> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, AsciiPretty(PrettyFormatter::new()));
    manifest.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

struct AsciiPretty<'a>(PrettyFormatter<'a>);

impl Formatter for AsciiPretty<'_> {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if (' '..='~').contains(&c) {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }

    fn begin_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.0.begin_array(writer)
    }

    fn end_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.0.end_array(writer)
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.0.begin_array_value(writer, first)
    }

    fn end_array_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.0.end_array_value(writer)
    }

    fn begin_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.0.begin_object(writer)
    }

    fn end_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.0.end_object(writer)
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.0.begin_object_key(writer, first)
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.0.begin_object_value(writer)
    }

    fn end_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.0.end_object_value(writer)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! A minimal stand-in for the contents API

    use std::sync::Arc;

    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use crate::config::GithubConfig;

    #[derive(Default)]
    pub struct FakeGithub {
        /// SHA returned by GET; `None` answers 404
        pub sha: Option<String>,
        /// Status forced on GET when not 200/404
        pub get_status: Option<u16>,
        /// Status forced on PUT
        pub put_status: Option<u16>,
        pub puts: Mutex<Vec<Value>>,
        pub get_refs: Mutex<Vec<String>>,
        pub auth: Mutex<Vec<String>>,
    }

    async fn get_contents(
        State(fake): State<Arc<FakeGithub>>,
        headers: HeaderMap,
        Query(query): Query<std::collections::HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            fake.auth.lock().push(auth.to_string());
        }
        fake.get_refs
            .lock()
            .push(query.get("ref").cloned().unwrap_or_default());
        if let Some(code) = fake.get_status {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, Json(json!({"message": "boom"})));
        }
        match &fake.sha {
            Some(sha) => (StatusCode::OK, Json(json!({"sha": sha}))),
            None => (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"}))),
        }
    }

    async fn put_contents(
        State(fake): State<Arc<FakeGithub>>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        fake.puts.lock().push(body);
        if let Some(code) = fake.put_status {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, Json(json!({"message": "rejected"})));
        }
        (
            StatusCode::CREATED,
            Json(json!({
                "commit": {"sha": "c0ffee", "message": "ok"},
                "content": {"path": "cicd/prompt_manifest.json", "sha": "d00d"}
            })),
        )
    }

    /// Serve the fake on an ephemeral port and return a config pointing at it
    pub async fn spawn(fake: Arc<FakeGithub>) -> GithubConfig {
        let app = Router::new()
            .route(
                "/repos/:owner/:repo/contents/*path",
                get(get_contents).put(put_contents),
            )
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        GithubConfig {
            token: "ghp_test".to_string(),
            owner: "acme".to_string(),
            repo: "support".to_string(),
            file_path: "cicd/prompt_manifest.json".to_string(),
            branch: "main".to_string(),
            api_url: format!("http://{}", addr),
        }
    }
}

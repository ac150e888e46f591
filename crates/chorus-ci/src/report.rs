//! Evaluation report: averages feedback per key and checks it against
//! thresholds from `evaluation_config__*.json` files.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::langsmith::ExperimentSource;

pub const DEFAULT_CONFIG_GLOB: &str = "evaluation_config__*.json";
pub const DEFAULT_OUTPUT: &str = "eval_comment.md";

#[derive(Error, Debug, PartialEq)]
#[error("Invalid threshold format: {0}")]
pub struct InvalidThreshold(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl Comparison {
    /// Longest symbols first so `>=` is not read as `>`
    const SYMBOLS: [(&'static str, Comparison); 6] = [
        (">=", Comparison::Ge),
        ("<=", Comparison::Le),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        (">", Comparison::Gt),
        ("<", Comparison::Lt),
    ];

    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Gt => lhs > rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Eq => lhs == rhs,
            Comparison::Ne => lhs != rhs,
        }
    }
}

/// A criterion such as `>=0.75`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub comparison: Comparison,
    pub value: f64,
}

impl Threshold {
    pub fn parse(expr: &str) -> Result<Self, InvalidThreshold> {
        let (symbol, comparison) = Comparison::SYMBOLS
            .iter()
            .find(|(symbol, _)| expr.starts_with(symbol))
            .ok_or_else(|| InvalidThreshold(expr.to_string()))?;
        let value = expr[symbol.len()..]
            .trim()
            .parse()
            .map_err(|_| InvalidThreshold(expr.to_string()))?;
        Ok(Self {
            comparison: *comparison,
            value,
        })
    }

    pub fn check(&self, score: f64) -> bool {
        self.comparison.apply(score, self.value)
    }
}

/// Contents of an `evaluation_config__*.json` file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub experiment_name: Option<String>,
    #[serde(default)]
    pub criteria: BTreeMap<String, String>,
}

/// One row of an experiment's table
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: String,
    pub average: Option<f64>,
    /// Threshold expression, when one was configured and parsed
    pub criterion: Option<String>,
    /// `None` when no threshold applies
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExperimentReport {
    Failed { name: String, error: String },
    Empty { name: String },
    Scored {
        name: String,
        rows: Vec<Row>,
        passed: usize,
        failed: usize,
    },
}

impl ExperimentReport {
    pub fn is_error(&self) -> bool {
        matches!(self, ExperimentReport::Failed { .. })
    }
}

/// Average the scores per feedback key and apply the criteria
pub fn score(name: &str, criteria: &BTreeMap<String, String>, feedback: &[(String, f64)]) -> ExperimentReport {
    let mut by_key: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (key, score) in feedback {
        by_key.entry(key.as_str()).or_default().push(*score);
    }
    if by_key.is_empty() {
        return ExperimentReport::Empty {
            name: name.to_string(),
        };
    }

    let mut rows = Vec::new();
    let (mut passed, mut failed) = (0, 0);
    for (key, scores) in by_key {
        let average = (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);
        let mut row = Row {
            key: key.to_string(),
            average,
            criterion: None,
            passed: None,
        };

        if let Some(expr) = criteria.get(key).filter(|e| !e.is_empty()) {
            match Threshold::parse(expr) {
                Ok(threshold) => {
                    let ok = average.is_some_and(|avg| threshold.check(avg));
                    row.criterion = Some(expr.clone());
                    row.passed = Some(ok);
                }
                Err(e) => {
                    tracing::warn!("Invalid threshold '{}' for key '{}': {}", expr, key, e);
                    row.passed = Some(false);
                }
            }
            match row.passed {
                Some(true) => passed += 1,
                _ => failed += 1,
            }
        }
        rows.push(row);
    }

    ExperimentReport::Scored {
        name: name.to_string(),
        rows,
        passed,
        failed,
    }
}

/// Evaluate one config file; `None` when the file is unusable
pub async fn process_config(path: &Path, source: &dyn ExperimentSource) -> Option<ExperimentReport> {
    tracing::info!("Processing evaluation config: {}", path.display());

    let config: EvaluationConfig = match fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
    {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to read config {}: {}", path.display(), e);
            return None;
        }
    };
    let Some(name) = config.experiment_name.filter(|n| !n.is_empty()) else {
        tracing::error!("No experiment_name found in {}", path.display());
        return None;
    };

    let run_ids = match source.run_ids(&name).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!("Error processing experiment {}: {}", name, e);
            return Some(ExperimentReport::Failed {
                name,
                error: e.to_string(),
            });
        }
    };
    if run_ids.is_empty() {
        tracing::warn!("No runs found for experiment: {}", name);
        return Some(ExperimentReport::Empty { name });
    }

    match source.feedback(&run_ids).await {
        Ok(feedback) => {
            let scores: Vec<(String, f64)> = feedback
                .into_iter()
                .filter_map(|f| f.score.map(|s| (f.key, s)))
                .collect();
            Some(score(&name, &config.criteria, &scores))
        }
        Err(e) => {
            tracing::error!("Error processing experiment {}: {}", name, e);
            Some(ExperimentReport::Failed {
                name,
                error: e.to_string(),
            })
        }
    }
}

fn format_score(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}", v))
}

pub fn render_markdown(reports: &[ExperimentReport]) -> String {
    let mut out = String::from("# 🧪 LangSmith Evaluation Results\n\n");

    for report in reports {
        match report {
            ExperimentReport::Failed { name, error } => {
                let _ = write!(out, "### ❌ {}\n\n**Error:** {}\n\n", name, error);
            }
            ExperimentReport::Empty { name } => {
                let _ = write!(out, "### ⚠️ {}\n\nNo evaluation results found.\n\n", name);
            }
            ExperimentReport::Scored {
                name,
                rows,
                passed,
                failed,
            } => {
                let _ = write!(out, "### 📊 {}\n\n", name);
                out.push_str("| Feedback Key | Avg Score | Criterion | Pass? |\n");
                out.push_str("|--------------|-----------|-----------|--------|\n");
                for row in rows {
                    let pass = match row.passed {
                        Some(true) => "✅",
                        Some(false) => "❌",
                        None => "N/A",
                    };
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} | {} |",
                        row.key,
                        format_score(row.average),
                        row.criterion.as_deref().unwrap_or("–"),
                        pass
                    );
                }
                let summary = if passed + failed > 0 {
                    format!("**✅ {} Passed, ❌ {} Failed**", passed, failed)
                } else {
                    "No thresholds defined.".to_string()
                };
                let _ = write!(out, "\n{}\n\n", summary);
            }
        }
    }
    out
}

/// Configuration document types
///
/// One document holds every data connection, dataset and workflow of a config
/// generation. The same types are persisted as JSON per generation, so the
/// serde layout here doubles as the storage format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// A complete configuration generation as written by the operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub data_connections: Vec<DataConnection>,
    #[serde(default)]
    pub datasets: Vec<Dataset>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

/// Named connection descriptor
///
/// `path` is used by flat-file connections, `connection_string` by relational
/// ones. Values starting with `$` are expanded from the environment when the
/// connection is resolved, never at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConnection {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConnectionKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection_string: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Csv,
    Postgres,
    /// Anything else; rejected by validation
    #[serde(other)]
    Unsupported,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Csv => "csv",
            ConnectionKind::Postgres => "postgres",
            ConnectionKind::Unsupported => "unsupported",
        }
    }

    /// Relational connections require a query on every data source.
    pub fn is_relational(&self) -> bool {
        matches!(self, ConnectionKind::Postgres)
    }

    pub fn parse(kind: &str) -> Self {
        match kind {
            "csv" => ConnectionKind::Csv,
            "postgres" => ConnectionKind::Postgres,
            _ => ConnectionKind::Unsupported,
        }
    }
}

/// Extraction descriptor bound to a data connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub data_connection: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,
}

/// Materialized, joined table definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<Refresh>,
    pub data_source: DataSource,
    #[serde(default)]
    pub joins: Vec<Join>,
}

impl Dataset {
    /// Primary source first, then each join's source in order.
    pub fn sources(&self) -> impl Iterator<Item = &DataSource> {
        std::iter::once(&self.data_source).chain(self.joins.iter().map(|j| &j.data_source))
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh.as_ref().map(|r| r.interval)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refresh {
    /// e.g. "30s", "5m", "1h30m"
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    #[serde(rename = "type", default)]
    pub kind: JoinKind,
    pub data_source: DataSource,
    #[serde(default)]
    pub columns: Vec<JoinColumns>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    /// SQL keyword placed in front of `JOIN`
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Full => "FULL",
        }
    }
}

/// One `left = right` equality of a join condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinColumns {
    pub left_column: String,
    pub right_column: String,
}

/// Linear workflow: a start task and tasks chained through `next`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<WorkflowTrigger>,
    #[serde(default)]
    pub tasks: BTreeMap<String, WorkflowTask>,
}

impl Workflow {
    /// Whether a refresh of `dataset_id` should start this workflow
    pub fn subscribes_to(&self, dataset_id: &str) -> bool {
        self.on
            .as_ref()
            .map(|on| on.dataset_refresh.iter().any(|d| d == dataset_id))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    #[serde(default)]
    pub dataset_refresh: Vec<String>,
}

/// A single task of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Next task id; empty means the run ends after this task
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub next: String,
    #[serde(rename = "type", default = "default_task_type")]
    pub kind: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Static input, overlaid by the previous task's output
    #[serde(default)]
    pub with: Map<String, Value>,
    #[serde(default)]
    pub with_datasets: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub script: String,
}

fn default_task_type() -> String {
    "container".to_string()
}

impl WorkflowTask {
    pub fn next_task(&self) -> Option<&str> {
        if self.next.is_empty() {
            None
        } else {
            Some(&self.next)
        }
    }
}

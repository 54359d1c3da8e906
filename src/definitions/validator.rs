/// Configuration validation
///
/// Checks for:
/// - Valid, unique ids per kind
/// - Required fields per connection type
/// - Data sources bound to connections of the same document
/// - Workflow start tasks, refresh subscriptions and acyclic `next` chains
use crate::{
    definitions::types::{ConfigDocument, ConnectionKind, DataConnection, Dataset, Workflow},
    error::{Error, Result},
    workflow::graph::WorkflowGraph,
};
use std::collections::{HashMap, HashSet};

/// Letter first, letter or digit last, `[A-Za-z0-9_-]` in between.
pub fn is_valid_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    first.is_ascii_alphabetic()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
}

fn check_id(kind: &str, id: &str) -> Result<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid {} id: {:?}", kind, id)))
    }
}

fn check_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        check_id(kind, id)?;
        if !seen.insert(id) {
            return Err(Error::Validation(format!("duplicate {} id: {}", kind, id)));
        }
    }
    Ok(())
}

pub fn validate_document(document: &ConfigDocument) -> Result<()> {
    check_unique(
        "data connection",
        document.data_connections.iter().map(|c| c.id.as_str()),
    )?;
    check_unique("dataset", document.datasets.iter().map(|d| d.id.as_str()))?;
    check_unique("workflow", document.workflows.iter().map(|w| w.id.as_str()))?;

    let connections: HashMap<&str, &DataConnection> = document
        .data_connections
        .iter()
        .map(|c| (c.id.as_str(), c))
        .collect();
    for connection in &document.data_connections {
        validate_connection(connection)?;
    }

    for dataset in &document.datasets {
        validate_dataset(dataset, &connections)?;
    }

    let dataset_ids: HashSet<&str> = document.datasets.iter().map(|d| d.id.as_str()).collect();
    for workflow in &document.workflows {
        validate_workflow(workflow, &dataset_ids)?;
    }

    Ok(())
}

fn validate_connection(connection: &DataConnection) -> Result<()> {
    match connection.kind {
        ConnectionKind::Csv if connection.path.is_empty() => Err(Error::Validation(format!(
            "data connection '{}' of type csv requires a path",
            connection.id
        ))),
        ConnectionKind::Postgres if connection.connection_string.is_empty() => {
            Err(Error::Validation(format!(
                "data connection '{}' of type postgres requires a connection_string",
                connection.id
            )))
        }
        ConnectionKind::Unsupported => Err(Error::Validation(format!(
            "data connection '{}' has an unsupported type",
            connection.id
        ))),
        _ => Ok(()),
    }
}

fn validate_dataset(dataset: &Dataset, connections: &HashMap<&str, &DataConnection>) -> Result<()> {
    let mut source_ids = HashSet::new();
    for source in dataset.sources() {
        check_id("data source", &source.id)?;
        if source.id == dataset.id {
            return Err(Error::Validation(format!(
                "dataset '{}' shares its id with one of its data sources",
                dataset.id
            )));
        }
        if !source_ids.insert(source.id.as_str()) {
            return Err(Error::Validation(format!(
                "dataset '{}' uses data source '{}' more than once",
                dataset.id, source.id
            )));
        }
        let connection = connections.get(source.data_connection.as_str()).ok_or_else(|| {
            Error::Validation(format!(
                "data source '{}' references unknown data connection '{}'",
                source.id, source.data_connection
            ))
        })?;
        if connection.kind.is_relational() && source.query.trim().is_empty() {
            return Err(Error::Validation(format!(
                "data source '{}' on {} connection '{}' requires a query",
                source.id,
                connection.kind.as_str(),
                connection.id
            )));
        }
    }

    for join in &dataset.joins {
        if join.columns.is_empty() {
            return Err(Error::Validation(format!(
                "join on '{}' in dataset '{}' has no columns",
                join.data_source.id, dataset.id
            )));
        }
        if join
            .columns
            .iter()
            .any(|c| c.left_column.is_empty() || c.right_column.is_empty())
        {
            return Err(Error::Validation(format!(
                "join on '{}' in dataset '{}' has an empty column name",
                join.data_source.id, dataset.id
            )));
        }
    }
    Ok(())
}

fn validate_workflow(workflow: &Workflow, dataset_ids: &HashSet<&str>) -> Result<()> {
    if workflow.tasks.keys().any(|id| id.is_empty()) {
        return Err(Error::Validation(format!(
            "workflow '{}' has a task with an empty id",
            workflow.id
        )));
    }
    if !workflow.tasks.contains_key(&workflow.start) {
        return Err(Error::Validation(format!(
            "workflow '{}' starts at unknown task '{}'",
            workflow.id, workflow.start
        )));
    }
    if let Some(on) = &workflow.on {
        for dataset in &on.dataset_refresh {
            if !dataset_ids.contains(dataset.as_str()) {
                return Err(Error::Validation(format!(
                    "workflow '{}' subscribes to unknown dataset '{}'",
                    workflow.id, dataset
                )));
            }
        }
    }
    if let Some(task) = WorkflowGraph::from_workflow(workflow).find_cycle() {
        return Err(Error::Validation(format!(
            "workflow '{}' has a cycle in its next chain at task '{}'",
            workflow.id, task
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::parser::{parse_config, ConfigBase};

    fn validation_message(yaml: &str) -> String {
        match parse_config(yaml, &ConfigBase::None) {
            Err(Error::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_id_pattern() {
        assert!(is_valid_id("a"));
        assert!(is_valid_id("people_orders-2"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("1abc"));
        assert!(!is_valid_id("abc_"));
        assert!(!is_valid_id("ab c"));
        assert!(!is_valid_id("åbc"));
    }

    #[test]
    fn test_duplicate_workflow_ids() {
        let yaml = r#"
workflows:
  - { id: wf, start: a, tasks: { a: { image: alpine } } }
  - { id: wf, start: a, tasks: { a: { image: alpine } } }
"#;
        assert!(validation_message(yaml).contains("duplicate workflow id"));
    }

    #[test]
    fn test_connection_requirements() {
        let yaml = "data_connections:\n  - { id: pg, type: postgres }\n";
        assert!(validation_message(yaml).contains("connection_string"));

        let yaml = "data_connections:\n  - { id: f, type: csv }\n";
        assert!(validation_message(yaml).contains("requires a path"));

        let yaml = "data_connections:\n  - { id: m, type: mysql, path: x }\n";
        assert!(validation_message(yaml).contains("unsupported"));
    }

    #[test]
    fn test_dataset_rules() {
        let yaml = r#"
data_connections:
  - { id: pg, type: postgres, connection_string: "postgres://localhost" }
datasets:
  - id: ds
    data_source: { id: src, data_connection: pg }
"#;
        assert!(validation_message(yaml).contains("requires a query"));

        let yaml = r#"
data_connections:
  - { id: f, type: csv, path: a.csv }
datasets:
  - id: ds
    data_source: { id: ds, data_connection: f }
"#;
        assert!(validation_message(yaml).contains("shares its id"));

        let yaml = r#"
data_connections:
  - { id: f, type: csv, path: a.csv }
datasets:
  - id: ds
    data_source: { id: a, data_connection: f }
    joins:
      - data_source: { id: a, data_connection: f }
        columns: [ { left_column: id, right_column: id } ]
"#;
        assert!(validation_message(yaml).contains("more than once"));

        let yaml = r#"
datasets:
  - id: ds
    data_source: { id: a, data_connection: missing }
"#;
        assert!(validation_message(yaml).contains("unknown data connection"));
    }

    #[test]
    fn test_workflow_rules() {
        let yaml = "workflows:\n  - { id: wf, start: x, tasks: { a: { image: alpine } } }\n";
        assert!(validation_message(yaml).contains("unknown task"));

        let yaml = r#"
workflows:
  - id: wf
    start: a
    on: { dataset_refresh: [nope] }
    tasks: { a: { image: alpine } }
"#;
        assert!(validation_message(yaml).contains("unknown dataset"));

        let yaml = r#"
workflows:
  - id: wf
    start: a
    tasks:
      a: { next: b }
      b: { next: a }
"#;
        assert!(validation_message(yaml).contains("cycle"));
    }

    #[test]
    fn test_dangling_next_is_tolerated() {
        let yaml = "workflows:\n  - { id: wf, start: a, tasks: { a: { next: ghost } } }\n";
        assert!(parse_config(yaml, &ConfigBase::None).is_ok());
    }
}

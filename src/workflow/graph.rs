/// Workflow graph traversal
///
/// A workflow is a singly-linked chain: each task optionally names its `next`
/// task. The graph is a read-only view over one stored definition and is what
/// the scheduler consults after every recorded result.

use crate::{
    definitions::types::{Workflow, WorkflowTask},
    error::{Error, Result},
};
use std::collections::{BTreeMap, HashSet};

/// Typed view over a stored workflow definition
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// Workflow id, carried into `UnknownTask` errors
    pub workflow_id: String,

    /// Task id of the first task of every run
    pub start: String,

    /// Task id -> task spec
    tasks: BTreeMap<String, WorkflowTask>,
}

impl WorkflowGraph {
    pub fn from_workflow(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            start: workflow.start.clone(),
            tasks: workflow.tasks.clone(),
        }
    }

    /// Look up a task spec by id
    pub fn resolve(&self, task_id: &str) -> Result<&WorkflowTask> {
        self.tasks.get(task_id).ok_or_else(|| Error::UnknownTask {
            workflow: self.workflow_id.clone(),
            task: task_id.to_string(),
        })
    }

    /// Id of the task that follows `task_id`; `None` ends the run.
    ///
    /// The returned id is not checked here. A dangling `next` surfaces when
    /// the caller resolves it.
    pub fn next(&self, task_id: &str) -> Result<Option<&str>> {
        Ok(self.resolve(task_id)?.next_task())
    }

    /// First task found on a `next` cycle, if any.
    ///
    /// Chains longer than the task count must revisit a task, so a walk from
    /// each task stops at the first repeat or at a dangling/empty `next`.
    pub fn find_cycle(&self) -> Option<&str> {
        for start in self.tasks.keys() {
            let mut seen = HashSet::new();
            let mut current = start.as_str();
            loop {
                if !seen.insert(current) {
                    return Some(current);
                }
                match self.tasks.get(current).and_then(|t| t.next_task()) {
                    Some(next) if self.tasks.contains_key(next) => current = next,
                    _ => break,
                }
            }
        }
        None
    }
}

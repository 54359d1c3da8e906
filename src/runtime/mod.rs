/// Runtime
///
/// Everything that moves work forward:
/// - `scheduler`: the task queue (claim under lease, record results, advance runs)
/// - `refresh`: timed dataset rebuilds and refresh-triggered workflow starts
/// - `types`: run and task records

pub mod types;

pub mod scheduler;

pub mod refresh;

pub use refresh::{RefreshTrigger, TickReport};
pub use scheduler::{Scheduler, SchedulerSettings};
pub use types::{
    ClaimedTask, ResultOutcome, StatusSummary, TaskRecord, TaskResult, TaskState, WorkflowRun,
};

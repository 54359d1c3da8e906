/// Configuration Documents
///
/// Everything an operator writes in the YAML config:
/// - Type definitions (connections, datasets, workflows)
/// - Parsing with path anchoring, plus validation
/// - Content hashing that identifies a config generation

pub mod types;

pub mod parser;

pub mod validator;

pub mod hash;

pub use hash::content_hash;
pub use parser::{parse_config, ConfigBase};
pub use types::{
    ConfigDocument, ConnectionKind, DataConnection, DataSource, Dataset, Join, JoinColumns,
    JoinKind, Workflow, WorkflowTask, WorkflowTrigger,
};

/// Workflow Graphs
///
/// - Linear task chains built from stored workflow definitions
/// - Lock-free per-generation graph cache using ArcSwap

pub mod graph;

pub mod registry;

pub use graph::WorkflowGraph;
pub use registry::GraphRegistry;

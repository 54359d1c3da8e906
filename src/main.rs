/// taskjoin server entry point
///
/// Reads configuration from `TASKJOIN_*` environment variables and starts the
/// HTTP server. The server provides:
/// - Task queue for runners at /api/tasks/*
/// - Workflow, dataset and status endpoints at /api/*
/// - Health check at /healthz

use taskjoin::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}

pub mod api;

use std::sync::Arc;

use anyhow::Result;

use crate::orchestrator::ReleaseOrchestrator;

pub async fn start(port: u16, orchestrator: Arc<ReleaseOrchestrator>) -> Result<()> {
    api::serve(port, orchestrator).await
}

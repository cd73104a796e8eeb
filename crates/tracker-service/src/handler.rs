use anyhow::Result;
use std::sync::Arc;
use tracker_core::context::Passive;
use tracker_core::control::{ControlRequest, ControlResponse};
use tracker_core::ipc::IpcHandler;
use tracker_core::subsystem::Subsystem;

/// Serves control requests from the IPC server against the running subsystem.
pub struct ServiceHandler {
    subsystem: Arc<Subsystem>,
}

impl ServiceHandler {
    pub fn new(subsystem: Arc<Subsystem>) -> Self {
        Self { subsystem }
    }
}

#[async_trait::async_trait]
impl IpcHandler for ServiceHandler {
    async fn handle(&self, req: ControlRequest) -> Result<ControlResponse> {
        let subsystem = self.subsystem.clone();
        // Control requests may allocate, so they run off the async workers.
        let resp = tokio::task::spawn_blocking(move || {
            Passive::enter(|cx| subsystem.control().dispatch(cx, req))
        })
        .await?;
        Ok(resp)
    }
}

//! Enrollment and lifecycle command implementations

use anyhow::Result;

use ph_core::ipc::{IpcEvent, IpcRequest};
use ph_core::{NotificationKind, OrchestratorStatus};

use super::service::report;
use crate::ipc::EngineClient;
use crate::output::{print_error, print_info, print_notification, print_success, print_warning};

/// Start enrollment, optionally following it until it settles
pub async fn enroll_command(client: &mut EngineClient, wait: bool) -> Result<()> {
    if wait {
        client.subscribe().await?;
    }
    report(
        client.submit(IpcRequest::Enroll).await,
        "Enrollment started",
        "Failed to start enrollment",
    )?;
    if !wait {
        return Ok(());
    }

    let mut last_status = None;
    while let Some(event) = client.next_event().await? {
        match event {
            IpcEvent::StateChanged(snapshot) => {
                let status = snapshot.orchestrator_status;
                if last_status == Some(status) {
                    continue;
                }
                // The replayed snapshot may predate the enroll request
                let started = last_status.is_some();
                last_status = Some(status);
                match status {
                    OrchestratorStatus::Connected => {
                        let who = snapshot
                            .enrollment
                            .map(|e| e.email)
                            .unwrap_or_default();
                        print_success(&format!("Enrolled as {}", who));
                        return Ok(());
                    }
                    OrchestratorStatus::Disconnected if started => {
                        print_warning("Enrollment did not complete");
                        anyhow::bail!("enrollment failed");
                    }
                    other => print_info(&format!("Orchestrator: {}", other)),
                }
            }
            IpcEvent::Notification(notification) => {
                print_notification(&notification);
                if notification.kind == NotificationKind::Error {
                    anyhow::bail!("enrollment failed: {}", notification.message);
                }
            }
        }
    }

    anyhow::bail!("Engine closed the connection during enrollment")
}

/// Disconnect from the orchestrator and wipe all state
pub async fn reset_command(client: &mut EngineClient) -> Result<()> {
    report(
        client.submit(IpcRequest::Reset).await,
        "Engine reset",
        "Failed to reset engine",
    )
}

/// Ask the engine to flush its state and exit
pub async fn stop_command(client: &mut EngineClient) -> Result<()> {
    print_info("Stopping engine...");
    match client.shutdown().await {
        Ok(()) => {
            print_success("Engine stopped");
            Ok(())
        }
        Err(e) => {
            // Connection refused likely means it's not running
            if e.to_string().contains("Is it running") {
                print_warning("Engine is not running");
                Ok(())
            } else {
                print_error(&format!("Failed to stop engine: {}", e));
                Err(e)
            }
        }
    }
}

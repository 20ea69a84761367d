//! Invitation command implementations

use anyhow::Result;

use ph_core::ipc::IpcRequest;

use super::service::report;
use crate::ipc::EngineClient;

/// Accept an invite; the engine allocates a local inlet for the service
pub async fn accept_command(client: &mut EngineClient, email: &str, invite_id: &str) -> Result<()> {
    let request = IpcRequest::AcceptInvite {
        email: email.to_string(),
        invite_id: invite_id.to_string(),
    };
    report(
        client.submit(request).await,
        &format!("Accepted invite {} from {}", invite_id, email),
        "Failed to accept invite",
    )?;

    // Show where the service landed
    if let Ok(snapshot) = client.get_state().await {
        if let Some(service) = snapshot
            .group(email)
            .and_then(|g| g.incoming_services.last())
        {
            println!(
                "  {} is reachable at {}:{}",
                service.source_name, service.address, service.port
            );
        }
    }
    Ok(())
}

/// Reject an invite
pub async fn reject_command(client: &mut EngineClient, email: &str, invite_id: &str) -> Result<()> {
    let request = IpcRequest::RejectInvite {
        email: email.to_string(),
        invite_id: invite_id.to_string(),
    };
    report(
        client.submit(request).await,
        &format!("Rejected invite {} from {}", invite_id, email),
        "Failed to reject invite",
    )
}

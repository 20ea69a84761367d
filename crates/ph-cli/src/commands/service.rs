//! Local service command implementations

use anyhow::Result;

use ph_core::ipc::IpcRequest;

use crate::ipc::EngineClient;
use crate::output::{print_error, print_success};

/// Publish a local service
pub async fn create_command(
    client: &mut EngineClient,
    name: &str,
    address: &str,
    port: u16,
    scheme: Option<&str>,
) -> Result<()> {
    let request = IpcRequest::CreateService {
        name: name.to_string(),
        address: address.to_string(),
        port,
        scheme: scheme.map(str::to_string),
    };
    report(
        client.submit(request).await,
        &format!("Created service '{}' at {}:{}", name, address, port),
        "Failed to create service",
    )
}

/// Point an existing service at a new endpoint
pub async fn modify_command(
    client: &mut EngineClient,
    name: &str,
    address: &str,
    port: u16,
    scheme: Option<&str>,
) -> Result<()> {
    let request = IpcRequest::ModifyService {
        name: name.to_string(),
        address: address.to_string(),
        port,
        scheme: scheme.map(str::to_string),
    };
    report(
        client.submit(request).await,
        &format!("Service '{}' now points at {}:{}", name, address, port),
        "Failed to modify service",
    )
}

/// Delete a local service, revoking its shares
pub async fn delete_command(client: &mut EngineClient, name: &str) -> Result<()> {
    let request = IpcRequest::DeleteService {
        name: name.to_string(),
    };
    report(
        client.submit(request).await,
        &format!("Deleted service '{}'", name),
        "Failed to delete service",
    )
}

/// Share a local service with each of `emails`
pub async fn share_command(client: &mut EngineClient, name: &str, emails: &[String]) -> Result<()> {
    for email in emails {
        let request = IpcRequest::InviteToService {
            name: name.to_string(),
            email: email.clone(),
        };
        report(
            client.submit(request).await,
            &format!("Shared '{}' with {}", name, email),
            "Failed to share service",
        )?;
    }
    Ok(())
}

pub(super) fn report(result: Result<()>, success: &str, failure: &str) -> Result<()> {
    match result {
        Ok(()) => {
            print_success(success);
            Ok(())
        }
        Err(e) => {
            print_error(&format!("{}: {}", failure, e));
            Err(e)
        }
    }
}

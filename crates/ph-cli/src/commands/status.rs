//! Status and watch command implementations

use anyhow::Result;

use crate::ipc::{EngineClient, IpcEvent};
use crate::output::{format_snapshot, format_status, print_error, print_info, print_notification};

/// Execute the status command
pub async fn status_command(client: &mut EngineClient) -> Result<()> {
    let snapshot = match client.get_state().await {
        Ok(s) => s,
        Err(e) => {
            print_error(&format!("Failed to get engine state: {}", e));
            print_error("Is the engine running? Try: ph-engine");
            return Err(e);
        }
    };

    println!("{}", format_snapshot(&snapshot));

    Ok(())
}

/// Follow state changes and notifications until the engine goes away
pub async fn watch_command(client: &mut EngineClient) -> Result<()> {
    client.subscribe().await?;
    print_info(&format!("Watching engine at {} (Ctrl+C to stop)", client.address()));

    let mut last_status = None;
    while let Some(event) = client.next_event().await? {
        match event {
            IpcEvent::StateChanged(snapshot) => {
                // Only print the summary when connectivity moves
                if last_status != Some(snapshot.orchestrator_status) {
                    last_status = Some(snapshot.orchestrator_status);
                    print!("{}", format_status(&snapshot));
                }
            }
            IpcEvent::Notification(notification) => print_notification(&notification),
        }
    }

    print_info("Engine closed the connection");
    Ok(())
}

//! IPC server implementation
//!
//! Listens on localhost TCP for requests from the CLI and UI bridges.
//! Uses TCP on 127.0.0.1 for cross-platform compatibility.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use ph_core::error::ErrorKind;
use ph_core::ipc::{IpcEvent, IpcRequest, IpcResponse};
use ph_core::{Notification, Snapshot};

use crate::commands::Command;
use crate::engine::Engine;
use crate::store::{StateStore, SubscriptionHandle};

/// IPC server for CLI/UI communication
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct IpcServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    engine: Arc<Engine>,
    /// Cancellation token for shutdown
    shutdown_token: Option<CancellationToken>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(address: String, engine: Arc<Engine>) -> Self {
        Self {
            address,
            engine,
            shutdown_token: None,
        }
    }

    /// Set the shutdown token (call before run)
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    /// Bind and serve until shut down
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", self.address))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("IPC server listening on {}", listener.local_addr()?);
        let shutdown = self.shutdown_token.clone().unwrap_or_default();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("IPC server stopping");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        // Only accept connections from localhost
                        if !peer_addr.ip().is_loopback() {
                            tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                            continue;
                        }

                        let engine = Arc::clone(&self.engine);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, engine, shutdown).await {
                                tracing::warn!("IPC client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept IPC connection: {}", e);
                    }
                },
            }
        }
        Ok(())
    }
}

/// Event subscription of a single IPC client
///
/// Snapshots come from a store subscription, so the client gets the current
/// snapshot first and commits in order after it. Dropping the state removes
/// the store subscription.
struct ClientState {
    store: Arc<StateStore>,
    snapshots: Option<(SubscriptionHandle, mpsc::UnboundedReceiver<Arc<Snapshot>>)>,
    notifications: Option<broadcast::Receiver<Notification>>,
}

impl ClientState {
    fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            snapshots: None,
            notifications: None,
        }
    }

    fn subscribe(&mut self, engine: &Engine) {
        if self.snapshots.is_some() {
            return;
        }
        self.notifications = Some(engine.notifier().subscribe());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.store.subscribe(move |snapshot| {
            let _ = tx.send(snapshot);
        });
        self.snapshots = Some((handle, rx));
    }

    fn unsubscribe(&mut self) {
        if let Some((handle, _)) = self.snapshots.take() {
            self.store.unsubscribe(handle);
        }
        self.notifications = None;
    }
}

async fn next_snapshot(
    snapshots: &mut Option<(SubscriptionHandle, mpsc::UnboundedReceiver<Arc<Snapshot>>)>,
) -> Option<Arc<Snapshot>> {
    match snapshots {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_notification(
    notifications: &mut Option<broadcast::Receiver<Notification>>,
) -> Result<Notification, broadcast::error::RecvError> {
    match notifications {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Drop for ClientState {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn handle_client(
    stream: TcpStream,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    // next_line keeps partial input across select iterations
    let mut lines = BufReader::new(reader).lines();
    let mut client_state = ClientState::new(Arc::clone(engine.store()));

    loop {
        // Each branch yields the next line to write
        let outgoing = tokio::select! {
            _ = shutdown.cancelled() => break,

            // Handle incoming requests
            result = lines.next_line() => {
                match result {
                    Ok(None) => break, // EOF
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }

                        let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                            Ok(request) => handle_request_with_state(request, &engine, &mut client_state),
                            Err(e) => IpcResponse::Error {
                                kind: ErrorKind::BadRequest,
                                message: format!("Invalid request: {}", e),
                            },
                        };
                        serde_json::to_string(&response)?
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            // Forward events to subscribed clients
            Some(snapshot) = next_snapshot(&mut client_state.snapshots) => {
                serde_json::to_string(&IpcEvent::StateChanged((*snapshot).clone()))?
            }

            result = next_notification(&mut client_state.notifications) => {
                match result {
                    Ok(notification) => serde_json::to_string(&IpcEvent::Notification(notification))?,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("IPC client lagged by {} notifications", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        let mut json = outgoing;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
    }

    Ok(())
}

fn handle_request_with_state(
    request: IpcRequest,
    engine: &Engine,
    client_state: &mut ClientState,
) -> IpcResponse {
    // Handle subscription requests that modify client state
    match request {
        IpcRequest::Subscribe => {
            client_state.subscribe(engine);
            tracing::debug!("Client subscribed to events");
            IpcResponse::Ok
        }
        IpcRequest::Unsubscribe => {
            client_state.unsubscribe();
            tracing::debug!("Client unsubscribed from events");
            IpcResponse::Ok
        }
        request => handle_request(request, engine),
    }
}

fn handle_request(request: IpcRequest, engine: &Engine) -> IpcResponse {
    let result = match request {
        IpcRequest::Ping => return IpcResponse::Pong,
        IpcRequest::GetState => return IpcResponse::State((*engine.snapshot()).clone()),
        // Handled per client
        IpcRequest::Subscribe | IpcRequest::Unsubscribe => Ok(()),

        IpcRequest::Enroll => engine.commands().submit(Command::Enroll),
        IpcRequest::CreateService {
            name,
            address,
            port,
            scheme,
        } => engine.commands().submit(Command::CreateService {
            name,
            address,
            port,
            scheme,
        }),
        IpcRequest::ModifyService {
            name,
            address,
            port,
            scheme,
        } => engine.commands().submit(Command::ModifyService {
            name,
            address,
            port,
            scheme,
        }),
        IpcRequest::DeleteService { name } => {
            engine.commands().submit(Command::DeleteService { name })
        }
        IpcRequest::InviteToService { name, email } => engine
            .commands()
            .submit(Command::InviteToService { name, email }),
        IpcRequest::AcceptInvite { email, invite_id } => engine
            .commands()
            .submit(Command::AcceptInvite { email, invite_id }),
        IpcRequest::RejectInvite { email, invite_id } => engine
            .commands()
            .submit(Command::RejectInvite { email, invite_id }),
        IpcRequest::Reset => engine.commands().submit(Command::Reset),
        IpcRequest::Shutdown => engine.commands().submit(Command::Shutdown),

        IpcRequest::RecordInvite { email, invite } => engine.registry().record_invite(&email, invite),
        IpcRequest::UpdateGroupProfile {
            email,
            name,
            image_url,
        } => engine.registry().update_group_profile(&email, name, image_url),
        IpcRequest::SetAvailability { service, available } => {
            engine.registry().set_availability(&service, available)
        }
        IpcRequest::ConnectivityLost { reason } => {
            engine.session().connectivity_lost(reason);
            Ok(())
        }
    };

    match result {
        Ok(()) => IpcResponse::Ok,
        Err(e) => {
            tracing::debug!("Request rejected: {}", e);
            IpcResponse::from(e)
        }
    }
}

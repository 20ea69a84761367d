//! IPC client for communicating with the engine
//!
//! Uses TCP on localhost for cross-platform compatibility. Events pushed
//! while waiting for a response are buffered and handed out by
//! [`EngineClient::next_event`].

use std::collections::VecDeque;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use ph_core::ipc::{default_ipc_address, IpcEvent, IpcMessage, IpcRequest, IpcResponse};
use ph_core::Snapshot;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Client for communicating with the engine daemon
pub struct EngineClient {
    address: String,
    connection: Option<Connection>,
    /// Events received while waiting for a response
    pending_events: VecDeque<IpcEvent>,
}

impl EngineClient {
    /// Create a new client with default address
    pub fn new() -> Self {
        Self::with_address(default_ipc_address())
    }

    /// Create a new client with custom address
    pub fn with_address(address: String) -> Self {
        Self {
            address,
            connection: None,
            pending_events: VecDeque::new(),
        }
    }

    /// Get the address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect to the engine
    pub async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        tracing::debug!("Connecting to engine at {}", self.address);

        let stream = TcpStream::connect(&self.address).await.with_context(|| {
            format!(
                "Failed to connect to engine at {}. Is it running?",
                self.address
            )
        })?;
        let (reader, writer) = stream.into_split();
        self.connection = Some(Connection {
            reader: BufReader::new(reader),
            writer,
        });
        Ok(())
    }

    /// Check if the engine is running
    pub async fn ping(&mut self) -> Result<bool> {
        self.connect().await?;

        match self.send_request(IpcRequest::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            _ => Ok(false),
        }
    }

    /// Fetch the current snapshot
    pub async fn get_state(&mut self) -> Result<Snapshot> {
        match self.send_request(IpcRequest::GetState).await? {
            IpcResponse::State(snapshot) => Ok(snapshot),
            IpcResponse::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Start receiving events; the current snapshot arrives first
    pub async fn subscribe(&mut self) -> Result<()> {
        self.submit(IpcRequest::Subscribe).await
    }

    /// Send a command that answers with `Ok` or an error
    pub async fn submit(&mut self, request: IpcRequest) -> Result<()> {
        match self.send_request(request).await? {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error { kind, message } => {
                tracing::debug!(?kind, "Engine rejected request");
                anyhow::bail!("{}", message)
            }
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Ask the engine to flush its state and stop
    pub async fn shutdown(&mut self) -> Result<()> {
        self.submit(IpcRequest::Shutdown).await
    }

    /// Wait for the next pushed event. Returns `None` once the engine closes the connection.
    pub async fn next_event(&mut self) -> Result<Option<IpcEvent>> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(Some(event));
        }
        loop {
            match self.read_message().await? {
                Some(IpcMessage::Event(event)) => return Ok(Some(event)),
                Some(IpcMessage::Response(response)) => {
                    tracing::debug!("Ignoring unsolicited response: {:?}", response);
                }
                None => return Ok(None),
            }
        }
    }

    /// Send a request and receive its response, buffering interleaved events
    async fn send_request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.connect().await?;
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        // Send request as JSON line
        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        connection.writer.write_all(request_json.as_bytes()).await?;

        loop {
            match self.read_message().await? {
                Some(IpcMessage::Response(response)) => return Ok(response),
                Some(IpcMessage::Event(event)) => self.pending_events.push_back(event),
                None => anyhow::bail!("Engine closed the connection"),
            }
        }
    }

    async fn read_message(&mut self) -> Result<Option<IpcMessage>> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        let mut line = String::new();
        if connection.reader.read_line(&mut line).await? == 0 {
            self.connection = None;
            return Ok(None);
        }
        let message = IpcMessage::from_bytes(line.trim_end().as_bytes())
            .with_context(|| format!("Malformed message from engine: {}", line.trim_end()))?;
        Ok(Some(message))
    }
}

impl Default for EngineClient {
    fn default() -> Self {
        Self::new()
    }
}

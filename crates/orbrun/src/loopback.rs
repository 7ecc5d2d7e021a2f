//! In-process transports.
//!
//! `LoopbackTransport` wires a client straight into a server endpoint living
//! in the same process, which is how the test suite and demos run both halves
//! without a network. `ChannelStatusSink` forwards status records into a tokio
//! channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::server::Server;
use crate::transport;
use crate::transport::StatusSink;
use crate::transport::Transport;
use crate::transport::TransportError;

/// A transport that hands payloads directly to a server endpoint.
pub struct LoopbackTransport {
    server: Arc<Server>,
    max_payload: Option<usize>,
}

impl LoopbackTransport {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server, max_payload: None }
    }

    /// Rejects outbound payloads longer than `limit` bytes.
    pub fn with_max_payload(mut self, limit: usize) -> Self {
        self.max_payload = Some(limit);
        self
    }

    fn check_size(&self, payload: &[u8]) -> transport::Result<()> {
        match self.max_payload {
            Some(limit) if payload.len() > limit => Err(TransportError::PayloadTooLarge),
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        self.check_size(payload)?;
        self.server
            .handle(payload)
            .await
            .ok_or_else(|| TransportError::Io("server produced no reply".into()))
    }

    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        self.check_size(payload)?;
        let server = self.server.clone();
        let payload = payload.to_vec();
        tokio::spawn(async move {
            if let Some(reply) = server.handle(&payload).await {
                debug!(len = reply.len(), "dropping reply to one-way call");
            }
        });
        Ok(())
    }
}

/// Forwards published status records into an unbounded channel.
pub struct ChannelStatusSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelStatusSink {
    /// Creates a sink and the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl StatusSink for ChannelStatusSink {
    async fn publish(&self, payload: &[u8]) -> transport::Result<()> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| TransportError::ConnectionLost("status channel closed".into()))
    }
}

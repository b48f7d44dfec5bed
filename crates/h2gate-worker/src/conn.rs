//! Per-connection service contract.
//!
//! The worker runtime owns connection lifetimes but not the bytes on them;
//! the protocol engine plugs in through [`ConnectionService`]. The runtime
//! hands every accepted connection a [`ServeContext`] carrying the current
//! ticket-key snapshot and the drain signal.

use async_trait::async_trait;
use h2gate_tls::TicketKeySet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

/// State shared with one connection for its lifetime.
pub struct ServeContext {
    /// Published ticket keys. A handshake takes one snapshot and keeps it
    /// until the handshake completes; later publications do not affect
    /// handshakes already in flight.
    pub ticket_keys: watch::Receiver<Option<Arc<TicketKeySet>>>,
    /// Flips to true when the worker starts draining. Engines should stop
    /// accepting new streams (GOAWAY) and finish in-flight work.
    pub drain: watch::Receiver<bool>,
}

impl ServeContext {
    /// The ticket-key set to use for the next handshake on this connection.
    pub fn ticket_keys_snapshot(&self) -> Option<Arc<TicketKeySet>> {
        self.ticket_keys.borrow().clone()
    }

    pub fn is_draining(&self) -> bool {
        *self.drain.borrow()
    }
}

/// Implemented by the protocol engine that multiplexes streams on an
/// accepted connection. The future resolves when the connection is done;
/// the worker uses that to track its connection count.
#[async_trait]
pub trait ConnectionService: Send + Sync + 'static {
    async fn serve(&self, stream: TcpStream, peer: SocketAddr, ctx: ServeContext)
        -> io::Result<()>;
}

/// Plain TCP pass-through to a single backend.
///
/// Stands in for the full protocol engine: it gives the worker process real
/// connections to carry while the stream-multiplexing layer lives elsewhere.
/// A byte stream has no stream boundary to refuse, so the relay runs to EOF
/// even while draining; the drain signal is surfaced through the context for
/// engines that can do better.
pub struct RelayService {
    backend: String,
}

impl RelayService {
    pub fn new(backend: impl Into<String>) -> Self {
        RelayService {
            backend: backend.into(),
        }
    }
}

#[async_trait]
impl ConnectionService for RelayService {
    async fn serve(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        _ctx: ServeContext,
    ) -> io::Result<()> {
        let mut upstream = TcpStream::connect(&self.backend).await?;
        debug!(peer = %peer, backend = %self.backend, "Relaying connection");

        let (up, down) = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
        debug!(peer = %peer, bytes_up = up, bytes_down = down, "Connection closed");
        Ok(())
    }
}

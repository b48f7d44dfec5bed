//! Per-worker event loop.
//!
//! A worker owns the connections handed to it by the acceptors and tracks
//! how many are in flight. Connections are registered strictly in hand-off
//! order: the ticket-key snapshot for a connection is armed before the next
//! hand-off is looked at.

use crate::conn::{ConnectionService, ServeContext};
use h2gate_tls::TicketKeySet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Messages the control loop sends to a worker.
pub enum WorkerEvent {
    /// An accepted connection, owned by this worker from now on.
    Connection(TcpStream, SocketAddr),
    /// Stop taking new streams, finish in-flight work, exit when idle.
    GracefulShutdown,
    /// Reopen per-worker log state after external rotation.
    ReopenLog,
    /// Kick an OCSP response refresh on the worker's TLS contexts.
    UpdateOcsp,
}

/// Per-worker counters shared with the control loop.
pub struct WorkerStat {
    num_connections: AtomicUsize,
}

impl WorkerStat {
    pub fn new() -> Self {
        WorkerStat {
            num_connections: AtomicUsize::new(0),
        }
    }

    pub fn num_connections(&self) -> usize {
        self.num_connections.load(Ordering::Relaxed)
    }
}

impl Default for WorkerStat {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct Worker {
    id: usize,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    service: Arc<dyn ConnectionService>,
    ticket_keys: watch::Receiver<Option<Arc<TicketKeySet>>>,
    drain_tx: watch::Sender<bool>,
    stat: Arc<WorkerStat>,
    idle_tx: mpsc::UnboundedSender<usize>,
    draining: bool,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        service: Arc<dyn ConnectionService>,
        ticket_keys: watch::Receiver<Option<Arc<TicketKeySet>>>,
        stat: Arc<WorkerStat>,
        idle_tx: mpsc::UnboundedSender<usize>,
    ) -> Worker {
        let (drain_tx, _) = watch::channel(false);
        Worker {
            id,
            events,
            service,
            ticket_keys,
            drain_tx,
            stat,
            idle_tx,
            draining: false,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(worker = self.id, "Worker event loop starting");
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                maybe_event = self.events.recv() => match maybe_event {
                    Some(WorkerEvent::Connection(stream, peer)) => {
                        self.register_connection(&mut tasks, stream, peer);
                    }
                    Some(WorkerEvent::GracefulShutdown) => {
                        if !self.draining {
                            self.draining = true;
                            let _ = self.drain_tx.send(true);
                            debug!(
                                worker = self.id,
                                connections = self.stat.num_connections(),
                                "Worker draining"
                            );
                        }
                    }
                    Some(WorkerEvent::ReopenLog) => {
                        debug!(worker = self.id, "Reopening log files: worker");
                    }
                    Some(WorkerEvent::UpdateOcsp) => {
                        debug!(worker = self.id, "OCSP response refresh triggered");
                    }
                    None => break,
                },
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    self.stat.num_connections.fetch_sub(1, Ordering::Relaxed);
                    if let Err(e) = finished {
                        warn!(worker = self.id, error = %e, "Connection task failed");
                    }
                }
            }

            if self.draining && self.stat.num_connections() == 0 {
                let _ = self.idle_tx.send(self.id);
                break;
            }
        }

        // Channel closed with work still in flight: let it finish.
        while let Some(finished) = tasks.join_next().await {
            self.stat.num_connections.fetch_sub(1, Ordering::Relaxed);
            if let Err(e) = finished {
                warn!(worker = self.id, error = %e, "Connection task failed");
            }
        }

        debug!(worker = self.id, "Worker exiting");
    }

    fn register_connection(&mut self, tasks: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let ctx = ServeContext {
            ticket_keys: self.ticket_keys.clone(),
            drain: self.drain_tx.subscribe(),
        };
        self.stat.num_connections.fetch_add(1, Ordering::Relaxed);

        let service = Arc::clone(&self.service);
        let worker_id = self.id;
        tasks.spawn(async move {
            if let Err(e) = service.serve(stream, peer, ctx).await {
                debug!(worker = worker_id, peer = %peer, error = %e, "Connection ended with error");
            }
        });
    }
}

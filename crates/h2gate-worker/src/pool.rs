//! Worker pool.
//!
//! With `num_worker = 1` the single worker runs as a task on the control
//! loop's runtime. With more, each worker gets its own OS thread driving an
//! independent event loop; hand-off and lifecycle messages travel over
//! per-worker channels, and ticket keys are published to every worker at
//! once through a watch channel.

use crate::conn::ConnectionService;
use crate::worker::{Worker, WorkerEvent, WorkerStat};
use h2gate_tls::TicketKeySet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

struct WorkerHandle {
    events: mpsc::UnboundedSender<WorkerEvent>,
    stat: Arc<WorkerStat>,
}

pub struct WorkerPool {
    handles: Vec<WorkerHandle>,
    threads: Vec<thread::JoinHandle<()>>,
    local: Option<tokio::task::JoinHandle<()>>,
    key_tx: watch::Sender<Option<Arc<TicketKeySet>>>,
    next: usize,
}

impl WorkerPool {
    /// Create the workers. Must be called from within the control loop's
    /// runtime so the single-worker task has somewhere to run.
    pub fn new(
        num_worker: usize,
        service: Arc<dyn ConnectionService>,
        idle_tx: mpsc::UnboundedSender<usize>,
    ) -> io::Result<WorkerPool> {
        let (key_tx, _) = watch::channel(None);

        let mut pool = WorkerPool {
            handles: Vec::with_capacity(num_worker),
            threads: Vec::new(),
            local: None,
            key_tx,
            next: 0,
        };

        if num_worker == 1 {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let stat = Arc::new(WorkerStat::new());
            let worker = Worker::new(
                0,
                events_rx,
                Arc::clone(&service),
                pool.key_tx.subscribe(),
                Arc::clone(&stat),
                idle_tx,
            );
            pool.local = Some(tokio::spawn(worker.run()));
            pool.handles.push(WorkerHandle {
                events: events_tx,
                stat,
            });
            info!("Created single in-process worker");
        } else {
            for id in 0..num_worker {
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let stat = Arc::new(WorkerStat::new());
                let worker = Worker::new(
                    id,
                    events_rx,
                    Arc::clone(&service),
                    pool.key_tx.subscribe(),
                    Arc::clone(&stat),
                    idle_tx.clone(),
                );

                let handle = thread::Builder::new()
                    .name(format!("h2gate-worker-{}", id))
                    .spawn(move || {
                        let runtime = match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(runtime) => runtime,
                            Err(e) => {
                                error!(worker = id, error = %e, "Failed to build worker runtime");
                                return;
                            }
                        };
                        runtime.block_on(worker.run());
                    })?;

                pool.threads.push(handle);
                pool.handles.push(WorkerHandle {
                    events: events_tx,
                    stat,
                });
            }
            info!(workers = num_worker, "Created worker threads");
        }

        Ok(pool)
    }

    pub fn is_multi(&self) -> bool {
        !self.threads.is_empty()
    }

    /// Hand an accepted connection to the next worker, round robin.
    pub fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) {
        let index = self.next % self.handles.len();
        self.next = self.next.wrapping_add(1);

        if self.handles[index]
            .events
            .send(WorkerEvent::Connection(stream, peer))
            .is_err()
        {
            error!(worker = index, "Worker channel closed; dropping connection");
        }
    }

    /// Swap the published ticket-key set. Every worker sees the new set on
    /// its next handshake; handshakes in flight keep their snapshot.
    pub fn publish_ticket_keys(&self, keys: Option<Arc<TicketKeySet>>) {
        match &keys {
            Some(set) => debug!(keys = set.len(), "Publishing ticket keys to workers"),
            None => debug!("Clearing ticket keys on workers"),
        }
        self.key_tx.send_replace(keys);
    }

    /// Tell every worker to finish in-flight work and exit when idle.
    pub fn graceful_shutdown_all(&self) {
        for handle in &self.handles {
            let _ = handle.events.send(WorkerEvent::GracefulShutdown);
        }
    }

    /// Tell every worker to reopen its log state.
    pub fn reopen_log_all(&self) {
        for handle in &self.handles {
            let _ = handle.events.send(WorkerEvent::ReopenLog);
        }
    }

    /// Kick an OCSP refresh on every worker.
    pub fn trigger_ocsp_update(&self) {
        for handle in &self.handles {
            let _ = handle.events.send(WorkerEvent::UpdateOcsp);
        }
    }

    /// Sum of in-flight connections across workers.
    pub fn aggregate_num_connections(&self) -> usize {
        self.handles.iter().map(|h| h.stat.num_connections()).sum()
    }

    /// Close the hand-off channels so workers with no remaining work exit.
    pub fn close(&mut self) {
        self.handles.clear();
    }

    /// Wait until every worker has returned. The single-worker task runs on
    /// the caller's runtime, so this must complete before that runtime is
    /// torn down; worker threads are joined after.
    pub async fn join_all(&mut self) {
        self.join_local().await;
        self.join_threads();
    }

    async fn join_local(&mut self) {
        if let Some(task) = self.local.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task failed");
            }
        }
    }

    fn join_threads(&mut self) {
        for handle in self.threads.drain(..) {
            if let Err(e) = handle.join() {
                error!("Worker thread panicked: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{ConnectionService, ServeContext};
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts serves and holds each connection until drain flips.
    struct HoldService {
        served: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionService for HoldService {
        async fn serve(
            &self,
            _stream: TcpStream,
            _peer: SocketAddr,
            mut ctx: ServeContext,
        ) -> io::Result<()> {
            self.served.fetch_add(1, Ordering::SeqCst);
            let _ = ctx.drain.wait_for(|draining| *draining).await;
            Ok(())
        }
    }

    async fn connected_pair(
        listener: &tokio::net::TcpListener,
    ) -> (TcpStream, (TcpStream, SocketAddr)) {
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let accepted = listener.accept().await.unwrap();
        (client, accepted)
    }

    #[tokio::test]
    async fn test_single_worker_counts_connections() {
        let (idle_tx, mut idle_rx) = mpsc::unbounded_channel();
        let service = Arc::new(HoldService {
            served: AtomicUsize::new(0),
        });
        let service_dyn: Arc<dyn ConnectionService> = service.clone();
        let mut pool = WorkerPool::new(1, service_dyn, idle_tx).unwrap();
        assert!(!pool.is_multi());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (_client, (stream, peer)) = connected_pair(&listener).await;
        pool.dispatch(stream, peer);

        // The worker registers the connection before anything else.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.aggregate_num_connections(), 1);
        assert_eq!(service.served.load(Ordering::SeqCst), 1);

        // Draining releases the held connection and the worker reports idle.
        pool.graceful_shutdown_all();
        let idle = tokio::time::timeout(Duration::from_secs(2), idle_rx.recv())
            .await
            .expect("worker never reported idle");
        assert_eq!(idle, Some(0));
        assert_eq!(pool.aggregate_num_connections(), 0);

        pool.close();
        pool.join_local().await;
    }

    #[tokio::test]
    async fn test_published_keys_reach_serve_context() {
        use h2gate_tls::{TicketCipher, TicketKeyRotator};

        struct SnapshotService {
            seen: mpsc::UnboundedSender<Option<Arc<TicketKeySet>>>,
        }

        #[async_trait]
        impl ConnectionService for SnapshotService {
            async fn serve(
                &self,
                _stream: TcpStream,
                _peer: SocketAddr,
                ctx: ServeContext,
            ) -> io::Result<()> {
                let _ = self.seen.send(ctx.ticket_keys_snapshot());
                Ok(())
            }
        }

        let (idle_tx, _idle_rx) = mpsc::unbounded_channel();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let service: Arc<dyn ConnectionService> = Arc::new(SnapshotService { seen: seen_tx });
        let mut pool = WorkerPool::new(1, service, idle_tx).unwrap();

        let mut rotator =
            TicketKeyRotator::new(TicketCipher::Aes128Cbc, Duration::from_secs(3600));
        let set = rotator.rotate().unwrap();
        pool.publish_ticket_keys(Some(Arc::clone(&set)));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (_client, (stream, peer)) = connected_pair(&listener).await;
        pool.dispatch(stream, peer);

        let snapshot = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .expect("connection never served")
            .flatten()
            .expect("no ticket keys in snapshot");
        assert_eq!(
            snapshot.encryption_key().name(),
            set.encryption_key().name()
        );

        pool.close();
        pool.join_local().await;
    }

    #[tokio::test]
    async fn test_multi_worker_round_robin_and_join() {
        let (idle_tx, _idle_rx) = mpsc::unbounded_channel();
        let service = Arc::new(HoldService {
            served: AtomicUsize::new(0),
        });
        let service_dyn: Arc<dyn ConnectionService> = service.clone();
        let mut pool = WorkerPool::new(2, service_dyn, idle_tx).unwrap();
        assert!(pool.is_multi());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut clients = Vec::new();
        for _ in 0..2 {
            let (client, (stream, peer)) = connected_pair(&listener).await;
            clients.push(client);
            pool.dispatch(stream, peer);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.aggregate_num_connections(), 2);

        pool.graceful_shutdown_all();
        pool.close();
        tokio::task::spawn_blocking(move || pool.join_threads())
            .await
            .unwrap();
    }
}

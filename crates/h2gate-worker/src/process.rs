//! Worker-process orchestration.
//!
//! [`WorkerProcess`] wires the runtime together: it adopts the inherited
//! sockets, arms the ticket-key source, creates the workers, drops
//! privileges, and then runs the single-threaded control loop that
//! multiplexes acceptor readiness, the IPC channel, the key timers and
//! worker idle reports until the lifecycle controller calls a halt.

use crate::acceptor::AcceptorSet;
use crate::config::{Config, WorkerProcessConfig};
use crate::conn::ConnectionService;
use crate::ipc::{IpcChannel, IpcCommand, IpcRead};
use crate::lifecycle::{Action, LifecycleController, LifecycleEvent};
use crate::logging::ErrorLog;
use crate::pool::WorkerPool;
use crate::privilege::{drop_privileges, PrivilegeError};
use crate::remote::{CacheDispatcher, RemoteKeyFetcher};
use h2gate_tls::{read_ticket_key_files, TicketKeyRotator, TicketKeySet, ROTATION_INTERVAL};
use nix::sys::signal::{signal, SigHandler, Signal};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("failed to open error log: {0}")]
    LogOpen(io::Error),
    #[error("failed to build runtime: {0}")]
    Runtime(io::Error),
    #[error("failed to adopt listening socket: {0}")]
    Acceptor(io::Error),
    #[error("failed to create workers: {0}")]
    WorkerCreation(io::Error),
    #[error("privilege drop failed: {0}")]
    Privilege(#[from] PrivilegeError),
    #[error("failed to ignore lifecycle signals: {0}")]
    Signals(nix::Error),
    #[error("failed to arm IPC channel: {0}")]
    Ipc(io::Error),
    #[error("ticket key cache host configured but no cache dispatcher provided")]
    MissingDispatcher,
}

/// Signals the parent uses for its own lifecycle control. A broadcast kill
/// (`killall`) would deliver them straight to the workers; they are ignored
/// here so the workers only ever act on IPC commands.
const LIFECYCLE_SIGNALS: [Signal; 3] = [Signal::SIGQUIT, Signal::SIGUSR1, Signal::SIGUSR2];

fn ignore_lifecycle_signals() -> Result<(), nix::Error> {
    for sig in LIFECYCLE_SIGNALS {
        unsafe { signal(sig, SigHandler::SigIgn) }?;
    }
    Ok(())
}

/// One worker process: the child half of the supervisor/worker pair.
pub struct WorkerProcess {
    config: Config,
    wpconf: WorkerProcessConfig,
    service: Arc<dyn ConnectionService>,
    dispatcher: Option<Box<dyn CacheDispatcher>>,
}

impl WorkerProcess {
    pub fn new(
        config: Config,
        wpconf: WorkerProcessConfig,
        service: Arc<dyn ConnectionService>,
    ) -> Self {
        WorkerProcess {
            config,
            wpconf,
            service,
            dispatcher: None,
        }
    }

    /// Supply the remote-cache dispatcher used when
    /// `tls_ticket_key_memcached_host` is configured.
    pub fn with_cache_dispatcher(mut self, dispatcher: Box<dyn CacheDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Run the worker process to completion. Returns once the control loop
    /// has been broken and every worker has been joined.
    pub fn run(self) -> Result<(), SetupError> {
        let error_log = ErrorLog::new(self.config.error_log.clone());
        error_log.open().map_err(SetupError::LogOpen)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(SetupError::Runtime)?;

        runtime.block_on(event_loop(
            self.config,
            self.wpconf,
            self.service,
            self.dispatcher,
            error_log,
        ))
    }
}

async fn event_loop(
    config: Config,
    wpconf: WorkerProcessConfig,
    service: Arc<dyn ConnectionService>,
    dispatcher: Option<Box<dyn CacheDispatcher>>,
    error_log: ErrorLog,
) -> Result<(), SetupError> {
    let mut acceptors = AcceptorSet::from_inherited(&wpconf).map_err(SetupError::Acceptor)?;

    // Ticket key source: remote cache, key files, or the internal rotator.
    let mut rotator: Option<TicketKeyRotator> = None;
    let mut fetcher: Option<RemoteKeyFetcher> = None;
    let mut initial_keys: Option<Arc<TicketKeySet>> = None;

    if !config.upstream_no_tls {
        if config.tls_ticket_key_memcached_host.is_some() {
            let dispatcher = dispatcher.ok_or(SetupError::MissingDispatcher)?;
            fetcher = Some(RemoteKeyFetcher::new(
                dispatcher,
                config.tls_ticket_key_cipher,
                config.memcached_interval(),
            ));
        } else {
            let mut auto_keys = true;
            if !config.tls_ticket_key_files.is_empty() {
                if !config.tls_ticket_key_cipher_given {
                    warn!(
                        "Set tls_ticket_key_cipher explicitly when tls_ticket_key_files is \
                         used, so a future change of the default cipher cannot invalidate \
                         the key files"
                    );
                }
                match read_ticket_key_files(
                    &config.tls_ticket_key_files,
                    config.tls_ticket_key_cipher,
                ) {
                    Ok(set) => {
                        initial_keys = Some(Arc::new(set));
                        auto_keys = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read TLS ticket key files; using internal generator")
                    }
                }
            }
            if auto_keys {
                let mut new_rotator = TicketKeyRotator::new(
                    config.tls_ticket_key_cipher,
                    config.session_timeout(),
                );
                // First key set is generated before the workers start.
                match new_rotator.rotate() {
                    Ok(set) => initial_keys = Some(set),
                    Err(e) => error!(error = %e, "Failed to generate TLS ticket keys"),
                }
                rotator = Some(new_rotator);
            }
        }
    }

    ignore_lifecycle_signals().map_err(SetupError::Signals)?;

    let (idle_tx, mut idle_rx) = mpsc::unbounded_channel();
    let mut pool = WorkerPool::new(config.num_worker, service, idle_tx)
        .map_err(SetupError::WorkerCreation)?;

    if let Some(set) = initial_keys {
        pool.publish_ticket_keys(Some(set));
    }

    drop_privileges(config.user.as_deref())?;

    let ipc = IpcChannel::from_fd(wpconf.ipc_fd).map_err(SetupError::Ipc)?;

    if !config.upstream_no_tls && !config.no_ocsp {
        pool.trigger_ocsp_update();
    }

    info!("Entering event loop");

    let mut lifecycle = LifecycleController::new();
    let mut renew_interval = time::interval_at(Instant::now() + ROTATION_INTERVAL, ROTATION_INTERVAL);
    renew_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut fetch_at = Box::pin(time::sleep(Duration::ZERO));

    loop {
        tokio::select! {
            read = ipc.recv() => {
                let events: Vec<LifecycleEvent> = match read {
                    IpcRead::Closed => vec![LifecycleEvent::IpcClosed],
                    IpcRead::Commands(commands) => commands
                        .into_iter()
                        .map(|command| match command {
                            IpcCommand::GracefulShutdown => LifecycleEvent::GracefulShutdown,
                            IpcCommand::ReopenLog => LifecycleEvent::ReopenLog,
                        })
                        .collect(),
                };
                for event in events {
                    drive_lifecycle(event, &mut lifecycle, &mut acceptors, &mut pool, &error_log);
                }
            }
            accepted = acceptors.accept(), if lifecycle.is_running() && acceptors.any_enabled() => {
                match accepted {
                    Ok((stream, peer)) => pool.dispatch(stream, peer),
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                }
            }
            _ = renew_interval.tick(), if rotator.is_some() => {
                if let Some(rotator) = rotator.as_mut() {
                    match rotator.rotate() {
                        Ok(set) => pool.publish_ticket_keys(Some(set)),
                        Err(e) => {
                            error!(error = %e, "Failed to generate TLS ticket keys");
                            pool.publish_ticket_keys(None);
                        }
                    }
                }
            }
            _ = fetch_at.as_mut(), if fetcher.is_some() => {
                if let Some(fetcher) = fetcher.as_mut() {
                    let (set, _outcome, delay) = fetcher.fetch().await;
                    if let Some(set) = set {
                        pool.publish_ticket_keys(Some(set));
                    }
                    fetch_at.as_mut().reset(Instant::now() + delay);
                }
            }
            Some(_worker) = idle_rx.recv() => {
                drive_lifecycle(
                    LifecycleEvent::WorkersIdle,
                    &mut lifecycle,
                    &mut acceptors,
                    &mut pool,
                    &error_log,
                );
            }
        }

        if lifecycle.is_terminated() {
            break;
        }
    }

    pool.graceful_shutdown_all();
    pool.close();
    pool.join_all().await;

    info!("Worker process exiting");
    Ok(())
}

/// Feed one lifecycle event through the controller and carry out the
/// resulting actions. A graceful shutdown that finds no connections in
/// flight queues the workers-idle follow-up so the loop can break in the
/// same pass.
fn drive_lifecycle(
    event: LifecycleEvent,
    lifecycle: &mut LifecycleController,
    acceptors: &mut AcceptorSet,
    pool: &mut WorkerPool,
    error_log: &ErrorLog,
) {
    let mut queue = VecDeque::new();
    queue.push_back(event);

    while let Some(event) = queue.pop_front() {
        for action in lifecycle.on_event(event) {
            match action {
                Action::DisableAcceptors => acceptors.disable(),
                Action::DrainBacklog => {
                    for (stream, peer) in acceptors.drain_backlog() {
                        pool.dispatch(stream, peer);
                    }
                }
                Action::ShutdownWorkers => {
                    pool.graceful_shutdown_all();
                    if pool.is_multi() || pool.aggregate_num_connections() == 0 {
                        queue.push_back(LifecycleEvent::WorkersIdle);
                    }
                }
                Action::ReopenLogs => {
                    error_log.reopen();
                    if pool.is_multi() {
                        pool.reopen_log_all();
                    }
                }
                Action::BreakLoop => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_lifecycle_signals() {
        ignore_lifecycle_signals().unwrap();
    }
}

//! h2gate Worker Process
//!
//! The runtime half of the h2gate reverse proxy. A supervising parent binds
//! the listening sockets, forks one worker process per configuration, and
//! steers it over a byte-oriented IPC pipe; everything in this crate runs on
//! the worker side of that split.
//!
//! # Features
//!
//! - Adopts inherited listening sockets and fans connections out to workers
//! - Single in-process worker or N worker threads with independent event loops
//! - TLS session-ticket key rotation, file loading, or remote-cache fetching
//! - Graceful shutdown and log reopening driven by parent IPC commands
//! - Privilege dropping after socket and key setup
//!
//! # Example
//!
//! ```rust,no_run
//! use h2gate_worker::{Config, RelayService, WorkerProcess, WorkerProcessConfig};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let wpconf = WorkerProcessConfig {
//!         server_fd: 3,
//!         server_fd6: -1,
//!         ipc_fd: 4,
//!     };
//!
//!     let service = Arc::new(RelayService::new(config.backend.clone()));
//!     WorkerProcess::new(config, wpconf, service).run()?;
//!     Ok(())
//! }
//! ```

pub mod acceptor;
pub mod config;
pub mod conn;
pub mod ipc;
pub mod lifecycle;
pub mod logging;
pub mod pool;
pub mod privilege;
pub mod process;
pub mod remote;
pub mod worker;

pub use acceptor::AcceptorSet;
pub use config::{Config, ConfigError, WorkerProcessConfig};
pub use conn::{ConnectionService, RelayService, ServeContext};
pub use ipc::{IpcChannel, IpcCommand, IpcRead, IPC_GRACEFUL_SHUTDOWN, IPC_REOPEN_LOG};
pub use lifecycle::{Action, LifecycleController, LifecycleEvent, LifecycleState};
pub use pool::WorkerPool;
pub use privilege::{drop_privileges, resolve_user, PrivilegeError};
pub use process::{SetupError, WorkerProcess};
pub use remote::{CacheDispatcher, CacheGetError, FetchOutcome, RemoteKeyFetcher};
pub use worker::{WorkerEvent, WorkerStat};

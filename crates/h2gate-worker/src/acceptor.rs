//! Listening-socket acceptors.
//!
//! The worker never binds sockets itself; it adopts the descriptors the
//! parent bound before forking. Each acceptor can be taken out of the
//! readiness set without closing its descriptor, so a draining worker stops
//! accepting while the parent (or a re-exec'd sibling) keeps the socket
//! alive.

use crate::config::WorkerProcessConfig;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{FromRawFd, RawFd};
use std::task::{Context, Poll, Waker};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

struct Acceptor {
    listener: TcpListener,
    enabled: bool,
}

impl Acceptor {
    fn adopt(fd: RawFd) -> io::Result<Acceptor> {
        // Ownership of the descriptor transfers from the parent handshake.
        let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;

        info!(fd, addr = ?listener.local_addr().ok(), "Adopted listening socket");

        Ok(Acceptor {
            listener,
            enabled: true,
        })
    }
}

/// The set of inherited listening sockets (at most one IPv4 and one IPv6).
pub struct AcceptorSet {
    acceptors: Vec<Acceptor>,
}

impl AcceptorSet {
    /// Adopt whichever listener descriptors the parent supplied.
    pub fn from_inherited(wpconf: &WorkerProcessConfig) -> io::Result<AcceptorSet> {
        let mut acceptors = Vec::new();
        if wpconf.server_fd6 >= 0 {
            acceptors.push(Acceptor::adopt(wpconf.server_fd6)?);
        }
        if wpconf.server_fd >= 0 {
            acceptors.push(Acceptor::adopt(wpconf.server_fd)?);
        }
        Ok(AcceptorSet { acceptors })
    }

    pub fn len(&self) -> usize {
        self.acceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acceptors.is_empty()
    }

    pub fn any_enabled(&self) -> bool {
        self.acceptors.iter().any(|a| a.enabled)
    }

    /// Wait for a connection on any enabled acceptor. Pends forever when
    /// every acceptor is disabled or absent.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let enabled: Vec<&Acceptor> = self.acceptors.iter().filter(|a| a.enabled).collect();
        match enabled.as_slice() {
            [] => std::future::pending().await,
            [only] => only.listener.accept().await,
            [first, second, ..] => {
                tokio::select! {
                    res = first.listener.accept() => res,
                    res = second.listener.accept() => res,
                }
            }
        }
    }

    /// Remove every acceptor from the readiness set. The descriptors stay
    /// open until process exit. There is no way to re-enable an acceptor.
    pub fn disable(&mut self) {
        for acceptor in &mut self.acceptors {
            acceptor.enabled = false;
        }
        debug!(acceptors = self.acceptors.len(), "Acceptors disabled");
    }

    /// Accept whatever the kernel already queued, without blocking. Used
    /// once at the start of a graceful shutdown so connections sitting in
    /// the backlog are served rather than reset.
    pub fn drain_backlog(&mut self) -> Vec<(TcpStream, SocketAddr)> {
        let mut cx = Context::from_waker(Waker::noop());
        let mut drained = Vec::new();

        for acceptor in &self.acceptors {
            loop {
                match acceptor.listener.poll_accept(&mut cx) {
                    Poll::Ready(Ok(conn)) => drained.push(conn),
                    Poll::Ready(Err(e)) => {
                        warn!(error = %e, "Failed to accept backlogged connection");
                        break;
                    }
                    Poll::Pending => break,
                }
            }
        }

        if !drained.is_empty() {
            info!(connections = drained.len(), "Drained accept backlog");
        }
        drained
    }
}

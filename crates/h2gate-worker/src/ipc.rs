//! Lifecycle IPC channel.
//!
//! The parent steers the worker through an unframed byte stream: each byte
//! is one opcode, with no acknowledgements. The numeric values are shared
//! with the parent supervisor and must stay stable across versions.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::{error, trace};

/// Opcode: stop accepting, finish in-flight work, exit when idle.
pub const IPC_GRACEFUL_SHUTDOWN: u8 = 0x01;
/// Opcode: reopen log files after external rotation.
pub const IPC_REOPEN_LOG: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcCommand {
    GracefulShutdown,
    ReopenLog,
}

/// Result of one readiness-driven read from the channel.
#[derive(Debug)]
pub enum IpcRead {
    /// Recognized commands, in receive order. May be empty when the read
    /// produced only unknown opcodes or failed transiently.
    Commands(Vec<IpcCommand>),
    /// The parent closed its end; the worker must shut down.
    Closed,
}

/// Map raw bytes to commands, preserving order. Unknown opcodes are skipped
/// so that newer parents can talk to older workers.
pub fn decode_commands(buf: &[u8]) -> Vec<IpcCommand> {
    buf.iter()
        .filter_map(|byte| match *byte {
            IPC_GRACEFUL_SHUTDOWN => Some(IpcCommand::GracefulShutdown),
            IPC_REOPEN_LOG => Some(IpcCommand::ReopenLog),
            other => {
                trace!(opcode = other, "Ignoring unknown IPC opcode");
                None
            }
        })
        .collect()
}

/// Read side of the parent's lifecycle pipe.
pub struct IpcChannel {
    fd: AsyncFd<OwnedFd>,
}

impl IpcChannel {
    /// Take ownership of the inherited descriptor and register it with the
    /// reactor.
    pub fn from_fd(fd: RawFd) -> io::Result<IpcChannel> {
        if fd < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "IPC descriptor not provided",
            ));
        }

        // Ownership of the descriptor transfers from the parent handshake.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        set_nonblocking(owned.as_raw_fd())?;

        Ok(IpcChannel {
            fd: AsyncFd::with_interest(owned, Interest::READABLE)?,
        })
    }

    /// Wait for the channel to become readable and consume one burst of
    /// opcodes (up to 1 KiB). Transient read errors are logged and yield an
    /// empty command list; end-of-stream yields [`IpcRead::Closed`].
    pub async fn recv(&self) -> IpcRead {
        let mut buf = [0u8; 1024];
        loop {
            let mut guard = match self.fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    error!(error = %e, "Failed to poll IPC channel");
                    return IpcRead::Commands(Vec::new());
                }
            };

            match guard.try_io(|inner| read_retrying_eintr(inner.get_ref().as_raw_fd(), &mut buf)) {
                Ok(Ok(0)) => return IpcRead::Closed,
                Ok(Ok(n)) => return IpcRead::Commands(decode_commands(&buf[..n])),
                Ok(Err(e)) => {
                    error!(error = %e, "Failed to read from IPC channel");
                    return IpcRead::Commands(Vec::new());
                }
                Err(_would_block) => continue,
            }
        }
    }
}

fn read_retrying_eintr(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

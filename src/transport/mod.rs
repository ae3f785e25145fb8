//! Character transports the session reader drives.
//!
//! The core only needs four operations, captured by [`Transport`]. [`PtyTransport`]
//! runs a console program (`picocom`, `screen`, `ssh`, ...) inside a pseudo-terminal;
//! [`ScriptedTransport`] is an in-memory device for tests and dry runs.

mod pty;
mod scripted;

pub use pty::PtyTransport;
pub use scripted::ScriptedTransport;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,
}

/// A byte-oriented, bidirectional connection to a device console.
#[async_trait(?Send)]
pub trait Transport {
    /// Write all of `data`.
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Return whatever has arrived since the last call, or an empty vector. Never blocks.
    fn read_nonblocking(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Whether a call to [`read_nonblocking`](Self::read_nonblocking) would return data.
    fn bytes_available(&mut self) -> bool;

    async fn close(&mut self) -> Result<(), TransportError>;
}

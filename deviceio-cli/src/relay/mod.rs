//! Remote stream relays: process execution and file transfer.

pub mod exec;
pub mod file;
pub mod session;

pub use exec::exec;
pub use file::{read_file, write_file};
pub use session::RelaySession;

use tokio_util::sync::CancellationToken;

use crate::api::{BoxReader, BoxWriter};

/// Size of the intermediate copy buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 250_000;

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub buffer_size: usize,
    /// Cancelling this aborts a running exec with [`crate::error::Error::Interrupted`].
    pub interrupt: CancellationToken,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            interrupt: CancellationToken::new(),
        }
    }
}

/// The local ends of a relay.
pub struct LocalStdio {
    pub stdin: BoxReader,
    pub stdout: BoxWriter,
    pub stderr: BoxWriter,
}

impl LocalStdio {
    /// This process' own standard streams.
    pub fn inherit() -> Self {
        Self {
            stdin: Box::pin(tokio::io::stdin()),
            stdout: Box::pin(tokio::io::stdout()),
            stderr: Box::pin(tokio::io::stderr()),
        }
    }
}

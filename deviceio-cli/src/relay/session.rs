use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Cancels a session and remembers the error that caused it.
#[derive(Clone, Default)]
pub struct Failure {
    cancel: CancellationToken,
    first: Arc<Mutex<Option<Error>>>,
}

impl Failure {
    /// Records `err` unless another error got there first, then cancels.
    pub fn fail(&self, err: Error) {
        if let Ok(mut first) = self.first.lock() {
            if first.is_none() {
                *first = Some(err);
            } else {
                debug!("dropping secondary relay error: {err}");
            }
        }
        self.cancel.cancel();
    }

    fn take(&self) -> Option<Error> {
        self.first.lock().ok().and_then(|mut first| first.take())
    }
}

/// Concurrent copy tasks sharing one cancellation signal.
///
/// [`RelaySession::wait`] is the completion barrier: it only returns once
/// every spawned task has finished, and reports the first recorded error.
#[derive(Default)]
pub struct RelaySession {
    failure: Failure,
    tasks: JoinSet<()>,
}

impl RelaySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.failure.cancel.clone()
    }

    pub fn fail(&self, err: Error) {
        self.failure.fail(err);
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let failure = self.failure.clone();
        self.tasks.spawn(async move {
            if let Err(e) = task.await {
                failure.fail(e);
            }
        });
    }

    pub async fn wait(mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                self.failure.fail(Error::stream_io(
                    "relay task",
                    std::io::Error::other(e.to_string()),
                ));
            }
        }
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Copies `reader` into `writer` until end of stream or cancellation.
///
/// End of stream shuts `writer` down and is a clean finish. Any other I/O
/// error is returned as [`Error::StreamIo`] labelled with `stream`.
pub async fn pump<R, W>(
    stream: &'static str,
    mut reader: R,
    mut writer: W,
    cancel: CancellationToken,
    buffer_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read(&mut buf) => read.map_err(|e| Error::stream_io(stream, e))?,
        };

        if n == 0 {
            select! {
                biased;
                _ = cancel.cancelled() => {}
                closed = writer.shutdown() => closed.map_err(|e| Error::stream_io(stream, e))?,
            }
            debug!(stream, "end of stream");
            return Ok(());
        }

        select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            written = async {
                writer.write_all(&buf[..n]).await?;
                writer.flush().await
            } => written.map_err(|e| Error::stream_io(stream, e))?,
        }
    }
}

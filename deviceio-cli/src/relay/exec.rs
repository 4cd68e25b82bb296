use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{RelaySession, pump};
use super::{LocalStdio, RelayOptions};
use crate::api::{HubApi, RemoteProcess};
use crate::error::{Error, Result};

/// Runs `cmd` on `device_id` with live stdio and deletes the remote process
/// on every exit path.
pub async fn exec(
    api: &dyn HubApi,
    device_id: &str,
    cmd: &str,
    args: &[String],
    stdio: LocalStdio,
    options: &RelayOptions,
) -> Result<()> {
    let process = api
        .create_process(device_id, cmd, args)
        .await
        .map_err(|e| match e {
            Error::RemoteCreate(_) => e,
            other => Error::RemoteCreate(other.to_string()),
        })?;
    info!(device_id, process_id = process.id(), cmd, "remote process created");

    let outcome = relay_process(process.as_ref(), stdio, options).await;
    release(process.as_ref()).await;
    outcome
}

async fn relay_process(
    process: &dyn RemoteProcess,
    stdio: LocalStdio,
    options: &RelayOptions,
) -> Result<()> {
    let mut session = RelaySession::new();
    let cancel = session.token();
    let size = options.buffer_size;

    // Local stdin may never reach EOF (e.g. a terminal), so the input
    // direction is also stopped once both outputs ended cleanly.
    let input_cancel = cancel.child_token();
    let outputs_open = Arc::new(AtomicUsize::new(2));

    let LocalStdio {
        stdin,
        stdout,
        stderr,
    } = stdio;

    session.spawn(output(
        pump("stdout", process.stdout(), stdout, cancel.clone(), size),
        outputs_open.clone(),
        input_cancel.clone(),
    ));
    session.spawn(output(
        pump("stderr", process.stderr(), stderr, cancel.clone(), size),
        outputs_open,
        input_cancel.clone(),
    ));
    session.spawn(pump("stdin", stdin, process.stdin(), input_cancel.clone(), size));
    session.spawn(interrupted(options.interrupt.clone(), input_cancel));

    if let Err(e) = process.start().await {
        warn!(process_id = process.id(), "failed to start remote process");
        session.fail(e);
    }

    session.wait().await
}

async fn output<F>(copy: F, open: Arc<AtomicUsize>, input_cancel: CancellationToken) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    copy.await?;
    if open.fetch_sub(1, Ordering::SeqCst) == 1 {
        debug!("remote outputs closed, stopping input");
        input_cancel.cancel();
    }
    Ok(())
}

async fn interrupted(interrupt: CancellationToken, done: CancellationToken) -> Result<()> {
    select! {
        _ = done.cancelled() => Ok(()),
        _ = interrupt.cancelled() => Err(Error::Interrupted),
    }
}

async fn release(process: &dyn RemoteProcess) {
    match process.delete().await {
        Ok(()) => debug!(process_id = process.id(), "remote process deleted"),
        Err(e) => {
            let err = Error::Release {
                process_id: process.id().to_string(),
                reason: e.to_string(),
            };
            warn!("{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{FakeHub, FakeProcess};
    use crate::api::{BoxReader, BoxWriter};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadBuf};
    use tokio::time::timeout;

    const LIMIT: Duration = Duration::from_secs(5);

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::ErrorKind::ConnectionReset.into()))
        }
    }

    /// A reader that never yields, plus the handle keeping it open.
    fn pending_reader() -> (BoxReader, DuplexStream) {
        let (reader, keep) = tokio::io::duplex(64);
        (Box::pin(reader), keep)
    }

    fn sink() -> (BoxWriter, DuplexStream) {
        let (writer, observed) = tokio::io::duplex(1 << 16);
        (Box::pin(writer), observed)
    }

    async fn drain(mut observed: DuplexStream) -> Vec<u8> {
        let mut out = Vec::new();
        observed.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_exec_relays_all_three_streams() {
        let (remote_stdin, mut device_stdin) = sink();
        let (remote_stdout, mut device_stdout) = tokio::io::duplex(1 << 16);
        let process = FakeProcess::new(
            remote_stdin,
            Box::pin(remote_stdout),
            Box::pin(&b"warning\n"[..]),
        );
        let deletes = process.deletes.clone();
        let hub = FakeHub::with_process(process);

        // behaves like `cat`: echoes its input, then exits
        let device = tokio::spawn(async move {
            let mut input = Vec::new();
            device_stdin.read_to_end(&mut input).await.unwrap();
            device_stdout.write_all(b"echo: ").await.unwrap();
            device_stdout.write_all(&input).await.unwrap();
        });

        let (stdout, stdout_seen) = sink();
        let (stderr, stderr_seen) = sink();
        let stdio = LocalStdio {
            stdin: Box::pin(&b"local input"[..]),
            stdout,
            stderr,
        };

        timeout(LIMIT, exec(&hub, "abc", "cat", &[], stdio, &RelayOptions::default()))
            .await
            .unwrap()
            .unwrap();
        device.await.unwrap();

        assert_eq!(drain(stdout_seen).await, b"echo: local input");
        assert_eq!(drain(stderr_seen).await, b"warning\n");
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stdin_eof_does_not_end_outputs() {
        let (remote_stdout, mut device_writes) = tokio::io::duplex(64);
        let process = FakeProcess::new(
            Box::pin(tokio::io::sink()),
            Box::pin(remote_stdout),
            Box::pin(tokio::io::empty()),
        );
        let hub = FakeHub::with_process(process);

        let (stdout, stdout_seen) = sink();
        let stdio = LocalStdio {
            stdin: Box::pin(tokio::io::empty()),
            stdout,
            stderr: Box::pin(tokio::io::sink()),
        };

        let device = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            device_writes.write_all(b"late output").await.unwrap();
        });

        timeout(LIMIT, exec(&hub, "abc", "sleep-then-echo", &[], stdio, &RelayOptions::default()))
            .await
            .unwrap()
            .unwrap();
        device.await.unwrap();

        assert_eq!(drain(stdout_seen).await, b"late output");
    }

    #[tokio::test]
    async fn test_open_local_stdin_does_not_block_completion() {
        let process = FakeProcess::new(
            Box::pin(tokio::io::sink()),
            Box::pin(&b"done"[..]),
            Box::pin(tokio::io::empty()),
        );
        let hub = FakeHub::with_process(process);
        let (stdin, _terminal) = pending_reader();
        let (stdout, stdout_seen) = sink();
        let stdio = LocalStdio {
            stdin,
            stdout,
            stderr: Box::pin(tokio::io::sink()),
        };

        timeout(LIMIT, exec(&hub, "abc", "true", &[], stdio, &RelayOptions::default()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(drain(stdout_seen).await, b"done");
    }

    #[tokio::test]
    async fn test_start_failure_cancels_streams_and_deletes() {
        let (remote_stdout, _keep_stdout) = pending_reader();
        let (remote_stderr, _keep_stderr) = pending_reader();
        let (stdin, _keep_stdin) = pending_reader();
        let mut process = FakeProcess::new(Box::pin(tokio::io::sink()), remote_stdout, remote_stderr);
        process.start_error = Some("exec format error".into());
        let deletes = process.deletes.clone();
        let hub = FakeHub::with_process(process);

        let stdio = LocalStdio {
            stdin,
            stdout: Box::pin(tokio::io::sink()),
            stderr: Box::pin(tokio::io::sink()),
        };

        let result = timeout(LIMIT, exec(&hub, "abc", "bad", &[], stdio, &RelayOptions::default()))
            .await
            .expect("relay must not hang after start failure");

        match result {
            Err(Error::RemoteCall { body, .. }) => assert_eq!(body, "exec format error"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_error_cancels_peers_with_single_error() {
        let (remote_stderr, _keep_stderr) = pending_reader();
        let (stdin, _keep_stdin) = pending_reader();
        let process = FakeProcess::new(
            Box::pin(tokio::io::sink()),
            Box::pin(FailingReader),
            remote_stderr,
        );
        let deletes = process.deletes.clone();
        let hub = FakeHub::with_process(process);

        let stdio = LocalStdio {
            stdin,
            stdout: Box::pin(tokio::io::sink()),
            stderr: Box::pin(tokio::io::sink()),
        };

        let result = timeout(LIMIT, exec(&hub, "abc", "cat", &[], stdio, &RelayOptions::default()))
            .await
            .expect("peers must unwind after a stream error");

        match result {
            Err(Error::StreamIo { stream, source }) => {
                assert_eq!(stream, "stdout");
                assert_eq!(source.kind(), std::io::ErrorKind::ConnectionReset);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_failure_is_remote_create_error() {
        let hub = FakeHub::default();
        let result = exec(
            &hub,
            "missing",
            "ls",
            &["-la".to_string()],
            LocalStdio {
                stdin: Box::pin(tokio::io::empty()),
                stdout: Box::pin(tokio::io::sink()),
                stderr: Box::pin(tokio::io::sink()),
            },
            &RelayOptions::default(),
        )
        .await;

        match result {
            Err(Error::RemoteCreate(msg)) => assert!(msg.contains("device not found")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_interrupt_stops_relay_and_deletes() {
        let (remote_stdout, _keep_stdout) = pending_reader();
        let (remote_stderr, _keep_stderr) = pending_reader();
        let (stdin, _keep_stdin) = pending_reader();
        let process = FakeProcess::new(Box::pin(tokio::io::sink()), remote_stdout, remote_stderr);
        let deletes = process.deletes.clone();
        let hub = FakeHub::with_process(process);

        let options = RelayOptions::default();
        let interrupt = options.interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            interrupt.cancel();
        });

        let stdio = LocalStdio {
            stdin,
            stdout: Box::pin(tokio::io::sink()),
            stderr: Box::pin(tokio::io::sink()),
        };
        let result = timeout(LIMIT, exec(&hub, "abc", "top", &[], stdio, &options))
            .await
            .expect("interrupt must end the relay");

        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_is_not_escalated() {
        let mut process = FakeProcess::new(
            Box::pin(tokio::io::sink()),
            Box::pin(&b"ok"[..]),
            Box::pin(tokio::io::empty()),
        );
        process.delete_error = Some("hub went away".into());
        let deletes = process.deletes.clone();
        let hub = FakeHub::with_process(process);

        let result = exec(
            &hub,
            "abc",
            "true",
            &[],
            LocalStdio {
                stdin: Box::pin(tokio::io::empty()),
                stdout: Box::pin(tokio::io::sink()),
                stderr: Box::pin(tokio::io::sink()),
            },
            &RelayOptions::default(),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }
}

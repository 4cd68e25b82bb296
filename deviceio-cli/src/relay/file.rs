use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use deviceio_shared::device::{ERROR_TRAILER, FORM_READ, FORM_WRITE, filesystem_resource};

use super::RelayOptions;
use crate::api::{FormField, HubApi, ResponseFrame};
use crate::error::{Error, Result};

/// Chunks the upload pipe holds before the reader blocks.
const PIPE_DEPTH: usize = 4;

/// Streams a remote file to `stdout`.
///
/// An `error` trailer sent after the body is written to `stderr` and never
/// mixed into the file content.
pub async fn read_file<O, E>(
    api: &dyn HubApi,
    device_id: &str,
    path: &str,
    mut stdout: O,
    mut stderr: E,
    options: &RelayOptions,
) -> Result<()>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let response = api
        .submit_form(
            &filesystem_resource(device_id),
            FORM_READ,
            vec![FormField::string("path", path)],
        )
        .await?
        .error_for_status()
        .await?;

    let mut body = response.body;
    let mut trailer_error = None;
    let mut copied = 0usize;

    while let Some(frame) = body.next().await {
        match frame.map_err(|e| Error::stream_io("response body", e))? {
            ResponseFrame::Data(chunk) => {
                for piece in chunk.chunks(options.buffer_size.max(1)) {
                    stdout
                        .write_all(piece)
                        .await
                        .map_err(|e| Error::stream_io("stdout", e))?;
                }
                copied += chunk.len();
            }
            ResponseFrame::Trailers(trailers) => {
                trailer_error = trailers
                    .get(ERROR_TRAILER)
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .filter(|v| !v.is_empty());
            }
        }
    }
    stdout
        .flush()
        .await
        .map_err(|e| Error::stream_io("stdout", e))?;
    debug!(device_id, path, bytes = copied, "file read complete");

    if let Some(message) = trailer_error {
        warn!(device_id, path, "device reported an error after streaming");
        let reported = async {
            stderr.write_all(message.as_bytes()).await?;
            stderr.flush().await
        };
        reported.await.map_err(|e| Error::stream_io("stderr", e))?;
    }

    Ok(())
}

/// Streams `stdin` into a remote file, truncating it unless `append`.
pub async fn write_file<I>(
    api: &dyn HubApi,
    device_id: &str,
    path: &str,
    append: bool,
    stdin: I,
    options: &RelayOptions,
) -> Result<()>
where
    I: AsyncRead + Unpin,
{
    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(PIPE_DEPTH);
    let data = ReceiverStream::new(rx).boxed();

    let upload = async {
        api.submit_form(
            &filesystem_resource(device_id),
            FORM_WRITE,
            vec![
                FormField::string("path", path),
                FormField::bool("append", append),
                FormField::octet_stream("data", data),
            ],
        )
        .await?
        .error_for_status()
        .await
    };

    let (fed, uploaded) = tokio::join!(feed_pipe(stdin, tx, options.buffer_size), upload);
    let fed = fed?;
    let response = uploaded?;
    let sent = match fed {
        Fed::Complete(sent) => sent,
        Fed::Cut(sent) => return Err(upload_closed(sent)),
    };

    if let Err(e) = response.bytes().await {
        debug!(device_id, path, "ignoring unreadable write response body: {e}");
    }
    debug!(device_id, path, bytes = sent, append, "file write complete");
    Ok(())
}

/// How far stdin got into the upload pipe.
enum Fed {
    Complete(usize),
    /// The receiving side went away before end of input.
    Cut(usize),
}

/// Feeds `input` into the upload pipe; dropping `tx` ends the body.
async fn feed_pipe<I>(
    mut input: I,
    tx: mpsc::Sender<std::io::Result<Bytes>>,
    buffer_size: usize,
) -> Result<Fed>
where
    I: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut sent = 0usize;
    loop {
        let read = select! {
            _ = tx.closed() => return Ok(Fed::Cut(sent)),
            read = input.read(&mut buf) => read,
        };
        match read {
            Ok(0) => return Ok(Fed::Complete(sent)),
            Ok(n) => {
                if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    return Ok(Fed::Cut(sent));
                }
                sent += n;
            }
            Err(e) => {
                // fail the body so the upload cannot complete with truncated data
                let _ = tx
                    .send(Err(std::io::Error::new(e.kind(), e.to_string())))
                    .await;
                return Err(Error::stream_io("stdin", e));
            }
        }
    }
}

/// The hub stopped reading the upload before stdin ended.
fn upload_closed(sent: usize) -> Error {
    Error::stream_io(
        "stdin",
        std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("upload closed by hub after {sent} bytes, before end of input"),
        ),
    )
}

//! Local HTTPS proxy that signs every request on its way to the hub.
//!
//! The listener terminates TLS with a certificate provisioned for this run
//! only. Each request is rewritten to the hub URL with the same method, path,
//! query and body, signed, and its response is streamed back unmodified.
//! Connections are served independently; a failing upstream call only
//! affects the request that made it.

mod headers;

use axum::{
    Router,
    body::{Body, HttpBody},
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use http_body_util::{BodyStream, StreamBody};
use http_body::Frame;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{HubEndpoint, build_http_client};
use crate::auth::RequestSigner;
use crate::error::{Error, Result};
use crate::relay::DEFAULT_BUFFER_SIZE;
use crate::tls::{self, CertificateParams};

pub use headers::{strip_hop_by_hop, upstream_request_headers};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub hub: HubEndpoint,
    pub listen_addr: SocketAddr,
    /// Largest response chunk held before it is forwarded.
    pub buffer_size: usize,
    pub certificate: CertificateParams,
}

impl ProxyConfig {
    pub fn new(hub: HubEndpoint, local_port: u16) -> Self {
        Self {
            hub,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], local_port)),
            buffer_size: DEFAULT_BUFFER_SIZE,
            certificate: CertificateParams::default(),
        }
    }
}

#[derive(Clone)]
struct Upstream {
    base_url: String,
    client: reqwest::Client,
    signer: Arc<dyn RequestSigner>,
    buffer_size: usize,
}

/// Runs the proxy until `shutdown` is cancelled or the listener fails.
pub async fn run(
    config: ProxyConfig,
    signer: Arc<dyn RequestSigner>,
    shutdown: CancellationToken,
) -> Result<()> {
    let handle = Handle::new();
    let watcher = {
        let handle = handle.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            info!("Stopping local hub api proxy");
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        })
    };

    let result = serve(config, signer, handle).await;
    watcher.abort();
    result
}

/// Provisions a certificate and serves until `handle` shuts the server down.
pub async fn serve(
    config: ProxyConfig,
    signer: Arc<dyn RequestSigner>,
    handle: Handle<SocketAddr>,
) -> Result<()> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider()).ok();

    let certificate = tls::provision(&config.certificate)?;
    let tls_config = RustlsConfig::from_pem_file(certificate.cert_path(), certificate.key_path())
        .await
        .map_err(|e| Error::Provisioning(format!("load certificate: {e}")))?;

    let upstream = Upstream {
        base_url: config.hub.base_url(),
        client: build_http_client(config.hub.skip_cert_verify)?,
        signer,
        buffer_size: config.buffer_size.max(1),
    };
    let app = router(upstream);

    info!(
        port = config.listen_addr.port(),
        hub = %config.hub.base_url(),
        tempcert = %certificate.cert_path().display(),
        tempkey = %certificate.key_path().display(),
        "Starting local hub api proxy"
    );

    axum_server::bind_rustls(config.listen_addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|source| Error::Listen {
            addr: config.listen_addr.to_string(),
            source,
        })?;

    // certificate files are removed once `certificate` drops here
    drop(certificate);
    Ok(())
}

fn router(upstream: Upstream) -> Router {
    Router::new().fallback(forward).with_state(upstream)
}

struct ForwardError(Error);

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        warn!("proxy forward failed: {}", self.0);
        (StatusCode::BAD_GATEWAY, format!("{}\n", self.0)).into_response()
    }
}

impl From<reqwest::Error> for ForwardError {
    fn from(e: reqwest::Error) -> Self {
        ForwardError(e.into())
    }
}

async fn forward(
    State(upstream): State<Upstream>,
    request: Request,
) -> std::result::Result<Response, ForwardError> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", upstream.base_url, path_and_query);

    debug!(method = %parts.method, %url, "forwarding");

    let mut builder = upstream
        .client
        .request(parts.method, &url)
        .headers(upstream_request_headers(parts.headers));
    if body.size_hint().exact() != Some(0) {
        builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }
    let mut outbound = builder.build()?;
    upstream.signer.sign(&mut outbound);

    let response = upstream.client.execute(outbound).await?;

    let status = response.status();
    let mut headers = response.headers().clone();
    strip_hop_by_hop(&mut headers);
    let upstream_body: reqwest::Body = response.into();
    let frames = bounded_frames(BodyStream::new(upstream_body), upstream.buffer_size);
    let body = Body::new(StreamBody::new(frames));

    let mut proxied = Response::new(body);
    *proxied.status_mut() = status;
    *proxied.headers_mut() = headers;
    Ok(proxied)
}

/// Re-slices data frames so none is larger than `max` bytes; trailers
/// and other frames pass through in order. Slicing shares the underlying
/// buffer; nothing is copied.
pub fn bounded_frames<S, E>(
    frames: S,
    max: usize,
) -> impl Stream<Item = std::io::Result<Frame<Bytes>>>
where
    S: Stream<Item = std::result::Result<Frame<Bytes>, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let max = max.max(1);
    frames.flat_map(move |frame| {
        let pieces: Vec<std::io::Result<Frame<Bytes>>> = match frame.map(Frame::into_data) {
            Ok(Ok(mut bytes)) => {
                let mut pieces = Vec::with_capacity(bytes.len() / max + 1);
                while bytes.len() > max {
                    pieces.push(Ok(Frame::data(bytes.split_to(max))));
                }
                if !bytes.is_empty() {
                    pieces.push(Ok(Frame::data(bytes)));
                }
                pieces
            }
            Ok(Err(other)) => vec![Ok(other)],
            Err(e) => vec![Err(std::io::Error::other(e))],
        };
        stream::iter(pieces)
    })
}

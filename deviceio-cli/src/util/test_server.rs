//! In-process TLS server standing in for the hub in tests.

use axum::Router;
use axum_server::{Handle, tls_rustls::RustlsConfig};
use std::net::SocketAddr;

use crate::tls::{self, CertificateParams};

/// Serves `app` over TLS on an ephemeral loopback port.
pub async fn serve_tls(app: Router) -> SocketAddr {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider()).ok();
    let cert = tls::provision(&CertificateParams::default()).unwrap();
    let config = RustlsConfig::from_pem_file(cert.cert_path(), cert.key_path())
        .await
        .unwrap();

    let handle = Handle::new();
    let server_handle = handle.clone();
    tokio::spawn(async move {
        let _cert = cert;
        axum_server::bind_rustls(SocketAddr::from(([127, 0, 0, 1], 0)), config)
            .handle(server_handle)
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    handle.listening().await.unwrap()
}

// === Core modules ===
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod proxy;
pub mod relay;
pub mod tls;
pub mod util;

// === CLI entrypoint ===
pub mod cli;

/// Entrypoint used by `main.rs` to run the full CLI.
pub async fn run_cli() -> anyhow::Result<()> {
    cli::cli().await
}

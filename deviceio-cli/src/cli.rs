use anyhow::Context;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use deviceio_shared::config::{DEFAULT_PROFILE, ProfileConfig};

use crate::api::HttpHubClient;
use crate::auth::{RequestSigner, TotpSigner};
use crate::config;
use crate::error::Error;
use crate::proxy::{self, ProxyConfig};
use crate::relay::{self, LocalStdio, RelayOptions};
use crate::util::logging::init_tracing;
use crate::util::shutdown::SHUTDOWN;

#[derive(Parser)]
#[command(name = "deviceio")]
#[command(version, about = "Read, write and execute on devices through the deviceio hub", long_about = None)]
struct Cli {
    /// Profile to load settings from
    #[arg(long, global = true, default_value = DEFAULT_PROFILE)]
    profile: String,

    /// Log filter, e.g. "debug" (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store hub address and credentials in the profile
    Configure {
        hub_addr: String,
        hub_port: u16,
        user_id: String,
        user_password: String,
        /// Base32 TOTP secret
        user_secret: String,
        /// Skip verification of the hub certificate
        #[arg(long)]
        insecure: bool,
    },

    /// Device filesystem and process commands
    #[command(subcommand)]
    Device(DeviceCommands),

    /// Hub commands
    #[command(subcommand)]
    Hub(HubCommands),

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum DeviceCommands {
    /// Print a remote file to stdout
    #[command(name = "fs:read")]
    FsRead { device_id: String, path: String },

    /// Write stdin to a remote file
    #[command(name = "fs:write")]
    FsWrite {
        device_id: String,
        path: String,
        /// Append instead of truncating
        #[arg(long)]
        append: bool,
    },

    /// Run a command on the device with live stdio
    Exec {
        device_id: String,
        cmd: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
enum HubCommands {
    /// Serve a local HTTPS proxy that signs requests to the hub
    Proxy {
        #[arg(short, long)]
        port: u16,
        /// Skip verification of the hub certificate
        #[arg(long)]
        insecure: bool,
    },
}

pub async fn cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Configure {
            hub_addr,
            hub_port,
            user_id,
            user_password,
            user_secret,
            insecure,
        } => {
            init_tracing(cli.log_level.as_deref().unwrap_or("info"));
            let profile = ProfileConfig {
                hub_api_addr: hub_addr,
                hub_api_port: hub_port,
                hub_api_skip_cert_verify: insecure,
                user_id,
                user_password,
                user_secret,
                log_level: cli.log_level,
            };
            // reject credentials the signer could not use later
            config::credential(&profile)?;
            let path = config::save(&cli.profile, &profile)?;
            println!("Profile '{}' written to {}", cli.profile, path.display());
        }
        Commands::Device(cmd) => {
            let profile = load_profile(&cli.profile, cli.log_level.as_deref())?;
            let hub = connect(&profile)?;
            let options = RelayOptions {
                interrupt: SHUTDOWN.clone(),
                ..Default::default()
            };
            match cmd {
                DeviceCommands::FsRead { device_id, path } => {
                    interruptible(relay::read_file(
                        &hub,
                        &device_id,
                        &path,
                        tokio::io::stdout(),
                        tokio::io::stderr(),
                        &options,
                    ))
                    .await?
                }
                DeviceCommands::FsWrite {
                    device_id,
                    path,
                    append,
                } => {
                    interruptible(relay::write_file(
                        &hub,
                        &device_id,
                        &path,
                        append,
                        tokio::io::stdin(),
                        &options,
                    ))
                    .await?
                }
                DeviceCommands::Exec {
                    device_id,
                    cmd,
                    args,
                } => {
                    relay::exec(
                        &hub,
                        &device_id,
                        &cmd,
                        &args,
                        LocalStdio::inherit(),
                        &options,
                    )
                    .await?
                }
            }
        }
        Commands::Hub(cmd) => match cmd {
            HubCommands::Proxy { port, insecure } => {
                let profile = load_profile(&cli.profile, cli.log_level.as_deref())?;
                let signer = signer(&profile)?;
                let proxy_config =
                    ProxyConfig::new(config::hub_endpoint(&profile, insecure), port);
                proxy::run(proxy_config, signer, SHUTDOWN.clone()).await?;
            }
        },
        Commands::Version => {
            println!("deviceio version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn load_profile(name: &str, log_level: Option<&str>) -> anyhow::Result<ProfileConfig> {
    let profile = config::load(name).with_context(|| format!("loading profile '{name}'"))?;
    let level = log_level
        .or(profile.log_level.as_deref())
        .unwrap_or("info");
    init_tracing(level);
    debug!(profile = name, hub = %profile.hub_api_addr, "profile loaded");
    Ok(profile)
}

fn signer(profile: &ProfileConfig) -> anyhow::Result<Arc<dyn RequestSigner>> {
    let credential = config::credential(profile)?;
    Ok(Arc::new(TotpSigner::new(credential)))
}

fn connect(profile: &ProfileConfig) -> anyhow::Result<HttpHubClient> {
    let endpoint = config::hub_endpoint(profile, false);
    Ok(HttpHubClient::new(endpoint, signer(profile)?)?)
}

/// Abandons `op` on Ctrl-C.
async fn interruptible<F>(op: F) -> crate::error::Result<()>
where
    F: Future<Output = crate::error::Result<()>>,
{
    tokio::select! {
        result = op => result,
        _ = SHUTDOWN.cancelled() => Err(Error::Interrupted),
    }
}

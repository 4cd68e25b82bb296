//! Operator profiles stored as JSON under `~/.deviceio/cli/<profile>.json`.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use deviceio_shared::config::ProfileConfig;

use crate::api::HubEndpoint;
use crate::auth::Credential;
use crate::error::{Error, Result};

/// Overrides the profile directory.
pub const CONFIG_DIR_ENV: &str = "DEVICEIO_CONFIG_DIR";

pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| Error::configuration("cannot determine home directory"))?;
    Ok(home.join(".deviceio").join("cli"))
}

pub fn profile_path(dir: &Path, profile: &str) -> PathBuf {
    dir.join(format!("{}.json", profile))
}

pub fn load(profile: &str) -> Result<ProfileConfig> {
    load_from(&profile_path(&config_dir()?, profile))
}

pub fn load_from(path: &Path) -> Result<ProfileConfig> {
    debug!("Loading profile from: {:?}", path);
    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::configuration(format!(
                "no profile found at {}. Please run 'configure'",
                path.display()
            ))
        } else {
            Error::configuration(format!("failed to read {}: {e}", path.display()))
        }
    })?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::configuration(format!("failed to parse {}: {e}", path.display())))
}

pub fn save(profile: &str, config: &ProfileConfig) -> Result<PathBuf> {
    let path = profile_path(&config_dir()?, profile);
    save_to(&path, config)?;
    Ok(path)
}

pub fn save_to(path: &Path, config: &ProfileConfig) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::configuration(format!("failed to create config directory: {e}")))?;
    }
    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| Error::configuration(format!("failed to serialize profile: {e}")))?;
    std::fs::write(path, contents)
        .map_err(|e| Error::configuration(format!("failed to write {}: {e}", path.display())))?;

    // the profile holds the password and TOTP secret
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::configuration(format!("failed to restrict {}: {e}", path.display())))?;
    }

    info!("Profile saved to: {:?}", path);
    Ok(())
}

/// Hub address of a profile; `insecure` forces skipping certificate checks.
pub fn hub_endpoint(config: &ProfileConfig, insecure: bool) -> HubEndpoint {
    HubEndpoint {
        host: config.hub_api_addr.clone(),
        port: config.hub_api_port,
        skip_cert_verify: config.hub_api_skip_cert_verify || insecure,
    }
}

pub fn credential(config: &ProfileConfig) -> Result<Credential> {
    Credential::new(&config.user_id, &config.user_password, &config.user_secret)
}

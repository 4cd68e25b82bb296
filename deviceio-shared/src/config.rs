use serde::{Deserialize, Serialize};

pub const DEFAULT_HUB_API_ADDR: &str = "127.0.0.1";
pub const DEFAULT_HUB_API_PORT: u16 = 4431;
pub const DEFAULT_PROFILE: &str = "default";

/// Persisted operator profile, one JSON file per profile name.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProfileConfig {
    #[serde(default = "default_hub_api_addr")]
    pub hub_api_addr: String,
    #[serde(default = "default_hub_api_port")]
    pub hub_api_port: u16,
    #[serde(default)]
    pub hub_api_skip_cert_verify: bool,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_password: String,
    /// Base32 encoded TOTP secret.
    #[serde(default)]
    pub user_secret: String,
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_hub_api_addr() -> String {
    DEFAULT_HUB_API_ADDR.to_string()
}

fn default_hub_api_port() -> u16 {
    DEFAULT_HUB_API_PORT
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            hub_api_addr: default_hub_api_addr(),
            hub_api_port: default_hub_api_port(),
            hub_api_skip_cert_verify: false,
            user_id: String::new(),
            user_password: String::new(),
            user_secret: String::new(),
            log_level: None,
        }
    }
}

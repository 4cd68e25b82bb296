//! Request signing for calls to the hub.
//!
//! Every request that leaves this process for the hub, whether issued by
//! the API client or forwarded by the local proxy, goes through a
//! [`RequestSigner`]. Signers only read immutable credential material, so a
//! single instance is shared across concurrent requests.

pub mod totp;

use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use std::fmt;

use crate::error::{Error, Result};

pub trait RequestSigner: Send + Sync {
    /// Attach the authentication header to `request`.
    fn sign(&self, request: &mut reqwest::Request);
}

/// Operator identity and the secret used to derive one-time codes.
#[derive(Clone)]
pub struct Credential {
    pub user_id: String,
    pub user_password: String,
    secret: Vec<u8>,
}

impl Credential {
    /// Builds a credential from a base32 TOTP secret.
    pub fn new(user_id: &str, user_password: &str, base32_secret: &str) -> Result<Self> {
        if user_id.is_empty() {
            return Err(Error::configuration(
                "user id is not set. Please run 'configure'",
            ));
        }
        if base32_secret.trim().is_empty() {
            return Err(Error::configuration(
                "user secret is not set. Please run 'configure'",
            ));
        }
        if HeaderValue::from_str(&format!("totp {}:{}:", user_id, user_password)).is_err() {
            return Err(Error::configuration(
                "user id and password must be printable ascii",
            ));
        }
        let secret = totp::decode_base32(base32_secret)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::configuration("user secret is not valid base32"))?;

        Ok(Self {
            user_id: user_id.to_string(),
            user_password: user_password.to_string(),
            secret,
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("user_password", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Signs with `Authorization: totp <user>:<password>:<code>`.
#[derive(Debug, Clone)]
pub struct TotpSigner {
    credential: Credential,
}

impl TotpSigner {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    pub fn header_value_at(&self, at: DateTime<Utc>) -> String {
        let code = totp::generate_code(&self.credential.secret, at);
        format!(
            "totp {}:{}:{}",
            self.credential.user_id, self.credential.user_password, code
        )
    }

    pub fn sign_at(&self, request: &mut reqwest::Request, at: DateTime<Utc>) {
        // id and password were checked to be header-safe in Credential::new
        if let Ok(mut value) = HeaderValue::from_str(&self.header_value_at(at)) {
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }
    }
}

impl RequestSigner for TotpSigner {
    fn sign(&self, request: &mut reqwest::Request) {
        self.sign_at(request, Utc::now());
    }
}

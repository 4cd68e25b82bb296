//! Ephemeral self-signed certificates for the local proxy listener.
//!
//! A fresh key pair and certificate are generated on every call to
//! [`provision`]; nothing is reused across proxy runs. The PEM files live in
//! the system temp directory and are removed when the returned
//! [`EphemeralCertificate`] is dropped.

use rand::RngCore;
use rcgen::{
    CertificateParams as RcgenParams, DnType, KeyPair, PKCS_ECDSA_P256_SHA256,
    PKCS_ECDSA_P384_SHA384, SerialNumber, SignatureAlgorithm,
};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};

const TEMP_PREFIX: &str = "deviceio-cli";
const SERIAL_LEN: usize = 16;

/// Key strength of the generated certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    EcdsaP384,
}

impl KeyAlgorithm {
    fn signature_algorithm(&self) -> &'static SignatureAlgorithm {
        match self {
            KeyAlgorithm::EcdsaP256 => &PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &PKCS_ECDSA_P384_SHA384,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CertificateParams {
    pub hosts: Vec<String>,
    pub validity: Duration,
    pub key_algorithm: KeyAlgorithm,
}

impl Default for CertificateParams {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            // one year
            validity: Duration::from_secs(8760 * 60 * 60),
            key_algorithm: KeyAlgorithm::default(),
        }
    }
}

/// Certificate and private key materialized as temporary PEM files.
#[derive(Debug)]
pub struct EphemeralCertificate {
    cert: NamedTempFile,
    key: NamedTempFile,
}

impl EphemeralCertificate {
    pub fn cert_path(&self) -> &Path {
        self.cert.path()
    }

    pub fn key_path(&self) -> &Path {
        self.key.path()
    }
}

pub fn provision(params: &CertificateParams) -> Result<EphemeralCertificate> {
    let (cert_pem, key_pem) = generate(params)?;

    let cert = write_temp(cert_pem.as_bytes())?;
    let key = write_temp(key_pem.as_bytes())?;

    debug!(
        cert = %cert.path().display(),
        key = %key.path().display(),
        "wrote ephemeral certificate"
    );

    Ok(EphemeralCertificate { cert, key })
}

fn generate(params: &CertificateParams) -> Result<(String, String)> {
    let validity = time::Duration::try_from(params.validity)
        .map_err(|e| Error::Provisioning(format!("invalid validity window: {e}")))?;

    let mut cert_params = RcgenParams::new(params.hosts.clone())
        .map_err(|e| Error::Provisioning(format!("invalid certificate host: {e}")))?;

    let mut serial = [0u8; SERIAL_LEN];
    rand::thread_rng().fill_bytes(&mut serial);
    // keep the serial positive
    serial[0] &= 0x7f;
    cert_params.serial_number = Some(SerialNumber::from_slice(&serial));

    let now = time::OffsetDateTime::now_utc();
    cert_params.not_before = now - time::Duration::hours(1);
    cert_params.not_after = now + validity;
    cert_params
        .distinguished_name
        .push(DnType::CommonName, "deviceio-cli local proxy");

    let key_pair = KeyPair::generate_for(params.key_algorithm.signature_algorithm())
        .map_err(|e| Error::Provisioning(format!("key generation: {e}")))?;
    let cert = cert_params
        .self_signed(&key_pair)
        .map_err(|e| Error::Provisioning(format!("self-signing: {e}")))?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

fn write_temp(contents: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".pem")
        .tempfile()
        .map_err(|e| Error::Provisioning(format!("create temp file: {e}")))?;
    file.write_all(contents)
        .and_then(|_| file.flush())
        .map_err(|e| Error::Provisioning(format!("write temp file: {e}")))?;
    Ok(file)
}

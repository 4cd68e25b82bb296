//! Hub API contract consumed by the relays.
//!
//! The relays only ever talk to the hub through [`HubApi`] and
//! [`RemoteProcess`]; [`http::HttpHubClient`] is the production
//! implementation.

pub mod http;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream::BoxStream};
use reqwest::{Method, StatusCode, header::HeaderMap};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

pub use self::http::{HttpHubClient, HubEndpoint, build_http_client};

pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxWriter = Pin<Box<dyn AsyncWrite + Send>>;
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Statuses at or above this are remote failures.
pub const ERROR_STATUS_THRESHOLD: u16 = 300;

pub enum FieldValue {
    Text(String),
    Bool(bool),
    OctetStream(ByteStream),
}

pub struct FormField {
    pub name: String,
    pub value: FieldValue,
}

impl FormField {
    pub fn string(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: FieldValue::Text(value.into()),
        }
    }

    pub fn bool(name: &str, value: bool) -> Self {
        Self {
            name: name.to_string(),
            value: FieldValue::Bool(value),
        }
    }

    pub fn octet_stream(name: &str, stream: ByteStream) -> Self {
        Self {
            name: name.to_string(),
            value: FieldValue::OctetStream(stream),
        }
    }
}

/// One piece of a streamed response body.
#[derive(Debug)]
pub enum ResponseFrame {
    Data(Bytes),
    Trailers(HeaderMap),
}

pub struct FormResponse {
    pub method: Method,
    pub path: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, std::io::Result<ResponseFrame>>,
}

impl FormResponse {
    pub fn is_error(&self) -> bool {
        self.status.as_u16() >= ERROR_STATUS_THRESHOLD
    }

    /// Drains the body and returns the data bytes, ignoring trailers.
    pub async fn bytes(self) -> Result<Bytes> {
        let mut body = self.body;
        let mut buf = BytesMut::new();
        while let Some(frame) = body.next().await {
            match frame.map_err(|e| Error::stream_io("response body", e))? {
                ResponseFrame::Data(chunk) => buf.extend_from_slice(&chunk),
                ResponseFrame::Trailers(_) => {}
            }
        }
        Ok(buf.freeze())
    }

    /// Reads the whole body for diagnostics and turns this response into a
    /// [`Error::RemoteCall`].
    pub async fn into_error(self) -> Error {
        let method = self.method.clone();
        let path = self.path.clone();
        let status = self.status;
        let body = match self.bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => format!("<failed to read response body: {e}>"),
        };
        Error::RemoteCall {
            method,
            path,
            status,
            body,
        }
    }

    /// Passes successful responses through and converts the rest.
    pub async fn error_for_status(self) -> Result<Self> {
        if self.is_error() {
            Err(self.into_error().await)
        } else {
            Ok(self)
        }
    }
}

#[async_trait]
pub trait HubApi: Send + Sync {
    async fn submit_form(
        &self,
        resource: &str,
        form: &str,
        fields: Vec<FormField>,
    ) -> Result<FormResponse>;

    async fn create_process(
        &self,
        device_id: &str,
        cmd: &str,
        args: &[String],
    ) -> Result<Box<dyn RemoteProcess>>;
}

/// Handle on a process created on a device.
///
/// The stdio accessors open their channel when called; each is meant to be
/// taken once per process.
#[async_trait]
pub trait RemoteProcess: Send + Sync {
    fn id(&self) -> &str;

    async fn start(&self) -> Result<()>;

    fn stdin(&self) -> BoxWriter;

    fn stdout(&self) -> BoxReader;

    fn stderr(&self) -> BoxReader;

    async fn delete(&self) -> Result<()>;
}

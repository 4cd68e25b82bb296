use reqwest::{Method, StatusCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to provision ephemeral certificate: {0}")]
    Provisioning(String),

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create remote process: {0}")]
    RemoteCreate(String),

    #[error("error calling device endpoint: {method} {path} returned {status}: {body}")]
    RemoteCall {
        method: Method,
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("{stream} stream failed: {source}")]
    StreamIo {
        stream: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to release remote process {process_id}: {reason}")]
    Release { process_id: String, reason: String },

    #[error("hub request failed: {0}")]
    Transport(String),

    #[error("interrupted")]
    Interrupted,
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn stream_io(stream: &'static str, source: std::io::Error) -> Self {
        Error::StreamIo { stream, source }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

use serde::{Deserialize, Serialize};

/// Trailer carrying an error detected after a body started streaming.
/// Header names match case-insensitively, so this also reads `Error`.
pub const ERROR_TRAILER: &str = "error";

pub const FORM_READ: &str = "read";
pub const FORM_WRITE: &str = "write";
pub const FORM_CREATE: &str = "create";
pub const FORM_START: &str = "start";
pub const FORM_DELETE: &str = "delete";

pub fn filesystem_resource(device_id: &str) -> String {
    format!("/device/{}/filesystem", device_id)
}

pub fn process_collection_resource(device_id: &str) -> String {
    format!("/device/{}/process", device_id)
}

pub fn process_resource(device_id: &str, process_id: &str) -> String {
    format!("/device/{}/process/{}", device_id, process_id)
}

/// Remote stdio channel of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessChannel {
    Stdin,
    Stdout,
    Stderr,
}

impl ProcessChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessChannel::Stdin => "stdin",
            ProcessChannel::Stdout => "stdout",
            ProcessChannel::Stderr => "stderr",
        }
    }
}

pub fn process_channel_resource(device_id: &str, process_id: &str, channel: ProcessChannel) -> String {
    format!("{}/{}", process_resource(device_id, process_id), channel.as_str())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessCreated {
    pub id: String,
}

//! In-memory hub used by the relay tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use reqwest::{Method, StatusCode, header::HeaderMap};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    BoxReader, BoxWriter, FieldValue, FormField, FormResponse, HubApi, RemoteProcess,
    ResponseFrame,
};
use crate::error::{Error, Result};

pub struct ScriptedResponse {
    pub status: StatusCode,
    pub chunks: Vec<Bytes>,
    pub trailers: Option<HeaderMap>,
    /// Error injected after all chunks.
    pub body_error: Option<std::io::ErrorKind>,
    /// Answer without reading octet-stream fields.
    pub ignore_upload: bool,
}

impl ScriptedResponse {
    pub fn ok(chunks: Vec<&'static [u8]>) -> Self {
        Self::with_status(StatusCode::OK, chunks)
    }

    pub fn with_status(status: StatusCode, chunks: Vec<&'static [u8]>) -> Self {
        Self {
            status,
            chunks: chunks.into_iter().map(Bytes::from_static).collect(),
            trailers: None,
            body_error: None,
            ignore_upload: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedForm {
    pub resource: String,
    pub form: String,
    pub text: Vec<(String, String)>,
    /// Bytes collected from octet-stream fields.
    pub upload: Vec<u8>,
}

#[derive(Default)]
pub struct FakeHub {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    pub forms: Mutex<Vec<RecordedForm>>,
    process: Mutex<Option<Box<dyn RemoteProcess>>>,
}

impl FakeHub {
    pub fn with_response(response: ScriptedResponse) -> Self {
        let hub = Self::default();
        hub.responses.lock().unwrap().push_back(response);
        hub
    }

    pub fn with_process(process: FakeProcess) -> Self {
        let hub = Self::default();
        *hub.process.lock().unwrap() = Some(Box::new(process));
        hub
    }

    pub fn recorded(&self) -> Vec<RecordedForm> {
        self.forms.lock().unwrap().clone()
    }
}

#[async_trait]
impl HubApi for FakeHub {
    async fn submit_form(
        &self,
        resource: &str,
        form: &str,
        fields: Vec<FormField>,
    ) -> Result<FormResponse> {
        let scripted = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedResponse::ok(vec![]));

        let mut recorded = RecordedForm {
            resource: resource.to_string(),
            form: form.to_string(),
            text: Vec::new(),
            upload: Vec::new(),
        };
        for field in fields {
            match field.value {
                FieldValue::Text(v) => recorded.text.push((field.name, v)),
                FieldValue::Bool(v) => recorded.text.push((field.name, v.to_string())),
                FieldValue::OctetStream(_) if scripted.ignore_upload => {}
                FieldValue::OctetStream(mut body) => {
                    while let Some(chunk) = body.next().await {
                        let chunk = chunk.map_err(|e| Error::Transport(e.to_string()))?;
                        recorded.upload.extend_from_slice(&chunk);
                    }
                }
            }
        }
        self.forms.lock().unwrap().push(recorded);

        let mut frames: Vec<std::io::Result<ResponseFrame>> = scripted
            .chunks
            .into_iter()
            .map(|c| Ok(ResponseFrame::Data(c)))
            .collect();
        if let Some(kind) = scripted.body_error {
            frames.push(Err(std::io::Error::from(kind)));
        }
        if let Some(trailers) = scripted.trailers {
            frames.push(Ok(ResponseFrame::Trailers(trailers)));
        }

        Ok(FormResponse {
            method: Method::POST,
            path: format!("{}/{}", resource, form),
            status: scripted.status,
            headers: HeaderMap::new(),
            body: stream::iter(frames).boxed(),
        })
    }

    async fn create_process(
        &self,
        _device_id: &str,
        _cmd: &str,
        _args: &[String],
    ) -> Result<Box<dyn RemoteProcess>> {
        self.process
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::RemoteCall {
                method: Method::POST,
                path: "/device/fake/process/create".into(),
                status: StatusCode::NOT_FOUND,
                body: "device not found".into(),
            })
    }
}

pub struct FakeProcess {
    pub stdin: Mutex<Option<BoxWriter>>,
    pub stdout: Mutex<Option<BoxReader>>,
    pub stderr: Mutex<Option<BoxReader>>,
    pub start_error: Option<String>,
    pub delete_error: Option<String>,
    pub deletes: Arc<AtomicUsize>,
}

impl FakeProcess {
    pub fn new(stdin: BoxWriter, stdout: BoxReader, stderr: BoxReader) -> Self {
        Self {
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(Some(stdout)),
            stderr: Mutex::new(Some(stderr)),
            start_error: None,
            delete_error: None,
            deletes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl RemoteProcess for FakeProcess {
    fn id(&self) -> &str {
        "fake-1"
    }

    async fn start(&self) -> Result<()> {
        match &self.start_error {
            Some(body) => Err(Error::RemoteCall {
                method: Method::POST,
                path: "/device/fake/process/fake-1/start".into(),
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: body.clone(),
            }),
            None => Ok(()),
        }
    }

    fn stdin(&self) -> BoxWriter {
        self.stdin
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Box::pin(tokio::io::sink()))
    }

    fn stdout(&self) -> BoxReader {
        self.stdout
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Box::pin(tokio::io::empty()))
    }

    fn stderr(&self) -> BoxReader {
        self.stderr
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Box::pin(tokio::io::empty()))
    }

    async fn delete(&self) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        match &self.delete_error {
            Some(reason) => Err(Error::Transport(reason.clone())),
            None => Ok(()),
        }
    }
}

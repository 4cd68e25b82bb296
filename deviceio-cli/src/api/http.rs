use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http_body_util::BodyStream;
use reqwest::{
    Client, Method,
    header::{HeaderValue, TE},
    multipart::{Form, Part},
    redirect::Policy,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{CopyToBytes, SinkWriter, StreamReader};
use tokio_util::sync::PollSender;
use tracing::{debug, warn};

use deviceio_shared::device::{
    ERROR_TRAILER, FORM_CREATE, FORM_DELETE, FORM_READ, FORM_START, FORM_WRITE, ProcessChannel,
    ProcessCreated, process_channel_resource, process_collection_resource, process_resource,
};

use super::{
    BoxReader, BoxWriter, FieldValue, FormField, FormResponse, HubApi, RemoteProcess,
    ResponseFrame,
};
use crate::auth::RequestSigner;
use crate::error::{Error, Result};

/// Chunks buffered per remote stdio channel.
const CHANNEL_DEPTH: usize = 16;

#[derive(Debug, Clone)]
pub struct HubEndpoint {
    pub host: String,
    pub port: u16,
    /// Accept any certificate presented by the hub.
    pub skip_cert_verify: bool,
}

impl HubEndpoint {
    pub fn base_url(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }
}

/// Redirects are returned to the caller, never followed.
pub fn build_http_client(trust_invalid_server_cert: bool) -> Result<Client> {
    let builder = Client::builder().redirect(Policy::none());
    let builder = if trust_invalid_server_cert {
        warn!("Trusting invalid hub certificate");
        builder.danger_accept_invalid_certs(true)
    } else {
        builder
    };
    Ok(builder.build()?)
}

/// [`HubApi`] over HTTPS; every request is signed.
#[derive(Clone)]
pub struct HttpHubClient {
    endpoint: HubEndpoint,
    client: Client,
    signer: Arc<dyn RequestSigner>,
}

impl HttpHubClient {
    pub fn new(endpoint: HubEndpoint, signer: Arc<dyn RequestSigner>) -> Result<Self> {
        let client = build_http_client(endpoint.skip_cert_verify)?;
        Ok(Self {
            endpoint,
            client,
            signer,
        })
    }

    async fn submit(&self, resource: &str, form: &str) -> Result<FormResponse> {
        self.submit_form(resource, form, Vec::new())
            .await?
            .error_for_status()
            .await
    }
}

#[async_trait]
impl HubApi for HttpHubClient {
    async fn submit_form(
        &self,
        resource: &str,
        form: &str,
        fields: Vec<FormField>,
    ) -> Result<FormResponse> {
        let path = format!("{}/{}", resource.trim_end_matches('/'), form);
        let url = format!("{}{}", self.endpoint.base_url(), path);

        let mut multipart = Form::new();
        for field in fields {
            multipart = match field.value {
                FieldValue::Text(v) => multipart.text(field.name, v),
                FieldValue::Bool(v) => multipart.text(field.name, v.to_string()),
                FieldValue::OctetStream(stream) => {
                    let part = Part::stream(reqwest::Body::wrap_stream(stream))
                        .mime_str("application/octet-stream")?;
                    multipart.part(field.name, part)
                }
            };
        }

        // the device reports late failures in a trailer
        let mut request = self
            .client
            .post(&url)
            .header(TE, HeaderValue::from_static("trailers"))
            .multipart(multipart)
            .build()?;
        self.signer.sign(&mut request);

        debug!(%url, "submitting form");
        let response = self.client.execute(request).await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body: reqwest::Body = response.into();
        let body = BodyStream::new(body)
            .filter_map(|frame| async move {
                match frame {
                    Ok(frame) => match frame.into_data() {
                        Ok(data) => Some(Ok(ResponseFrame::Data(data))),
                        Err(frame) => frame.into_trailers().ok().map(|t| Ok(ResponseFrame::Trailers(t))),
                    },
                    Err(e) => Some(Err(std::io::Error::other(e))),
                }
            })
            .boxed();

        Ok(FormResponse {
            method: Method::POST,
            path,
            status,
            headers,
            body,
        })
    }

    async fn create_process(
        &self,
        device_id: &str,
        cmd: &str,
        args: &[String],
    ) -> Result<Box<dyn RemoteProcess>> {
        let args_json = serde_json::to_string(args)
            .map_err(|e| Error::RemoteCreate(format!("encode arguments: {e}")))?;
        let response = self
            .submit_form(
                &process_collection_resource(device_id),
                FORM_CREATE,
                vec![
                    FormField::string("cmd", cmd),
                    FormField::string("args", args_json),
                ],
            )
            .await?
            .error_for_status()
            .await?;

        let body = response.bytes().await?;
        let created: ProcessCreated = serde_json::from_slice(&body)
            .map_err(|e| Error::RemoteCreate(format!("unexpected create response: {e}")))?;

        Ok(Box::new(HttpRemoteProcess {
            hub: self.clone(),
            device_id: device_id.to_string(),
            id: created.id,
        }))
    }
}

struct HttpRemoteProcess {
    hub: HttpHubClient,
    device_id: String,
    id: String,
}

impl HttpRemoteProcess {
    fn channel_resource(&self, channel: ProcessChannel) -> String {
        process_channel_resource(&self.device_id, &self.id, channel)
    }

    fn output(&self, channel: ProcessChannel) -> BoxReader {
        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(CHANNEL_DEPTH);
        let hub = self.hub.clone();
        let resource = self.channel_resource(channel);

        tokio::spawn(async move {
            let response = match hub.submit(&resource, FORM_READ).await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.send(Err(std::io::Error::other(e))).await;
                    return;
                }
            };

            let mut body = response.body;
            while let Some(frame) = body.next().await {
                let item = match frame {
                    Ok(ResponseFrame::Data(data)) => Ok(data),
                    Ok(ResponseFrame::Trailers(trailers)) => {
                        match trailers.get(ERROR_TRAILER).and_then(|v| v.to_str().ok()) {
                            Some(err) if !err.is_empty() => Err(std::io::Error::other(err.to_string())),
                            _ => continue,
                        }
                    }
                    Err(e) => Err(e),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    return;
                }
            }
        });

        Box::pin(StreamReader::new(ReceiverStream::new(rx)))
    }
}

#[async_trait]
impl RemoteProcess for HttpRemoteProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<()> {
        self.hub
            .submit(&process_resource(&self.device_id, &self.id), FORM_START)
            .await
            .map(|_| ())
    }

    fn stdin(&self) -> BoxWriter {
        let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
        let hub = self.hub.clone();
        let resource = self.channel_resource(ProcessChannel::Stdin);

        tokio::spawn(async move {
            let body = ReceiverStream::new(rx).map(Ok::<Bytes, std::io::Error>).boxed();
            let result = hub
                .submit_form(&resource, FORM_WRITE, vec![FormField::octet_stream("data", body)])
                .await;
            match result {
                Ok(response) => {
                    if let Err(e) = response.error_for_status().await {
                        warn!(%resource, "remote stdin rejected: {e}");
                    }
                }
                Err(e) => warn!(%resource, "remote stdin upload failed: {e}"),
            }
        });

        let sink = PollSender::new(tx)
            .sink_map_err(|_| std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        Box::pin(SinkWriter::new(CopyToBytes::new(sink)))
    }

    fn stdout(&self) -> BoxReader {
        self.output(ProcessChannel::Stdout)
    }

    fn stderr(&self) -> BoxReader {
        self.output(ProcessChannel::Stderr)
    }

    async fn delete(&self) -> Result<()> {
        self.hub
            .submit(&process_resource(&self.device_id, &self.id), FORM_DELETE)
            .await
            .map(|_| ())
    }
}

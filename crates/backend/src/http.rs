use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Serialize;
use snafu::ResultExt;
use url::Url;

use crate::backend::{BoxFuture, ByteStream, ChatBackend};
use crate::config::{BackendConfig, Endpoints};
use crate::error::{
    BackendResult, BuildClientSnafu, BuildMultipartSnafu, DecodeSnafu, InvalidBaseUrlSnafu,
    InvalidEndpointSnafu, ReadBodySnafu, RequestSnafu, StatusSnafu, StreamReadSnafu,
};
use crate::wire::{
    ChatRequest, ContactFeedback, ExtractionResponse, ExtractionRoute, FileUpload,
    MessageFeedback, StoreUser,
};

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// `ChatBackend` over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    endpoints: Endpoints,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        let client = Client::builder().build().context(BuildClientSnafu {
            stage: "http-backend-new",
        })?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: Client, config: BackendConfig) -> BackendResult<Self> {
        let mut base_url = Url::parse(&config.base_url).context(InvalidBaseUrlSnafu {
            stage: "parse-base-url",
            raw: config.base_url.clone(),
        })?;

        // Relative joins drop the last path segment unless it ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            endpoints: config.endpoints,
        })
    }

    fn endpoint_url(&self, path: &str) -> BackendResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .context(InvalidEndpointSnafu {
                stage: "join-endpoint",
                path: path.to_string(),
            })
    }

    fn route_path(&self, route: ExtractionRoute) -> &str {
        match route {
            ExtractionRoute::Extraction => &self.endpoints.upload_file,
            ExtractionRoute::Transcription => &self.endpoints.transcribe_audio,
        }
    }

    async fn ensure_success(
        stage: &'static str,
        endpoint: &str,
        response: Response,
    ) -> BackendResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            endpoint,
            status = status.as_u16(),
            "backend returned a non-success status"
        );
        StatusSnafu {
            stage,
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        }
        .fail()
    }

    async fn post_json<T>(
        &self,
        stage: &'static str,
        endpoint: &str,
        body: &T,
    ) -> BackendResult<Response>
    where
        T: Serialize + ?Sized,
    {
        let url = self.endpoint_url(endpoint)?;
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context(RequestSnafu {
                stage,
                endpoint: endpoint.to_string(),
            })?;

        Self::ensure_success(stage, endpoint, response).await
    }

    fn build_upload_form(upload: FileUpload) -> BackendResult<Form> {
        let mime_type = if upload.mime_type.trim().is_empty() {
            FALLBACK_MIME_TYPE.to_string()
        } else {
            upload.mime_type
        };

        let part = Part::bytes(upload.content.to_vec())
            .file_name(upload.file_name.clone())
            .mime_str(&mime_type)
            .context(BuildMultipartSnafu {
                stage: "build-upload-part",
                file_name: upload.file_name,
            })?;

        Ok(Form::new().part("file", part))
    }
}

impl ChatBackend for HttpBackend {
    fn extract_text<'a>(
        &'a self,
        route: ExtractionRoute,
        upload: FileUpload,
    ) -> BoxFuture<'a, BackendResult<ExtractionResponse>> {
        Box::pin(async move {
            let endpoint = self.route_path(route).to_string();
            let url = self.endpoint_url(&endpoint)?;
            let file_name = upload.file_name.clone();
            let size = upload.content.len();
            let form = Self::build_upload_form(upload)?;

            tracing::debug!(%file_name, size, route = route.as_str(), "uploading file");

            let response = self
                .client
                .post(url)
                .multipart(form)
                .send()
                .await
                .context(RequestSnafu {
                    stage: "send-upload",
                    endpoint: endpoint.clone(),
                })?;
            // Extraction routes answer errors with a JSON body too; only transport
            // and decode failures abort the upload.
            let status = response.status();
            if !status.is_success() {
                tracing::warn!(
                    endpoint = %endpoint,
                    %file_name,
                    status = status.as_u16(),
                    "extraction returned a non-success status, decoding body anyway"
                );
            }

            let body = response.text().await.context(ReadBodySnafu {
                stage: "read-upload-response",
                endpoint: endpoint.clone(),
            })?;

            serde_json::from_str(&body).context(DecodeSnafu {
                stage: "decode-upload-response",
                endpoint,
            })
        })
    }

    fn open_chat_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, BackendResult<ByteStream>> {
        Box::pin(async move {
            tracing::debug!(
                message_count = request.messages.len(),
                "opening chat stream"
            );
            let response = self
                .post_json("open-chat-stream", &self.endpoints.chat, request)
                .await?;

            let stream = response.bytes_stream().map(|item| {
                item.context(StreamReadSnafu {
                    stage: "read-chat-stream",
                })
            });
            Ok(Box::pin(stream) as ByteStream)
        })
    }

    fn send_message_feedback<'a>(
        &'a self,
        feedback: MessageFeedback,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            self.post_json(
                "send-message-feedback",
                &self.endpoints.message_feedback,
                &feedback,
            )
            .await?;
            Ok(())
        })
    }

    fn submit_contact_feedback<'a>(
        &'a self,
        feedback: ContactFeedback,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            self.post_json(
                "submit-contact-feedback",
                &self.endpoints.contact_feedback,
                &feedback,
            )
            .await?;
            Ok(())
        })
    }

    fn store_user<'a>(&'a self, user: StoreUser) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            self.post_json("store-user", &self.endpoints.store_user, &user)
                .await?;
            Ok(())
        })
    }

    fn login_url(&self) -> BackendResult<String> {
        self.endpoint_url(&self.endpoints.google_login)
            .map(String::from)
    }
}

use std::time::Duration;

use chatline_backend::{BackendError, ChatBackend, ExtractionResponse, ExtractionRoute, FileUpload};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::attachments::AttachedFile;
use crate::deadline;

/// Stand-in text when the backend extracted nothing from a file.
pub const NO_TEXT_EXTRACTED: &str = "[No text extracted]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub file_name: String,
    pub extracted_text: String,
}

impl UploadResult {
    pub fn new(file_name: impl Into<String>, extracted_text: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            extracted_text: extracted_text.into(),
        }
    }

    /// A missing or empty `text` field becomes [`NO_TEXT_EXTRACTED`].
    pub fn from_response(file_name: impl Into<String>, response: ExtractionResponse) -> Self {
        let extracted_text = response
            .text
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| NO_TEXT_EXTRACTED.to_string());
        Self::new(file_name, extracted_text)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum UploadError {
    #[snafu(display("upload of '{file_name}' failed on `{stage}`, {source}"))]
    Transfer {
        stage: &'static str,
        file_name: String,
        source: BackendError,
    },
    #[snafu(display("upload of '{file_name}' timed out after {timeout:?}"))]
    TimedOut {
        stage: &'static str,
        file_name: String,
        timeout: Duration,
    },
}

pub type UploadOutcome<T> = Result<T, UploadError>;

/// Audio goes to transcription, everything else to generic extraction.
pub fn route_for(file: &AttachedFile) -> ExtractionRoute {
    if file.is_audio() {
        ExtractionRoute::Transcription
    } else {
        ExtractionRoute::Extraction
    }
}

/// Turns staged files into extracted text, one request at a time.
pub struct UploadCoordinator<'a> {
    backend: &'a dyn ChatBackend,
    request_timeout: Option<Duration>,
}

impl<'a> UploadCoordinator<'a> {
    pub fn new(backend: &'a dyn ChatBackend) -> Self {
        Self {
            backend,
            request_timeout: None,
        }
    }

    pub fn with_timeout(mut self, request_timeout: Option<Duration>) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub async fn upload_one(&self, file: &AttachedFile) -> UploadOutcome<UploadResult> {
        let route = route_for(file);
        let upload = FileUpload::new(
            file.name.clone(),
            file.mime_type.clone(),
            file.content.clone(),
        );

        let response = deadline::within(
            self.request_timeout,
            self.backend.extract_text(route, upload),
        )
        .await
        .with_context(|| TimedOutSnafu {
            stage: "upload-file",
            file_name: file.name.clone(),
            timeout: self.request_timeout.unwrap_or_default(),
        })?
        .with_context(|_| TransferSnafu {
            stage: "upload-file",
            file_name: file.name.clone(),
        })?;

        let result = UploadResult::from_response(file.name.clone(), response);
        tracing::debug!(
            file_name = %file.name,
            route = route.as_str(),
            extracted_len = result.extracted_text.len(),
            "file extracted"
        );
        Ok(result)
    }

    /// Uploads in queue order. The first failure aborts the remaining files.
    pub async fn upload_all(&self, files: &[AttachedFile]) -> UploadOutcome<Vec<UploadResult>> {
        let mut results = Vec::with_capacity(files.len());
        for file in files {
            results.push(self.upload_one(file).await?);
        }
        Ok(results)
    }
}

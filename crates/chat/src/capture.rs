//! Seams for dictation and camera-style image capture.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chatline_backend::{BackendError, BoxFuture, ChatBackend, ExtractionRoute, FileUpload};
use parking_lot::Mutex;
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::attachments::{AttachedFile, AttachmentError};
use crate::deadline;
use crate::upload::UploadResult;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CaptureError {
    #[snafu(display("capture is already running"))]
    AlreadyStarted { stage: &'static str },
    #[snafu(display("capture was never started"))]
    NotStarted { stage: &'static str },
    #[snafu(display("failed to load captured file on `{stage}`: {source}"))]
    Load {
        stage: &'static str,
        source: AttachmentError,
    },
    #[snafu(display("'{name}' is not an image ({mime_type})"))]
    NotAnImage {
        stage: &'static str,
        name: String,
        mime_type: String,
    },
    #[snafu(display("transcription failed on `{stage}`, {source}"))]
    Transcribe {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("transcription timed out after {timeout:?}"))]
    TranscribeTimedOut {
        stage: &'static str,
        timeout: Duration,
    },
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Speech-to-text input. `stop` yields what was heard since `start`.
pub trait TextInputProvider: Send + Sync {
    fn start<'a>(&'a self) -> BoxFuture<'a, CaptureResult<()>>;

    fn stop<'a>(&'a self) -> BoxFuture<'a, CaptureResult<String>>;
}

/// Produces one still image ready to be staged as an attachment.
pub trait ImageCaptureProvider: Send + Sync {
    fn capture<'a>(&'a self) -> BoxFuture<'a, CaptureResult<AttachedFile>>;
}

/// Starts dictation, waits for `until`, then returns the transcript.
pub async fn record_dictation<F>(
    provider: &dyn TextInputProvider,
    until: F,
) -> CaptureResult<String>
where
    F: Future<Output = ()>,
{
    provider.start().await?;
    until.await;
    provider.stop().await
}

/// Image capture backed by a file another tool writes, such as a screenshot or webcam snapshot.
#[derive(Debug, Clone)]
pub struct StillImageFile {
    path: PathBuf,
}

impl StillImageFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ImageCaptureProvider for StillImageFile {
    fn capture<'a>(&'a self) -> BoxFuture<'a, CaptureResult<AttachedFile>> {
        Box::pin(async move {
            let file = AttachedFile::read_from_path(&self.path)
                .await
                .context(LoadSnafu {
                    stage: "capture-image",
                })?;
            ensure!(
                file.is_image(),
                NotAnImageSnafu {
                    stage: "capture-image",
                    name: file.name.clone(),
                    mime_type: file.mime_type.clone(),
                }
            );
            Ok(file)
        })
    }
}

/// Dictation that transcribes an audio file recorded between `start` and `stop`.
pub struct RecordedAudioDictation {
    backend: Arc<dyn ChatBackend>,
    recording: PathBuf,
    request_timeout: Option<Duration>,
    active: Mutex<bool>,
}

impl RecordedAudioDictation {
    pub fn new(backend: Arc<dyn ChatBackend>, recording: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            recording: recording.into(),
            request_timeout: None,
            active: Mutex::new(false),
        }
    }

    pub fn with_timeout(mut self, request_timeout: Option<Duration>) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

impl TextInputProvider for RecordedAudioDictation {
    fn start<'a>(&'a self) -> BoxFuture<'a, CaptureResult<()>> {
        let was_active = std::mem::replace(&mut *self.active.lock(), true);
        Box::pin(async move {
            ensure!(!was_active, AlreadyStartedSnafu { stage: "dictation" });
            Ok(())
        })
    }

    fn stop<'a>(&'a self) -> BoxFuture<'a, CaptureResult<String>> {
        let was_active = std::mem::replace(&mut *self.active.lock(), false);
        Box::pin(async move {
            ensure!(was_active, NotStartedSnafu { stage: "dictation" });

            let audio = AttachedFile::read_from_path(&self.recording)
                .await
                .context(LoadSnafu { stage: "dictation" })?;
            let upload = FileUpload::new(audio.name.clone(), audio.mime_type, audio.content);
            let response = deadline::within(
                self.request_timeout,
                self.backend.extract_text(ExtractionRoute::Transcription, upload),
            )
            .await
            .with_context(|| TranscribeTimedOutSnafu {
                stage: "dictation",
                timeout: self.request_timeout.unwrap_or_default(),
            })?
            .context(TranscribeSnafu { stage: "dictation" })?;

            let transcript = UploadResult::from_response(audio.name, response).extracted_text;
            tracing::debug!(transcript_len = transcript.len(), "dictation transcribed");
            Ok(transcript)
        })
    }
}

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chatline_backend::{BackendError, BackendResult, ChatBackend, ContactKind, FeedbackKind};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::sync::{broadcast, oneshot};

use crate::attachments::{AttachedFile, AttachmentStager};
use crate::capture::{self, CaptureResult, ImageCaptureProvider, TextInputProvider};
use crate::composer::{DEFAULT_SYSTEM_PROMPT, PromptComposer};
use crate::deadline;
use crate::events::SessionEvent;
use crate::feedback::{self, FeedbackReporter, FeedbackResult};
use crate::ingest::{Applied, StreamEvent, StreamIngester};
use crate::message::{Message, MessageId, SendId};
use crate::state::{FailureKind, SendState, SendTransition, SendTransitionRejection};
use crate::store::{ConversationStore, StoreError};
use crate::upload::{UploadCoordinator, UploadError};

/// Text written into the reply when a send fails.
pub const BACKEND_FAILURE_TEXT: &str = "Error: Backend connection failed";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const EVENT_CAPACITY: usize = 256;

/// What a new send does while another one is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusyPolicy {
    #[default]
    CancelPrevious,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub system_prompt: String,
    /// Bound on each upload, on opening the stream and on each stream read.
    pub request_timeout: Option<Duration>,
    pub busy_policy: BusyPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            busy_policy: BusyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to send; the conversation is unchanged.
    Skipped,
    Completed { message_id: MessageId },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SendError {
    #[snafu(display("{active} is still running"))]
    Busy { stage: &'static str, active: SendId },
    #[snafu(display("{send_id} was cancelled"))]
    Cancelled { stage: &'static str, send_id: SendId },
    #[snafu(display("timed out after {timeout:?} on `{stage}`"))]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },
    #[snafu(display("{source}"))]
    Upload {
        stage: &'static str,
        source: UploadError,
    },
    #[snafu(display("failed to open chat stream, {source}"))]
    Connect {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("chat stream broke on `{stage}`, {source}"))]
    StreamRead {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("chat stream for message {message_id} ended without a final reply"))]
    IncompleteStream {
        stage: &'static str,
        message_id: MessageId,
    },
    #[snafu(display("conversation update failed on `{stage}`, {source}"))]
    Store {
        stage: &'static str,
        source: StoreError,
    },
    #[snafu(display("illegal send transition on `{stage}`: {rejection:?}"))]
    InvalidTransition {
        stage: &'static str,
        rejection: SendTransitionRejection,
    },
}

pub type SendResult<T> = Result<T, SendError>;

impl SendError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. }
            | Self::Upload {
                source: UploadError::TimedOut { .. },
                ..
            } => FailureKind::Timeout,
            Self::Upload { .. } => FailureKind::Upload,
            Self::Connect { .. } => FailureKind::Connect,
            Self::StreamRead { .. } => FailureKind::StreamTransport,
            Self::IncompleteStream { .. } => FailureKind::IncompleteStream,
            Self::Busy { .. }
            | Self::Cancelled { .. }
            | Self::Store { .. }
            | Self::InvalidTransition { .. } => FailureKind::Internal,
        }
    }
}

/// Who is using the client. Empty until the user identifies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub email: String,
    pub name: String,
}

struct ClaimedSend {
    cancel_rx: oneshot::Receiver<()>,
    files: Vec<AttachedFile>,
    /// Conversation as it was before this send's user turn.
    history: Vec<Message>,
}

struct SessionInner {
    store: ConversationStore,
    stager: AttachmentStager,
    state: SendState,
    cancel_tx: Option<oneshot::Sender<()>>,
    identity: Identity,
}

/// One conversation plus the pipeline that turns input into streamed replies.
///
/// All shared state sits behind a single lock that is never held across an
/// await. Work tagged with a send id only reaches the store while that send
/// is still the active one.
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    options: SessionOptions,
    composer: PromptComposer,
    feedback: FeedbackReporter,
    inner: Mutex<SessionInner>,
    next_send_id: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, options: SessionOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            composer: PromptComposer::new(options.system_prompt.clone()),
            feedback: FeedbackReporter::new(Arc::clone(&backend)),
            backend,
            options,
            inner: Mutex::new(SessionInner {
                store: ConversationStore::new(),
                stager: AttachmentStager::new(),
                state: SendState::Idle,
                cancel_tx: None,
                identity: Identity::default(),
            }),
            next_send_id: AtomicU64::new(1),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub async fn send(&self, input: &str) -> SendResult<SendOutcome> {
        let text = input.trim().to_string();
        let send_id = SendId::new(self.next_send_id.fetch_add(1, Ordering::Relaxed));

        let Some(ClaimedSend {
            cancel_rx,
            files,
            history,
        }) = self.begin_send(send_id, &text)?
        else {
            tracing::debug!(session = %send_id, "nothing to send");
            return Ok(SendOutcome::Skipped);
        };
        tracing::info!(session = %send_id, files = files.len(), "send started");

        let result = tokio::select! {
            biased;
            _ = cancel_rx => CancelledSnafu { stage: "await-send", send_id }.fail(),
            result = self.drive(send_id, text, files, history) => result,
        };
        self.finish(send_id, result)
    }

    /// Claims the pipeline, records the user turn and takes the staged files.
    ///
    /// Returns `None` when there is neither text nor a staged file.
    fn begin_send(&self, send_id: SendId, text: &str) -> SendResult<Option<ClaimedSend>> {
        let mut inner = self.inner.lock();
        if text.is_empty() && inner.stager.is_empty() {
            return Ok(None);
        }

        if let Some(active) = inner.state.active_send() {
            match self.options.busy_policy {
                BusyPolicy::Reject => {
                    tracing::info!(
                        session = %send_id,
                        active = %active,
                        "send rejected, pipeline busy"
                    );
                    return BusySnafu {
                        stage: "claim-send",
                        active,
                    }
                    .fail();
                }
                BusyPolicy::CancelPrevious => {
                    self.cancel_locked(&mut inner, active);
                }
            }
        }
        transition(&mut inner.state, SendTransition::Start(send_id), "claim-send")?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        inner.cancel_tx = Some(cancel_tx);

        let history = inner.store.messages().to_vec();
        let files = inner.stager.take();
        let file_names = files.iter().map(|file| file.name.clone()).collect();
        let user_id = inner.store.append_user(text, file_names);
        if let Some(message) = inner.store.get(user_id).cloned() {
            self.emit(SessionEvent::MessageAppended(message));
        }

        Ok(Some(ClaimedSend {
            cancel_rx,
            files,
            history,
        }))
    }

    async fn drive(
        &self,
        send_id: SendId,
        text: String,
        files: Vec<AttachedFile>,
        history: Vec<Message>,
    ) -> SendResult<MessageId> {
        let timeout = self.options.request_timeout;
        let uploads = UploadCoordinator::new(self.backend.as_ref())
            .with_timeout(timeout)
            .upload_all(&files)
            .await
            .context(UploadSnafu {
                stage: "upload-files",
            })?;

        let content = PromptComposer::compose_content(&text, &uploads);
        let request = self.composer.build_payload(&history, content);

        let placeholder = self.with_active(send_id, |inner| {
            transition(
                &mut inner.state,
                SendTransition::BeginConnect(send_id),
                "begin-connect",
            )?;
            let in_flight = inner.store.append_placeholder_assistant();
            if let Some(message) = inner.store.get(in_flight.id).cloned() {
                self.emit(SessionEvent::MessageAppended(message));
            }
            Ok(in_flight)
        })?;

        let mut body = deadline::within(timeout, self.backend.open_chat_stream(&request))
            .await
            .context(TimeoutSnafu {
                stage: "open-chat-stream",
                timeout: timeout.unwrap_or_default(),
            })?
            .context(ConnectSnafu {
                stage: "open-chat-stream",
            })?;

        self.with_active(send_id, |inner| {
            transition(
                &mut inner.state,
                SendTransition::BeginStreaming(send_id),
                "begin-streaming",
            )
        })?;
        tracing::debug!(session = %send_id, message_id = %placeholder.id, "streaming reply");

        let mut ingester = StreamIngester::new();
        while !ingester.is_finished() {
            let read = deadline::within(timeout, body.next())
                .await
                .context(TimeoutSnafu {
                    stage: "read-chat-stream",
                    timeout: timeout.unwrap_or_default(),
                })?;
            let Some(bytes) = read else {
                let events = ingester.finish();
                self.apply_events(send_id, &mut ingester, events)?;
                break;
            };
            let bytes = bytes.context(StreamReadSnafu {
                stage: "read-chat-stream",
            })?;
            let events = ingester.push_bytes(&bytes);
            self.apply_events(send_id, &mut ingester, events)?;
        }

        if !ingester.is_finished() {
            return IncompleteStreamSnafu {
                stage: "end-of-stream",
                message_id: placeholder.id,
            }
            .fail();
        }
        if ingester.skipped_frames() > 0 {
            tracing::warn!(
                session = %send_id,
                skipped = ingester.skipped_frames(),
                "reply had malformed frames"
            );
        }
        Ok(placeholder.id)
    }

    fn apply_events(
        &self,
        send_id: SendId,
        ingester: &mut StreamIngester,
        events: Vec<StreamEvent>,
    ) -> SendResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        self.with_active(send_id, |inner| {
            for event in events {
                let applied = ingester
                    .apply(event, &mut inner.store)
                    .context(StoreSnafu {
                        stage: "apply-stream-event",
                    })?;
                match applied {
                    Applied::Text { id, text } => {
                        self.emit(SessionEvent::TextUpdated { id, text });
                    }
                    Applied::Completed {
                        id,
                        text,
                        image_url,
                    } => {
                        self.emit(SessionEvent::Completed {
                            id,
                            text,
                            image_url,
                        });
                    }
                    Applied::Ignored => {}
                }
            }
            Ok(())
        })
    }

    /// Runs `apply` under the lock, but only while `send_id` is still the active send.
    fn with_active<T>(
        &self,
        send_id: SendId,
        apply: impl FnOnce(&mut SessionInner) -> SendResult<T>,
    ) -> SendResult<T> {
        let mut inner = self.inner.lock();
        if !inner.state.accepts(send_id) {
            return CancelledSnafu {
                stage: "check-active",
                send_id,
            }
            .fail();
        }
        apply(&mut *inner)
    }

    /// Settles the send. Every failure lands here exactly once.
    fn finish(&self, send_id: SendId, result: SendResult<MessageId>) -> SendResult<SendOutcome> {
        let mut inner = self.inner.lock();
        if !inner.state.accepts(send_id) {
            // Superseded or cancelled; whoever did that already settled the store.
            tracing::debug!(session = %send_id, state = inner.state.name(), "send already settled");
            return match result {
                Err(error) => Err(error),
                Ok(_) => CancelledSnafu {
                    stage: "finish-send",
                    send_id,
                }
                .fail(),
            };
        }

        let error = match result {
            Ok(message_id) => {
                transition(&mut inner.state, SendTransition::Complete(send_id), "finish-send")?;
                inner.cancel_tx = None;
                tracing::info!(session = %send_id, message_id = %message_id, "send completed");
                self.emit(SessionEvent::SendFinished {
                    send_id,
                    state: inner.state.clone(),
                });
                return Ok(SendOutcome::Completed { message_id });
            }
            Err(error) => error,
        };

        if matches!(error, SendError::Cancelled { .. }) {
            self.cancel_locked(&mut inner, send_id);
            return Err(error);
        }

        let kind = error.failure_kind();
        if kind != FailureKind::IncompleteStream {
            self.write_failure_text(&mut inner);
        }
        inner.store.release_in_flight();
        inner.cancel_tx = None;
        transition(
            &mut inner.state,
            SendTransition::Fail {
                send_id,
                kind,
                message: error.to_string(),
            },
            "finish-send",
        )?;

        tracing::warn!(session = %send_id, kind = ?kind, error = %error, "send failed");
        self.emit(SessionEvent::SendFinished {
            send_id,
            state: inner.state.clone(),
        });
        Err(error)
    }

    /// Puts the failure text into the in-flight reply, appending one first if
    /// the send failed before its placeholder existed.
    fn write_failure_text(&self, inner: &mut SessionInner) {
        let appended = inner.store.in_flight().is_none();
        if appended {
            inner.store.append_placeholder_assistant();
        }

        match inner.store.mutate_last_text(BACKEND_FAILURE_TEXT) {
            Ok(id) if appended => {
                if let Some(message) = inner.store.get(id).cloned() {
                    self.emit(SessionEvent::MessageAppended(message));
                }
            }
            Ok(id) => self.emit(SessionEvent::TextUpdated {
                id,
                text: BACKEND_FAILURE_TEXT.to_string(),
            }),
            Err(error) => tracing::warn!(error = %error, "could not record send failure"),
        }
    }

    fn cancel_locked(&self, inner: &mut SessionInner, send_id: SendId) -> bool {
        let cancelled = transition(
            &mut inner.state,
            SendTransition::Cancel(send_id),
            "cancel-send",
        );
        if let Err(rejection) = cancelled {
            tracing::debug!(session = %send_id, error = %rejection, "nothing to cancel");
            return false;
        }

        if let Some(cancel_tx) = inner.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
        if let Some(released) = inner.store.release_in_flight() {
            tracing::debug!(
                session = %send_id,
                message_id = %released.id,
                "released in-flight reply"
            );
        }

        tracing::info!(session = %send_id, "send cancelled");
        self.emit(SessionEvent::SendFinished {
            send_id,
            state: inner.state.clone(),
        });
        true
    }

    /// Cancels the active send, if any. Its reply keeps whatever text arrived.
    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state.active_send() {
            Some(active) => self.cancel_locked(&mut inner, active),
            None => false,
        }
    }

    pub fn state(&self) -> SendState {
        self.inner.lock().state.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().store.messages().to_vec()
    }

    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.inner.lock().store.get(id).cloned()
    }

    pub fn stage_file(&self, file: AttachedFile) -> bool {
        self.inner.lock().stager.stage(file)
    }

    pub fn remove_staged(&self, index: usize) -> Option<AttachedFile> {
        self.inner.lock().stager.remove(index)
    }

    pub fn staged(&self) -> Vec<AttachedFile> {
        self.inner.lock().stager.list().to_vec()
    }

    pub fn clear_staged(&self) {
        self.inner.lock().stager.clear();
    }

    pub fn identity(&self) -> Identity {
        self.inner.lock().identity.clone()
    }

    /// Remembers who the user is and registers them with the backend.
    pub async fn identify(
        &self,
        email: impl Into<String>,
        name: impl Into<String>,
    ) -> FeedbackResult<()> {
        let identity = Identity {
            email: email.into(),
            name: name.into(),
        };
        let email = identity.email.clone();
        self.inner.lock().identity = identity;
        self.feedback.store_user(email).await
    }

    pub fn sign_out(&self) {
        self.inner.lock().identity = Identity::default();
    }

    pub fn login_url(&self) -> BackendResult<String> {
        self.backend.login_url()
    }

    /// Rates a completed assistant reply.
    pub async fn report_feedback(&self, id: MessageId, kind: FeedbackKind) -> FeedbackResult<()> {
        let email = {
            let inner = self.inner.lock();
            feedback::ensure_rateable(inner.store.get(id), id)?;
            inner.identity.email.clone()
        };
        self.feedback.report(id, kind, email).await
    }

    pub async fn submit_contact(&self, kind: ContactKind, message: &str) -> FeedbackResult<()> {
        let identity = self.identity();
        self.feedback
            .contact(kind, identity.email, identity.name, message)
            .await
    }

    /// Records dictation until `until` resolves and returns the transcript for use as input.
    pub async fn dictate<F>(
        &self,
        provider: &dyn TextInputProvider,
        until: F,
    ) -> CaptureResult<String>
    where
        F: Future<Output = ()>,
    {
        capture::record_dictation(provider, until).await
    }

    /// Captures an image and stages it. Returns false if it was already staged.
    pub async fn capture_image(&self, provider: &dyn ImageCaptureProvider) -> CaptureResult<bool> {
        let file = provider.capture().await?;
        Ok(self.stage_file(file))
    }
}

fn transition(
    state: &mut SendState,
    transition: SendTransition,
    stage: &'static str,
) -> SendResult<()> {
    match state.apply(transition) {
        Ok(next) => {
            *state = next;
            Ok(())
        }
        Err(rejection) => InvalidTransitionSnafu { stage, rejection }.fail(),
    }
}

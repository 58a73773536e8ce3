#![deny(unsafe_code)]

//! Conversation core of the chat client: staging attachments, extracting
//! their text, composing prompts and streaming replies into the message log.

mod attachments;
mod capture;
mod composer;
mod deadline;
mod events;
mod feedback;
mod ingest;
mod message;
mod session;
mod state;
mod store;
mod upload;

pub use attachments::{
    AttachedFile, AttachmentError, AttachmentKey, AttachmentResult, AttachmentStager,
    FALLBACK_MIME_TYPE, mime_type_for_path,
};
pub use capture::{
    CaptureError, CaptureResult, ImageCaptureProvider, RecordedAudioDictation, StillImageFile,
    TextInputProvider, record_dictation,
};
pub use composer::{DEFAULT_SYSTEM_PROMPT, PromptComposer};
pub use events::SessionEvent;
pub use feedback::{FeedbackError, FeedbackReporter, FeedbackResult, ensure_rateable};
pub use ingest::{Applied, DATA_PREFIX, FrameDecoder, StreamEvent, StreamIngester, parse_line};
pub use message::{FileRef, Message, MessageId, Role, SendId};
pub use session::{
    BACKEND_FAILURE_TEXT, BusyPolicy, ChatSession, DEFAULT_REQUEST_TIMEOUT, Identity, SendError,
    SendOutcome, SendResult, SessionOptions,
};
pub use state::{FailureKind, SendState, SendTransition, SendTransitionRejection};
pub use store::{ConversationStore, InFlight, StoreError, StoreResult};
pub use upload::{
    NO_TEXT_EXTRACTED, UploadCoordinator, UploadError, UploadOutcome, UploadResult, route_for,
};

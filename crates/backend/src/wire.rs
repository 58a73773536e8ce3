//! JSON shapes exchanged with the chat backend.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Speaker role as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: WireRole,
    pub content: String,
}

impl WireMessage {
    pub fn new(role: WireRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
}

/// Body returned by both extraction routes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractionResponse {
    #[serde(default)]
    pub text: Option<String>,
}

/// Payload of one `data: ` line on the chat stream.
///
/// Fields are independent; one frame may carry a chunk and a final value at once.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(default, rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_text: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Which backend route turns an uploaded file into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionRoute {
    Extraction,
    Transcription,
}

impl ExtractionRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "upload-file",
            Self::Transcription => "transcribe-audio",
        }
    }
}

/// One file handed to an extraction route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub content: Bytes,
}

impl FileUpload {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Like,
    Dislike,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }
}

/// Body of `POST /message-feedback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFeedback {
    pub message_id: u64,
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub email: String,
}

/// Category picked on the contact form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactKind {
    Feedback,
    Issue,
    Suggestion,
}

impl ContactKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "feedback" => Some(Self::Feedback),
            "issue" => Some(Self::Issue),
            "suggestion" => Some(Self::Suggestion),
            _ => None,
        }
    }
}

/// Body of `POST /contact-feedback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactFeedback {
    pub email: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ContactKind,
    pub message: String,
}

/// Body of `POST /auth/store-user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreUser {
    pub email: String,
}

#![deny(unsafe_code)]

//! HTTP side of the chat client: wire shapes, the `ChatBackend` seam and its
//! reqwest implementation.

mod backend;
mod config;
mod error;
mod http;
pub mod wire;

pub use backend::{BoxFuture, ByteStream, ChatBackend};
pub use config::{BackendConfig, DEFAULT_BASE_URL, Endpoints};
pub use error::{BackendError, BackendResult};
pub use http::HttpBackend;
pub use wire::{
    ChatRequest, ContactFeedback, ContactKind, ExtractionResponse, ExtractionRoute,
    FeedbackKind, FileUpload, MessageFeedback, StoreUser, StreamFrame, WireMessage, WireRole,
};

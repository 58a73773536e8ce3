use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

use crate::error::BackendResult;
use crate::wire::{
    ChatRequest, ContactFeedback, ExtractionResponse, ExtractionRoute, FileUpload,
    MessageFeedback, StoreUser,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw response body of the chat route, one item per network read.
pub type ByteStream = Pin<Box<dyn Stream<Item = BackendResult<Bytes>> + Send + 'static>>;

/// Everything the chat core needs from the backend.
///
/// Implementations must not retry on their own; the caller owns timeouts and
/// cancellation by dropping the returned futures and streams.
pub trait ChatBackend: Send + Sync {
    /// Uploads one file to the given route and returns the decoded response.
    fn extract_text<'a>(
        &'a self,
        route: ExtractionRoute,
        upload: FileUpload,
    ) -> BoxFuture<'a, BackendResult<ExtractionResponse>>;

    /// Issues the completion request and hands back the undecoded body stream.
    fn open_chat_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, BackendResult<ByteStream>>;

    fn send_message_feedback<'a>(
        &'a self,
        feedback: MessageFeedback,
    ) -> BoxFuture<'a, BackendResult<()>>;

    fn submit_contact_feedback<'a>(
        &'a self,
        feedback: ContactFeedback,
    ) -> BoxFuture<'a, BackendResult<()>>;

    fn store_user<'a>(&'a self, user: StoreUser) -> BoxFuture<'a, BackendResult<()>>;

    /// Browser redirect target that starts the OAuth login flow.
    fn login_url(&self) -> BackendResult<String>;
}

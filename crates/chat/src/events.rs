use crate::message::{Message, MessageId, SendId};
use crate::state::SendState;

/// Conversation changes broadcast to renderers, in the order they hit the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A user turn, a fresh placeholder or an error reply was appended.
    MessageAppended(Message),
    /// The in-flight reply text was replaced with the full accumulated text.
    TextUpdated { id: MessageId, text: String },
    Completed {
        id: MessageId,
        text: String,
        image_url: Option<String>,
    },
    /// The send reached a terminal state.
    SendFinished { send_id: SendId, state: SendState },
}

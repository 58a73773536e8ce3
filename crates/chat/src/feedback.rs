use std::sync::Arc;

use chatline_backend::{
    BackendError, ChatBackend, ContactFeedback, ContactKind, FeedbackKind, MessageFeedback,
    StoreUser,
};
use snafu::{ResultExt, Snafu, ensure};

use crate::message::{Message, MessageId};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FeedbackError {
    #[snafu(display("message {id} is not in the conversation"))]
    UnknownMessage { stage: &'static str, id: MessageId },
    #[snafu(display("message {id} is not a completed assistant reply"))]
    NotCompleted { stage: &'static str, id: MessageId },
    #[snafu(display("refusing to send an empty message on `{stage}`"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("feedback request failed on `{stage}`, {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
}

pub type FeedbackResult<T> = Result<T, FeedbackError>;

/// Only finished assistant replies can be rated.
pub fn ensure_rateable(message: Option<&Message>, id: MessageId) -> FeedbackResult<()> {
    let Some(message) = message else {
        return UnknownMessageSnafu {
            stage: "report-feedback",
            id,
        }
        .fail();
    };
    ensure!(
        message.is_assistant() && message.is_complete,
        NotCompletedSnafu {
            stage: "report-feedback",
            id,
        }
    );
    Ok(())
}

/// Sends user feedback to the backend. Nothing here touches the conversation.
#[derive(Clone)]
pub struct FeedbackReporter {
    backend: Arc<dyn ChatBackend>,
}

impl FeedbackReporter {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub async fn report(
        &self,
        message_id: MessageId,
        kind: FeedbackKind,
        email: impl Into<String>,
    ) -> FeedbackResult<()> {
        let feedback = MessageFeedback {
            message_id: message_id.get(),
            kind,
            email: email.into(),
        };
        self.backend
            .send_message_feedback(feedback)
            .await
            .context(BackendSnafu {
                stage: "report-feedback",
            })?;

        tracing::info!(message_id = %message_id, kind = kind.as_str(), "feedback sent");
        Ok(())
    }

    pub async fn contact(
        &self,
        kind: ContactKind,
        email: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> FeedbackResult<()> {
        let message = message.into();
        ensure!(
            !message.trim().is_empty(),
            EmptyMessageSnafu {
                stage: "contact-feedback"
            }
        );

        let feedback = ContactFeedback {
            email: email.into(),
            name: name.into(),
            kind,
            message,
        };
        self.backend
            .submit_contact_feedback(feedback)
            .await
            .context(BackendSnafu {
                stage: "contact-feedback",
            })
    }

    pub async fn store_user(&self, email: impl Into<String>) -> FeedbackResult<()> {
        self.backend
            .store_user(StoreUser {
                email: email.into(),
            })
            .await
            .context(BackendSnafu { stage: "store-user" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_completed_assistant_messages_are_rateable() {
        let id = MessageId::new(2);
        let mut reply = Message::assistant_placeholder(id);

        assert!(matches!(
            ensure_rateable(None, id),
            Err(FeedbackError::UnknownMessage { .. })
        ));
        assert!(matches!(
            ensure_rateable(Some(&reply), id),
            Err(FeedbackError::NotCompleted { .. })
        ));

        reply.is_complete = true;
        assert!(ensure_rateable(Some(&reply), id).is_ok());

        let user = Message::user(MessageId::new(1), "Hello", Vec::new());
        assert!(matches!(
            ensure_rateable(Some(&user), user.id),
            Err(FeedbackError::NotCompleted { .. })
        ));
    }
}

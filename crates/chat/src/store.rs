use snafu::{OptionExt, Snafu, ensure};

use crate::message::{Message, MessageId};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("last message {last:?} is not the in-flight assistant message on `{stage}`"))]
    NotInFlight {
        stage: &'static str,
        last: Option<MessageId>,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to the assistant message currently being streamed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    pub id: MessageId,
    pub index: usize,
}

/// Append-only message log for the active session.
///
/// Only the last message can change, and only while it is the registered
/// in-flight assistant message.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
    last_id: u64,
    in_flight: Option<InFlight>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> MessageId {
        self.last_id += 1;
        MessageId::new(self.last_id)
    }

    pub fn append_user(&mut self, text: impl Into<String>, file_names: Vec<String>) -> MessageId {
        let id = self.next_id();
        self.messages.push(Message::user(id, text, file_names));
        id
    }

    /// Appends an empty, incomplete assistant message and registers it as in flight.
    ///
    /// A previous handle that was never released is dropped; its message keeps
    /// whatever text it had.
    pub fn append_placeholder_assistant(&mut self) -> InFlight {
        if let Some(previous) = self.in_flight.take() {
            tracing::warn!(
                message_id = %previous.id,
                "replacing an unreleased in-flight message"
            );
        }

        let id = self.next_id();
        let index = self.messages.len();
        self.messages.push(Message::assistant_placeholder(id));
        let in_flight = InFlight { id, index };
        self.in_flight = Some(in_flight);
        in_flight
    }

    fn in_flight_last_mut(&mut self, stage: &'static str) -> StoreResult<&mut Message> {
        let last = self.messages.last().map(|message| message.id);
        let is_last = matches!(
            (self.in_flight, last),
            (Some(in_flight), Some(last)) if in_flight.id == last
        );
        ensure!(is_last, NotInFlightSnafu { stage, last });

        self.messages
            .last_mut()
            .context(NotInFlightSnafu { stage, last })
    }

    /// Replaces the in-flight text.
    pub fn mutate_last_text(&mut self, text: impl Into<String>) -> StoreResult<MessageId> {
        let message = self.in_flight_last_mut("mutate-last-text")?;
        message.text = text.into();
        Ok(message.id)
    }

    /// Sets the final text and image, marks the message complete and releases the handle.
    pub fn mutate_last_final(
        &mut self,
        text: impl Into<String>,
        image_url: Option<String>,
    ) -> StoreResult<MessageId> {
        let message = self.in_flight_last_mut("mutate-last-final")?;
        message.text = text.into();
        message.image_url = image_url;
        message.is_complete = true;
        let id = message.id;
        self.in_flight = None;
        Ok(id)
    }

    /// Stops treating the current placeholder as in flight without completing it.
    pub fn release_in_flight(&mut self) -> Option<InFlight> {
        self.in_flight.take()
    }

    pub fn in_flight(&self) -> Option<InFlight> {
        self.in_flight
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        // Ids are assigned in append order, so the log is sorted by id.
        self.messages
            .binary_search_by_key(&id, |message| message.id)
            .ok()
            .map(|index| &self.messages[index])
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn ids_increase_in_append_order() {
        let mut store = ConversationStore::new();
        let user = store.append_user("Hello", Vec::new());
        let assistant = store.append_placeholder_assistant();

        assert!(user < assistant.id);
        assert_eq!(assistant.index, 1);
        assert_eq!(store.get(user).map(|message| message.role), Some(Role::User));
        assert_eq!(store.get(MessageId::new(99)), None);
    }

    #[test]
    fn user_message_keeps_file_names() {
        let mut store = ConversationStore::new();
        let id = store.append_user("see files", vec!["a.txt".to_string(), "b.mp3".to_string()]);
        let names = store
            .get(id)
            .map(|message| {
                message
                    .files
                    .iter()
                    .map(|file| file.name.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        assert_eq!(names, ["a.txt", "b.mp3"]);
    }

    #[test]
    fn final_replaces_text_and_completes_once() {
        let mut store = ConversationStore::new();
        store.append_user("Hello", Vec::new());
        store.append_placeholder_assistant();

        store.mutate_last_text("Hi there").unwrap();
        store
            .mutate_last_final("Hi there!", Some("http://img/1.png".to_string()))
            .unwrap();

        let last = store.last().unwrap().clone();
        assert_eq!(last.text, "Hi there!");
        assert_eq!(last.image_url.as_deref(), Some("http://img/1.png"));
        assert!(last.is_complete);
        assert_eq!(store.in_flight(), None);

        // Further mutation is a contract violation and changes nothing.
        assert!(store.mutate_last_text("late").is_err());
        assert!(store.mutate_last_final("later", None).is_err());
        assert_eq!(store.last(), Some(&last));
    }

    #[test]
    fn mutators_reject_a_user_tail() {
        let mut store = ConversationStore::new();
        store.append_user("Hello", Vec::new());

        let error = store.mutate_last_text("x").unwrap_err();
        assert!(matches!(
            error,
            StoreError::NotInFlight {
                last: Some(MessageId(1)),
                ..
            }
        ));
        assert_eq!(store.last().map(|message| message.text.as_str()), Some("Hello"));
    }

    #[test]
    fn released_placeholder_stays_incomplete_and_frozen() {
        let mut store = ConversationStore::new();
        store.append_placeholder_assistant();
        store.mutate_last_text("partial").unwrap();

        assert!(store.release_in_flight().is_some());
        assert!(store.mutate_last_text("more").is_err());

        let last = store.last().unwrap();
        assert_eq!(last.text, "partial");
        assert!(!last.is_complete);
    }

    #[test]
    fn at_most_one_message_is_in_flight() {
        let mut store = ConversationStore::new();
        let first = store.append_placeholder_assistant();
        let second = store.append_placeholder_assistant();

        assert_ne!(first.id, second.id);
        assert_eq!(store.in_flight(), Some(second));
    }
}

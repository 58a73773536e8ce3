use chatline_backend::{ChatRequest, WireMessage, WireRole};

use crate::message::Message;
use crate::upload::UploadResult;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Builds the outbound content block and the full conversation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptComposer {
    system_prompt: String,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl PromptComposer {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// Trimmed user text followed by one `[File: name]` block per upload, in upload order.
    pub fn compose_content(input: &str, uploads: &[UploadResult]) -> String {
        let mut content = input.trim().to_string();
        for upload in uploads {
            content.push_str("\n\n[File: ");
            content.push_str(&upload.file_name);
            content.push_str("]\n");
            content.push_str(&upload.extracted_text);
        }
        content
    }

    /// System instruction, then prior history (text only), then the new user content.
    pub fn build_payload(&self, history: &[Message], content: impl Into<String>) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(WireMessage::new(WireRole::System, self.system_prompt.clone()));
        messages.extend(
            history
                .iter()
                .map(|message| WireMessage::new(message.role.to_wire(), message.text.clone())),
        );
        messages.push(WireMessage::new(WireRole::User, content));

        ChatRequest { messages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageId, Role};

    #[test]
    fn content_appends_file_blocks_in_order() {
        let uploads = [
            UploadResult::new("a.txt", "alpha"),
            UploadResult::new("b.pdf", "beta"),
        ];
        assert_eq!(
            PromptComposer::compose_content("  Summarize these \n", &uploads),
            "Summarize these\n\n[File: a.txt]\nalpha\n\n[File: b.pdf]\nbeta"
        );
    }

    #[test]
    fn empty_input_with_audio_transcript() {
        let uploads = [UploadResult::new("note.mp3", "hello world")];
        assert_eq!(
            PromptComposer::compose_content("", &uploads),
            "\n\n[File: note.mp3]\nhello world"
        );
    }

    #[test]
    fn payload_strips_files_and_keeps_history_order() {
        let mut assistant = Message::assistant_placeholder(MessageId::new(2));
        assistant.text = "Hi there!".to_string();
        assistant.image_url = Some("http://img".to_string());
        let history = vec![
            Message::user(MessageId::new(1), "Hello", vec!["x.txt".to_string()]),
            assistant,
        ];

        let payload = PromptComposer::default().build_payload(&history, "Next");
        let pairs = payload
            .messages
            .iter()
            .map(|message| (message.role, message.content.as_str()))
            .collect::<Vec<_>>();

        assert_eq!(
            pairs,
            vec![
                (WireRole::System, DEFAULT_SYSTEM_PROMPT),
                (WireRole::User, "Hello"),
                (WireRole::Assistant, "Hi there!"),
                (WireRole::User, "Next"),
            ]
        );
        assert_eq!(history[0].role, Role::User);
    }

    #[test]
    fn custom_system_prompt_leads_payload() {
        let payload = PromptComposer::new("Be terse.").build_payload(&[], "q");
        assert_eq!(payload.messages[0].content, "Be terse.");
        assert_eq!(payload.messages.len(), 2);
    }
}

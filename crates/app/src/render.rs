use std::collections::HashMap;

use chatline_chat::{FailureKind, Message, MessageId, Role, SendState, SessionEvent};

/// Turns session events into terminal output, printing only what is new.
#[derive(Debug, Default)]
pub struct ReplyRenderer {
    printed: HashMap<MessageId, String>,
}

impl ReplyRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, event: &SessionEvent) -> Option<String> {
        match event {
            // User turns are already on screen as typed input.
            SessionEvent::MessageAppended(message) if message.role == Role::User => None,
            SessionEvent::MessageAppended(message) => {
                self.printed.insert(message.id, message.text.clone());
                Some(format!("[{}] assistant: {}", message.id, message.text))
            }
            SessionEvent::TextUpdated { id, text } => Some(self.advance(*id, text)),
            SessionEvent::Completed {
                id,
                text,
                image_url,
            } => {
                let mut output = self.advance(*id, text);
                if let Some(image_url) = image_url {
                    output.push_str("\n  image: ");
                    output.push_str(image_url);
                }
                self.printed.remove(id);
                output.push('\n');
                Some(output)
            }
            SessionEvent::SendFinished { state, .. } => match state {
                SendState::Failed { kind, .. } if *kind == FailureKind::IncompleteStream => {
                    Some("\n(reply ended early)\n".to_string())
                }
                SendState::Failed { message, .. } => {
                    self.printed.clear();
                    Some(format!("\n({message})\n"))
                }
                SendState::Cancelled(_) => {
                    self.printed.clear();
                    Some("\n(stopped)\n".to_string())
                }
                _ => None,
            },
        }
    }

    /// The suffix to print for `text`, or a full redraw when it no longer extends what is shown.
    fn advance(&mut self, id: MessageId, text: &str) -> String {
        let shown = self.printed.entry(id).or_default();
        let output = match text.strip_prefix(shown.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => format!("\n[{id}] assistant: {text}"),
        };
        *shown = text.to_string();
        output
    }
}

pub fn history_line(message: &Message) -> String {
    let speaker = match message.role {
        Role::System => "system",
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let mut line = format!("[{}] {speaker}: {}", message.id, message.text);
    if !message.files.is_empty() {
        let names = message
            .files
            .iter()
            .map(|file| file.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        line.push_str(&format!(" (files: {names})"));
    }
    if let Some(image_url) = &message.image_url {
        line.push_str(&format!(" (image: {image_url})"));
    }
    if message.role == Role::Assistant && !message.is_complete {
        line.push_str(" (incomplete)");
    }
    line
}

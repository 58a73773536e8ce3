use std::fmt;

use chatline_backend::WireRole;

/// Stable identifier for one message, strictly increasing within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Identifier for one send attempt.
///
/// Every call to send mints a new one so a superseded pipeline can be told apart
/// from the active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SendId(pub u64);

impl SendId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SendId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "send-{}", self.0)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn to_wire(self) -> WireRole {
        match self {
            Self::System => WireRole::System,
            Self::User => WireRole::User,
            Self::Assistant => WireRole::Assistant,
        }
    }
}

/// Name of a file that travelled with a user message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub files: Vec<FileRef>,
    pub image_url: Option<String>,
    pub is_complete: bool,
}

impl Message {
    /// User turns are frozen the moment they are created.
    pub fn user(id: MessageId, text: impl Into<String>, file_names: Vec<String>) -> Self {
        Self {
            id,
            role: Role::User,
            text: text.into(),
            files: file_names
                .into_iter()
                .map(|name| FileRef { name })
                .collect(),
            image_url: None,
            is_complete: true,
        }
    }

    /// Empty assistant message that the stream fills in.
    pub fn assistant_placeholder(id: MessageId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            text: String::new(),
            files: Vec::new(),
            image_url: None,
            is_complete: false,
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self.role, Role::Assistant)
    }
}

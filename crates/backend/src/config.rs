pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Route paths relative to the backend base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub upload_file: String,
    pub transcribe_audio: String,
    pub chat: String,
    pub message_feedback: String,
    pub contact_feedback: String,
    pub store_user: String,
    pub google_login: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            upload_file: "upload-file".to_string(),
            transcribe_audio: "transcribe-audio".to_string(),
            chat: "chat".to_string(),
            message_feedback: "message-feedback".to_string(),
            contact_feedback: "contact-feedback".to_string(),
            store_user: "auth/store-user".to_string(),
            google_login: "auth/google/login".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub endpoints: Endpoints,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            endpoints: Endpoints::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

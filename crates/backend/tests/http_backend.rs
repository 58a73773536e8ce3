use chatline_backend::{
    BackendConfig, BackendError, ChatBackend, ChatRequest, ContactFeedback, ContactKind,
    ExtractionRoute, FeedbackKind, FileUpload, HttpBackend, MessageFeedback, StoreUser,
    WireMessage, WireRole,
};
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend_for(server: &MockServer) -> HttpBackend {
    HttpBackend::new(BackendConfig::new(server.uri())).unwrap()
}

#[tokio::test]
async fn upload_sends_single_file_part_and_reads_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload-file"))
        .and(body_string_contains("name=\"file\""))
        .and(body_string_contains("filename=\"report.txt\""))
        .and(body_string_contains("quarterly numbers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "extracted"})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let response = backend
        .extract_text(
            ExtractionRoute::Extraction,
            FileUpload::new("report.txt", "text/plain", "quarterly numbers"),
        )
        .await
        .unwrap();

    assert_eq!(response.text.as_deref(), Some("extracted"));
}

#[tokio::test]
async fn transcription_route_and_missing_text_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transcribe-audio"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detail": "silence"})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let response = backend
        .extract_text(
            ExtractionRoute::Transcription,
            FileUpload::new("note.mp3", "audio/mpeg", vec![0_u8, 1, 2]),
        )
        .await
        .unwrap();

    assert_eq!(response.text, None);
}

#[tokio::test]
async fn upload_error_status_with_json_body_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload-file"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"detail": "unsupported"})))
        .expect(1)
        .mount(&server)
        .await;

    let response = backend_for(&server)
        .extract_text(
            ExtractionRoute::Extraction,
            FileUpload::new("a.xyz", "", vec![1_u8]),
        )
        .await
        .unwrap();

    assert_eq!(response.text, None);
}

#[tokio::test]
async fn upload_error_status_without_json_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload-file"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let error = backend_for(&server)
        .extract_text(
            ExtractionRoute::Extraction,
            FileUpload::new("a.bin", "", vec![1_u8]),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, BackendError::Decode { .. }));
}

#[tokio::test]
async fn upload_non_json_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload-file"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let error = backend_for(&server)
        .extract_text(
            ExtractionRoute::Extraction,
            FileUpload::new("a.txt", "text/plain", "x"),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, BackendError::Decode { .. }));
}

#[tokio::test]
async fn chat_stream_posts_messages_and_yields_body() {
    let server = MockServer::start().await;
    let request = ChatRequest {
        messages: vec![
            WireMessage::new(WireRole::System, "You are a helpful AI assistant."),
            WireMessage::new(WireRole::User, "Hello"),
        ],
    };
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_json(json!({
            "messages": [
                {"role": "system", "content": "You are a helpful AI assistant."},
                {"role": "user", "content": "Hello"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("data: {\"chunk\":\"Hi\"}\n", "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let mut stream = backend.open_chat_stream(&request).await.unwrap();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }

    assert_eq!(body, b"data: {\"chunk\":\"Hi\"}\n");
}

#[tokio::test]
async fn feedback_contact_and_store_user_post_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/message-feedback"))
        .and(body_json(json!({"message_id": 4, "type": "like", "email": "u@example.com"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/contact-feedback"))
        .and(body_json(json!({
            "email": "u@example.com",
            "name": "U",
            "type": "Suggestion",
            "message": "dark mode"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/store-user"))
        .and(body_json(json!({"email": "u@example.com"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    backend
        .send_message_feedback(MessageFeedback {
            message_id: 4,
            kind: FeedbackKind::Like,
            email: "u@example.com".to_string(),
        })
        .await
        .unwrap();
    backend
        .submit_contact_feedback(ContactFeedback {
            email: "u@example.com".to_string(),
            name: "U".to_string(),
            kind: ContactKind::Suggestion,
            message: "dark mode".to_string(),
        })
        .await
        .unwrap();
    backend
        .store_user(StoreUser {
            email: "u@example.com".to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn unreachable_backend_is_a_request_error() {
    // Port 1 is reserved and refuses connections on test hosts.
    let backend = HttpBackend::new(BackendConfig::new("http://127.0.0.1:1")).unwrap();
    let error = backend
        .send_message_feedback(MessageFeedback {
            message_id: 1,
            kind: FeedbackKind::Dislike,
            email: String::new(),
        })
        .await
        .unwrap_err();

    assert!(matches!(error, BackendError::Request { .. }));
}

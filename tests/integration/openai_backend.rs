//! OpenAI-compatible backend against a mock SSE server.

use colloquy::backend::{Backend, OpenAiBackend};
use colloquy::{ConversationError, Message};
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{backend_config, sse_body};

async fn collect(backend: &OpenAiBackend, history: &[Message]) -> colloquy::Result<Vec<String>> {
    let stream = backend.generate(history, CancellationToken::new()).await?;
    stream.collect::<Vec<_>>().await.into_iter().collect()
}

#[tokio::test]
async fn streams_content_fragments_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(sse_body(&["Ava [wa", "rm]: Hel", "lo"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(&backend_config(&server)).unwrap();
    let fragments = collect(&backend, &[Message::user("User: hi")]).await.unwrap();
    assert_eq!(fragments, vec!["Ava [wa", "rm]: Hel", "lo"]);
}

#[tokio::test]
async fn request_carries_history_model_and_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "stream": true,
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "User: hi"},
                {"role": "assistant", "content": "Ava: hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[])))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(&backend_config(&server)).unwrap();
    let history = [
        Message::system("be brief"),
        Message::user("User: hi"),
        Message::assistant("Ava: hello"),
    ];
    let fragments = collect(&backend, &history).await.unwrap();
    assert!(fragments.is_empty());
}

#[tokio::test]
async fn http_errors_become_backend_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "invalid api key"}})),
        )
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(&backend_config(&server)).unwrap();
    let err = match backend
        .generate(&[Message::user("hi")], CancellationToken::new())
        .await
    {
        Ok(_) => panic!("expected an authentication failure"),
        Err(e) => e,
    };
    assert!(matches!(err, ConversationError::Backend(_)));
    assert!(err.to_string().contains("invalid api key"));
}

#[tokio::test]
async fn error_chunk_mid_stream_ends_with_error() {
    let server = MockServer::start().await;
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Ava: \"}}]}\n\n\
                data: {\"error\":{\"message\":\"model overloaded\"}}\n\n";
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(&backend_config(&server)).unwrap();
    let err = collect(&backend, &[Message::user("hi")]).await.unwrap_err();
    assert!(err.to_string().contains("model overloaded"));
}

#[tokio::test]
async fn cancelled_token_stops_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["never"])))
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(&backend_config(&server)).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = backend.generate(&[Message::user("hi")], cancel).await;
    assert!(result.is_err_and(|e| e.is_cancelled()));
}

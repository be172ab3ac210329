//! Shared helpers for integration tests.

use std::sync::Mutex;

use async_trait::async_trait;
use colloquy::config::BackendConfig;
use colloquy::reaction::{CodeRunner, Speaker};
use colloquy::{CodeTurn, DialogueTurn};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Encode `fragments` as an OpenAI chat completion SSE body ending in `[DONE]`.
pub(crate) fn sse_body(fragments: &[&str]) -> String {
    let mut body = String::from(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    );
    for fragment in fragments {
        let chunk = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": fragment}}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Backend settings pointing at a mock server.
pub(crate) fn backend_config(server: &MockServer) -> BackendConfig {
    BackendConfig {
        base_url: server.uri(),
        model: "test-model".to_owned(),
        api_key: Some("sk-test".to_owned()),
        ..BackendConfig::default()
    }
}

/// Mount one streamed completion per entry, served in order.
pub(crate) async fn mount_streams(server: &MockServer, replies: &[&[&str]]) {
    for reply in replies {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(reply)))
            .up_to_n_times(1)
            .expect(1)
            .mount(server)
            .await;
    }
}

/// Speaker that records every dialogue turn and keeps it.
#[derive(Default)]
pub(crate) struct CollectingSpeaker {
    pub(crate) spoken: Mutex<Vec<DialogueTurn>>,
}

#[async_trait]
impl Speaker for CollectingSpeaker {
    async fn speak(
        &self,
        turn: DialogueTurn,
        _cancel: CancellationToken,
    ) -> colloquy::Result<Option<DialogueTurn>> {
        self.spoken.lock().unwrap().push(turn.clone());
        Ok(Some(turn))
    }
}

/// Runner that echoes the code it was given.
pub(crate) struct EchoRunner;

#[async_trait]
impl CodeRunner for EchoRunner {
    async fn run_code(
        &self,
        turn: &CodeTurn,
        _cancel: CancellationToken,
    ) -> colloquy::Result<String> {
        Ok(format!("ran {}", turn.code))
    }
}

//! End-to-end conversation rounds over the OpenAI backend.

use std::sync::Arc;
use std::time::Duration;

use colloquy::backend::OpenAiBackend;
use colloquy::config::ConversationConfig;
use colloquy::{ConversationCoordinator, ConversationState};
use wiremock::MockServer;

use crate::helpers::{CollectingSpeaker, EchoRunner, backend_config, mount_streams};

fn coordinator(server: &MockServer, speaker: Arc<CollectingSpeaker>) -> ConversationCoordinator {
    let config = ConversationConfig {
        system_prompt: Some("Reply as Ava.".to_owned()),
        grace_period_ms: 10,
        ..ConversationConfig::default()
    };
    let backend = Arc::new(OpenAiBackend::new(&backend_config(server)).unwrap());
    ConversationCoordinator::new(config, backend, speaker, Arc::new(EchoRunner))
}

#[tokio::test]
async fn streamed_dialogue_lands_in_history() {
    let server = MockServer::start().await;
    mount_streams(&server, &[&["Ava [wa", "rm]: Hel", "lo!\nBob: Hi."]]).await;

    let speaker = Arc::new(CollectingSpeaker::default());
    let coordinator = coordinator(&server, speaker.clone());
    tokio::time::timeout(Duration::from_secs(5), coordinator.submit("hello", true))
        .await
        .expect("round finished")
        .unwrap();

    let history: Vec<String> = coordinator
        .history()
        .await
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(
        history,
        vec!["Reply as Ava.", "User: hello", "Ava [warm]: Hello!", "Bob: Hi."]
    );
    assert_eq!(speaker.spoken.lock().unwrap().len(), 2);
    assert_eq!(coordinator.state(), ConversationState::Idle);
}

#[tokio::test]
async fn code_turn_triggers_second_request() {
    let server = MockServer::start().await;
    mount_streams(
        &server,
        &[&["Ava: one moment\n```sh\nda", "te\n```"], &["Ava: done."]],
    )
    .await;

    let speaker = Arc::new(CollectingSpeaker::default());
    let coordinator = coordinator(&server, speaker);
    tokio::time::timeout(Duration::from_secs(5), coordinator.submit("time?", true))
        .await
        .expect("rounds finished")
        .unwrap();

    let history: Vec<String> = coordinator
        .history()
        .await
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(
        history,
        vec![
            "Reply as Ava.",
            "User: time?",
            "Ava: one moment",
            "```sh\ndate\n```",
            "ran date\n[completed]",
            "Ava: done.",
        ]
    );

    // The second request saw the executed code and its output.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(body["messages"].as_array().unwrap().len(), 5);
    assert_eq!(body["messages"][4]["content"], "ran date\n[completed]");
}

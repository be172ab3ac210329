//! Configuration persistence and its effect on speech rewriting.

use std::sync::Mutex;

use async_trait::async_trait;
use colloquy::config::PronunciationRule;
use colloquy::index_map::Comparer;
use colloquy::reaction::{PronunciationSpeaker, Speaker, SpeechOutcome, SpeechSink};
use colloquy::{ColloquyConfig, DialogueTurn};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CapturingSink {
    said: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechSink for CapturingSink {
    async fn say(
        &self,
        _turn: &DialogueTurn,
        text: &str,
        _cancel: CancellationToken,
    ) -> colloquy::Result<SpeechOutcome> {
        self.said.lock().unwrap().push(text.to_owned());
        Ok(SpeechOutcome::Completed)
    }
}

#[test]
fn saved_config_loads_identically() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("colloquy").join("config.toml");

    let mut config = ColloquyConfig::default();
    config.conversation.system_prompt = Some("Be concise.".to_owned());
    config.execution.enabled = true;
    config.execution.timeout_secs = 5;
    config.save_to_file(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[conversation]"));
    assert!(text.contains("[speech]"));

    let loaded = ColloquyConfig::from_file(&path).unwrap();
    assert_eq!(
        loaded.conversation.system_prompt.as_deref(),
        Some("Be concise.")
    );
    assert!(loaded.execution.enabled);
    assert_eq!(loaded.execution.timeout_secs, 5);
    assert_eq!(loaded.conversation.fault_marker, "\n[faulted]");
}

#[test]
fn invalid_values_are_rejected_on_load() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[backend]\nmodel = \"\"\n").unwrap();
    let err = ColloquyConfig::from_file(&path).unwrap_err();
    assert_eq!(err.code(), "CONFIG_INVALID");
}

#[tokio::test]
async fn loaded_pronunciations_drive_speech() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("config.toml");

    let mut config = ColloquyConfig::default();
    config.speech.comparer = Comparer::Ordinal;
    config.speech.pronunciations = vec![PronunciationRule {
        pattern: "km".to_owned(),
        replacement: "kilometres".to_owned(),
    }];
    config.save_to_file(&path).unwrap();
    let loaded = ColloquyConfig::from_file(&path).unwrap();

    let speaker = PronunciationSpeaker::from_config(CapturingSink::default(), &loaded.speech)
        .unwrap();
    let turn = speaker
        .speak(
            DialogueTurn::new("Ava", "It is 5 km, not 5 KM."),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(turn.text, "It is 5 km, not 5 KM.");
    assert_eq!(
        speaker.sink().said.lock().unwrap().as_slice(),
        ["It is 5 kilometres, not 5 KM."]
    );
}

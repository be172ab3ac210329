//! Shared test doubles for the coordinator and reaction tests.
//!
//! Every double records what it was asked to do into a shared journal so tests
//! can assert the interleaving of backend requests and reaction calls.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, FragmentStream};
use crate::error::{ConversationError, Result};
use crate::pipeline::messages::Message;
use crate::reaction::{CodeRunner, Speaker};
use crate::turn::{CodeTurn, DialogueTurn};

/// Ordered log shared between doubles and the test body.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn record(journal: &Journal, entry: String) {
    journal.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
}

/// One scripted backend response.
pub enum Script {
    /// Yield these fragments, then end.
    Fragments(Vec<String>),
    /// Fail the request itself.
    Fail(String),
    /// Yield fragments as the test sends them; ends when the sender drops.
    Live(mpsc::UnboundedReceiver<String>),
}

impl Script {
    pub fn fragments(fragments: &[&str]) -> Self {
        Self::Fragments(fragments.iter().map(|f| (*f).to_owned()).collect())
    }

    /// A live script plus the sender that feeds it.
    pub fn live() -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::Live(rx), tx)
    }
}

/// Backend replaying scripted responses in order.
///
/// Requests beyond the script get an empty stream.
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<Message>>>,
    journal: Journal,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>, journal: Journal) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            journal,
        }
    }

    /// History snapshots received, one per request.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        history: &[Message],
        cancel: CancellationToken,
    ) -> Result<FragmentStream> {
        let count = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            requests.push(history.to_vec());
            requests.len()
        };
        record(&self.journal, format!("request {count}"));

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match script {
            None => Ok(Box::pin(futures_util::stream::empty::<Result<String>>())),
            Some(Script::Fail(message)) => Err(ConversationError::Backend(message)),
            Some(Script::Fragments(fragments)) => Ok(Box::pin(futures_util::stream::iter(
                fragments.into_iter().map(Ok::<_, ConversationError>),
            ))),
            Some(Script::Live(rx)) => Ok(Box::pin(live_stream(rx, cancel))),
        }
    }
}

fn live_stream(
    mut rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<String>> + Send {
    async_stream::try_stream! {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                fragment = rx.recv() => Some(fragment),
            };
            match next {
                None => Err::<(), _>(ConversationError::Cancelled)?,
                Some(None) => break,
                Some(Some(fragment)) => yield fragment,
            }
        }
    }
}

/// Speaker that records every turn and optionally vetoes them.
#[derive(Default)]
pub struct RecordingSpeaker {
    spoken: Mutex<Vec<DialogueTurn>>,
    veto: bool,
    journal: Option<Journal>,
}

impl RecordingSpeaker {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    pub fn vetoing(journal: Journal) -> Self {
        Self {
            veto: true,
            ..Self::new(journal)
        }
    }

    pub fn spoken(&self) -> Vec<DialogueTurn> {
        self.spoken.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn speak(
        &self,
        turn: DialogueTurn,
        _cancel: CancellationToken,
    ) -> Result<Option<DialogueTurn>> {
        if let Some(journal) = &self.journal {
            record(journal, format!("speak {}", turn.text));
        }
        self.spoken
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(turn.clone());
        Ok((!self.veto).then_some(turn))
    }
}

/// Code runner returning scripted results; defaults to `Ok("ok")`.
#[derive(Default)]
pub struct RecordingRunner {
    results: Mutex<VecDeque<Result<String>>>,
    ran: Mutex<Vec<CodeTurn>>,
}

impl RecordingRunner {
    pub fn new(results: Vec<Result<String>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            ran: Mutex::new(Vec::new()),
        }
    }

    pub fn ran(&self) -> Vec<CodeTurn> {
        self.ran.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CodeRunner for RecordingRunner {
    async fn run_code(&self, turn: &CodeTurn, _cancel: CancellationToken) -> Result<String> {
        self.ran
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(turn.clone());
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_owned()))
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached within 2s");
}

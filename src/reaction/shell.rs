//! Shell code runner: executes code turns with a timeout and bounded output.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::CodeRunner;
use crate::config::ExecutionConfig;
use crate::error::{ConversationError, Result};
use crate::turn::CodeTurn;

/// [`CodeRunner`] that pipes code turns through `<shell> -c`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    enabled: bool,
    shell: String,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ShellRunner {
    /// Create a runner from execution settings.
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            enabled: config.enabled,
            shell: config.shell.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_output_bytes: config.max_output_bytes,
        }
    }

    /// Override the per-execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(&ExecutionConfig::default())
    }
}

#[async_trait]
impl CodeRunner for ShellRunner {
    async fn run_code(&self, turn: &CodeTurn, cancel: CancellationToken) -> Result<String> {
        if !self.enabled {
            return Err(ConversationError::Execution("code execution disabled".into()));
        }
        if turn.code.trim().is_empty() {
            return Err(ConversationError::Execution("code block is empty".into()));
        }

        debug!(language = ?turn.language, shell = %self.shell, "executing code turn");
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&turn.code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConversationError::Execution(format!("failed to spawn command: {e}")))?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let limit = self.max_output_bytes;
        let collect = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (r1, r2) = tokio::join!(
                read_bounded(stdout.as_mut(), &mut out, limit),
                read_bounded(stderr.as_mut(), &mut err, limit)
            );
            r1?;
            r2?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out, err))
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = tokio::time::timeout(self.timeout, collect) => Some(result),
        };

        let (status, out, err) = match outcome {
            None => {
                // kill_on_drop terminates the child when it goes out of scope.
                return Err(ConversationError::Cancelled);
            }
            Some(Err(_)) => {
                warn!(timeout_secs = self.timeout.as_secs(), "code execution timed out");
                return Err(ConversationError::Execution(format!(
                    "command timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
            Some(Ok(result)) => result.map_err(|e| {
                ConversationError::Execution(format!("failed to collect command output: {e}"))
            })?,
        };

        let output = merge_output(
            &String::from_utf8_lossy(&out),
            &String::from_utf8_lossy(&err),
        );
        let output = truncate_output(&output, self.max_output_bytes);

        if status.success() {
            Ok(output)
        } else {
            let code = status.code().unwrap_or(-1);
            Err(ConversationError::Execution(format!(
                "command exited with code {code}\n{output}"
            )))
        }
    }
}

/// Keep at most `limit + 1` bytes, so truncation stays detectable, and
/// discard the rest so the child never blocks on a full pipe.
async fn read_bounded<R: tokio::io::AsyncRead + Unpin>(
    reader: Option<&mut R>,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<()> {
    if let Some(reader) = reader {
        let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
        (&mut *reader).take(cap).read_to_end(buf).await?;
        let discarded = tokio::io::copy(reader, &mut tokio::io::sink()).await?;
        if discarded > 0 {
            debug!(discarded, "command output beyond limit discarded");
        }
    }
    Ok(())
}

fn merge_output(stdout: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        stdout.to_owned()
    } else if stdout.is_empty() {
        stderr.to_owned()
    } else {
        format!("{stdout}\n--- stderr ---\n{stderr}")
    }
}

/// Truncate `s` to at most `max_bytes` on a char boundary, noting the cut.
fn truncate_output(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n\n[output truncated at {max_bytes} bytes]", &s[..end])
}

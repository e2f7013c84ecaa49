//! Operator input shared by the prompt loop and approval requests.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::{Mutex, Notify};
use tollgate_core::core::resolver::Approver;

use super::render::APPROVAL_QUESTION;

type BoxedInput = Box<dyn AsyncBufRead + Send + Unpin>;

/// Line source read by both the prompt and the approver. Cheap to clone.
#[derive(Clone)]
pub struct InputLines {
    lines: Arc<Mutex<Lines<BoxedInput>>>,
}

impl InputLines {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }

    pub fn new(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        let reader: BoxedInput = Box::new(reader);
        Self {
            lines: Arc::new(Mutex::new(reader.lines())),
        }
    }

    /// Next line without its terminator. `None` at end of input.
    pub async fn next_line(&self) -> Result<Option<String>> {
        self.lines
            .lock()
            .await
            .next_line()
            .await
            .context("read operator input")
    }
}

/// Parses a yes/no answer. Anything else is `None`.
pub fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Reads approvals from operator input.
///
/// The renderer prints the request and the first question, then notifies
/// `prompt_shown`; reading starts only after that. This only re-asks after
/// an unrecognized answer.
pub struct StdinApprover<W> {
    input: InputLines,
    out: W,
    prompt_shown: Arc<Notify>,
}

impl<W> StdinApprover<W> {
    pub fn new(input: InputLines, out: W, prompt_shown: Arc<Notify>) -> Self {
        Self {
            input,
            out,
            prompt_shown,
        }
    }
}

#[async_trait]
impl<W: Write + Send> Approver for StdinApprover<W> {
    async fn approve(&mut self, tool_name: &str, _proposed_input: &Value) -> Result<bool> {
        self.prompt_shown.notified().await;
        loop {
            let Some(line) = self.input.next_line().await? else {
                bail!("input closed while waiting for approval of {tool_name}");
            };
            if let Some(answer) = parse_answer(&line) {
                return Ok(answer);
            }
            write!(self.out, "Please answer y or n. {APPROVAL_QUESTION} ")?;
            self.out.flush()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    /// A notifier whose prompt is already on screen.
    fn shown() -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        notify.notify_one();
        notify
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("y"), Some(true));
        assert_eq!(parse_answer(" YES "), Some(true));
        assert_eq!(parse_answer("No"), Some(false));
        assert_eq!(parse_answer("maybe"), None);
        assert_eq!(parse_answer(""), None);
    }

    #[tokio::test]
    async fn test_approver_reasks_until_answer() {
        let input = InputLines::new(&b"maybe\n\nyes\n"[..]);
        let mut approver = StdinApprover::new(input, Vec::new(), shown());

        let approved = approver
            .approve("Dropbox_DownloadFile", &json!({"file_path": "/a.pdf"}))
            .await
            .unwrap();

        assert!(approved);
        let out = String::from_utf8(approver.out).unwrap();
        assert_eq!(out.matches("Please answer y or n.").count(), 2);
    }

    #[tokio::test]
    async fn test_approver_errors_on_closed_input() {
        let input = InputLines::new(&b"what\n"[..]);
        let mut approver = StdinApprover::new(input, Vec::new(), shown());

        let err = approver
            .approve("Dropbox_DownloadFile", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("input closed"));
    }

    #[tokio::test]
    async fn test_approver_waits_until_prompt_is_shown() {
        let input = InputLines::new(&b"y\n"[..]);
        let prompt_shown = Arc::new(Notify::new());
        let mut approver = StdinApprover::new(input, Vec::new(), Arc::clone(&prompt_shown));

        let early = tokio::time::timeout(
            Duration::from_millis(50),
            approver.approve("Dropbox_DownloadFile", &json!({})),
        )
        .await;
        assert!(early.is_err(), "answer read before the prompt was shown");

        prompt_shown.notify_one();
        assert!(approver.approve("Dropbox_DownloadFile", &json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_input_lines_are_shared_between_clones() {
        let input = InputLines::new(&b"first\nsecond\n"[..]);
        let other = input.clone();

        assert_eq!(input.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(other.next_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(input.next_line().await.unwrap(), None);
    }
}

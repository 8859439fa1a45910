//! Diff preview and the confirmation gate.
//!
//! Model round-trips for different files may overlap, but only one question is
//! ever on screen: the gate holds an async mutex for the whole
//! show-diff-then-ask exchange.

use crossterm::style::{style, Color, Stylize};
use similar::{ChangeTag, TextDiff};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Asks the operator a question and returns the raw answer.
pub trait ConfirmPrompt: Send + Sync {
    fn ask(&self, question: &str) -> io::Result<String>;
}

/// Prompts on stdout and reads one line from stdin.
pub struct StdinPrompt;

impl ConfirmPrompt for StdinPrompt {
    fn ask(&self, question: &str) -> io::Result<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{}", question)?;
        stdout.flush()?;
        drop(stdout);

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer)
    }
}

/// Only an explicit yes counts. Empty input declines.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Unified diff with removed lines in red and added lines in green.
pub fn render_diff(path: &str, original: &str, proposed: &str) -> String {
    let diff = TextDiff::from_lines(original, proposed);
    let mut out = String::new();

    out.push_str(&format!(
        "{}\n{}\n",
        style(format!("--- a/{}", path)).bold(),
        style(format!("+++ b/{}", path)).bold()
    ));

    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        out.push_str(&format!("{}\n", style(hunk.header()).with(Color::Cyan)));
        for change in hunk.iter_changes() {
            let text = change.value().strip_suffix('\n').unwrap_or(change.value());
            let line = match change.tag() {
                ChangeTag::Delete => style(format!("-{}", text)).with(Color::Red).to_string(),
                ChangeTag::Insert => style(format!("+{}", text)).with(Color::Green).to_string(),
                ChangeTag::Equal => format!(" {}", text),
            };
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

pub struct ConfirmationGate {
    prompt: Arc<dyn ConfirmPrompt>,
    lock: Mutex<()>,
}

impl ConfirmationGate {
    pub fn new(prompt: Arc<dyn ConfirmPrompt>) -> Self {
        Self {
            prompt,
            lock: Mutex::new(()),
        }
    }

    pub fn stdin() -> Self {
        Self::new(Arc::new(StdinPrompt))
    }

    /// Show the diff for `path` and wait for a yes/no. Serialized across callers.
    pub async fn confirm(&self, path: &str, original: &str, proposed: &str) -> io::Result<bool> {
        let _turn = self.lock.lock().await;

        let question = format!(
            "\n{}\nApply changes to {}? [y/N] ",
            render_diff(path, original, proposed),
            path
        );
        let prompt = self.prompt.clone();
        let answer = tokio::task::spawn_blocking(move || prompt.ask(&question))
            .await
            .map_err(io::Error::other)??;
        Ok(is_affirmative(&answer))
    }
}

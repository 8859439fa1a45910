//! Command runner
//!
//! Executes a command, merging stdout and stderr line by line in arrival order,
//! and resolves with the captured text. A non-zero exit is an error that still
//! carries the captured output, since a failing test run is usually exactly
//! the text we want.

use crate::display::Display;
use crate::error::RunError;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Output of a command that exited successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
}

/// Run `program` with `args` in `cwd`. When `mirror` is given, each line is
/// also appended to the display's output stream as it arrives.
pub async fn run_command(
    program: &str,
    args: &[String],
    cwd: &Path,
    mirror: Option<&Display>,
) -> Result<CommandOutput, RunError> {
    let command_line = std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");
    tracing::debug!("running `{}` in {}", command_line, cwd.display());

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RunError::Spawn {
            command: command_line.clone(),
            source,
        })?;

    let mut stdout = child.stdout.take().map(PipeLines::new);
    let mut stderr = child.stderr.take().map(PipeLines::new);
    let mut combined = String::new();

    while stdout.is_some() || stderr.is_some() {
        let line = tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => line,
            line = next_line(&mut stderr), if stderr.is_some() => line,
        };
        if let Some(line) = line {
            combined.push_str(&line);
            combined.push('\n');
            if let Some(display) = mirror {
                display.line(&line);
            }
        }
    }

    let status = child.wait().await.map_err(|source| RunError::Spawn {
        command: command_line.clone(),
        source,
    })?;

    if status.success() {
        Ok(CommandOutput { output: combined })
    } else {
        Err(RunError::Exit {
            command: command_line,
            code: status.code(),
            output: combined,
        })
    }
}

/// Run a full command line through the platform shell.
pub async fn run_shell(
    command_line: &str,
    cwd: &Path,
    mirror: Option<&Display>,
) -> Result<CommandOutput, RunError> {
    #[cfg(windows)]
    let (shell, flag) = ("cmd", "/C");
    #[cfg(not(windows))]
    let (shell, flag) = ("sh", "-c");

    run_command(shell, &[flag.to_string(), command_line.to_string()], cwd, mirror).await
}

/// Line splitter over raw pipe bytes. Bytes that are not valid UTF-8 are
/// replaced rather than ending the read, so the child never loses its reader.
struct PipeLines<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> PipeLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
        }
    }
}

fn decode_line(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Read the next line from one pipe; closes the pipe (sets it to `None`) on EOF
/// or a read error so the select loop stops polling it.
///
/// Partial reads survive cancellation by `select!`: bytes stay in `pending`
/// until a full line (or EOF) arrives.
async fn next_line<R>(pipe: &mut Option<PipeLines<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let lines = pipe.as_mut()?;
    match lines.reader.read_until(b'\n', &mut lines.pending).await {
        Ok(0) => {
            let rest = std::mem::take(&mut lines.pending);
            *pipe = None;
            (!rest.is_empty()).then(|| decode_line(rest))
        }
        Ok(_) => Some(decode_line(std::mem::take(&mut lines.pending))),
        Err(err) => {
            tracing::debug!("pipe read failed: {}", err);
            *pipe = None;
            None
        }
    }
}

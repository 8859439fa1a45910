//! Repository context for the analysis prompt
//!
//! The test run, the repository serialization and `git diff` start together
//! and are awaited together. Each blob is clipped before it reaches a prompt.

use crate::config::Config;
use crate::display::Display;
use crate::error::RunError;
use crate::runner::{run_command, run_shell};
use crate::util::truncate_for_prompt;
use anyhow::Context;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const MAX_TEST_OUTPUT_CHARS: usize = 60_000;
const MAX_SNAPSHOT_CHARS: usize = 400_000;
const MAX_DIFF_CHARS: usize = 60_000;
const MAX_TEST_FILE_CHARS: usize = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFile {
    /// Relative to the working directory when possible.
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoContext {
    pub test_output: String,
    /// The test command exited 0.
    pub tests_passed: bool,
    pub repo_snapshot: String,
    /// `None` when there are no uncommitted changes or git is unavailable.
    pub git_diff: Option<String>,
    pub test_files: Vec<TestFile>,
}

/// Gather everything the analysis stage needs. Test output is mirrored to the
/// display while it runs.
pub async fn gather(config: &Config, display: &Display) -> anyhow::Result<RepoContext> {
    let root = config.work_dir.as_path();
    let (program, args) = config
        .test_command
        .split_first()
        .context("No test command given")?;

    tracing::info!("running `{}`", config.test_command_line());
    display.line(&format!("$ {}", config.test_command_line()));

    let diff_args = ["diff".to_string()];
    let (tests, snapshot, diff) = tokio::join!(
        run_command(program, args, root, Some(display)),
        run_shell(&config.serialize_command, root, None),
        run_command("git", &diff_args, root, None),
    );

    let (test_output, tests_passed) = match tests {
        Ok(out) => (out.output, true),
        Err(RunError::Exit { output, code, .. }) => {
            tracing::debug!("test command exited with {:?}", code);
            (output, false)
        }
        Err(err) => return Err(err).context("Failed to run the test command"),
    };

    let repo_snapshot = snapshot
        .with_context(|| {
            format!(
                "Failed to serialize the repository with `{}`",
                config.serialize_command
            )
        })?
        .output;

    let git_diff = match diff {
        Ok(out) if out.output.trim().is_empty() => None,
        Ok(out) => Some(truncate_for_prompt(&out.output, MAX_DIFF_CHARS)),
        Err(err) => {
            tracing::warn!("git diff unavailable: {}", err);
            None
        }
    };

    let test_files = locate_test_files(&config.test_globs, root);
    tracing::debug!(
        test_output = test_output.len(),
        snapshot = repo_snapshot.len(),
        test_files = test_files.len(),
        "context gathered"
    );

    Ok(RepoContext {
        test_output: truncate_for_prompt(&test_output, MAX_TEST_OUTPUT_CHARS),
        tests_passed,
        repo_snapshot: truncate_for_prompt(&repo_snapshot, MAX_SNAPSHOT_CHARS),
        git_diff,
        test_files,
    })
}

/// Expand glob patterns relative to `root` into readable files, deduplicated
/// and sorted by path.
pub fn locate_test_files(patterns: &[String], root: &Path) -> Vec<TestFile> {
    let mut paths: BTreeSet<PathBuf> = BTreeSet::new();

    for pattern in patterns {
        let full = if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            root.join(pattern).to_string_lossy().to_string()
        };
        let entries = match glob::glob(&full) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("invalid test glob {:?}: {}", pattern, err);
                continue;
            }
        };
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => {
                    paths.insert(path);
                }
                Ok(_) => {}
                Err(err) => tracing::warn!("skipping {}: {}", err.path().display(), err),
            }
        }
    }

    paths
        .into_iter()
        .filter_map(|path| {
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!("skipping unreadable {}: {}", path.display(), err);
                    return None;
                }
            };
            let display_path = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            Some(TestFile {
                path: display_path,
                content: truncate_for_prompt(&content, MAX_TEST_FILE_CHARS),
            })
        })
        .collect()
}

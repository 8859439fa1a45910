//! Fixed prompt text for the analysis and apply round-trips.

use crate::patch::{
    FILE_PATH_TAG, FIX_END_TAG, FIX_START_TAG, ORIGINAL_FILE_CLOSE, ORIGINAL_FILE_OPEN,
    UPDATED_CODE_CLOSE, UPDATED_CODE_OPEN,
};

pub const ANALYSIS_SYSTEM: &str = r#"You are a senior engineer debugging a failing test suite.

You will receive the output of the test command, a serialized copy of the repository,
the current uncommitted git diff (if any) and the contents of selected test files.

Work out the root cause of each failure. Prefer fixing the code under test over
weakening the tests, unless the test itself is clearly wrong. Be concrete: name the
files, functions and lines involved and explain why the failure happens."#;

/// Output-format rules appended to the analysis system prompt in fix mode.
pub fn fix_format_instructions() -> String {
    format!(
        r#"After your explanation, give the fix for every file that must change using exactly
this format, one block per file, each tag on its own line:

{FILE_PATH_TAG}relative/path/to/file
{FIX_START_TAG}
the changed code for this file, with enough surrounding lines to locate it
{FIX_END_TAG}

Rules:
- Paths are relative to the repository root. Never use absolute paths.
- Only include files that need to change. A new file may be created the same way.
- Do not put anything else on a tag line."#
    )
}

pub fn apply_system() -> String {
    format!(
        r#"You merge a proposed patch into an existing source file.
Respond with the complete updated file and nothing else, wrapped in
{UPDATED_CODE_OPEN} and {UPDATED_CODE_CLOSE}. No commentary, no markdown fences."#
    )
}

pub fn apply_instructions() -> String {
    format!(
        r#"Apply the patch to the file between {ORIGINAL_FILE_OPEN} and {ORIGINAL_FILE_CLOSE}.

- Replace only the regions the patch affects; keep every other line exactly as it is,
  including comments, formatting and ordering.
- If the patch shows a whole function or block, replace the matching one in the file.
- If the patch introduces new code with no counterpart, insert it where it belongs.
- If the file is empty, the patch is the new file content.
- If the patch is already applied, return the file unchanged.
- Return the entire resulting file between {UPDATED_CODE_OPEN} and {UPDATED_CODE_CLOSE}."#
    )
}

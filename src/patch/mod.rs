//! Patch extraction and application
//!
//! The analysis model marks up its answer with line-prefix tags:
//!
//! ```text
//! <<<FILE_PATH>>>src/lib.rs
//! <<<FIX_START>>>
//! ...description or code for this file...
//! <<<FIX_END>>>
//! ```
//!
//! [`parse_fix_records`] turns that text into [`FixRecord`]s, [`apply`] merges
//! each one into the real file through a second model call, [`confirm`] shows
//! the diff and asks before writing, and [`run`] drives a whole batch.

pub mod apply;
pub mod confirm;
pub mod run;

use crate::util::strip_leading_separators;

pub const FILE_PATH_TAG: &str = "<<<FILE_PATH>>>";
pub const FIX_START_TAG: &str = "<<<FIX_START>>>";
pub const FIX_END_TAG: &str = "<<<FIX_END>>>";

pub const UPDATED_CODE_OPEN: &str = "<updated-code>";
pub const UPDATED_CODE_CLOSE: &str = "</updated-code>";

pub const ORIGINAL_FILE_OPEN: &str = "<<<ORIGINAL_FILE_START>>>";
pub const ORIGINAL_FILE_CLOSE: &str = "<<<ORIGINAL_FILE_END>>>";

/// One proposed change to one file, as emitted by the analysis model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixRecord {
    /// Repository-relative; leading separators already stripped.
    pub file_path: String,
    pub patch_body: String,
    pub is_complete: bool,
}

impl FixRecord {
    fn open(file_path: String) -> Self {
        Self {
            file_path,
            patch_body: String::new(),
            is_complete: false,
        }
    }

    fn push_line(&mut self, line: &str) {
        if !self.patch_body.is_empty() {
            self.patch_body.push('\n');
        }
        self.patch_body.push_str(line);
    }
}

/// Parse tagged model output into complete fix records, in discovery order.
///
/// Records without a closing tag or with an empty path are dropped. A new path
/// tag abandons any record still open; duplicate paths are all kept.
pub fn parse_fix_records(response: &str) -> Vec<FixRecord> {
    let mut records: Vec<FixRecord> = Vec::new();

    for raw in response.lines().flat_map(split_concatenated_tags) {
        let line = raw.trim();

        if let Some(path) = line.strip_prefix(FILE_PATH_TAG) {
            let path = strip_leading_separators(path.trim()).to_string();
            records.push(FixRecord::open(path));
            continue;
        }

        let Some(current) = records.last_mut().filter(|r| !r.is_complete) else {
            // Commentary between patches.
            continue;
        };

        if line.starts_with(FIX_START_TAG) {
            current.patch_body.clear();
        } else if line.starts_with(FIX_END_TAG) {
            current.is_complete = true;
        } else {
            current.push_line(line);
        }
    }

    records
        .into_iter()
        .filter(|r| r.is_complete && !r.file_path.is_empty())
        .collect()
}

/// Models often glue the next path tag straight onto an end tag
/// (`<<<FIX_END>>><<<FILE_PATH>>>b.rs`). Split such lines so each tag starts
/// its own logical line.
fn split_concatenated_tags(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = line;
    loop {
        let split_at = rest.find(FIX_END_TAG).and_then(|end| {
            let after_end = end + FIX_END_TAG.len();
            rest[after_end..]
                .find(FILE_PATH_TAG)
                .map(|offset| after_end + offset)
        });
        match split_at {
            Some(at) => {
                parts.push(&rest[..at]);
                rest = &rest[at..];
            }
            None => {
                parts.push(rest);
                return parts;
            }
        }
    }
}

/// Text strictly between the updated-code sentinels, trimmed. `None` when
/// either sentinel is missing.
pub fn extract_updated_code(response: &str) -> Option<String> {
    let start = response.find(UPDATED_CODE_OPEN)? + UPDATED_CODE_OPEN.len();
    let end = response[start..].find(UPDATED_CODE_CLOSE)? + start;
    Some(response[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, body: &str) -> FixRecord {
        FixRecord {
            file_path: path.to_string(),
            patch_body: body.to_string(),
            is_complete: true,
        }
    }

    #[test]
    fn test_parses_concatenated_end_and_path_tags() {
        let input = "<<<FILE_PATH>>>tests/test1.rs\n<<<FIX_START>>>\nlet code1 = \"test\";\n<<<FIX_END>>><<<FILE_PATH>>>tests/test2.rs\n<<<FIX_START>>>\nlet code2 = \"test\";\n<<<FIX_END>>>";
        assert_eq!(
            parse_fix_records(input),
            vec![
                record("tests/test1.rs", "let code1 = \"test\";"),
                record("tests/test2.rs", "let code2 = \"test\";"),
            ]
        );
    }

    #[test]
    fn test_concatenated_tags_match_separate_lines() {
        let glued = "<<<FILE_PATH>>>a.rs\n<<<FIX_START>>>\nA\n<<<FIX_END>>><<<FILE_PATH>>>b.rs\n<<<FIX_START>>>\nB\n<<<FIX_END>>>\n";
        let split = "<<<FILE_PATH>>>a.rs\n<<<FIX_START>>>\nA\n<<<FIX_END>>>\n<<<FILE_PATH>>>b.rs\n<<<FIX_START>>>\nB\n<<<FIX_END>>>\n";
        assert_eq!(parse_fix_records(glued), parse_fix_records(split));
        assert_eq!(parse_fix_records(glued).len(), 2);
    }

    #[test]
    fn test_n_triples_yield_n_records_in_order() {
        let input: String = (0..5)
            .map(|i| {
                format!(
                    "Explanation {i}\n{FILE_PATH_TAG}src/m{i}.rs\n{FIX_START_TAG}\nfn f{i}() {{}}\n{FIX_END_TAG}\n"
                )
            })
            .collect();
        let records = parse_fix_records(&input);
        assert_eq!(records.len(), 5);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.file_path, format!("src/m{i}.rs"));
            assert_eq!(r.patch_body, format!("fn f{i}() {{}}"));
        }
    }

    #[test]
    fn test_record_without_end_tag_is_dropped() {
        let input = "<<<FILE_PATH>>>src/a.rs\n<<<FIX_START>>>\nlet x = 1;\n";
        assert!(parse_fix_records(input).is_empty());
    }

    #[test]
    fn test_new_path_abandons_open_record() {
        let input = "<<<FILE_PATH>>>src/a.rs\n<<<FIX_START>>>\nhalf\n<<<FILE_PATH>>>src/b.rs\n<<<FIX_START>>>\nwhole\n<<<FIX_END>>>";
        assert_eq!(parse_fix_records(input), vec![record("src/b.rs", "whole")]);
    }

    #[test]
    fn test_leading_separator_is_stripped() {
        let input = "<<<FILE_PATH>>>/tests/test1.rs\n<<<FIX_START>>>\nx\n<<<FIX_END>>>";
        assert_eq!(parse_fix_records(input)[0].file_path, "tests/test1.rs");
    }

    #[test]
    fn test_empty_path_is_dropped_and_empty_body_is_kept() {
        let input = "<<<FILE_PATH>>>\n<<<FIX_START>>>\nx\n<<<FIX_END>>>\n<<<FILE_PATH>>>src/empty.rs\n<<<FIX_START>>>\n<<<FIX_END>>>";
        assert_eq!(parse_fix_records(input), vec![record("src/empty.rs", "")]);
    }

    #[test]
    fn test_fix_start_discards_earlier_body_lines() {
        let input = "<<<FILE_PATH>>>src/a.rs\npreamble\n<<<FIX_START>>>\nkept\n<<<FIX_END>>>\ntrailing commentary";
        assert_eq!(parse_fix_records(input), vec![record("src/a.rs", "kept")]);
    }

    #[test]
    fn test_multi_line_bodies_keep_line_structure() {
        let input = "<<<FILE_PATH>>>src/a.rs\n<<<FIX_START>>>\nfn main() {\n    run();\n}\n<<<FIX_END>>>";
        assert_eq!(
            parse_fix_records(input)[0].patch_body,
            "fn main() {\nrun();\n}"
        );
    }

    #[test]
    fn test_duplicate_paths_are_all_kept() {
        let input = "<<<FILE_PATH>>>a.rs\n<<<FIX_START>>>\n1\n<<<FIX_END>>>\n<<<FILE_PATH>>>a.rs\n<<<FIX_START>>>\n2\n<<<FIX_END>>>";
        assert_eq!(
            parse_fix_records(input),
            vec![record("a.rs", "1"), record("a.rs", "2")]
        );
    }

    #[test]
    fn test_no_tags_no_records() {
        assert!(parse_fix_records("The test fails because of an off-by-one.").is_empty());
        assert!(parse_fix_records("").is_empty());
    }

    #[test]
    fn test_extract_updated_code() {
        let response = "prefix\n<updated-code>\nconst a = 1;\n</updated-code>\nsuffix";
        assert_eq!(extract_updated_code(response).as_deref(), Some("const a = 1;"));
    }

    #[test]
    fn test_extract_updated_code_missing_sentinels() {
        assert_eq!(extract_updated_code("const a = 1;"), None);
        assert_eq!(extract_updated_code("<updated-code>const a = 1;"), None);
        assert_eq!(extract_updated_code("const a = 1;</updated-code>"), None);
    }

    #[test]
    fn test_extract_updated_code_arbitrary_wrapping() {
        let bodies = ["fn x() {}\n", "  spaced  ", "", "multi\nline\n\ntext"];
        let wrappers = [("", ""), ("Here you go:\n", "\nDone."), ("```\n", "\n```")];
        for body in bodies {
            for (prefix, suffix) in wrappers {
                let response =
                    format!("{prefix}{UPDATED_CODE_OPEN}{body}{UPDATED_CODE_CLOSE}{suffix}");
                assert_eq!(
                    extract_updated_code(&response).as_deref(),
                    Some(body.trim()),
                    "prefix={prefix:?} suffix={suffix:?}"
                );
            }
        }
    }
}

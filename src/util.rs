use crate::error::PathError;
use std::path::{Component, Path, PathBuf};

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Keep the head of a large context blob and note how much was dropped.
pub fn truncate_for_prompt(s: &str, max: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }
    let snippet: String = s.chars().take(max).collect();
    format!(
        "{}\n… (truncated, {} more characters)",
        snippet,
        char_count - max
    )
}

/// Strip every leading `/` or `\` so a model-claimed absolute path becomes relative.
pub fn strip_leading_separators(path: &str) -> &str {
    path.trim_start_matches(['/', '\\'])
}

/// Make sure text ends with exactly the newline it already has, or one if it has none.
pub fn ensure_trailing_newline(content: &str) -> String {
    if content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{}\n", content)
    }
}

pub struct RepoPath {
    pub absolute: PathBuf,
    pub relative: PathBuf,
}

/// Resolve a repository-relative path that may not exist yet, refusing anything
/// that would land outside `repo_root`.
pub fn resolve_repo_path_allow_new(
    repo_root: &Path,
    candidate: &Path,
) -> Result<RepoPath, PathError> {
    if candidate.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    if candidate.is_absolute()
        || candidate
            .components()
            .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
    {
        return Err(PathError::Absolute(candidate.display().to_string()));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(PathError::Escapes(candidate.display().to_string()));
    }

    let root = repo_root
        .canonicalize()
        .map_err(|_| PathError::Escapes(candidate.display().to_string()))?;
    let joined = root.join(candidate);
    let parent = joined
        .parent()
        .ok_or_else(|| PathError::Escapes(candidate.display().to_string()))?;

    // Symlinked directories inside the tree can still point outside it.
    let parent_canon = canonicalize_existing_parent(parent)
        .ok_or_else(|| PathError::Escapes(candidate.display().to_string()))?;
    if !parent_canon.starts_with(&root) {
        return Err(PathError::Escapes(candidate.display().to_string()));
    }
    // The target itself may be a link, dangling or not.
    if std::fs::symlink_metadata(&joined).is_ok_and(|m| m.file_type().is_symlink()) {
        return Err(PathError::Symlink(candidate.display().to_string()));
    }

    let relative = joined
        .strip_prefix(&root)
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|_| candidate.to_path_buf());

    Ok(RepoPath {
        absolute: joined,
        relative,
    })
}

fn canonicalize_existing_parent(path: &Path) -> Option<PathBuf> {
    let mut current = path.to_path_buf();
    while !current.exists() {
        if !current.pop() {
            return None;
        }
    }
    current.canonicalize().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn test_truncate_for_prompt_reports_dropped_chars() {
        assert_eq!(truncate_for_prompt("short", 10), "short");
        let out = truncate_for_prompt("abcdefghij", 4);
        assert!(out.starts_with("abcd\n"));
        assert!(out.contains("6 more characters"));
    }

    #[test]
    fn test_strip_leading_separators() {
        assert_eq!(strip_leading_separators("/tests/test1.rs"), "tests/test1.rs");
        assert_eq!(strip_leading_separators("//\\src/lib.rs"), "src/lib.rs");
        assert_eq!(strip_leading_separators("src/lib.rs"), "src/lib.rs");
    }

    #[test]
    fn test_ensure_trailing_newline_never_doubles() {
        assert_eq!(ensure_trailing_newline("fn main() {}"), "fn main() {}\n");
        assert_eq!(ensure_trailing_newline("fn main() {}\n"), "fn main() {}\n");
        assert_eq!(ensure_trailing_newline(""), "\n");
    }

    #[test]
    fn test_resolve_repo_path_allow_new_accepts_missing_file() {
        let root = tempfile::tempdir().unwrap();

        let candidate = PathBuf::from("new_dir/new_file.rs");
        let resolved = resolve_repo_path_allow_new(root.path(), &candidate).unwrap();
        assert_eq!(resolved.relative, candidate);
        assert!(resolved.absolute.ends_with("new_dir/new_file.rs"));
    }

    #[test]
    fn test_resolve_repo_path_rejects_escapes() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("src")).unwrap();

        assert_eq!(
            resolve_repo_path_allow_new(root.path(), Path::new("../../etc/passwd")).err(),
            Some(PathError::Escapes("../../etc/passwd".to_string()))
        );
        assert!(matches!(
            resolve_repo_path_allow_new(root.path(), Path::new("/etc/passwd")),
            Err(PathError::Absolute(_))
        ));
        assert_eq!(
            resolve_repo_path_allow_new(root.path(), Path::new("")).err(),
            Some(PathError::Empty)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_repo_path_rejects_symlinked_escape() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        assert!(matches!(
            resolve_repo_path_allow_new(root.path(), Path::new("link/evil.rs")),
            Err(PathError::Escapes(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_repo_path_rejects_symlinked_file() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.txt");
        fs::write(&secret, "token").unwrap();
        std::os::unix::fs::symlink(&secret, root.path().join("notes.txt")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("missing"), root.path().join("dangling"))
            .unwrap();

        assert_eq!(
            resolve_repo_path_allow_new(root.path(), Path::new("notes.txt")).err(),
            Some(PathError::Symlink("notes.txt".to_string()))
        );
        assert!(matches!(
            resolve_repo_path_allow_new(root.path(), Path::new("dangling")),
            Err(PathError::Symlink(_))
        ));
    }
}

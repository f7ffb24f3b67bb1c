//! Slash-delimited paths and the traversal path stack.

use crate::{Error, Result};

/// Path of the root group.
pub const ROOT: &str = "/";

/// Tracks the current position in the tree during recursive descent.
///
/// The root is the empty stack and renders as `/`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathStack {
    path: String,
}

impl PathStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `/name` to the current path.
    pub fn push(&mut self, name: &str) {
        self.path.push('/');
        self.path.push_str(name);
    }

    /// Remove the trailing `/name`.
    ///
    /// # Errors
    /// Returns [`Error::PathMismatch`] if the trailing segment is not `name`;
    /// the stack is left unchanged in that case.
    pub fn pop(&mut self, name: &str) -> Result<()> {
        let keep = self.path.len().saturating_sub(name.len() + 1);
        let matches = self.path.ends_with(name)
            && self.path.len() > name.len()
            && self.path.as_bytes()[keep] == b'/';
        if !matches {
            return Err(Error::PathMismatch {
                expected: name.to_string(),
                path: self.as_str().to_string(),
            });
        }
        self.path.truncate(keep);
        Ok(())
    }

    /// The current absolute path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        if self.path.is_empty() {
            ROOT
        } else {
            &self.path
        }
    }

    /// Number of segments below the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.matches('/').count()
    }

    /// Returns true at the root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

/// Normalize a path to absolute form without a trailing slash.
#[must_use]
pub fn normalize(path: &str) -> String {
    let segments: Vec<&str> = segments(path).collect();
    if segments.is_empty() {
        return ROOT.to_string();
    }
    let mut out = String::with_capacity(path.len() + 1);
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Non-empty segments of a path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Final segment of a path; empty for the root.
#[must_use]
pub fn leaf(path: &str) -> &str {
    segments(path).last().unwrap_or("")
}

/// Parent of a path; the root is its own parent.
#[must_use]
pub fn parent(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(idx) => normalize(&trimmed[..idx]),
    }
}

/// Join a child name onto a parent path.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT || parent.is_empty() {
        format!("/{name}")
    } else {
        format!("{}/{name}", parent.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = PathStack::new();
        assert_eq!(stack.as_str(), "/");
        stack.push("entry");
        stack.push("bank1");
        assert_eq!(stack.as_str(), "/entry/bank1");
        assert_eq!(stack.depth(), 2);
        stack.pop("bank1").unwrap();
        stack.pop("entry").unwrap();
        assert!(stack.is_root());
    }

    #[test]
    fn test_pop_mismatch_is_error() {
        let mut stack = PathStack::new();
        stack.push("entry");
        stack.push("bank1");
        let err = stack.pop("bank2").unwrap_err();
        assert!(matches!(err, Error::PathMismatch { .. }));
        assert_eq!(stack.as_str(), "/entry/bank1");
    }

    #[test]
    fn test_pop_requires_whole_segment() {
        let mut stack = PathStack::new();
        stack.push("bank11");
        assert!(stack.pop("1").is_err());
        assert!(stack.pop("bank11").is_ok());
        assert!(stack.pop("bank11").is_err());
    }

    #[test]
    fn test_long_paths_are_not_truncated() {
        let mut stack = PathStack::new();
        let name = "g".repeat(100);
        for _ in 0..20 {
            stack.push(&name);
        }
        assert_eq!(stack.as_str().len(), 20 * 101);
        for _ in 0..20 {
            stack.pop(&name).unwrap();
        }
        assert!(stack.is_root());
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(normalize("entry/bank1/"), "/entry/bank1");
        assert_eq!(normalize("//"), "/");
        assert_eq!(leaf("/entry/bank1/data"), "data");
        assert_eq!(leaf("/"), "");
        assert_eq!(parent("/entry/bank1/data"), "/entry/bank1");
        assert_eq!(parent("/entry"), "/");
        assert_eq!(join("/", "entry"), "/entry");
        assert_eq!(join("/entry", "bank1"), "/entry/bank1");
    }
}

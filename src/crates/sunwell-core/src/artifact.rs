//! Produced artifacts
//!
//! An artifact is a file produced by a task: path, content, and the language
//! that selects the toolchain used to validate it.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A file produced by task execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Project-relative path; unique within a graph
    pub path: String,

    /// Full file content
    pub content: String,

    /// Id of the producing task
    pub produced_by: TaskId,

    /// Language tag ("python", "rust", "javascript", ...); determines the
    /// validation toolchain
    pub language: String,
}

impl Artifact {
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        produced_by: impl Into<TaskId>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            produced_by: produced_by.into(),
            language: language.into(),
        }
    }

    /// Hex-encoded SHA-256 of the content
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        hex_encode(&hasher.finalize())
    }

    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable() {
        let a = Artifact::new("src/a.py", "print('hi')\n", "t1", "python");
        let b = Artifact::new("src/b.py", "print('hi')\n", "t2", "python");
        // Hash depends only on content.
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_line_count() {
        let a = Artifact::new("x", "a\nb\nc", "t", "python");
        assert_eq!(a.line_count(), 3);
    }
}

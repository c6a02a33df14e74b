//! Output Writer - canonical paths, stable bytes, no-op rewrites skipped

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::encoding::LineEnding;
use crate::error::{ConvertError, ConvertResult};
use crate::hashing::sha256_hex;
use crate::render::RenderedArtifact;
use crate::storage::Storage;

/// Fold line breaks to LF, end with exactly one newline, then apply `line_ending`.
pub fn finalize_text(text: &str, line_ending: LineEnding) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let body = unified.trim_end_matches('\n');

    let mut out = match line_ending {
        LineEnding::Lf => body.to_string(),
        LineEnding::Crlf => body.replace('\n', "\r\n"),
    };
    out.push_str(line_ending.as_str());
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteStatus {
    Created,
    Updated,
    /// Existing file already held these bytes; nothing was written.
    Unchanged,
    /// Check mode: the file is missing or differs from what would be written.
    Stale,
}

impl WriteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStatus::Created => "created",
            WriteStatus::Updated => "updated",
            WriteStatus::Unchanged => "unchanged",
            WriteStatus::Stale => "stale",
        }
    }
}

impl fmt::Display for WriteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: usize,
    pub status: WriteStatus,
}

pub struct OutputWriter<'a> {
    storage: &'a dyn Storage,
    check: bool,
}

impl<'a> OutputWriter<'a> {
    pub fn new(storage: &'a dyn Storage, check: bool) -> Self {
        Self { storage, check }
    }

    pub fn write(&self, artifact: &RenderedArtifact) -> ConvertResult<WriteOutcome> {
        let outcome = self.write_file(&artifact.path, &artifact.to_bytes())?;
        tracing::info!(
            language = %artifact.language,
            target_id = %artifact.target,
            path = %outcome.path.display(),
            status = %outcome.status,
            "artifact written"
        );
        Ok(outcome)
    }

    /// Replace `path` with `bytes` unless it already holds them.
    pub fn write_file(&self, path: &Path, bytes: &[u8]) -> ConvertResult<WriteOutcome> {
        let write_error = |source: io::Error| ConvertError::Write {
            path: path.to_path_buf(),
            source,
        };
        let existing = match self.storage.read(path) {
            Ok(existing) => Some(existing),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(write_error(e)),
        };

        let status = match (existing, self.check) {
            (Some(existing), _) if existing == bytes => WriteStatus::Unchanged,
            (_, true) => WriteStatus::Stale,
            (None, false) => WriteStatus::Created,
            (Some(_), false) => WriteStatus::Updated,
        };
        if matches!(status, WriteStatus::Created | WriteStatus::Updated) {
            self.storage.write(path, bytes).map_err(write_error)?;
        }

        Ok(WriteOutcome {
            path: path.to_path_buf(),
            sha256: sha256_hex(bytes),
            bytes: bytes.len(),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn exactly_one_trailing_newline() {
        assert_eq!(finalize_text("a\nb\n\n\n", LineEnding::Lf), "a\nb\n");
        assert_eq!(finalize_text("a\r\nb", LineEnding::Lf), "a\nb\n");
        assert_eq!(finalize_text("a\nb\n", LineEnding::Crlf), "a\r\nb\r\n");
        assert_eq!(finalize_text("", LineEnding::Lf), "\n");
    }

    #[test]
    fn statuses_follow_existing_content() {
        let storage = MemoryStorage::new();
        let writer = OutputWriter::new(&storage, false);
        let path = Path::new("out/plainlist/fr.txt");

        assert_eq!(writer.write_file(path, b"one\n").unwrap().status, WriteStatus::Created);
        assert_eq!(writer.write_file(path, b"one\n").unwrap().status, WriteStatus::Unchanged);
        assert_eq!(writer.write_file(path, b"two\n").unwrap().status, WriteStatus::Updated);
        assert_eq!(storage.get(path).unwrap(), b"two\n");
    }

    #[test]
    fn check_mode_never_writes() {
        let storage = MemoryStorage::new();
        storage.insert("out/csv/fr.csv", "old\n");
        let writer = OutputWriter::new(&storage, true);

        let outcome = writer.write_file(Path::new("out/csv/fr.csv"), b"new\n").unwrap();
        assert_eq!(outcome.status, WriteStatus::Stale);
        assert_eq!(storage.get(Path::new("out/csv/fr.csv")).unwrap(), b"old\n");

        let outcome = writer.write_file(Path::new("out/csv/en.csv"), b"new\n").unwrap();
        assert_eq!(outcome.status, WriteStatus::Stale);
        assert!(storage.get(Path::new("out/csv/en.csv")).is_none());

        let outcome = writer.write_file(Path::new("out/csv/fr.csv"), b"old\n").unwrap();
        assert_eq!(outcome.status, WriteStatus::Unchanged);
    }

    #[test]
    fn io_failure_is_a_write_error() {
        let storage = MemoryStorage::new();
        storage.deny_writes("out");
        let err = OutputWriter::new(&storage, false)
            .write_file(Path::new("out/csv/fr.csv"), b"x\n")
            .unwrap_err();
        assert!(matches!(err, ConvertError::Write { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Write);
    }
}

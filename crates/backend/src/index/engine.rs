//! Index engine abstraction - open/append/commit/close against a directory.

use std::path::Path;

use super::document::MailDocument;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Index error: {0}")]
  Tantivy(#[from] tantivy::TantivyError),
  #[error("Failed to open index directory: {0}")]
  Directory(#[from] tantivy::directory::error::OpenDirectoryError),
  #[error("Index writer is closed")]
  Closed,
  #[error("Index writer lock poisoned")]
  Poisoned,
  #[error("{0}")]
  Other(String),
}

/// A persistent index engine that can open one writer per directory.
pub trait IndexEngine: Send + Sync {
  /// Engine name for logging
  fn name(&self) -> &str;

  /// Open (creating if needed) a writer over the index stored at `path`.
  ///
  /// Called at most once per live mailbox writer; the engine may hold an
  /// exclusive lock on the directory until the returned sink is closed.
  fn open(&self, path: &Path) -> Result<Box<dyn IndexSink>, EngineError>;
}

/// An open writer bound to one index directory.
///
/// `append` may be called concurrently from several workers; `commit` and
/// `close` are only called by the mailbox visitor or during shutdown.
pub trait IndexSink: Send + Sync {
  fn append(&self, doc: &MailDocument) -> Result<(), EngineError>;

  /// Make everything appended so far durable and visible to readers
  fn commit(&self) -> Result<(), EngineError>;

  /// Release the writer. Uncommitted documents are discarded.
  fn close(&self) -> Result<(), EngineError>;
}

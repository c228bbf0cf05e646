//! Concurrent Indexing Pipeline
//!
//! ```text
//! index(mailbox) → mailbox queue → Visitor → message queue → Workers × N → WriterCache
//!                     (32)                      (1000)
//! ```
//!
//! - One visitor task takes mailboxes off the mailbox queue, walks them through a
//!   [`MailReader`](crate::reader::MailReader) on the blocking pool, and pushes
//!   every message onto the message queue. A full message queue suspends the
//!   traversal; nothing is dropped.
//! - N index workers share the message queue receiver and append each message
//!   to its mailbox's writer, creating the writer on first use.
//! - After a traversal the visitor waits the commit grace period, then commits,
//!   closes and evicts the mailbox's writer.
//!
//! Every suspension point races a shared `CancellationToken`. `stop()` cancels
//! it, offers one stop sentinel per worker, aborts whatever has not exited by
//! the join deadline, and finally commits and closes every writer still cached.
//!
//! The commit grace is a heuristic. A message still in flight for a mailbox
//! when the grace period elapses ends one of two ways, depending on timing:
//!
//! - its worker looks the writer up after the visitor evicted it, so the
//!   message goes to a fresh writer that is only committed by a later
//!   traversal of that mailbox or at shutdown;
//! - its worker already holds the old handle when the visitor closes it, so
//!   the append fails with [`EngineError::Closed`] and the message is logged
//!   and skipped.

mod message;
mod service;
mod visitor;
mod worker;


pub use self::{
  message::{IndexEvent, MailJob, VisitorState},
  service::{IndexError, IndexStatus, IndexingService, ShutdownReport},
  worker::WorkerReport,
};
use crate::{index::EngineError, reader::ReadError};

/// Failures contained inside the pipeline tasks. Logged, never surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  #[error("Index engine error: {0}")]
  Engine(#[from] EngineError),
  #[error("Read error: {0}")]
  Read(#[from] ReadError),
  #[error("Task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
  #[error("Cancelled")]
  Cancelled,
}

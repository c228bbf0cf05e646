//! Mailytics indexing engine
//!
//! Builds one full-text index per mailbox. Mailboxes are submitted to an
//! [`IndexingService`], walked off the request path by a single visitor task,
//! and the resulting messages are appended by a pool of index workers to the
//! mailbox's writer. See [`pipeline`] for the concurrency model.

mod domain;
pub use domain::{config, mail, mailbox};

pub mod dirs;
pub mod index;
pub mod pipeline;
pub mod reader;

#[cfg(test)]
mod testing;

pub use domain::{
  config::{Config, ConfigError, IndexConfig, LogConfig},
  mail::Mail,
  mailbox::{MailFolder, Mailbox, MailboxFormat},
};
pub use index::{IndexEngine, IndexSink, MailDocument, TantivyEngine, WriterCache, WriterHandle, index_dir};
pub use pipeline::{IndexError, IndexEvent, IndexStatus, IndexingService, ShutdownReport, VisitorState, WorkerReport};
pub use reader::{DefaultReader, MailReader, MailVisitor, ReadError, TraversalError};

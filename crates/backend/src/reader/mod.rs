//! Mailbox traversal.
//!
//! A [`MailReader`] walks one mailbox and reports what it finds to a
//! [`MailVisitor`]: every folder entered, every message parsed, and every
//! per-item failure. Per-item failures never abort a traversal; only a
//! mailbox that cannot be opened at all makes `read` return an error.

mod maildir;
mod mbox;
mod message;

use std::{ops::ControlFlow, path::PathBuf};

pub use self::message::{fallback_id, parse_message};
use crate::domain::{
  mail::Mail,
  mailbox::{MailFolder, Mailbox, MailboxFormat},
};

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
  #[error("Mailbox location not found: {0}")]
  NotFound(PathBuf),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

/// A failure confined to one folder or message
#[derive(Debug, thiserror::Error)]
pub enum TraversalError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Parse error: {0}")]
  Parse(#[from] mailparse::MailParseError),
}

/// Callbacks invoked during a traversal
pub trait MailVisitor {
  fn on_folder(&mut self, folder: &MailFolder);

  /// Return `ControlFlow::Break` to end the traversal early.
  fn on_mail(&mut self, mail: Mail) -> ControlFlow<()>;

  /// `mail` names the offending message (file name or ordinal) when known.
  fn on_error(&mut self, error: TraversalError, folder: &MailFolder, mail: Option<&str>);
}

/// Traversal provider for one storage layout. Implementations block.
pub trait MailReader: Send + Sync {
  fn read(&self, mailbox: &Mailbox, visitor: &mut dyn MailVisitor) -> Result<(), ReadError>;
}

/// Picks the reader matching [`Mailbox::format`]
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultReader;

impl MailReader for DefaultReader {
  fn read(&self, mailbox: &Mailbox, visitor: &mut dyn MailVisitor) -> Result<(), ReadError> {
    if !mailbox.location().exists() {
      return Err(ReadError::NotFound(mailbox.location.clone()));
    }

    match mailbox.format {
      MailboxFormat::Mbox => mbox::read(mailbox, visitor),
      MailboxFormat::Maildir => maildir::read(mailbox, visitor),
    }
  }
}

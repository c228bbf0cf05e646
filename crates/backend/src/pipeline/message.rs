//! Messages and state shared between the pipeline tasks.

use std::sync::{
  Arc,
  atomic::{AtomicU8, AtomicU64, Ordering},
};

use serde::Serialize;

use crate::domain::{mail::Mail, mailbox::Mailbox};

// ============================================================================
// Message Queue
// ============================================================================

/// An item on the message queue between the visitor and the index workers
#[derive(Debug, Clone)]
pub enum MailJob {
  /// Append `mail` to the writer of `mailbox`
  Index { mailbox: Arc<Mailbox>, mail: Mail },
  /// Stop sentinel: the worker that takes it exits
  Stop,
}

// ============================================================================
// Progress Events
// ============================================================================

/// Per-mailbox progress broadcast by the visitor
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
  /// Traversal of the mailbox began
  MailboxStarted { mailbox: Mailbox },
  /// Traversal finished and the writer was committed and closed
  MailboxIndexed { mailbox: Mailbox, folders: usize, mails: usize },
  /// The mailbox could not be read or its writer could not be finalized
  MailboxFailed { mailbox: Mailbox, error: String },
}

impl IndexEvent {
  pub fn mailbox(&self) -> &Mailbox {
    match self {
      Self::MailboxStarted { mailbox }
      | Self::MailboxIndexed { mailbox, .. }
      | Self::MailboxFailed { mailbox, .. } => mailbox,
    }
  }

  /// True once nothing more will be reported for this mailbox
  pub fn is_final(&self) -> bool {
    matches!(self, Self::MailboxIndexed { .. } | Self::MailboxFailed { .. })
  }
}

// ============================================================================
// Visitor State
// ============================================================================

/// `Waiting -> Visiting -> Committing -> Closing -> Waiting`, `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum VisitorState {
  Waiting = 0,
  Visiting = 1,
  Committing = 2,
  Closing = 3,
  Stopped = 4,
}

impl VisitorState {
  fn from_u8(value: u8) -> Self {
    match value {
      0 => Self::Waiting,
      1 => Self::Visiting,
      2 => Self::Committing,
      3 => Self::Closing,
      _ => Self::Stopped,
    }
  }
}

/// Lock-free cell the visitor publishes its state through
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
  pub fn new(state: VisitorState) -> Self {
    Self(AtomicU8::new(state as u8))
  }

  pub fn get(&self) -> VisitorState {
    VisitorState::from_u8(self.0.load(Ordering::Acquire))
  }

  pub fn set(&self, state: VisitorState) {
    self.0.store(state as u8, Ordering::Release);
  }
}

// ============================================================================
// Outcome Counts
// ============================================================================

/// Final outcomes counted by the visitor before each final event is sent.
///
/// Subscribers that lag behind the event channel lose events, not counts.
#[derive(Debug, Default)]
pub struct MailboxTally {
  indexed: AtomicU64,
  failed: AtomicU64,
}

impl MailboxTally {
  pub fn record(&self, event: &IndexEvent) {
    match event {
      IndexEvent::MailboxIndexed { .. } => {
        self.indexed.fetch_add(1, Ordering::AcqRel);
      }
      IndexEvent::MailboxFailed { .. } => {
        self.failed.fetch_add(1, Ordering::AcqRel);
      }
      IndexEvent::MailboxStarted { .. } => {}
    }
  }

  pub fn indexed(&self) -> u64 {
    self.indexed.load(Ordering::Acquire)
  }

  pub fn failed(&self) -> u64 {
    self.failed.load(Ordering::Acquire)
  }
}

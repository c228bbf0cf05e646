//! Writer Cache - at most one open writer per mailbox.
//!
//! Writers are created lazily by whichever task first needs one (an index
//! worker appending a message, or the visitor finalizing a mailbox). Creation
//! goes through DashMap's entry API: the shard lock is held across the engine
//! `open`, so concurrent callers for the same mailbox block until the first
//! one has inserted its handle and then all receive that same handle.

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
};

use dashmap::DashMap;
use tracing::{debug, error, info};

use super::{
  document::MailDocument,
  engine::{EngineError, IndexEngine, IndexSink},
  path::mailbox_index_dir,
};
use crate::domain::mailbox::Mailbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
  Open,
  Closed,
}

/// An open index writer bound to exactly one mailbox.
///
/// Shared as `Arc<WriterHandle>`; any number of workers may append while the
/// handle is open. The transition to [`HandleState::Closed`] is one-way and
/// happens before the underlying sink is released, so a failing close still
/// leaves the handle closed.
pub struct WriterHandle {
  mailbox: Mailbox,
  path: PathBuf,
  sink: Box<dyn IndexSink>,
  closed: AtomicBool,
  appended: AtomicU64,
}

impl WriterHandle {
  fn new(mailbox: Mailbox, path: PathBuf, sink: Box<dyn IndexSink>) -> Self {
    Self {
      mailbox,
      path,
      sink,
      closed: AtomicBool::new(false),
      appended: AtomicU64::new(0),
    }
  }

  pub fn mailbox(&self) -> &Mailbox {
    &self.mailbox
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn state(&self) -> HandleState {
    if self.closed.load(Ordering::Acquire) {
      HandleState::Closed
    } else {
      HandleState::Open
    }
  }

  pub fn is_open(&self) -> bool {
    self.state() == HandleState::Open
  }

  /// Documents appended through this handle
  pub fn appended(&self) -> u64 {
    self.appended.load(Ordering::Relaxed)
  }

  pub fn append(&self, doc: &MailDocument) -> Result<(), EngineError> {
    if !self.is_open() {
      return Err(EngineError::Closed);
    }
    self.sink.append(doc)?;
    self.appended.fetch_add(1, Ordering::Relaxed);
    Ok(())
  }

  pub fn commit(&self) -> Result<(), EngineError> {
    if !self.is_open() {
      return Err(EngineError::Closed);
    }
    self.sink.commit()
  }

  /// Close the handle. Idempotent: only the first call reaches the sink.
  pub fn close(&self) -> Result<(), EngineError> {
    if self.closed.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    self.sink.close()
  }
}

impl std::fmt::Debug for WriterHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WriterHandle")
      .field("mailbox", &self.mailbox)
      .field("path", &self.path)
      .field("state", &self.state())
      .field("appended", &self.appended())
      .finish()
  }
}

/// Outcome of [`WriterCache::close_all`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CloseReport {
  /// Handles removed from the cache and closed
  pub closed: usize,
  /// Handles whose commit or close reported an error
  pub failed: usize,
}

/// Lazily opened, per-mailbox index writers
pub struct WriterCache {
  root: PathBuf,
  engine: Arc<dyn IndexEngine>,
  writers: DashMap<Mailbox, Arc<WriterHandle>>,
}

impl WriterCache {
  pub fn new(root: PathBuf, engine: Arc<dyn IndexEngine>) -> Self {
    Self {
      root,
      engine,
      writers: DashMap::new(),
    }
  }

  /// Root directory all mailbox indices live under
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Return the mailbox's open writer, opening it on first use.
  ///
  /// Blocking: the engine open runs on the calling thread.
  pub fn get_or_create(&self, mailbox: &Mailbox) -> Result<Arc<WriterHandle>, EngineError> {
    if let Some(handle) = self.writers.get(mailbox) {
      return Ok(Arc::clone(handle.value()));
    }

    let entry = self.writers.entry(mailbox.clone()).or_try_insert_with(|| {
      let path = mailbox_index_dir(&self.root, mailbox);
      let sink = self.engine.open(&path)?;
      info!(mailbox = %mailbox, path = %path.display(), engine = self.engine.name(), "Opened index writer");
      Ok::<_, EngineError>(Arc::new(WriterHandle::new(mailbox.clone(), path, sink)))
    })?;

    Ok(Arc::clone(entry.value()))
  }

  /// Look up a writer without creating one
  pub fn get(&self, mailbox: &Mailbox) -> Option<Arc<WriterHandle>> {
    self.writers.get(mailbox).map(|h| Arc::clone(h.value()))
  }

  /// Drop the cache entry. The caller is expected to have closed the handle.
  pub fn remove(&self, mailbox: &Mailbox) -> Option<Arc<WriterHandle>> {
    self.writers.remove(mailbox).map(|(_, handle)| handle)
  }

  pub fn len(&self) -> usize {
    self.writers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.writers.is_empty()
  }

  /// Commit and close every remaining writer until the cache is empty.
  ///
  /// Writers opened while a pass runs are picked up by the next pass.
  /// Best effort: failures are logged and the sweep continues. Blocking.
  pub fn close_all(&self) -> CloseReport {
    let mut report = CloseReport::default();

    loop {
      let mailboxes: Vec<Mailbox> = self.writers.iter().map(|entry| entry.key().clone()).collect();
      if mailboxes.is_empty() {
        break;
      }

      for mailbox in mailboxes {
        let Some((_, handle)) = self.writers.remove(&mailbox) else {
          continue;
        };

        info!(mailbox = %mailbox, "Closing index writer");
        let mut failed = false;

        if handle.is_open()
          && let Err(e) = handle.commit()
        {
          error!(mailbox = %mailbox, error = %e, "Error committing index");
          failed = true;
        }
        if let Err(e) = handle.close() {
          error!(mailbox = %mailbox, error = %e, "Error closing index");
          failed = true;
        }

        report.closed += 1;
        if failed {
          report.failed += 1;
        }
      }
    }

    debug!(closed = report.closed, failed = report.failed, "Writer cache cleared");
    report
  }
}

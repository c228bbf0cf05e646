//! Test helpers for pipeline integration tests.
//!
//! Provides `PipelineTestContext`, which owns the temporary index root and
//! mail directory, plus helpers for waiting on pipeline progress.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use tempfile::TempDir;
use tokio::sync::broadcast;

use crate::{
  domain::{
    config::IndexConfig,
    mailbox::{Mailbox, MailboxFormat},
  },
  index::IndexEngine,
  pipeline::{IndexEvent, IndexingService},
  reader::MailReader,
};

pub struct PipelineTestContext {
  /// Root of every mailbox index
  pub index_dir: TempDir,
  /// Where test mailboxes are written
  pub mail_dir: TempDir,
  pub config: IndexConfig,
}

impl PipelineTestContext {
  pub fn new() -> Self {
    let index_dir = TempDir::new().expect("create index temp dir");
    let mail_dir = TempDir::new().expect("create mail temp dir");
    let config = test_config(index_dir.path());

    Self {
      index_dir,
      mail_dir,
      config,
    }
  }

  pub fn service(&self, engine: Arc<dyn IndexEngine>, reader: Arc<dyn MailReader>) -> IndexingService {
    IndexingService::new(self.config.clone(), engine, reader)
  }

  /// Write an mbox file with `count` messages and return its path
  pub fn write_mbox(&self, name: &str, count: usize) -> PathBuf {
    let mut content = String::new();
    for i in 0..count {
      content.push_str(&format!(
        "From sender@example.com Tue Jul  1 12:00:00 2014\n\
Message-ID: <{name}-{i}@example.com>\n\
Date: Tue, 1 Jul 2014 12:00:00 +0000\n\
From: sender@example.com\n\
To: bob@example.com\n\
Subject: {name} message {i}\n\
\n\
body {i}\n\
\n"
      ));
    }
    let path = self.mail_dir.path().join(format!("{name}.mbox"));
    std::fs::write(&path, content).expect("write mbox");
    path
  }
}

/// Small queues and short delays so tests run fast
pub fn test_config(location: &Path) -> IndexConfig {
  IndexConfig {
    location: location.to_path_buf(),
    indexer_threads: 2,
    index_queue_size: 16,
    mailbox_queue_size: 4,
    commit_grace_ms: 200,
    stop_grace_ms: 20,
    sentinel_timeout_ms: 50,
    worker_join_timeout_ms: 1000,
    writer_heap_mb: 15,
    writer_threads: 1,
  }
}

pub fn mailbox(owner: &str, name: &str, location: impl Into<PathBuf>) -> Mailbox {
  Mailbox::new(owner, name, MailboxFormat::Mbox, location)
}

/// Poll `check` until it returns true or the timeout expires.
pub async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> bool,
{
  let start = std::time::Instant::now();
  let poll_interval = Duration::from_millis(10);

  while start.elapsed() < timeout {
    if check() {
      return true;
    }
    tokio::time::sleep(poll_interval).await;
  }

  check()
}

/// Collect final events until `count` mailboxes have finished.
pub async fn wait_for_final_events(
  rx: &mut broadcast::Receiver<IndexEvent>,
  count: usize,
  timeout: Duration,
) -> Vec<IndexEvent> {
  let mut finals = Vec::new();
  let _ = tokio::time::timeout(timeout, async {
    while finals.len() < count {
      match rx.recv().await {
        Ok(event) if event.is_final() => finals.push(event),
        Ok(_) => {}
        Err(broadcast::error::RecvError::Lagged(_)) => {}
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  })
  .await;
  finals
}

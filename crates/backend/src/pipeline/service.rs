//! Lifecycle controller for the indexing pipeline.

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use serde::Serialize;
use tokio::{
  sync::{
    Mutex, broadcast,
    mpsc::{
      self,
      error::{SendTimeoutError, TrySendError},
    },
  },
  task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
  message::{IndexEvent, MailJob, MailboxTally, StateCell, VisitorState},
  visitor::MailboxVisitor,
  worker::{WorkerReport, index_worker},
};
use crate::{
  domain::{config::IndexConfig, mailbox::Mailbox},
  index::{CloseReport, IndexEngine, TantivyEngine, WriterCache, mailbox_index_dir},
  reader::{DefaultReader, MailReader},
};

const EVENT_CAPACITY: usize = 256;
const WRITE_PROBE: &str = ".mailytics-write-probe";

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced to callers of [`IndexingService`]
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
  #[error("Index location {path} is unavailable: {source}")]
  StorageUnavailable {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Index location {path} is not writable: {source}")]
  NotWritable {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Index location {0} is not a directory")]
  NotADirectory(PathBuf),
  #[error("Mailbox queue is full, rejected {0}")]
  QueueFull(Mailbox),
  #[error("Indexing service is stopped, rejected {0}")]
  QueueClosed(Mailbox),
  #[error("Indexing service already started")]
  AlreadyStarted,
  #[error("Indexing service was stopped and cannot be restarted")]
  Stopped,
}

// ============================================================================
// Reports
// ============================================================================

/// Point-in-time view of the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
  pub visitor: VisitorState,
  pub running: bool,
  pub queued_mailboxes: usize,
  pub queued_mails: usize,
  pub open_writers: usize,
  pub documents_appended: u64,
  /// Mailboxes that ended in `MailboxIndexed`
  pub mailboxes_indexed: u64,
  /// Mailboxes that ended in `MailboxFailed`
  pub mailboxes_failed: u64,
}

impl IndexStatus {
  /// Mailboxes that reached a final event, whether or not a subscriber saw it
  pub fn mailboxes_finished(&self) -> u64 {
    self.mailboxes_indexed + self.mailboxes_failed
  }
}

/// Outcome of [`IndexingService::stop`]
#[derive(Debug, Default, Clone, Serialize)]
pub struct ShutdownReport {
  /// Mailboxes the visitor took off the queue
  pub mailboxes_visited: usize,
  /// Workers that exited on their own, with their counts
  pub workers: Vec<WorkerReport>,
  /// Stop sentinels that made it onto the message queue
  pub sentinels_sent: usize,
  /// Tasks still running at the join deadline
  pub aborted: usize,
  /// Writers committed and closed by the shutdown sweep
  pub writers_closed: usize,
  /// Writers whose commit or close failed during the sweep
  pub close_failures: usize,
  pub documents_appended: u64,
}

impl ShutdownReport {
  pub fn processed(&self) -> u64 {
    self.workers.iter().map(|w| w.processed).sum()
  }
}

// ============================================================================
// Service
// ============================================================================

enum WorkerExit {
  Finished(WorkerReport),
  Failed,
  Aborted,
}

struct Running {
  visitor: JoinHandle<usize>,
  workers: Vec<JoinHandle<WorkerReport>>,
}

struct Lifecycle {
  /// Queue receivers, handed to the tasks on start
  receivers: Option<(mpsc::Receiver<Mailbox>, mpsc::Receiver<MailJob>)>,
  running: Option<Running>,
}

/// Accepts mailboxes and indexes them in the background.
///
/// Both queues exist from construction, so mailboxes submitted before
/// [`start`](Self::start) are buffered and picked up once the visitor runs.
pub struct IndexingService {
  config: IndexConfig,
  cache: Arc<WriterCache>,
  reader: Arc<dyn MailReader>,
  mailbox_tx: mpsc::Sender<Mailbox>,
  mail_tx: mpsc::Sender<MailJob>,
  lifecycle: Mutex<Lifecycle>,
  events: broadcast::Sender<IndexEvent>,
  state: Arc<StateCell>,
  tally: Arc<MailboxTally>,
  appended: Arc<AtomicU64>,
  cancel: CancellationToken,
}

impl IndexingService {
  pub fn new(config: IndexConfig, engine: Arc<dyn IndexEngine>, reader: Arc<dyn MailReader>) -> Self {
    let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_queue_size.max(1));
    let (mail_tx, mail_rx) = mpsc::channel(config.index_queue_size.max(1));
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let cache = Arc::new(WriterCache::new(config.location.clone(), engine));

    Self {
      config,
      cache,
      reader,
      mailbox_tx,
      mail_tx,
      lifecycle: Mutex::new(Lifecycle {
        receivers: Some((mailbox_rx, mail_rx)),
        running: None,
      }),
      events,
      state: Arc::new(StateCell::new(VisitorState::Waiting)),
      tally: Arc::new(MailboxTally::default()),
      appended: Arc::new(AtomicU64::new(0)),
      cancel: CancellationToken::new(),
    }
  }

  /// Tantivy engine and the format-dispatching reader
  pub fn with_defaults(config: IndexConfig) -> Self {
    let engine = Arc::new(TantivyEngine::new(config.writer_heap_mb, config.writer_threads));
    Self::new(config, engine, Arc::new(DefaultReader))
  }

  /// Validate the index location and launch the visitor and the worker pool.
  pub async fn start(&self) -> Result<(), IndexError> {
    let mut lifecycle = self.lifecycle.lock().await;
    if lifecycle.running.is_some() {
      return Err(IndexError::AlreadyStarted);
    }
    if lifecycle.receivers.is_none() || self.cancel.is_cancelled() {
      return Err(IndexError::Stopped);
    }

    validate_location(self.cache.root()).await?;

    let Some((mailbox_rx, mail_rx)) = lifecycle.receivers.take() else {
      return Err(IndexError::Stopped);
    };

    let worker_count = self.config.worker_count();
    let mail_rx = Arc::new(Mutex::new(mail_rx));

    let workers = (0..worker_count)
      .map(|worker_id| {
        let rx = Arc::clone(&mail_rx);
        let cache = Arc::clone(&self.cache);
        let appended = Arc::clone(&self.appended);
        let cancel = self.cancel.clone();
        tokio::spawn(async move { index_worker(worker_id, rx, cache, appended, cancel).await })
      })
      .collect();

    let visitor = MailboxVisitor::new(
      mailbox_rx,
      self.mail_tx.clone(),
      Arc::clone(&self.reader),
      Arc::clone(&self.cache),
      Arc::clone(&self.state),
      Arc::clone(&self.tally),
      self.events.clone(),
      self.config.commit_grace(),
      self.cancel.clone(),
    );
    let visitor = tokio::spawn(visitor.run());

    lifecycle.running = Some(Running { visitor, workers });

    info!(
      location = %self.cache.root().display(),
      workers = worker_count,
      index_queue = self.config.index_queue_size,
      "Indexing service started"
    );
    Ok(())
  }

  /// Submit a mailbox. Never blocks; a full queue is reported to the caller.
  pub fn index(&self, mailbox: Mailbox) -> Result<(), IndexError> {
    match self.mailbox_tx.try_send(mailbox) {
      Ok(()) => Ok(()),
      Err(TrySendError::Full(mailbox)) => {
        warn!(mailbox = %mailbox, "Mailbox queue full, rejecting");
        Err(IndexError::QueueFull(mailbox))
      }
      Err(TrySendError::Closed(mailbox)) => Err(IndexError::QueueClosed(mailbox)),
    }
  }

  /// Shut the pipeline down and release every writer.
  ///
  /// Safe to call before `start`, after a failed `start`, and more than once.
  /// Failures are logged and counted in the report, never returned.
  pub async fn stop(&self) -> ShutdownReport {
    info!("Stopping indexing service");
    self.cancel.cancel();

    let running = {
      let mut lifecycle = self.lifecycle.lock().await;
      lifecycle.receivers = None;
      lifecycle.running.take()
    };

    let mut report = ShutdownReport::default();
    if let Some(running) = running {
      tokio::time::sleep(self.config.stop_grace()).await;
      self.join(running, &mut report).await;
    }

    let cache = Arc::clone(&self.cache);
    let swept = tokio::task::spawn_blocking(move || cache.close_all())
      .await
      .unwrap_or_else(|e| {
        error!(error = %e, "Writer sweep panicked");
        CloseReport::default()
      });
    report.writers_closed = swept.closed;
    report.close_failures = swept.failed;
    report.documents_appended = self.appended.load(Ordering::Relaxed);

    self.state.set(VisitorState::Stopped);
    info!(
      visited = report.mailboxes_visited,
      processed = report.processed(),
      aborted = report.aborted,
      writers_closed = report.writers_closed,
      close_failures = report.close_failures,
      "Indexing service stopped"
    );
    report
  }

  async fn join(&self, running: Running, report: &mut ShutdownReport) {
    let join_timeout = self.config.worker_join_timeout();

    let mut visitor = running.visitor;
    match tokio::time::timeout(join_timeout, &mut visitor).await {
      Ok(Ok(visited)) => report.mailboxes_visited = visited,
      Ok(Err(e)) => error!(error = %e, "Mailbox visitor failed"),
      Err(_) => {
        warn!("Mailbox visitor did not stop in time, aborting");
        visitor.abort();
        report.aborted += 1;
      }
    }

    // Best effort: once one sentinel times out the queue is stuck full, and the
    // token has already reached every worker, so the rest are not offered
    for _ in 0..running.workers.len() {
      match self
        .mail_tx
        .send_timeout(MailJob::Stop, self.config.sentinel_timeout())
        .await
      {
        Ok(()) => report.sentinels_sent += 1,
        Err(SendTimeoutError::Timeout(_)) => {
          debug!(sent = report.sentinels_sent, "Message queue full, skipping remaining stop sentinels");
          break;
        }
        Err(SendTimeoutError::Closed(_)) => break,
      }
    }

    // Join all workers concurrently against one deadline
    let deadline = tokio::time::Instant::now() + join_timeout;
    let joins = running
      .workers
      .into_iter()
      .enumerate()
      .map(|(worker_id, mut worker)| async move {
        match tokio::time::timeout_at(deadline, &mut worker).await {
          Ok(Ok(worker_report)) => WorkerExit::Finished(worker_report),
          Ok(Err(e)) => {
            error!(worker_id, error = %e, "Index worker failed");
            WorkerExit::Failed
          }
          Err(_) => {
            warn!(worker_id, "Index worker did not stop in time, aborting");
            worker.abort();
            WorkerExit::Aborted
          }
        }
      });

    for exit in futures::future::join_all(joins).await {
      match exit {
        WorkerExit::Finished(worker_report) => report.workers.push(worker_report),
        WorkerExit::Failed => {}
        WorkerExit::Aborted => report.aborted += 1,
      }
    }
  }

  /// Progress events for every mailbox processed after this call
  pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
    self.events.subscribe()
  }

  pub fn status(&self) -> IndexStatus {
    IndexStatus {
      visitor: self.state.get(),
      running: !self.cancel.is_cancelled() && self.lifecycle.try_lock().is_ok_and(|l| l.running.is_some()),
      queued_mailboxes: self.mailbox_tx.max_capacity() - self.mailbox_tx.capacity(),
      queued_mails: self.mail_tx.max_capacity() - self.mail_tx.capacity(),
      open_writers: self.cache.len(),
      documents_appended: self.appended.load(Ordering::Relaxed),
      mailboxes_indexed: self.tally.indexed(),
      mailboxes_failed: self.tally.failed(),
    }
  }

  pub fn writers(&self) -> &WriterCache {
    &self.cache
  }

  /// Where `mailbox` is indexed under this service's location
  pub fn index_dir(&self, mailbox: &Mailbox) -> PathBuf {
    mailbox_index_dir(self.cache.root(), mailbox)
  }
}

/// Create the index root if needed and prove it accepts writes.
async fn validate_location(root: &Path) -> Result<(), IndexError> {
  if let Ok(meta) = tokio::fs::metadata(root).await
    && !meta.is_dir()
  {
    return Err(IndexError::NotADirectory(root.to_path_buf()));
  }

  tokio::fs::create_dir_all(root)
    .await
    .map_err(|source| IndexError::StorageUnavailable {
      path: root.to_path_buf(),
      source,
    })?;

  let probe = root.join(WRITE_PROBE);
  tokio::fs::write(&probe, b"")
    .await
    .map_err(|source| IndexError::NotWritable {
      path: root.to_path_buf(),
      source,
    })?;
  let _ = tokio::fs::remove_file(&probe).await;

  debug!(location = %root.display(), "Index location validated");
  Ok(())
}

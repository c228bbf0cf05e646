//! Mailbox visitor - the single task that traverses submitted mailboxes.

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use tokio::{
  runtime::Handle,
  sync::{broadcast, mpsc},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
  PipelineError,
  message::{IndexEvent, MailJob, MailboxTally, StateCell, VisitorState},
};
use crate::{
  domain::{
    mail::Mail,
    mailbox::{MailFolder, Mailbox},
  },
  index::WriterCache,
  reader::{MailReader, MailVisitor, ReadError, TraversalError},
};

/// Counters for one traversal
#[derive(Debug, Default, Clone, Copy)]
struct Traversal {
  folders: usize,
  mails: usize,
  errors: usize,
  cancelled: bool,
}

/// Publishes each message onto the message queue from the blocking traversal thread.
///
/// `send` is raced against cancellation so a visitor suspended on a full queue
/// wakes as soon as the pipeline stops.
struct QueueingVisitor {
  mailbox: Arc<Mailbox>,
  tx: mpsc::Sender<MailJob>,
  cancel: CancellationToken,
  runtime: Handle,
  stats: Traversal,
}

impl MailVisitor for QueueingVisitor {
  fn on_folder(&mut self, folder: &MailFolder) {
    self.stats.folders += 1;
    debug!(mailbox = %self.mailbox, folder = %folder.name, "Visiting folder");
  }

  fn on_mail(&mut self, mail: Mail) -> ControlFlow<()> {
    let job = MailJob::Index {
      mailbox: Arc::clone(&self.mailbox),
      mail,
    };

    let tx = &self.tx;
    let cancel = &self.cancel;
    let sent = self.runtime.block_on(async {
      tokio::select! {
          biased;
          _ = cancel.cancelled() => false,
          result = tx.send(job) => result.is_ok(),
      }
    });

    if sent {
      self.stats.mails += 1;
      ControlFlow::Continue(())
    } else {
      self.stats.cancelled = true;
      ControlFlow::Break(())
    }
  }

  fn on_error(&mut self, error: TraversalError, folder: &MailFolder, mail: Option<&str>) {
    self.stats.errors += 1;
    warn!(
      mailbox = %self.mailbox,
      folder = %folder.name,
      mail = mail.unwrap_or("-"),
      error = %error,
      "Traversal error, continuing"
    );
  }
}

pub(crate) struct MailboxVisitor {
  rx: mpsc::Receiver<Mailbox>,
  tx: mpsc::Sender<MailJob>,
  reader: Arc<dyn MailReader>,
  cache: Arc<WriterCache>,
  state: Arc<StateCell>,
  tally: Arc<MailboxTally>,
  events: broadcast::Sender<IndexEvent>,
  commit_grace: Duration,
  cancel: CancellationToken,
}

impl MailboxVisitor {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    rx: mpsc::Receiver<Mailbox>,
    tx: mpsc::Sender<MailJob>,
    reader: Arc<dyn MailReader>,
    cache: Arc<WriterCache>,
    state: Arc<StateCell>,
    tally: Arc<MailboxTally>,
    events: broadcast::Sender<IndexEvent>,
    commit_grace: Duration,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      rx,
      tx,
      reader,
      cache,
      state,
      tally,
      events,
      commit_grace,
      cancel,
    }
  }

  /// Visit mailboxes until cancelled or the mailbox queue closes.
  ///
  /// Returns the number of mailboxes taken off the queue.
  pub(crate) async fn run(mut self) -> usize {
    info!("Mailbox visitor started");
    let mut visited = 0;

    loop {
      self.state.set(VisitorState::Waiting);

      let mailbox = tokio::select! {
          biased;
          _ = self.cancel.cancelled() => {
              trace!("Mailbox visitor cancelled");
              break;
          }
          mailbox = self.rx.recv() => match mailbox {
              Some(mailbox) => mailbox,
              None => break,
          }
      };

      visited += 1;
      self.visit(mailbox).await;
    }

    self.state.set(VisitorState::Stopped);
    info!(visited, "Mailbox visitor stopped");
    visited
  }

  async fn visit(&self, mailbox: Mailbox) {
    info!(mailbox = %mailbox, location = %mailbox.location().display(), "Indexing mailbox");
    self.state.set(VisitorState::Visiting);
    self.emit(IndexEvent::MailboxStarted {
      mailbox: mailbox.clone(),
    });

    let mailbox = Arc::new(mailbox);
    let (stats, read_result) = match self.traverse(Arc::clone(&mailbox)).await {
      Ok(outcome) => outcome,
      Err(e) => {
        error!(mailbox = %mailbox, error = %e, "Traversal task failed");
        self.emit(IndexEvent::MailboxFailed {
          mailbox: (*mailbox).clone(),
          error: e.to_string(),
        });
        return;
      }
    };

    if stats.cancelled {
      info!(mailbox = %mailbox, mails = stats.mails, "Traversal cancelled, writer left for shutdown");
      self.emit(IndexEvent::MailboxFailed {
        mailbox: (*mailbox).clone(),
        error: PipelineError::Cancelled.to_string(),
      });
      return;
    }

    if let Err(e) = &read_result {
      warn!(mailbox = %mailbox, error = %e, "Failed to read mailbox");
    }
    info!(
      mailbox = %mailbox,
      folders = stats.folders,
      mails = stats.mails,
      errors = stats.errors,
      "Traversal finished"
    );

    let finalized = self.finalize(&mailbox).await;
    if let Err(e) = &finalized {
      error!(mailbox = %mailbox, error = %e, "Failed to finalize mailbox index");
    }

    let event = match (read_result, finalized) {
      (Ok(()), Ok(())) => IndexEvent::MailboxIndexed {
        mailbox: (*mailbox).clone(),
        folders: stats.folders,
        mails: stats.mails,
      },
      (Err(e), _) => IndexEvent::MailboxFailed {
        mailbox: (*mailbox).clone(),
        error: e.to_string(),
      },
      (_, Err(e)) => IndexEvent::MailboxFailed {
        mailbox: (*mailbox).clone(),
        error: e.to_string(),
      },
    };
    self.emit(event);
  }

  async fn traverse(&self, mailbox: Arc<Mailbox>) -> Result<(Traversal, Result<(), ReadError>), PipelineError> {
    let reader = Arc::clone(&self.reader);
    let mut queueing = QueueingVisitor {
      mailbox: Arc::clone(&mailbox),
      tx: self.tx.clone(),
      cancel: self.cancel.clone(),
      runtime: Handle::current(),
      stats: Traversal::default(),
    };

    let outcome = tokio::task::spawn_blocking(move || {
      let result = reader.read(&mailbox, &mut queueing);
      (queueing.stats, result)
    })
    .await?;

    Ok(outcome)
  }

  /// Commit, close and evict the mailbox's writer.
  ///
  /// A failed commit leaves the writer cached for the shutdown sweep.
  async fn finalize(&self, mailbox: &Arc<Mailbox>) -> Result<(), PipelineError> {
    self.state.set(VisitorState::Committing);

    let cache = Arc::clone(&self.cache);
    let key = Arc::clone(mailbox);
    let handle = tokio::task::spawn_blocking(move || cache.get_or_create(&key)).await??;

    tokio::select! {
        biased;
        _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
        _ = tokio::time::sleep(self.commit_grace) => {}
    }

    let committing = Arc::clone(&handle);
    tokio::task::spawn_blocking(move || committing.commit()).await??;
    debug!(mailbox = %mailbox, appended = handle.appended(), "Committed mailbox index");

    self.state.set(VisitorState::Closing);
    let closing = Arc::clone(&handle);
    let closed = tokio::task::spawn_blocking(move || closing.close()).await?;

    // The handle is closed even when the sink reported an error, so evict either way
    self.cache.remove(mailbox);
    closed?;

    info!(mailbox = %mailbox, path = %handle.path().display(), "Mailbox index closed");
    Ok(())
  }

  fn emit(&self, event: IndexEvent) {
    self.tally.record(&event);
    // No subscribers is fine
    let _ = self.events.send(event);
  }
}

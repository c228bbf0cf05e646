//! Index worker - appends queued messages to their mailbox's writer.

use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{PipelineError, message::MailJob};
use crate::{
  domain::{mail::Mail, mailbox::Mailbox},
  index::{MailDocument, WriterCache},
};

/// What one worker did before it exited
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
  pub worker_id: usize,
  /// Messages appended
  pub processed: u64,
  /// Messages that could not be appended
  pub failed: u64,
}

/// Index worker loop.
///
/// N workers pull from one shared receiver. Exits on the stop sentinel, on
/// cancellation, or when every sender is gone. A message that cannot be
/// appended is logged and skipped.
pub async fn index_worker(
  worker_id: usize,
  rx: Arc<Mutex<mpsc::Receiver<MailJob>>>,
  cache: Arc<WriterCache>,
  appended: Arc<AtomicU64>,
  cancel: CancellationToken,
) -> WorkerReport {
  trace!(worker_id, "Index worker starting");
  let mut report = WorkerReport {
    worker_id,
    ..Default::default()
  };

  loop {
    let msg = {
      let mut rx_guard = rx.lock().await;
      tokio::select! {
          biased;
          _ = cancel.cancelled() => {
              trace!(worker_id, processed = report.processed, "Index worker cancelled");
              break;
          }
          msg = rx_guard.recv() => msg
      }
    };

    match msg {
      Some(MailJob::Index { mailbox, mail }) => {
        let id = mail.id.clone();
        match append(Arc::clone(&cache), mailbox.clone(), mail).await {
          Ok(()) => {
            report.processed += 1;
            appended.fetch_add(1, Ordering::Relaxed);
            trace!(worker_id, mailbox = %mailbox, id = %id, "Indexed message");
          }
          Err(e) => {
            report.failed += 1;
            warn!(worker_id, mailbox = %mailbox, id = %id, error = %e, "Failed to index message, skipping");
          }
        }
      }
      Some(MailJob::Stop) => {
        debug!(worker_id, "Index worker received stop sentinel");
        break;
      }
      None => {
        trace!(worker_id, "Index worker: queue closed");
        break;
      }
    }
  }

  debug!(
    worker_id,
    processed = report.processed,
    failed = report.failed,
    "Index worker finished"
  );
  report
}

async fn append(cache: Arc<WriterCache>, mailbox: Arc<Mailbox>, mail: Mail) -> Result<(), PipelineError> {
  tokio::task::spawn_blocking(move || {
    let handle = cache.get_or_create(&mailbox)?;
    handle.append(&MailDocument::from_mail(&mailbox, &mail))
  })
  .await??;
  Ok(())
}

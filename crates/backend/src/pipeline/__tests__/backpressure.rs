//! Backpressure tests for both queues.

#[cfg(test)]
mod tests {
  use std::{path::PathBuf, sync::Arc, time::Duration};

  use tokio::sync::{broadcast, mpsc};
  use tokio_util::sync::CancellationToken;

  use crate::{
    index::WriterCache,
    pipeline::{
      IndexError, MailJob, VisitorState,
      __tests__::helpers::{PipelineTestContext, mailbox, wait_for},
      message::{MailboxTally, StateCell},
      visitor::MailboxVisitor,
    },
    testing::{MemoryEngine, ScriptedReader},
  };

  /// Test: a full mailbox queue is a caller-visible error, not a silent drop.
  #[tokio::test]
  async fn test_full_mailbox_queue_rejects_submission() {
    let mut ctx = PipelineTestContext::new();
    ctx.config.mailbox_queue_size = 2;
    let service = ctx.service(Arc::new(MemoryEngine::new()), Arc::new(ScriptedReader::with_mails(1)));

    // Not started: nothing drains the queue
    service.index(mailbox("bob", "one", "/unused")).unwrap();
    service.index(mailbox("bob", "two", "/unused")).unwrap();

    match service.index(mailbox("bob", "three", "/unused")) {
      Err(IndexError::QueueFull(rejected)) => assert_eq!(rejected.name, "three"),
      other => panic!("expected QueueFull, got {other:?}"),
    }
    assert_eq!(service.status().queued_mailboxes, 2);

    service.stop().await;
  }

  /// Test: with message-queue capacity C and no workers, the (C+1)th message
  /// suspends the visitor instead of being dropped.
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_visitor_blocks_on_full_message_queue() {
    const CAPACITY: usize = 4;

    let (mailbox_tx, mailbox_rx) = mpsc::channel(1);
    let (mail_tx, mut mail_rx) = mpsc::channel(CAPACITY);
    let (events, _) = broadcast::channel(16);
    let state = Arc::new(StateCell::new(VisitorState::Waiting));
    let cancel = CancellationToken::new();
    let cache = Arc::new(WriterCache::new(PathBuf::from("/idx"), Arc::new(MemoryEngine::new())));

    let visitor = MailboxVisitor::new(
      mailbox_rx,
      mail_tx.clone(),
      Arc::new(ScriptedReader::with_mails(CAPACITY + 1)),
      Arc::clone(&cache),
      Arc::clone(&state),
      Arc::new(MailboxTally::default()),
      events,
      Duration::from_millis(10),
      cancel.clone(),
    );
    let task = tokio::spawn(visitor.run());

    mailbox_tx.send(mailbox("bob", "Work", "/unused")).await.unwrap();

    let queued = |tx: &mpsc::Sender<MailJob>| tx.max_capacity() - tx.capacity();
    let filled = wait_for(Duration::from_secs(5), || queued(&mail_tx) == CAPACITY).await;
    assert!(filled, "visitor should fill the message queue");

    // Give the visitor time to (wrongly) drop or fail on the extra message
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.get(), VisitorState::Visiting, "visitor should be suspended mid-traversal");
    assert_eq!(queued(&mail_tx), CAPACITY);
    assert!(!task.is_finished());

    // Draining lets the suspended message through
    let mut received = 0;
    while received < CAPACITY + 1 {
      match tokio::time::timeout(Duration::from_secs(5), mail_rx.recv()).await {
        Ok(Some(MailJob::Index { .. })) => received += 1,
        other => panic!("expected an index job, got {other:?}"),
      }
    }
    assert_eq!(received, CAPACITY + 1);

    let finished = wait_for(Duration::from_secs(5), || state.get() == VisitorState::Waiting).await;
    assert!(finished, "visitor should finalize and wait for the next mailbox");

    cancel.cancel();
    assert_eq!(task.await.unwrap(), 1);
    assert_eq!(state.get(), VisitorState::Stopped);
  }

  /// Test: a subscriber that never reads lags behind, yet every submitted
  /// mailbox is still counted as finished.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_outcome_counts_survive_lagging_subscriber() {
    const MAILBOXES: usize = 300;

    let mut ctx = PipelineTestContext::new();
    ctx.config.commit_grace_ms = 0;
    let service = ctx.service(Arc::new(MemoryEngine::new()), Arc::new(ScriptedReader::with_mails(1)));
    let mut events = service.subscribe();
    service.start().await.unwrap();

    for i in 0..MAILBOXES {
      let mut next = mailbox("bob", &format!("box{i}"), "/unused");
      loop {
        match service.index(next) {
          Ok(()) => break,
          Err(IndexError::QueueFull(rejected)) => {
            next = rejected;
            tokio::time::sleep(Duration::from_millis(1)).await;
          }
          Err(e) => panic!("unexpected submit error: {e}"),
        }
      }
    }

    let done = wait_for(Duration::from_secs(20), || {
      service.status().mailboxes_finished() == MAILBOXES as u64
    })
    .await;
    assert!(done, "every submitted mailbox should finish");
    assert_eq!(service.status().mailboxes_indexed, MAILBOXES as u64);
    assert_eq!(service.status().mailboxes_failed, 0);
    assert!(
      matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Lagged(_))),
      "unread subscriber should have lagged"
    );

    service.stop().await;
  }
}

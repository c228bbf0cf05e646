//! Lifecycle tests: start, index, stop.

#[cfg(test)]
mod tests {
  use std::{
    sync::{Arc, atomic::Ordering},
    time::{Duration, Instant},
  };

  use pretty_assertions::assert_eq;

  use crate::{
    index::{HandleState, TantivyEngine},
    pipeline::{
      IndexError, IndexEvent, VisitorState,
      __tests__::helpers::{PipelineTestContext, mailbox, wait_for, wait_for_final_events},
    },
    reader::DefaultReader,
    testing::{MemoryEngine, ScriptedReader, Step, sample_mail},
  };

  const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

  // ==========================================================================
  // Indexing
  // ==========================================================================

  /// Test: an indexed mailbox leaves a committed segment at its derived path.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_indexed_mailbox_has_committed_segment() {
    let ctx = PipelineTestContext::new();
    let location = ctx.write_mbox("work", 3);
    let service = ctx.service(Arc::new(TantivyEngine::new(15, 1)), Arc::new(DefaultReader));
    let mut events = service.subscribe();

    service.start().await.expect("start should succeed");
    let mb = mailbox("Bob", "Work/Inbox!!", &location);
    service.index(mb.clone()).expect("queue has room");

    let finals = wait_for_final_events(&mut events, 1, EVENT_TIMEOUT).await;
    assert_eq!(
      finals,
      vec![IndexEvent::MailboxIndexed {
        mailbox: mb.clone(),
        folders: 1,
        mails: 3
      }]
    );

    let dir = service.index_dir(&mb);
    assert_eq!(dir, ctx.index_dir.path().join("bob").join("work_inbox"));
    let index = tantivy::Index::open_in_dir(&dir).expect("index exists at derived path");
    assert!(!index.searchable_segments().unwrap().is_empty(), "Should have a committed segment");
    assert_eq!(index.reader().unwrap().searcher().num_docs(), 3);

    let report = service.stop().await;
    assert_eq!(report.mailboxes_visited, 1);
    assert_eq!(report.processed(), 3);
    assert_eq!(report.aborted, 0);
  }

  /// Test: several mailboxes flow through the same worker pool independently.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_multiple_mailboxes_are_isolated() {
    let ctx = PipelineTestContext::new();
    let engine = Arc::new(MemoryEngine::new());
    let service = ctx.service(engine.clone(), Arc::new(ScriptedReader::with_mails(5)));
    let mut events = service.subscribe();

    service.start().await.unwrap();
    let mailboxes = ["a", "b", "c"].map(|name| mailbox("bob", name, "/unused"));
    for mb in &mailboxes {
      service.index(mb.clone()).unwrap();
    }

    let finals = wait_for_final_events(&mut events, 3, EVENT_TIMEOUT).await;
    assert_eq!(finals.len(), 3);
    assert!(finals.iter().all(|e| matches!(e, IndexEvent::MailboxIndexed { mails: 5, .. })));

    for mb in &mailboxes {
      let dir = service.index_dir(mb);
      assert_eq!(engine.committed(&dir), 5, "mailbox {mb} should commit its own documents");
      assert!(engine.docs(&dir).iter().all(|d| d.mailbox == mb.name));
    }
    assert!(service.writers().is_empty(), "finalized writers are evicted");

    let report = service.stop().await;
    assert_eq!(report.processed(), 15);
    assert_eq!(report.documents_appended, 15);
    assert_eq!(report.writers_closed, 0);
  }

  /// Test: per-item traversal errors are logged and traversal continues.
  #[tokio::test(flavor = "multi_thread")]
  async fn test_traversal_errors_are_not_fatal() {
    let ctx = PipelineTestContext::new();
    let reader = ScriptedReader::new(vec![
      Step::Folder("INBOX"),
      Step::Mail(sample_mail(1)),
      Step::Error("unparseable"),
      Step::Folder("Sent"),
      Step::Mail(sample_mail(2)),
    ]);
    let service = ctx.service(Arc::new(MemoryEngine::new()), Arc::new(reader));
    let mut events = service.subscribe();

    service.start().await.unwrap();
    let mb = mailbox("bob", "Work", "/unused");
    service.index(mb.clone()).unwrap();

    let finals = wait_for_final_events(&mut events, 1, EVENT_TIMEOUT).await;
    assert_eq!(
      finals,
      vec![IndexEvent::MailboxIndexed {
        mailbox: mb,
        folders: 2,
        mails: 2
      }]
    );
    service.stop().await;
  }

  /// Test: an unreadable mailbox is reported but its writer is still finalized.
  #[tokio::test(flavor = "multi_thread")]
  async fn test_unreadable_mailbox_still_finalizes() {
    let ctx = PipelineTestContext::new();
    let engine = Arc::new(MemoryEngine::new());
    let service = ctx.service(engine.clone(), Arc::new(ScriptedReader::failing()));
    let mut events = service.subscribe();

    service.start().await.unwrap();
    service.index(mailbox("bob", "Gone", "/missing")).unwrap();

    let finals = wait_for_final_events(&mut events, 1, EVENT_TIMEOUT).await;
    assert!(matches!(finals.as_slice(), [IndexEvent::MailboxFailed { .. }]));
    assert_eq!(engine.opens(), 1);
    assert_eq!(engine.commits.load(Ordering::SeqCst), 1);
    assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
    assert!(service.writers().is_empty());

    service.stop().await;
  }

  // ==========================================================================
  // Shutdown
  // ==========================================================================

  /// Test: stop during traversal leaves no writer open, even when closes fail.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_stop_mid_traversal_closes_every_writer() {
    let mut ctx = PipelineTestContext::new();
    ctx.config.indexer_threads = 1;
    ctx.config.index_queue_size = 4;
    let engine = Arc::new(
      MemoryEngine::new()
        .with_append_delay(Duration::from_millis(5))
        .failing_commit()
        .failing_close(),
    );
    let service = ctx.service(engine.clone(), Arc::new(ScriptedReader::with_mails(500)));

    service.start().await.unwrap();
    let mb = mailbox("bob", "Big", "/unused");
    service.index(mb.clone()).unwrap();

    let visiting = wait_for(EVENT_TIMEOUT, || {
      service.status().visitor == VisitorState::Visiting && service.writers().get(&mb).is_some()
    })
    .await;
    assert!(visiting, "visitor should be mid-traversal with an open writer");
    let handle = service.writers().get(&mb).expect("writer opened by a worker");
    assert_eq!(handle.state(), HandleState::Open);

    let report = service.stop().await;

    assert_eq!(handle.state(), HandleState::Closed);
    assert!(service.writers().is_empty());
    assert_eq!(report.writers_closed, 1);
    assert_eq!(report.close_failures, 1);
    assert!(report.processed() < 500, "stop should not drain the whole mailbox");
    assert_eq!(service.status().visitor, VisitorState::Stopped);
  }

  /// Test: with every worker stuck in a slow append and the message queue
  /// full, stop waits out one sentinel timeout, not one per worker.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_stop_with_full_queue_offers_sentinels_once() {
    const WORKERS: usize = 8;

    let mut ctx = PipelineTestContext::new();
    ctx.config.indexer_threads = WORKERS;
    ctx.config.sentinel_timeout_ms = 300;
    let engine = Arc::new(MemoryEngine::new().with_append_delay(Duration::from_secs(3)));
    let service = ctx.service(engine, Arc::new(ScriptedReader::with_mails(100)));

    service.start().await.unwrap();
    service.index(mailbox("bob", "Slow", "/unused")).unwrap();

    let full = wait_for(EVENT_TIMEOUT, || service.status().queued_mails == ctx.config.index_queue_size).await;
    assert!(full, "message queue should fill while workers are busy");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let report = service.stop().await;
    let elapsed = started.elapsed();

    assert_eq!(report.sentinels_sent, 0);
    assert!(report.aborted >= 1, "stuck workers are aborted at the join deadline");
    let bound = ctx.config.sentinel_timeout() * 3 + ctx.config.worker_join_timeout();
    assert!(elapsed < bound, "stop took {elapsed:?}, expected under {bound:?}");
  }

  /// Test: a failed start leaves a service that can still be stopped.
  #[tokio::test]
  async fn test_failed_start_then_stop_is_safe() {
    let mut ctx = PipelineTestContext::new();
    let blocker = ctx.index_dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();
    ctx.config.location = blocker.join("indices");
    let service = ctx.service(Arc::new(MemoryEngine::new()), Arc::new(ScriptedReader::with_mails(1)));

    let result = service.start().await;
    assert!(matches!(result, Err(IndexError::StorageUnavailable { .. })));

    let report = service.stop().await;
    assert_eq!(report.aborted, 0);
    assert_eq!(report.writers_closed, 0);

    let rejected = service.index(mailbox("bob", "Late", "/unused"));
    assert!(matches!(rejected, Err(IndexError::QueueClosed(_))));
  }

  /// Test: start is single-shot.
  #[tokio::test]
  async fn test_start_twice_and_restart_are_rejected() {
    let ctx = PipelineTestContext::new();
    let service = ctx.service(Arc::new(MemoryEngine::new()), Arc::new(ScriptedReader::with_mails(1)));

    service.start().await.unwrap();
    assert!(matches!(service.start().await, Err(IndexError::AlreadyStarted)));

    service.stop().await;
    assert!(matches!(service.start().await, Err(IndexError::Stopped)));
  }

  /// Test: stop is idempotent.
  #[tokio::test]
  async fn test_stop_twice() {
    let ctx = PipelineTestContext::new();
    let service = ctx.service(Arc::new(MemoryEngine::new()), Arc::new(ScriptedReader::with_mails(1)));

    service.start().await.unwrap();
    let first = service.stop().await;
    let second = service.stop().await;

    assert_eq!(first.workers.len(), 2);
    assert!(second.workers.is_empty());
    assert_eq!(second.writers_closed, 0);
  }
}

//! Index command: run the pipeline over a set of mailboxes

use std::{collections::VecDeque, path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use mailytics::{Config, IndexError, IndexEvent, IndexingService, Mailbox, MailboxFormat, ShutdownReport};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Parse `owner:name:format:path`. The path may itself contain colons.
fn parse_mailbox_spec(spec: &str) -> Result<Mailbox> {
  let mut parts = spec.splitn(4, ':');
  let (Some(owner), Some(name), Some(format), Some(path)) = (parts.next(), parts.next(), parts.next(), parts.next())
  else {
    bail!("Invalid mailbox spec '{}': expected owner:name:format:path", spec);
  };
  if owner.is_empty() || name.is_empty() || path.is_empty() {
    bail!("Invalid mailbox spec '{}': owner, name and path are required", spec);
  }

  let format: MailboxFormat = format.parse().map_err(|e: String| anyhow!(e))?;
  Ok(Mailbox::new(owner, name, format, PathBuf::from(path)))
}

/// Index the given mailboxes, wait for them (or Ctrl-C), then shut down.
pub async fn cmd_index(
  mut config: Config,
  single: Option<Mailbox>,
  specs: &[String],
  location: Option<PathBuf>,
  json: bool,
) -> Result<()> {
  let mut mailboxes: Vec<Mailbox> = single.into_iter().collect();
  for spec in specs {
    mailboxes.push(parse_mailbox_spec(spec)?);
  }
  if mailboxes.is_empty() {
    bail!("No mailboxes given. Use --owner/--name/--path or --mailbox owner:name:format:path");
  }
  if let Some(location) = location {
    config.index.location = location;
  }

  let service = IndexingService::with_defaults(config.index);
  let events = service.subscribe();
  service.start().await.context("Failed to start indexing service")?;

  let outcome = match run_to_completion(&service, events, mailboxes, tokio::signal::ctrl_c(), json).await {
    Ok(outcome) => outcome,
    Err(e) => {
      service.stop().await;
      return Err(e);
    }
  };

  let report = service.stop().await;
  print_report(&report, json)?;

  if outcome.interrupted {
    bail!("Indexing interrupted with {} mailbox(es) unfinished", outcome.unfinished());
  }
  if outcome.failed > 0 {
    bail!("{} mailbox(es) failed to index", outcome.failed);
  }
  Ok(())
}

/// How a run ended, counted by the service rather than from received events
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RunOutcome {
  total: u64,
  finished: u64,
  failed: u64,
  interrupted: bool,
}

impl RunOutcome {
  fn unfinished(&self) -> u64 {
    self.total.saturating_sub(self.finished)
  }
}

/// Submit every mailbox and wait until each has reached a final state.
///
/// Submission retries while the mailbox queue is full and keeps draining
/// progress events in the meantime. Completion is read from the service's
/// outcome counts, so a lagging event receiver cannot stall the wait.
async fn run_to_completion<F>(
  service: &IndexingService,
  mut events: broadcast::Receiver<IndexEvent>,
  mailboxes: Vec<Mailbox>,
  interrupt: F,
  json: bool,
) -> Result<RunOutcome>
where
  F: Future,
{
  tokio::pin!(interrupt);

  let total = mailboxes.len() as u64;
  let mut waiting: VecDeque<Mailbox> = mailboxes.into();
  let mut submitted = 0u64;
  let mut events_open = true;
  let mut tick = tokio::time::interval(RETRY_INTERVAL);

  loop {
    while let Some(mailbox) = waiting.pop_front() {
      match service.index(mailbox) {
        Ok(()) => submitted += 1,
        Err(IndexError::QueueFull(mailbox)) => {
          waiting.push_front(mailbox);
          break;
        }
        Err(e) => return Err(e).context("Failed to submit mailbox"),
      }
    }

    let status = service.status();
    if waiting.is_empty() && status.mailboxes_finished() >= submitted {
      return Ok(RunOutcome {
        total,
        finished: status.mailboxes_finished(),
        failed: status.mailboxes_failed,
        interrupted: false,
      });
    }

    tokio::select! {
        _ = &mut interrupt => {
            warn!("Interrupted, stopping");
            let status = service.status();
            return Ok(RunOutcome {
                total,
                finished: status.mailboxes_finished(),
                failed: status.mailboxes_failed,
                interrupted: true,
            });
        }
        event = events.recv(), if events_open => match event {
            Ok(event) => report_event(&event, json),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed progress events"),
            Err(RecvError::Closed) => events_open = false,
        },
        _ = tick.tick() => {}
    }
  }
}

fn report_event(event: &IndexEvent, json: bool) {
  if json {
    return;
  }
  match event {
    IndexEvent::MailboxStarted { mailbox } => info!(mailbox = %mailbox, "Started"),
    IndexEvent::MailboxIndexed {
      mailbox,
      folders,
      mails,
    } => println!("{}: {} messages in {} folders", mailbox, mails, folders),
    IndexEvent::MailboxFailed { mailbox, error } => println!("{}: failed: {}", mailbox, error),
  }
}

fn print_report(report: &ShutdownReport, json: bool) -> Result<()> {
  if json {
    println!("{}", serde_json::to_string_pretty(report)?);
    return Ok(());
  }

  println!();
  println!("Documents indexed: {}", report.documents_appended);
  println!("Mailboxes visited: {}", report.mailboxes_visited);
  for worker in &report.workers {
    println!(
      "  worker {}: {} processed, {} failed",
      worker.worker_id, worker.processed, worker.failed
    );
  }
  if report.writers_closed > 0 {
    println!(
      "Writers closed at shutdown: {} ({} failed)",
      report.writers_closed, report.close_failures
    );
  }
  if report.aborted > 0 {
    println!("Tasks aborted: {}", report.aborted);
  }
  Ok(())
}

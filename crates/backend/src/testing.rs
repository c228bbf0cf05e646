//! In-memory collaborators shared by unit and pipeline tests.

use std::{
  collections::HashMap,
  ops::ControlFlow,
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  time::Duration,
};

use chrono::{TimeZone, Utc};

use crate::{
  domain::{
    mail::Mail,
    mailbox::{MailFolder, Mailbox},
  },
  index::{EngineError, IndexEngine, IndexSink, MailDocument},
  reader::{MailReader, MailVisitor, ReadError, TraversalError},
};

// ============================================================================
// MemoryEngine
// ============================================================================

/// Counting engine that keeps appended documents in memory, keyed by path
#[derive(Default)]
pub struct MemoryEngine {
  pub opens: AtomicUsize,
  pub commits: Arc<AtomicUsize>,
  pub closes: Arc<AtomicUsize>,
  open_delay: Option<Duration>,
  append_delay: Option<Duration>,
  fail_open: bool,
  fail_commit: bool,
  fail_close: bool,
  docs: Arc<Mutex<HashMap<PathBuf, Vec<MailDocument>>>>,
  committed: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl MemoryEngine {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_open_delay(mut self, delay: Duration) -> Self {
    self.open_delay = Some(delay);
    self
  }

  pub fn with_append_delay(mut self, delay: Duration) -> Self {
    self.append_delay = Some(delay);
    self
  }

  pub fn failing_open(mut self) -> Self {
    self.fail_open = true;
    self
  }

  pub fn failing_commit(mut self) -> Self {
    self.fail_commit = true;
    self
  }

  pub fn failing_close(mut self) -> Self {
    self.fail_close = true;
    self
  }

  pub fn opens(&self) -> usize {
    self.opens.load(Ordering::SeqCst)
  }

  /// Documents appended under `path`, committed or not
  pub fn docs(&self, path: &Path) -> Vec<MailDocument> {
    self.docs.lock().unwrap().get(path).cloned().unwrap_or_default()
  }

  /// Documents visible at the last successful commit under `path`
  pub fn committed(&self, path: &Path) -> usize {
    self.committed.lock().unwrap().get(path).copied().unwrap_or(0)
  }
}

impl IndexEngine for MemoryEngine {
  fn name(&self) -> &str {
    "memory"
  }

  fn open(&self, path: &Path) -> Result<Box<dyn IndexSink>, EngineError> {
    if let Some(delay) = self.open_delay {
      std::thread::sleep(delay);
    }
    self.opens.fetch_add(1, Ordering::SeqCst);
    if self.fail_open {
      return Err(EngineError::Other(format!("open refused: {}", path.display())));
    }

    Ok(Box::new(MemorySink {
      path: path.to_path_buf(),
      closed: AtomicBool::new(false),
      append_delay: self.append_delay,
      fail_commit: self.fail_commit,
      fail_close: self.fail_close,
      commits: Arc::clone(&self.commits),
      closes: Arc::clone(&self.closes),
      docs: Arc::clone(&self.docs),
      committed: Arc::clone(&self.committed),
    }))
  }
}

struct MemorySink {
  path: PathBuf,
  closed: AtomicBool,
  append_delay: Option<Duration>,
  fail_commit: bool,
  fail_close: bool,
  commits: Arc<AtomicUsize>,
  closes: Arc<AtomicUsize>,
  docs: Arc<Mutex<HashMap<PathBuf, Vec<MailDocument>>>>,
  committed: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl IndexSink for MemorySink {
  fn append(&self, doc: &MailDocument) -> Result<(), EngineError> {
    if let Some(delay) = self.append_delay {
      std::thread::sleep(delay);
    }
    if self.closed.load(Ordering::SeqCst) {
      return Err(EngineError::Closed);
    }
    let mut docs = self.docs.lock().map_err(|_| EngineError::Poisoned)?;
    docs.entry(self.path.clone()).or_default().push(doc.clone());
    Ok(())
  }

  fn commit(&self) -> Result<(), EngineError> {
    self.commits.fetch_add(1, Ordering::SeqCst);
    if self.fail_commit {
      return Err(EngineError::Other("commit refused".to_string()));
    }
    let count = self
      .docs
      .lock()
      .map_err(|_| EngineError::Poisoned)?
      .get(&self.path)
      .map_or(0, Vec::len);
    self
      .committed
      .lock()
      .map_err(|_| EngineError::Poisoned)?
      .insert(self.path.clone(), count);
    Ok(())
  }

  fn close(&self) -> Result<(), EngineError> {
    self.closes.fetch_add(1, Ordering::SeqCst);
    self.closed.store(true, Ordering::SeqCst);
    if self.fail_close {
      return Err(EngineError::Other("close refused".to_string()));
    }
    Ok(())
  }
}

// ============================================================================
// ScriptedReader
// ============================================================================

/// One step of a scripted traversal
#[derive(Debug, Clone)]
pub enum Step {
  Folder(&'static str),
  Mail(Mail),
  Error(&'static str),
}

/// Reader that replays the same script for every mailbox
#[derive(Default)]
pub struct ScriptedReader {
  steps: Vec<Step>,
  fail: bool,
}

impl ScriptedReader {
  pub fn new(steps: Vec<Step>) -> Self {
    Self { steps, fail: false }
  }

  /// One folder holding `count` sample mails
  pub fn with_mails(count: usize) -> Self {
    let mut steps = vec![Step::Folder("INBOX")];
    steps.extend((0..count).map(|i| Step::Mail(sample_mail(i))));
    Self::new(steps)
  }

  /// Reader whose `read` fails before visiting anything
  pub fn failing() -> Self {
    Self {
      steps: Vec::new(),
      fail: true,
    }
  }
}

impl MailReader for ScriptedReader {
  fn read(&self, mailbox: &Mailbox, visitor: &mut dyn MailVisitor) -> Result<(), ReadError> {
    if self.fail {
      return Err(ReadError::NotFound(mailbox.location.clone()));
    }

    let mut folder = MailFolder::new("INBOX", mailbox.location());
    for step in &self.steps {
      match step {
        Step::Folder(name) => {
          folder = MailFolder::new(*name, mailbox.location().join(name));
          visitor.on_folder(&folder);
        }
        Step::Mail(mail) => {
          if visitor.on_mail(mail.clone()).is_break() {
            return Ok(());
          }
        }
        Step::Error(hint) => {
          let error = TraversalError::Io(std::io::Error::other(*hint));
          visitor.on_error(error, &folder, Some(*hint));
        }
      }
    }
    Ok(())
  }
}

/// A visitor that just records what it saw
#[derive(Default)]
pub struct RecordingVisitor {
  pub folders: Vec<String>,
  pub mails: Vec<Mail>,
  pub errors: Vec<String>,
}

impl MailVisitor for RecordingVisitor {
  fn on_folder(&mut self, folder: &MailFolder) {
    self.folders.push(folder.name.clone());
  }

  fn on_mail(&mut self, mail: Mail) -> ControlFlow<()> {
    self.mails.push(mail);
    ControlFlow::Continue(())
  }

  fn on_error(&mut self, error: TraversalError, folder: &MailFolder, _mail: Option<&str>) {
    self.errors.push(format!("{}: {}", folder.name, error));
  }
}

pub fn sample_mail(n: usize) -> Mail {
  Mail {
    id: format!("{n}@example.com"),
    date: Utc.with_ymd_and_hms(2014, 7, 1, 12, 0, 0).unwrap(),
    subject: format!("Message {n}"),
    from: "alice@example.com".to_string(),
    to: "bob@example.com".to_string(),
    body: format!("body of message {n}"),
    folder: "INBOX".to_string(),
    ..Default::default()
  }
}

//! mbox traversal.
//!
//! The mailbox location is either a single mbox file (one folder named after
//! the file stem) or a directory whose `*.mbox` and extensionless files are
//! folders. Messages are split on `From ` separator lines.

use std::{
  ops::ControlFlow,
  path::{Path, PathBuf},
};

use tracing::{debug, trace};

use super::{MailVisitor, ReadError, TraversalError, fallback_id, parse_message};
use crate::domain::mailbox::{MailFolder, Mailbox};

pub(super) fn read(mailbox: &Mailbox, visitor: &mut dyn MailVisitor) -> Result<(), ReadError> {
  let location = mailbox.location();

  if location.is_file() {
    let _ = read_folder(mailbox, location, visitor);
    return Ok(());
  }

  for path in folder_files(location)? {
    if read_folder(mailbox, &path, visitor).is_break() {
      break;
    }
  }
  Ok(())
}

fn folder_files(dir: &Path) -> Result<Vec<PathBuf>, ReadError> {
  let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.path())
    .filter(|path| path.is_file())
    .filter(|path| {
      let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
      let ext = path.extension().and_then(|e| e.to_str());
      !hidden && matches!(ext, None | Some("mbox"))
    })
    .collect();
  files.sort();
  Ok(files)
}

fn read_folder(mailbox: &Mailbox, path: &Path, visitor: &mut dyn MailVisitor) -> ControlFlow<()> {
  let name = path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_else(|| "INBOX".to_string());
  let folder = MailFolder::new(name, path);
  visitor.on_folder(&folder);

  let content = match std::fs::read(path) {
    Ok(content) => content,
    Err(e) => {
      debug!(path = %path.display(), error = %e, "Failed to read mbox folder");
      visitor.on_error(TraversalError::Io(e), &folder, None);
      return ControlFlow::Continue(());
    }
  };

  let messages = split_messages(&content);
  trace!(folder = %folder.name, count = messages.len(), "Split mbox folder");

  for (ordinal, raw) in messages.into_iter().enumerate() {
    let fallback = fallback_id(mailbox, &folder.name, ordinal);
    match parse_message(raw, &folder.name, &fallback) {
      Ok(mail) => visitor.on_mail(mail)?,
      Err(e) => visitor.on_error(TraversalError::Parse(e), &folder, Some(&ordinal.to_string())),
    }
  }

  ControlFlow::Continue(())
}

/// Split an mbox file into raw messages, dropping the `From ` separator lines.
fn split_messages(content: &[u8]) -> Vec<&[u8]> {
  let mut messages = Vec::new();
  let mut start: Option<usize> = None;
  let mut pos = 0;

  while pos < content.len() {
    let end = content[pos..]
      .iter()
      .position(|&b| b == b'\n')
      .map_or(content.len(), |i| pos + i + 1);
    let line = &content[pos..end];

    if line.starts_with(b"From ") && (pos == 0 || content[pos - 1] == b'\n') {
      if let Some(s) = start {
        messages.push(trim_separator(&content[s..pos]));
      }
      start = Some(end);
    } else if start.is_none() && pos == 0 {
      // No leading separator: treat the file as a single message
      start = Some(0);
    }
    pos = end;
  }

  if let Some(s) = start
    && s < content.len()
  {
    messages.push(trim_separator(&content[s..]));
  }

  messages.into_iter().filter(|m| !m.is_empty()).collect()
}

/// Drop the blank line that precedes the next separator
fn trim_separator(raw: &[u8]) -> &[u8] {
  let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
  let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
  let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
  raw.strip_suffix(b"\r").unwrap_or(raw)
}

//! Maildir traversal.
//!
//! The mailbox location is a maildir root. The root itself is the `INBOX`
//! folder when it carries `cur`/`new`; every nested directory that does is a
//! folder too. Maildir++ names (`.Sent`, `.Archive.2014`) lose the leading dot.

use std::{
  ops::ControlFlow,
  path::{Path, PathBuf},
};

use tracing::debug;
use walkdir::WalkDir;

use super::{MailVisitor, ReadError, TraversalError, fallback_id, parse_message};
use crate::domain::mailbox::{MailFolder, Mailbox};

const MESSAGE_DIRS: [&str; 2] = ["cur", "new"];

pub(super) fn read(mailbox: &Mailbox, visitor: &mut dyn MailVisitor) -> Result<(), ReadError> {
  for folder in folders(mailbox.location()) {
    if read_folder(mailbox, &folder, visitor).is_break() {
      break;
    }
  }
  Ok(())
}

fn is_maildir(path: &Path) -> bool {
  MESSAGE_DIRS.iter().any(|sub| path.join(sub).is_dir())
}

fn folders(root: &Path) -> Vec<MailFolder> {
  let mut folders = Vec::new();
  if is_maildir(root) {
    folders.push(MailFolder::new("INBOX", root));
  }

  let mut nested: Vec<MailFolder> = WalkDir::new(root)
    .min_depth(1)
    .into_iter()
    .filter_entry(|entry| {
      let name = entry.file_name().to_str().unwrap_or_default();
      !(MESSAGE_DIRS.contains(&name) || name == "tmp")
    })
    .filter_map(|entry| entry.ok())
    .filter(|entry| entry.file_type().is_dir() && is_maildir(entry.path()))
    .map(|entry| {
      let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
      let name = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().trim_start_matches('.').to_string())
        .collect::<Vec<_>>()
        .join("/");
      MailFolder::new(name, entry.path())
    })
    .collect();

  nested.sort_by(|a, b| a.name.cmp(&b.name));
  folders.extend(nested);
  folders
}

fn message_files(folder: &MailFolder) -> std::io::Result<Vec<PathBuf>> {
  let mut files = Vec::new();
  for sub in MESSAGE_DIRS {
    let dir = folder.path.join(sub);
    if !dir.is_dir() {
      continue;
    }
    for entry in std::fs::read_dir(&dir)? {
      let path = entry?.path();
      let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
      if path.is_file() && !hidden {
        files.push(path);
      }
    }
  }
  files.sort();
  Ok(files)
}

fn read_folder(mailbox: &Mailbox, folder: &MailFolder, visitor: &mut dyn MailVisitor) -> ControlFlow<()> {
  visitor.on_folder(folder);

  let files = match message_files(folder) {
    Ok(files) => files,
    Err(e) => {
      debug!(folder = %folder.name, error = %e, "Failed to list maildir folder");
      visitor.on_error(TraversalError::Io(e), folder, None);
      return ControlFlow::Continue(());
    }
  };

  for (ordinal, path) in files.iter().enumerate() {
    let hint = path.file_name().map(|n| n.to_string_lossy().into_owned());
    let raw = match std::fs::read(path) {
      Ok(raw) => raw,
      Err(e) => {
        visitor.on_error(TraversalError::Io(e), folder, hint.as_deref());
        continue;
      }
    };

    let fallback = fallback_id(mailbox, &folder.name, ordinal);
    match parse_message(&raw, &folder.name, &fallback) {
      Ok(mail) => visitor.on_mail(mail)?,
      Err(e) => visitor.on_error(TraversalError::Parse(e), folder, hint.as_deref()),
    }
  }

  ControlFlow::Continue(())
}

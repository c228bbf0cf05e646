//! Mailbox identity and the folder nodes visited during traversal.

use std::{
  fmt,
  hash::{Hash, Hasher},
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// On-disk layout of a mailbox, used to pick a traversal reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxFormat {
  /// A single mbox file, or a directory of mbox files (one per folder)
  #[default]
  Mbox,
  /// A maildir root with `cur`/`new` subdirectories, Maildir++ subfolders allowed
  Maildir,
}

impl std::str::FromStr for MailboxFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "mbox" => Ok(MailboxFormat::Mbox),
      "maildir" => Ok(MailboxFormat::Maildir),
      _ => Err(format!("Invalid mailbox format: {}", s)),
    }
  }
}

impl fmt::Display for MailboxFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MailboxFormat::Mbox => f.write_str("mbox"),
      MailboxFormat::Maildir => f.write_str("maildir"),
    }
  }
}

/// A named collection of folders and messages owned by one user.
///
/// Identity is `(owner, name)`: two mailboxes with the same owner and name are
/// the same cache key even if they point at different locations. The format
/// and location only tell the reader where to find the content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mailbox {
  /// Owning username
  pub owner: String,
  /// Mailbox display name
  pub name: String,
  /// Storage layout
  #[serde(default)]
  pub format: MailboxFormat,
  /// Path to the mailbox content
  pub location: PathBuf,
}

impl Mailbox {
  pub fn new(
    owner: impl Into<String>,
    name: impl Into<String>,
    format: MailboxFormat,
    location: impl Into<PathBuf>,
  ) -> Self {
    Self {
      owner: owner.into(),
      name: name.into(),
      format,
      location: location.into(),
    }
  }

  pub fn location(&self) -> &Path {
    &self.location
  }
}

impl PartialEq for Mailbox {
  fn eq(&self, other: &Self) -> bool {
    self.owner == other.owner && self.name == other.name
  }
}

impl Eq for Mailbox {}

impl Hash for Mailbox {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.owner.hash(state);
    self.name.hash(state);
  }
}

impl fmt::Display for Mailbox {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.owner, self.name)
  }
}

/// A folder visited during traversal. Counted and logged, never indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailFolder {
  pub name: String,
  pub path: PathBuf,
}

impl MailFolder {
  pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      path: path.into(),
    }
  }
}

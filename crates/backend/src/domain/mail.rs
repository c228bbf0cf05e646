use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single message produced by a traversal reader.
///
/// Immutable once produced; each `Mail` is consumed exactly once by an index
/// worker. Address fields hold the decoded header values as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mail {
  /// `Message-ID` without angle brackets, or a deterministic fallback id
  pub id: String,
  pub date: DateTime<Utc>,
  pub subject: String,
  pub from: String,
  pub to: String,
  pub cc: String,
  pub bcc: String,
  /// Plain-text body (HTML-only messages are tag-stripped)
  pub body: String,
  pub headers: BTreeMap<String, String>,
  /// Name of the folder the message was found in
  pub folder: String,
  pub attachment_count: u32,
  pub language: Option<String>,
  pub user_agent: Option<String>,
  pub thread_topic: Option<String>,
}

impl Mail {
  /// All recipients (`To`, `Cc`, `Bcc`) joined with `, `, skipping empty headers
  pub fn recipients(&self) -> String {
    [&self.to, &self.cc, &self.bcc]
      .into_iter()
      .filter(|s| !s.is_empty())
      .map(String::as_str)
      .collect::<Vec<_>>()
      .join(", ")
  }
}

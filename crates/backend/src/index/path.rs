//! Deterministic on-disk location of a mailbox index.
//!
//! `<root>/<lower(owner)>/<sanitized(name)>` where sanitizing lower-cases the
//! name and collapses every maximal run of non-word characters (anything
//! outside `[0-9A-Za-z_]`) into one underscore. Runs at either end are dropped.
//!
//! Distinct names can collapse to the same directory ("Work/Inbox" and
//! "work inbox" both map to `work_inbox`). There is no uniqueness guarantee.

use std::{
  path::{Path, PathBuf},
  sync::LazyLock,
};

use regex::Regex;

use crate::domain::mailbox::Mailbox;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9A-Za-z_]+").expect("static regex is valid"));

/// Sanitize a mailbox name into a single path segment.
pub fn sanitize_mailbox_name(name: &str) -> String {
  let lowered = name.to_lowercase();
  let collapsed = NON_WORD
    .split(&lowered)
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("_");

  if collapsed.is_empty() {
    "_".to_string()
  } else {
    collapsed
  }
}

/// Index directory for `(owner, name)` under `root`.
pub fn index_dir(root: &Path, owner: &str, name: &str) -> PathBuf {
  root.join(owner.to_lowercase()).join(sanitize_mailbox_name(name))
}

pub fn mailbox_index_dir(root: &Path, mailbox: &Mailbox) -> PathBuf {
  index_dir(root, &mailbox.owner, &mailbox.name)
}

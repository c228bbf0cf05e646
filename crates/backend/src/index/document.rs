//! Projection of a [`Mail`] into the fixed index field set.

use chrono::{DateTime, Utc};

use crate::domain::{mail::Mail, mailbox::Mailbox};

/// Field names shared by the index schema and the query layer
pub mod fields {
  pub const F_ID: &str = "id";
  pub const F_OWNER: &str = "owner";
  pub const F_MAILBOX: &str = "mailbox";
  pub const F_DATE: &str = "date";
  pub const F_SUBJECT: &str = "subject";
  pub const F_FROM: &str = "from";
  pub const F_TO: &str = "to";
  pub const F_CC: &str = "cc";
  pub const F_BCC: &str = "bcc";
  pub const F_BODY: &str = "body";
  pub const F_FOLDER: &str = "folder";
  pub const F_ATTACHMENT_COUNT: &str = "attachment_count";
  pub const F_LANGUAGE: &str = "language";
  pub const F_USER_AGENT: &str = "user_agent";
}

/// One message as the index engine sees it
#[derive(Debug, Clone, PartialEq)]
pub struct MailDocument {
  pub id: String,
  pub owner: String,
  pub mailbox: String,
  pub date: DateTime<Utc>,
  pub subject: String,
  pub from: String,
  pub to: String,
  pub cc: String,
  pub bcc: String,
  pub body: String,
  pub folder: String,
  pub attachment_count: u64,
  pub language: String,
  pub user_agent: String,
}

impl MailDocument {
  pub fn from_mail(mailbox: &Mailbox, mail: &Mail) -> Self {
    Self {
      id: mail.id.clone(),
      owner: mailbox.owner.to_lowercase(),
      mailbox: mailbox.name.clone(),
      date: mail.date,
      subject: mail.subject.clone(),
      from: mail.from.clone(),
      to: mail.to.clone(),
      cc: mail.cc.clone(),
      bcc: mail.bcc.clone(),
      body: mail.body.clone(),
      folder: mail.folder.clone(),
      attachment_count: u64::from(mail.attachment_count),
      language: mail.language.clone().unwrap_or_default(),
      user_agent: mail.user_agent.clone().unwrap_or_default(),
    }
  }
}

//! RFC 822 message parsing.

use std::{collections::BTreeMap, sync::LazyLock};

use chrono::{DateTime, TimeZone, Utc};
use mailparse::{DispositionType, MailHeaderMap, MailParseError, ParsedMail};
use regex::Regex;
use uuid::Uuid;

use crate::domain::{mail::Mail, mailbox::Mailbox};

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<[^>]+>").expect("static regex is valid"));

/// Deterministic id for messages without a `Message-ID`.
///
/// Stable across runs so reindexing the same mailbox reproduces the same ids.
pub fn fallback_id(mailbox: &Mailbox, folder: &str, ordinal: usize) -> String {
  let key = format!("{}/{}/{}/{}", mailbox.owner, mailbox.name, folder, ordinal);
  Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Parse one raw message found in `folder`.
pub fn parse_message(raw: &[u8], folder: &str, fallback_id: &str) -> Result<Mail, MailParseError> {
  let parsed = mailparse::parse_mail(raw)?;
  let headers = parsed.headers.as_slice();

  let id = headers
    .get_first_value("Message-ID")
    .map(|value| value.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    .filter(|value| !value.is_empty())
    .unwrap_or_else(|| fallback_id.to_string());

  let date = headers
    .get_first_value("Date")
    .and_then(|value| mailparse::dateparse(&value).ok())
    .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

  let header = |name: &str| headers.get_first_value(name).unwrap_or_default();
  let optional = |name: &str| {
    headers
      .get_first_value(name)
      .map(|value| value.trim().to_string())
      .filter(|value| !value.is_empty())
  };

  let all_headers: BTreeMap<String, String> = parsed
    .headers
    .iter()
    .map(|h| (h.get_key().to_lowercase(), h.get_value()))
    .collect();

  let mut parts = Parts::default();
  parts.collect(&parsed);

  Ok(Mail {
    id,
    date,
    subject: header("Subject"),
    from: header("From"),
    to: header("To"),
    cc: header("Cc"),
    bcc: header("Bcc"),
    body: parts.body(&parsed),
    headers: all_headers,
    folder: folder.to_string(),
    attachment_count: parts.attachments,
    language: optional("Content-Language"),
    user_agent: optional("User-Agent").or_else(|| optional("X-Mailer")),
    thread_topic: optional("Thread-Topic"),
  })
}

#[derive(Default)]
struct Parts {
  plain: Vec<String>,
  html: Vec<String>,
  attachments: u32,
}

impl Parts {
  fn collect(&mut self, part: &ParsedMail<'_>) {
    if !part.subparts.is_empty() {
      for sub in &part.subparts {
        self.collect(sub);
      }
      return;
    }

    let disposition = part.get_content_disposition();
    let named = disposition.params.contains_key("filename") || part.ctype.params.contains_key("name");
    if matches!(disposition.disposition, DispositionType::Attachment) || named {
      self.attachments += 1;
      return;
    }

    let mime = part.ctype.mimetype.to_ascii_lowercase();
    let Ok(body) = part.get_body() else {
      return;
    };
    if body.trim().is_empty() {
      return;
    }
    if mime.starts_with("text/plain") {
      self.plain.push(body);
    } else if mime.starts_with("text/html") {
      self.html.push(body);
    }
  }

  fn body(&self, root: &ParsedMail<'_>) -> String {
    let text = if !self.plain.is_empty() {
      self.plain.join("\n\n")
    } else if !self.html.is_empty() {
      strip_html(&self.html.join("\n\n"))
    } else if root.subparts.is_empty() && self.attachments == 0 {
      root.get_body().unwrap_or_default()
    } else {
      String::new()
    };
    text.replace("\r\n", "\n").trim().to_string()
  }
}

fn strip_html(html: &str) -> String {
  let text = HTML_TAG
    .replace_all(html, " ")
    .replace("&nbsp;", " ")
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&quot;", "\"")
    .replace("&#39;", "'")
    .replace("&amp;", "&");
  text.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Tantivy-backed index engine

use std::{path::Path, sync::RwLock};

use tantivy::{
  DateTime as TantivyDateTime, Index, IndexWriter, TantivyDocument,
  directory::MmapDirectory,
  schema::{FAST, Field, INDEXED, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions},
};
use tracing::{debug, trace};

use super::{
  document::{MailDocument, fields::*},
  engine::{EngineError, IndexEngine, IndexSink},
};

/// Tantivy refuses writer budgets below this per indexing thread
const MIN_HEAP_PER_THREAD: usize = 15 * 1024 * 1024;

/// Build the mail schema
///
/// - id, owner, mailbox, folder, language, user_agent: exact-match strings
/// - subject, from, to, cc, bcc, body: tokenized with positions for phrase queries
/// - date: fast date field for range queries and sorting
/// - attachment_count: fast numeric field for analytics
pub fn build_schema() -> Schema {
  let mut builder = Schema::builder();

  builder.add_text_field(F_ID, STRING | STORED);
  builder.add_text_field(F_OWNER, STRING | STORED);
  builder.add_text_field(F_MAILBOX, STRING | STORED);
  builder.add_date_field(F_DATE, INDEXED | STORED | FAST);

  let text_opts = TextOptions::default()
    .set_indexing_options(
      TextFieldIndexing::default()
        .set_index_option(IndexRecordOption::WithFreqsAndPositions)
        .set_tokenizer("default"),
    )
    .set_stored();

  builder.add_text_field(F_SUBJECT, text_opts.clone());
  builder.add_text_field(F_FROM, text_opts.clone());
  builder.add_text_field(F_TO, text_opts.clone());
  builder.add_text_field(F_CC, text_opts.clone());
  builder.add_text_field(F_BCC, text_opts.clone());
  builder.add_text_field(F_BODY, text_opts);

  builder.add_text_field(F_FOLDER, STRING | STORED);
  builder.add_u64_field(F_ATTACHMENT_COUNT, INDEXED | STORED | FAST);
  builder.add_text_field(F_LANGUAGE, STRING | STORED);
  builder.add_text_field(F_USER_AGENT, STRING | STORED);

  builder.build()
}

/// Field handles resolved once per writer
struct MailFields {
  id: Field,
  owner: Field,
  mailbox: Field,
  date: Field,
  subject: Field,
  from: Field,
  to: Field,
  cc: Field,
  bcc: Field,
  body: Field,
  folder: Field,
  attachment_count: Field,
  language: Field,
  user_agent: Field,
}

impl MailFields {
  fn new(schema: &Schema) -> Result<Self, EngineError> {
    Ok(Self {
      id: schema.get_field(F_ID)?,
      owner: schema.get_field(F_OWNER)?,
      mailbox: schema.get_field(F_MAILBOX)?,
      date: schema.get_field(F_DATE)?,
      subject: schema.get_field(F_SUBJECT)?,
      from: schema.get_field(F_FROM)?,
      to: schema.get_field(F_TO)?,
      cc: schema.get_field(F_CC)?,
      bcc: schema.get_field(F_BCC)?,
      body: schema.get_field(F_BODY)?,
      folder: schema.get_field(F_FOLDER)?,
      attachment_count: schema.get_field(F_ATTACHMENT_COUNT)?,
      language: schema.get_field(F_LANGUAGE)?,
      user_agent: schema.get_field(F_USER_AGENT)?,
    })
  }

  fn to_document(&self, doc: &MailDocument) -> TantivyDocument {
    let mut out = TantivyDocument::default();
    out.add_text(self.id, &doc.id);
    out.add_text(self.owner, &doc.owner);
    out.add_text(self.mailbox, &doc.mailbox);
    out.add_date(self.date, TantivyDateTime::from_timestamp_secs(doc.date.timestamp()));
    out.add_text(self.subject, &doc.subject);
    out.add_text(self.from, &doc.from);
    out.add_text(self.to, &doc.to);
    out.add_text(self.cc, &doc.cc);
    out.add_text(self.bcc, &doc.bcc);
    out.add_text(self.body, &doc.body);
    out.add_text(self.folder, &doc.folder);
    out.add_u64(self.attachment_count, doc.attachment_count);
    out.add_text(self.language, &doc.language);
    out.add_text(self.user_agent, &doc.user_agent);
    out
  }
}

/// Opens one tantivy `IndexWriter` per mailbox directory
pub struct TantivyEngine {
  schema: Schema,
  heap_bytes: usize,
  threads: usize,
}

impl TantivyEngine {
  pub fn new(heap_mb: usize, threads: usize) -> Self {
    let threads = threads.max(1);
    Self {
      schema: build_schema(),
      heap_bytes: (heap_mb * 1024 * 1024).max(MIN_HEAP_PER_THREAD * threads),
      threads,
    }
  }
}

impl Default for TantivyEngine {
  fn default() -> Self {
    Self::new(50, 1)
  }
}

impl IndexEngine for TantivyEngine {
  fn name(&self) -> &str {
    "tantivy"
  }

  fn open(&self, path: &Path) -> Result<Box<dyn IndexSink>, EngineError> {
    std::fs::create_dir_all(path)?;
    let directory = MmapDirectory::open(path)?;
    let index = Index::open_or_create(directory, self.schema.clone())?;
    let fields = MailFields::new(&index.schema())?;
    let writer: IndexWriter = index.writer_with_num_threads(self.threads, self.heap_bytes)?;

    debug!(path = %path.display(), heap_bytes = self.heap_bytes, "Opened tantivy writer");

    Ok(Box::new(TantivySink {
      writer: RwLock::new(Some(writer)),
      fields,
    }))
  }
}

/// Tantivy accepts `add_document` through a shared reference, so appends only
/// take the read lock and may run concurrently. Commit and close are exclusive.
struct TantivySink {
  writer: RwLock<Option<IndexWriter>>,
  fields: MailFields,
}

impl IndexSink for TantivySink {
  fn append(&self, doc: &MailDocument) -> Result<(), EngineError> {
    let guard = self.writer.read().map_err(|_| EngineError::Poisoned)?;
    let writer = guard.as_ref().ok_or(EngineError::Closed)?;
    let opstamp = writer.add_document(self.fields.to_document(doc))?;
    trace!(id = %doc.id, opstamp, "Appended document");
    Ok(())
  }

  fn commit(&self) -> Result<(), EngineError> {
    let mut guard = self.writer.write().map_err(|_| EngineError::Poisoned)?;
    let writer = guard.as_mut().ok_or(EngineError::Closed)?;
    let opstamp = writer.commit()?;
    debug!(opstamp, "Committed tantivy writer");
    Ok(())
  }

  fn close(&self) -> Result<(), EngineError> {
    let writer = self.writer.write().map_err(|_| EngineError::Poisoned)?.take();
    if let Some(writer) = writer {
      writer.wait_merging_threads()?;
    }
    Ok(())
  }
}

//! Index storage
//!
//! ```text
//! WriterCache ──get_or_create──▶ WriterHandle ──▶ IndexSink (one per mailbox)
//!      │                                              ▲
//!      └── index_dir(root, mailbox) ──open──▶ IndexEngine
//! ```
//!
//! The engine is abstracted behind [`IndexEngine`]/[`IndexSink`] so the pipeline
//! can run against tantivy in production and against in-memory engines in tests.

mod cache;
mod document;
mod engine;
mod path;
mod tantivy_engine;

pub use self::{
  cache::{CloseReport, HandleState, WriterCache, WriterHandle},
  document::{MailDocument, fields},
  engine::{EngineError, IndexEngine, IndexSink},
  path::{index_dir, mailbox_index_dir, sanitize_mailbox_name},
  tantivy_engine::{TantivyEngine, build_schema},
};

//! Domain types - mailboxes, messages and configuration
//!
//! These types are independent of the index engine and of the traversal
//! collaborators that produce them.

pub mod config;
pub mod mail;
pub mod mailbox;

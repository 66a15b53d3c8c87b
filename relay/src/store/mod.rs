//! Filesystem message store and dead-letter queue.
//!
//! Every endpoint owns a Maildir-style mailbox under
//! `<root>/mailboxes/<endpointHash>/` with three children: `new/` for
//! unclaimed deliveries, `cur/` for in-flight claims, `failed/` for
//! terminal rejects plus their reason sidecars. All writes are
//! temp-then-rename on the same filesystem, so a crash at any instant
//! leaves the mailbox consistent.

mod dead_letter;
mod error;
mod maildir;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use error::StoreError;
pub use maildir::MaildirStore;

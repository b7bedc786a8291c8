//! Append-only JSON-lines journal.
//!
//! One line per [`JournalEntry`]; lines are written by a single dedicated thread so the write
//! order is the order in which [`Journal::append`] was called, across every clone of the handle.

pub mod entry;
pub mod errors;
pub mod reader;
pub mod writer;

pub use entry::{EntryKind, JournalEntry};
pub use errors::JournalError;
pub use reader::{read_entries, JournalFilter};
pub use writer::Journal;

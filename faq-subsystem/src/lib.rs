#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod csv_format;
pub mod diff;
pub mod entry;

pub use entry::FaqEntry;

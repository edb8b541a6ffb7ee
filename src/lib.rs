//! mail-filer — rule-based IMAP filing and rule training.

pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};

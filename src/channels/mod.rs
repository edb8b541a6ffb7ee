//! Mail-store and outbound-transport capabilities consumed by the pipeline.
//!
//! The pipeline only talks to these traits; `imap` and `smtp` provide the
//! network implementations.

pub mod imap;
pub mod smtp;

use std::fmt;

use crate::error::{SendError, StoreError};

pub use imap::{ImapConfig, ImapConnector, ImapSession};
pub use smtp::{SmtpConfig, SmtpForwarder};

/// Store-assigned message identifier (IMAP UID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// System flags the pipeline sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Deleted,
}

impl Flag {
    pub fn as_imap(&self) -> &'static str {
        match self {
            Self::Seen => "\\Seen",
            Self::Deleted => "\\Deleted",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap())
    }
}

/// Result of creating a mailbox. Both outcomes are success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Created {
    New,
    AlreadyExists,
}

/// An authenticated mail-store session.
///
/// Every operation is blocking and acts on the currently selected mailbox.
pub trait MailStore {
    /// Select a mailbox, read-write unless `read_only`.
    fn select(&mut self, mailbox: &str, read_only: bool) -> Result<(), StoreError>;

    /// All message ids in the selected mailbox, read and unread.
    fn search_all(&mut self) -> Result<Vec<Uid>, StoreError>;

    /// Full message source without touching `\Seen`.
    fn fetch_peek(&mut self, uid: Uid) -> Result<Vec<u8>, StoreError>;

    /// Full message source; the server may set `\Seen`.
    fn fetch_full(&mut self, uid: Uid) -> Result<Vec<u8>, StoreError>;

    fn add_flag(&mut self, uid: Uid, flag: Flag) -> Result<(), StoreError>;

    fn create_mailbox(&mut self, mailbox: &str) -> Result<Created, StoreError>;

    /// Server-side copy into `dest`.
    fn copy(&mut self, uid: Uid, dest: &str) -> Result<(), StoreError>;

    /// Append `message` to `dest` with no flags set.
    fn append(&mut self, dest: &str, message: &[u8]) -> Result<(), StoreError>;

    /// Remove every `\Deleted` message from the selected mailbox.
    fn expunge(&mut self) -> Result<(), StoreError>;

    fn logout(&mut self) -> Result<(), StoreError>;
}

/// Opens authenticated [`MailStore`] sessions.
pub trait MailStoreConnector {
    type Session: MailStore;

    fn connect(&self) -> Result<Self::Session, StoreError>;
}

/// Outbound mail used by the forward action.
pub trait OutboundTransport {
    /// Send a short message to `to` carrying `attachment` verbatim.
    fn send_with_attachment(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        attachment: &[u8],
        attachment_name: &str,
    ) -> Result<(), SendError>;
}

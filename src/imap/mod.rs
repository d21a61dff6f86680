//! IMAP side of the adapter.
//!
//! [`ImapTransport`] is one authenticated connection; each method is exactly
//! one protocol round-trip and therefore one suspension point. Mailbox names
//! cross this boundary as UTF-8; encoding for the wire is the transport's job.

use async_trait::async_trait;

use crate::error::TransportError;

pub mod client;
pub mod parse;
pub mod session;
pub mod types;

use types::{FetchedMessage, FlagOp, MailboxEntry, SelectedMailbox};

#[async_trait]
pub trait ImapTransport: Send {
    async fn select(&mut self, mailbox: &str) -> Result<SelectedMailbox, TransportError>;

    async fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>, TransportError>;

    /// Header block and flags only; never sets `\Seen`.
    async fn fetch_headers(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, TransportError>;

    /// Full message via `BODY[]`; the server marks it seen.
    async fn fetch_message(&mut self, uid: u32) -> Result<Option<FetchedMessage>, TransportError>;

    /// Full message via `BODY.PEEK[]`; flags are left alone.
    async fn peek_message(&mut self, uid: u32) -> Result<Option<FetchedMessage>, TransportError>;

    async fn store_flags(
        &mut self,
        uid: u32,
        op: FlagOp,
        flags: &[&str],
    ) -> Result<(), TransportError>;

    async fn move_message(&mut self, uid: u32, destination: &str) -> Result<(), TransportError>;

    async fn append(
        &mut self,
        mailbox: &str,
        flags: &[&str],
        raw: &[u8],
    ) -> Result<(), TransportError>;

    async fn list_mailboxes(&mut self) -> Result<Vec<MailboxEntry>, TransportError>;

    async fn hierarchy_delimiter(&mut self) -> Result<Option<String>, TransportError>;

    async fn create_mailbox(&mut self, name: &str) -> Result<(), TransportError>;

    async fn rename_mailbox(&mut self, from: &str, to: &str) -> Result<(), TransportError>;

    async fn delete_mailbox(&mut self, name: &str) -> Result<(), TransportError>;

    /// STATUS (MESSAGES); does not change the selection.
    async fn message_count(&mut self, mailbox: &str) -> Result<u32, TransportError>;

    async fn logout(&mut self) -> Result<(), TransportError>;
}

/// Opens authenticated transports for one account.
#[async_trait]
pub trait ImapConnector: Send + Sync {
    type Transport: ImapTransport;

    async fn connect(&self) -> Result<Self::Transport, TransportError>;
}

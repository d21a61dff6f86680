use serde::{Deserialize, Serialize};

use crate::config::{AuthMethod, Security};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub security: Security,
    pub username: String,
    pub password: String, // plaintext password or OAuth2 access token
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    pub auth_timeout_secs: u64,
}

/// One LIST entry. `path` is the decoded UTF-8 server path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxEntry {
    pub path: String,
    pub delimiter: Option<String>,
}

/// What SELECT reported about the mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedMailbox {
    pub exists: u32,
    pub uidvalidity: u32,
    pub uidnext: u32,
}

/// A single FETCH result as it came off the wire.
///
/// `raw` holds either the header block or the whole message, depending on
/// which fetch produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: u32,
    pub flags: Vec<String>,
    pub internal_date: Option<i64>,
    pub raw: Vec<u8>,
}

impl FetchedMessage {
    pub fn is_seen(&self) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    Add,
    Remove,
}

impl FlagOp {
    pub fn as_imap(self) -> &'static str {
        match self {
            FlagOp::Add => "+FLAGS",
            FlagOp::Remove => "-FLAGS",
        }
    }
}

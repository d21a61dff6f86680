//! `mailbox:uid` message identifiers and folder name normalization.

use std::fmt;
use std::str::FromStr;

use crate::error::TransportError;

/// A message address: mailbox plus UID within that mailbox.
///
/// UIDs are only meaningful together with their mailbox, so there is no way
/// to build one without a mailbox name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId {
    mailbox: String,
    uid: u32,
}

impl MessageId {
    pub fn new(mailbox: impl Into<String>, uid: u32) -> Result<Self, TransportError> {
        let mailbox = mailbox.into();
        if mailbox.is_empty() {
            return Err(TransportError::NotFound("message id has no mailbox".into()));
        }
        if uid == 0 {
            return Err(TransportError::NotFound(format!("{mailbox}:0 is not a valid UID")));
        }
        Ok(Self { mailbox, uid })
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mailbox, self.uid)
    }
}

/// Splits on the first colon. Malformed ids are `NotFound`: they cannot name
/// an existing message.
impl FromStr for MessageId {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mailbox, uid) = s
            .split_once(':')
            .ok_or_else(|| TransportError::NotFound(format!("malformed message id '{s}'")))?;
        // only the canonical decimal form; u32::from_str would also take "+5" and "05"
        let canonical = |u: &&str| {
            !u.is_empty() && u.bytes().all(|b| b.is_ascii_digit()) && (u.len() == 1 || !u.starts_with('0'))
        };
        let uid: u32 = Some(uid)
            .filter(canonical)
            .and_then(|u| u.parse().ok())
            .ok_or_else(|| TransportError::NotFound(format!("malformed message id '{s}'")))?;
        MessageId::new(mailbox, uid)
    }
}

pub fn encode(mailbox: &str, uid: u32) -> String {
    format!("{mailbox}:{uid}")
}

pub fn decode(id: &str) -> Result<(String, u32), TransportError> {
    let id: MessageId = id.parse()?;
    Ok((id.mailbox, id.uid))
}

pub const INBOX: &str = "INBOX";
pub const SENT: &str = "Sent";
pub const DRAFTS: &str = "Drafts";
pub const TRASH: &str = "Trash";
pub const SPAM: &str = "Spam";
pub const ARCHIVE: &str = "Archive";

/// Folders reported by `count()`.
pub const COUNTED_FOLDERS: [&str; 6] = [INBOX, SENT, DRAFTS, TRASH, SPAM, ARCHIVE];

/// Map a user-facing folder name to the server mailbox name.
///
/// Case-insensitive for the well-known folders; anything else is a custom
/// mailbox and passes through untouched.
pub fn normalize_folder(name: &str) -> String {
    match name.to_lowercase().as_str() {
        "inbox" => INBOX.to_string(),
        "sent" => SENT.to_string(),
        "drafts" => DRAFTS.to_string(),
        "trash" | "bin" => TRASH.to_string(),
        "spam" => SPAM.to_string(),
        "archive" => ARCHIVE.to_string(),
        _ => name.to_string(),
    }
}

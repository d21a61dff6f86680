//! In-memory IMAP server, SMTP sender and credential store for tests.
//!
//! The fake keeps the parts of IMAP the adapter relies on: per-connection
//! selection, UIDs scoped to a mailbox, `\Seen` set by `BODY[]` but not by
//! peeks, and `NONEXISTENT`/`TRYCREATE` on missing mailboxes. Any command can be
//! made to fail once with [`FakeServer::fail_once`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use lettre::address::Envelope;

use crate::credentials::CredentialStore;
use crate::error::TransportError;
use crate::imap::types::{FetchedMessage, FlagOp, MailboxEntry, SelectedMailbox};
use crate::imap::{ImapConnector, ImapTransport};
use crate::smtp::client::SmtpSender;

#[derive(Debug, Clone)]
struct StoredMessage {
    flags: Vec<String>,
    raw: Vec<u8>,
}

#[derive(Debug, Clone)]
struct FakeMailbox {
    uidvalidity: u32,
    next_uid: u32,
    messages: BTreeMap<u32, StoredMessage>,
}

impl FakeMailbox {
    fn new(uidvalidity: u32) -> Self {
        Self {
            uidvalidity,
            next_uid: 1,
            messages: BTreeMap::new(),
        }
    }

    fn insert(&mut self, uid: u32, flags: Vec<String>, raw: Vec<u8>) {
        self.messages.insert(uid, StoredMessage { flags, raw });
        self.next_uid = self.next_uid.max(uid + 1);
    }
}

#[derive(Debug)]
struct State {
    delimiter: String,
    mailboxes: BTreeMap<String, FakeMailbox>,
    connect_error: Option<TransportError>,
    fail_once: HashMap<&'static str, TransportError>,
    connects: usize,
    logouts: usize,
    commands: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                delimiter: "/".to_string(),
                mailboxes: BTreeMap::new(),
                connect_error: None,
                fail_once: HashMap::new(),
                connects: 0,
                logouts: 0,
                commands: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_delimiter(&self, delimiter: &str) {
        self.lock().delimiter = delimiter.to_string();
    }

    pub fn add_mailbox(&self, name: &str) {
        let mut state = self.lock();
        let uidvalidity = state.mailboxes.len() as u32 + 1;
        state
            .mailboxes
            .entry(name.to_string())
            .or_insert_with(|| FakeMailbox::new(uidvalidity));
    }

    pub fn has_mailbox(&self, name: &str) -> bool {
        self.lock().mailboxes.contains_key(name)
    }

    /// Store a message under the next free UID.
    pub fn add_message(&self, mailbox: &str, flags: &[&str], raw: Vec<u8>) -> u32 {
        self.add_mailbox(mailbox);
        let mut state = self.lock();
        let mbox = state.mailboxes.get_mut(mailbox).unwrap();
        let uid = mbox.next_uid;
        mbox.insert(uid, flags.iter().map(|f| f.to_string()).collect(), raw);
        uid
    }

    pub fn insert_message(&self, mailbox: &str, uid: u32, flags: &[&str], raw: Vec<u8>) {
        self.add_mailbox(mailbox);
        let mut state = self.lock();
        let mbox = state.mailboxes.get_mut(mailbox).unwrap();
        mbox.insert(uid, flags.iter().map(|f| f.to_string()).collect(), raw);
    }

    pub fn uids(&self, mailbox: &str) -> Vec<u32> {
        self.lock()
            .mailboxes
            .get(mailbox)
            .map(|m| m.messages.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn flags(&self, mailbox: &str, uid: u32) -> Option<Vec<String>> {
        self.lock()
            .mailboxes
            .get(mailbox)?
            .messages
            .get(&uid)
            .map(|m| m.flags.clone())
    }

    pub fn fail_connect(&self, error: TransportError) {
        self.lock().connect_error = Some(error);
    }

    pub fn allow_connect(&self) {
        self.lock().connect_error = None;
    }

    /// Make the next `command` (SELECT, SEARCH, FETCH, STORE, MOVE, APPEND,
    /// LIST, CREATE, RENAME, DELETE, STATUS) fail with `error`.
    pub fn fail_once(&self, command: &'static str, error: TransportError) {
        self.lock().fail_once.insert(command, error);
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn logouts(&self) -> usize {
        self.lock().logouts
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }
}

fn nonexistent(mailbox: &str) -> TransportError {
    TransportError::with_code("NONEXISTENT", format!("[NONEXISTENT] Mailbox doesn't exist: {mailbox}"))
}

fn trycreate(mailbox: &str) -> TransportError {
    TransportError::with_code("TRYCREATE", format!("[TRYCREATE] Mailbox doesn't exist: {mailbox}"))
}

/// Unfolded value of the first header called `name`.
fn header_value(raw: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(header_block(raw));
    let mut value: Option<String> = None;
    for line in text.split("\r\n") {
        if line.is_empty() {
            break;
        }
        if let Some(v) = value.as_mut() {
            if line.starts_with(' ') || line.starts_with('\t') {
                v.push_str(line);
                continue;
            }
            break;
        }
        if let Some((key, rest)) = line.split_once(':') {
            if key.eq_ignore_ascii_case(name) {
                value = Some(rest.trim().to_string());
            }
        }
    }
    value
}

fn header_block(raw: &[u8]) -> &[u8] {
    raw.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map_or(raw, |pos| &raw[..pos + 4])
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    inner.replace("\\\"", "\"").replace("\\\\", "\\")
}

fn matches(criteria: &str, raw: &[u8]) -> bool {
    if criteria == "ALL" {
        return true;
    }
    if let Some(needle) = criteria.strip_prefix("SUBJECT ") {
        let needle = unquote(needle).to_lowercase();
        return header_value(raw, "Subject").map_or(false, |s| s.to_lowercase().contains(&needle));
    }
    if let Some(rest) = criteria.strip_prefix("HEADER ") {
        let (name, needle) = rest.split_once(' ').unwrap();
        return header_value(raw, name).map_or(false, |v| v.contains(&unquote(needle)));
    }
    panic!("fake IMAP server does not understand SEARCH {criteria}");
}

pub struct FakeTransport {
    server: FakeServer,
    selected: Option<String>,
}

impl FakeTransport {
    /// Record the command and pop any injected failure for it.
    fn begin(&self, command: &'static str, detail: &str) -> Result<std::sync::MutexGuard<'_, State>, TransportError> {
        let mut state = self.server.lock();
        state.commands.push(format!("{command} {detail}").trim_end().to_string());
        match state.fail_once.remove(command) {
            Some(e) => Err(e),
            None => Ok(state),
        }
    }

    fn selected(&self) -> Result<String, TransportError> {
        self.selected
            .clone()
            .ok_or_else(|| TransportError::new("BAD No mailbox selected"))
    }

    fn fetch(&mut self, uids: &[u32], mark_seen: bool, headers_only: bool) -> Result<Vec<FetchedMessage>, TransportError> {
        let mailbox = self.selected()?;
        let mut state = self.begin("FETCH", &format!("{uids:?}"))?;
        let mbox = state
            .mailboxes
            .get_mut(&mailbox)
            .ok_or_else(|| nonexistent(&mailbox))?;

        let mut out = Vec::new();
        for uid in uids {
            let Some(message) = mbox.messages.get_mut(uid) else {
                continue;
            };
            if mark_seen && !message.flags.iter().any(|f| f == "\\Seen") {
                message.flags.push("\\Seen".to_string());
            }
            let raw = if headers_only {
                header_block(&message.raw).to_vec()
            } else {
                message.raw.clone()
            };
            out.push(FetchedMessage {
                uid: *uid,
                flags: message.flags.clone(),
                internal_date: None,
                raw,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl ImapTransport for FakeTransport {
    async fn select(&mut self, mailbox: &str) -> Result<SelectedMailbox, TransportError> {
        self.selected = None;
        let info = {
            let state = self.begin("SELECT", mailbox)?;
            let mbox = state.mailboxes.get(mailbox).ok_or_else(|| nonexistent(mailbox))?;
            SelectedMailbox {
                exists: mbox.messages.len() as u32,
                uidvalidity: mbox.uidvalidity,
                uidnext: mbox.next_uid,
            }
        };
        self.selected = Some(mailbox.to_string());
        Ok(info)
    }

    async fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>, TransportError> {
        let mailbox = self.selected()?;
        let state = self.begin("SEARCH", criteria)?;
        let mbox = state.mailboxes.get(&mailbox).ok_or_else(|| nonexistent(&mailbox))?;
        Ok(mbox
            .messages
            .iter()
            .filter(|(_, m)| matches(criteria, &m.raw))
            .map(|(uid, _)| *uid)
            .collect())
    }

    async fn fetch_headers(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, TransportError> {
        self.fetch(uids, false, true)
    }

    async fn fetch_message(&mut self, uid: u32) -> Result<Option<FetchedMessage>, TransportError> {
        Ok(self.fetch(&[uid], true, false)?.pop())
    }

    async fn peek_message(&mut self, uid: u32) -> Result<Option<FetchedMessage>, TransportError> {
        Ok(self.fetch(&[uid], false, false)?.pop())
    }

    async fn store_flags(&mut self, uid: u32, op: FlagOp, flags: &[&str]) -> Result<(), TransportError> {
        let mailbox = self.selected()?;
        let mut state = self.begin("STORE", &format!("{uid} {} {flags:?}", op.as_imap()))?;
        let mbox = state
            .mailboxes
            .get_mut(&mailbox)
            .ok_or_else(|| nonexistent(&mailbox))?;
        if let Some(message) = mbox.messages.get_mut(&uid) {
            for flag in flags {
                message.flags.retain(|f| f != flag);
                if op == FlagOp::Add {
                    message.flags.push(flag.to_string());
                }
            }
        }
        Ok(())
    }

    async fn move_message(&mut self, uid: u32, destination: &str) -> Result<(), TransportError> {
        let mailbox = self.selected()?;
        let mut state = self.begin("MOVE", &format!("{uid} {destination}"))?;
        if !state.mailboxes.contains_key(destination) {
            return Err(trycreate(destination));
        }
        let message = state
            .mailboxes
            .get_mut(&mailbox)
            .and_then(|m| m.messages.remove(&uid))
            .ok_or_else(|| TransportError::new(format!("NO No such message {uid}")))?;
        if let Some(dest) = state.mailboxes.get_mut(destination) {
            let new_uid = dest.next_uid;
            dest.insert(new_uid, message.flags, message.raw);
        }
        Ok(())
    }

    async fn append(&mut self, mailbox: &str, flags: &[&str], raw: &[u8]) -> Result<(), TransportError> {
        let mut state = self.begin("APPEND", mailbox)?;
        let mbox = state
            .mailboxes
            .get_mut(mailbox)
            .ok_or_else(|| trycreate(mailbox))?;
        let uid = mbox.next_uid;
        mbox.insert(uid, flags.iter().map(|f| f.to_string()).collect(), raw.to_vec());
        Ok(())
    }

    async fn list_mailboxes(&mut self) -> Result<Vec<MailboxEntry>, TransportError> {
        let state = self.begin("LIST", "")?;
        Ok(state
            .mailboxes
            .keys()
            .map(|path| MailboxEntry {
                path: path.clone(),
                delimiter: Some(state.delimiter.clone()),
            })
            .collect())
    }

    async fn hierarchy_delimiter(&mut self) -> Result<Option<String>, TransportError> {
        Ok(Some(self.server.lock().delimiter.clone()))
    }

    async fn create_mailbox(&mut self, name: &str) -> Result<(), TransportError> {
        let mut state = self.begin("CREATE", name)?;
        if state.mailboxes.contains_key(name) {
            return Err(TransportError::with_code("ALREADYEXISTS", "[ALREADYEXISTS] Mailbox exists"));
        }
        let uidvalidity = state.mailboxes.len() as u32 + 1;
        state.mailboxes.insert(name.to_string(), FakeMailbox::new(uidvalidity));
        Ok(())
    }

    async fn rename_mailbox(&mut self, from: &str, to: &str) -> Result<(), TransportError> {
        let mut state = self.begin("RENAME", &format!("{from} {to}"))?;
        let mbox = state.mailboxes.remove(from).ok_or_else(|| nonexistent(from))?;
        state.mailboxes.insert(to.to_string(), mbox);
        Ok(())
    }

    async fn delete_mailbox(&mut self, name: &str) -> Result<(), TransportError> {
        let mut state = self.begin("DELETE", name)?;
        state.mailboxes.remove(name).ok_or_else(|| nonexistent(name))?;
        Ok(())
    }

    async fn message_count(&mut self, mailbox: &str) -> Result<u32, TransportError> {
        let state = self.begin("STATUS", mailbox)?;
        state
            .mailboxes
            .get(mailbox)
            .map(|m| m.messages.len() as u32)
            .ok_or_else(|| nonexistent(mailbox))
    }

    async fn logout(&mut self) -> Result<(), TransportError> {
        self.server.lock().logouts += 1;
        Ok(())
    }
}

pub struct FakeConnector {
    server: FakeServer,
}

impl FakeConnector {
    pub fn new(server: FakeServer) -> Self {
        Self { server }
    }
}

#[async_trait]
impl ImapConnector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&self) -> Result<FakeTransport, TransportError> {
        let mut state = self.server.lock();
        if let Some(e) = state.connect_error.clone() {
            return Err(e);
        }
        state.connects += 1;
        Ok(FakeTransport {
            server: self.server.clone(),
            selected: None,
        })
    }
}

/// Keeps every message handed to it.
#[derive(Debug, Clone, Default)]
pub struct RecordingSmtp {
    sent: Arc<Mutex<Vec<(Envelope, Vec<u8>)>>>,
    failure: Arc<Mutex<Option<TransportError>>>,
}

impl RecordingSmtp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: TransportError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn sent(&self) -> Vec<(Envelope, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmtpSender for RecordingSmtp {
    async fn send(&self, envelope: &Envelope, raw: &[u8]) -> Result<(), TransportError> {
        if let Some(e) = self.failure.lock().unwrap().clone() {
            return Err(e);
        }
        self.sent.lock().unwrap().push((envelope.clone(), raw.to_vec()));
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    invalidated: Arc<Mutex<Vec<String>>>,
}

impl RecordingStore {
    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialStore for RecordingStore {
    async fn invalidate(&self, email: &str) -> Result<(), TransportError> {
        self.invalidated.lock().unwrap().push(email.to_string());
        Ok(())
    }
}

/// A small plain-text message.
pub fn message(subject: &str) -> Vec<u8> {
    format!(
        "From: Ada <ada@example.com>\r\n\
         To: me@example.com\r\n\
         Subject: {subject}\r\n\
         Message-ID: <{}@example.com>\r\n\
         Date: Mon, 16 Feb 2026 12:00:00 +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Body of {subject}\r\n",
        subject.replace(' ', ".")
    )
    .into_bytes()
}

/// A message carrying one attachment.
pub fn message_with_attachment(subject: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    format!(
        "From: Ada <ada@example.com>\r\n\
         To: me@example.com\r\n\
         Subject: {subject}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
         \r\n\
         --XX\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         See attached.\r\n\
         --XX\r\n\
         Content-Type: application/octet-stream; name=\"{filename}\"\r\n\
         Content-Disposition: attachment; filename=\"{filename}\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         {}\r\n\
         --XX--\r\n",
        base64::engine::general_purpose::STANDARD.encode(content)
    )
    .into_bytes()
}

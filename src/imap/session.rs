//! Connection state for one account's IMAP session.
//!
//! The selected mailbox is session-global on the server, so it is tracked here
//! explicitly: a SELECT always replaces the previous selection, and
//! mailbox-scoped commands go through [`Session::in_mailbox`], which refuses to
//! run against a different selection.

use serde::Serialize;

use super::types::SelectedMailbox;
use super::{ImapConnector, ImapTransport};
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Errored,
}

pub struct Session<C: ImapConnector> {
    connector: C,
    state: ConnectionState,
    transport: Option<C::Transport>,
    selected: Option<String>,
    delimiter: Option<String>,
}

impl<C: ImapConnector> Session<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            state: ConnectionState::Disconnected,
            transport: None,
            selected: None,
            delimiter: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Bring the session to `Ready`. Returns immediately if it already is.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.state == ConnectionState::Ready && self.transport.is_some() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        self.transport = None;
        self.selected = None;

        match self.connector.connect().await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state = ConnectionState::Ready;
                log::debug!("IMAP session ready");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Errored;
                Err(e)
            }
        }
    }

    /// SELECT `mailbox`, replacing whatever was selected before.
    pub async fn select_mailbox(&mut self, mailbox: &str) -> Result<SelectedMailbox, TransportError> {
        // A failed SELECT leaves the server with nothing selected.
        self.selected = None;
        let result = self.transport()?.select(mailbox).await;
        match result {
            Ok(info) => {
                log::debug!(
                    "IMAP SELECT {mailbox}: exists={}, uidvalidity={}, uidnext={}",
                    info.exists,
                    info.uidvalidity,
                    info.uidnext
                );
                self.selected = Some(mailbox.to_string());
                Ok(info)
            }
            Err(e) => Err(e.context(format!("SELECT {mailbox}"))),
        }
    }

    /// SELECT `mailbox` unless it is already selected.
    pub async fn ensure_selected(&mut self, mailbox: &str) -> Result<(), TransportError> {
        if self.selected.as_deref() == Some(mailbox) {
            return Ok(());
        }
        self.select_mailbox(mailbox).await.map(|_| ())
    }

    /// The live transport, for commands that do not depend on the selection.
    pub fn transport(&mut self) -> Result<&mut C::Transport, TransportError> {
        match (self.state, self.transport.as_mut()) {
            (ConnectionState::Ready, Some(t)) => Ok(t),
            (state, _) => Err(TransportError::new(format!(
                "IMAP session is not ready (state: {state:?})"
            ))),
        }
    }

    /// The live transport, provided `mailbox` is the current selection.
    pub fn in_mailbox(&mut self, mailbox: &str) -> Result<&mut C::Transport, TransportError> {
        if self.selected.as_deref() != Some(mailbox) {
            return Err(TransportError::new(format!(
                "mailbox {mailbox} is not selected (selected: {:?})",
                self.selected
            )));
        }
        self.transport()
    }

    /// Hierarchy delimiter, asked of the server once per session.
    pub async fn delimiter(&mut self) -> Result<String, TransportError> {
        if let Some(d) = &self.delimiter {
            return Ok(d.clone());
        }
        let d = self
            .transport()?
            .hierarchy_delimiter()
            .await?
            .unwrap_or_else(|| "/".to_string());
        self.delimiter = Some(d.clone());
        Ok(d)
    }

    /// Drop the connection without talking to the server.
    pub fn discard(&mut self) {
        self.transport = None;
        self.selected = None;
        self.delimiter = None;
        self.state = ConnectionState::Errored;
    }

    /// LOGOUT and return to `Disconnected`.
    pub async fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.logout().await {
                log::debug!("IMAP LOGOUT failed: {e}");
            }
        }
        self.selected = None;
        self.delimiter = None;
        self.state = ConnectionState::Disconnected;
    }
}

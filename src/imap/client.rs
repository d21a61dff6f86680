use std::time::Duration;

use async_imap::{types::Flag, Authenticator, Client, Session};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;

use super::types::*;
use super::{ImapConnector, ImapTransport};
use crate::config::{AuthMethod, Security};
use crate::error::TransportError;

// ---------- XOAUTH2 authenticator ----------

struct XOAuth2 {
    response: Vec<u8>,
}

impl XOAuth2 {
    fn new(user: &str, access_token: &str) -> Self {
        // XOAUTH2 format: "user=" {user} "\x01auth=Bearer " {token} "\x01\x01"
        let s = format!("user={}\x01auth=Bearer {}\x01\x01", user, access_token);
        Self {
            response: s.into_bytes(),
        }
    }
}

impl Authenticator for XOAuth2 {
    type Response = Vec<u8>;
    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        // A second challenge means the server rejected the token; answering
        // it with nothing lets the server close the exchange with a NO.
        std::mem::take(&mut self.response)
    }
}

// ---------- Stream wrapper ----------

/// Wrapper to unify TLS / plain streams so Session can be generic.
pub enum ImapStream {
    Tls(TlsStream<TcpStream>),
    Plain(TcpStream),
}

impl tokio::io::AsyncRead for ImapStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ImapStream::Tls(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            ImapStream::Plain(s) => std::pin::Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for ImapStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ImapStream::Tls(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            ImapStream::Plain(s) => std::pin::Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ImapStream::Tls(s) => std::pin::Pin::new(s).poll_flush(cx),
            ImapStream::Plain(s) => std::pin::Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ImapStream::Tls(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            ImapStream::Plain(s) => std::pin::Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for ImapStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImapStream::Tls(_) => write!(f, "ImapStream::Tls"),
            ImapStream::Plain(_) => write!(f, "ImapStream::Plain"),
        }
    }
}

type ImapSession = Session<ImapStream>;

// ---------- Connector ----------

/// Opens real IMAP sessions for one account.
#[derive(Debug, Clone)]
pub struct AsyncImapConnector {
    config: ImapConfig,
}

impl AsyncImapConnector {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ImapConnector for AsyncImapConnector {
    type Transport = AsyncImapTransport;

    async fn connect(&self) -> Result<AsyncImapTransport, TransportError> {
        let config = &self.config;
        let limit = Duration::from_secs(config.auth_timeout_secs);

        log::info!(
            "IMAP connecting to {}:{} ({:?}) as {}",
            config.host,
            config.port,
            config.security,
            config.username
        );

        let session = tokio::time::timeout(limit, connect(config))
            .await
            .map_err(|_| {
                TransportError::with_code(
                    "ETIMEDOUT",
                    format!(
                        "IMAP connect/authentication to {} timed out after {}s",
                        config.host, config.auth_timeout_secs
                    ),
                )
            })??;

        Ok(AsyncImapTransport { session, uidplus: None })
    }
}

/// Establish an IMAP connection and authenticate.
///
/// Supports TLS (direct), STARTTLS (upgrade), and plain connections.
async fn connect(config: &ImapConfig) -> Result<ImapSession, TransportError> {
    if config.security == Security::StartTls {
        // STARTTLS consumes the greeting during the upgrade, so it gets its
        // own path.
        return connect_starttls(config).await;
    }

    let stream = connect_stream(config).await?;
    let client = Client::new(stream);
    authenticate(client, config).await
}

fn tls_connector(config: &ImapConfig) -> Result<tokio_native_tls::TlsConnector, TransportError> {
    let native_connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .danger_accept_invalid_hostnames(config.accept_invalid_certs)
        .build()
        .map_err(|e| TransportError::with_code("ETLS", format!("Failed to create TLS connector: {e}")))?;
    Ok(tokio_native_tls::TlsConnector::from(native_connector))
}

async fn tcp_connect(config: &ImapConfig) -> Result<TcpStream, TransportError> {
    TcpStream::connect((config.host.as_str(), config.port))
        .await
        .map_err(|e| {
            TransportError::from(e).context(format!("TCP connect to {}:{} failed", config.host, config.port))
        })
}

/// Establish TCP + TLS or plain stream for the "tls" and "none" modes.
async fn connect_stream(config: &ImapConfig) -> Result<ImapStream, TransportError> {
    match config.security {
        Security::Tls => {
            let tls_connector = tls_connector(config)?;
            let tcp = tcp_connect(config).await?;
            let tls = tls_connector.connect(&config.host, tcp).await.map_err(|e| {
                TransportError::with_code("ETLS", format!("TLS handshake with {} failed: {e}", config.host))
            })?;
            Ok(ImapStream::Tls(tls))
        }
        Security::None => Ok(ImapStream::Plain(tcp_connect(config).await?)),
        Security::StartTls => Err(TransportError::new(
            "STARTTLS streams are opened by connect_starttls",
        )),
    }
}

/// Connect plain, issue STARTTLS, upgrade the TCP stream, then authenticate
/// on a fresh Client over the TLS stream.
async fn connect_starttls(config: &ImapConfig) -> Result<ImapSession, TransportError> {
    let mut tcp = tcp_connect(config).await?;

    // Read the server greeting
    let mut buf = vec![0u8; 4096];
    let n = tcp
        .read(&mut buf)
        .await
        .map_err(|e| TransportError::from(e).context("Failed to read server greeting"))?;
    let greeting = String::from_utf8_lossy(&buf[..n]);
    if !greeting.contains("OK") {
        return Err(TransportError::new(format!("Unexpected server greeting: {greeting}")));
    }

    tcp.write_all(b"a001 STARTTLS\r\n")
        .await
        .map_err(|e| TransportError::from(e).context("Failed to send STARTTLS"))?;

    let n = tcp
        .read(&mut buf)
        .await
        .map_err(|e| TransportError::from(e).context("Failed to read STARTTLS response"))?;
    let response = String::from_utf8_lossy(&buf[..n]);
    if !response.contains("OK") {
        return Err(TransportError::with_code(
            "ETLS",
            format!("STARTTLS rejected: {}", response.trim()),
        ));
    }

    let tls = tls_connector(config)?
        .connect(&config.host, tcp)
        .await
        .map_err(|e| TransportError::with_code("ETLS", format!("TLS upgrade after STARTTLS failed: {e}")))?;

    let client = Client::new(ImapStream::Tls(tls));
    authenticate(client, config).await
}

/// A NO/BAD answer to LOGIN or AUTHENTICATE is a credential problem even
/// when the server attaches no response code.
fn auth_failure(e: async_imap::error::Error, what: &str) -> TransportError {
    let rejected = matches!(
        e,
        async_imap::error::Error::No(_) | async_imap::error::Error::Bad(_)
    );
    match TransportError::from(e) {
        TransportError::Protocol { code: None, message } if rejected => {
            TransportError::with_code("AUTHENTICATIONFAILED", format!("{what}: {message}"))
        }
        other => other.context(what),
    }
}

/// Authenticate with the IMAP server (LOGIN or XOAUTH2).
async fn authenticate(
    client: Client<ImapStream>,
    config: &ImapConfig,
) -> Result<ImapSession, TransportError> {
    match config.auth_method {
        AuthMethod::OAuth2 => {
            let auth = XOAuth2::new(&config.username, &config.password);
            client
                .authenticate("XOAUTH2", auth)
                .await
                .map_err(|(e, _)| auth_failure(e, "XOAUTH2 authentication failed"))
        }
        AuthMethod::Password => client
            .login(&config.username, &config.password)
            .await
            .map_err(|(e, _)| auth_failure(e, "Login failed")),
    }
}

// ---------- Transport ----------

/// One authenticated async-imap session.
pub struct AsyncImapTransport {
    session: ImapSession,
    /// UIDPLUS support, asked once on first need.
    uidplus: Option<bool>,
}

fn wire_name(mailbox: &str) -> String {
    utf7_imap::encode_utf7_imap(mailbox.to_string())
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn flag_name(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Custom(s) => s.to_string(),
        other => format!("\\{other:?}"),
    }
}

/// UID set to expunge after a COPY fallback. A plain EXPUNGE would also purge
/// every other `\Deleted` message in the mailbox, so without UIDPLUS nothing
/// is expunged and the source copy stays flagged.
fn fallback_expunge_set(uid: u32, uidplus: bool) -> Option<String> {
    uidplus.then(|| uid.to_string())
}

impl AsyncImapTransport {
    async fn has_uidplus(&mut self) -> bool {
        if let Some(known) = self.uidplus {
            return known;
        }
        let known = match self.session.capabilities().await {
            Ok(caps) => caps.has_str("UIDPLUS"),
            Err(e) => {
                log::debug!("CAPABILITY failed ({e}), assuming no UIDPLUS");
                false
            }
        };
        self.uidplus = Some(known);
        known
    }

    async fn uid_fetch(
        &mut self,
        uids: &[u32],
        query: &str,
        header_only: bool,
    ) -> Result<Vec<FetchedMessage>, TransportError> {
        let set = uid_set(uids);
        let fetches = self
            .session
            .uid_fetch(&set, query)
            .await
            .map_err(|e| TransportError::from(e).context(format!("UID FETCH {set}")))?;

        let raw_fetches: Vec<_> = fetches.collect::<Vec<_>>().await;
        let mut messages = Vec::with_capacity(raw_fetches.len());
        for r in raw_fetches {
            let fetch = match r {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("IMAP fetch stream error: {e}");
                    continue;
                }
            };
            let Some(uid) = fetch.uid else {
                log::warn!("IMAP FETCH: response missing UID");
                continue;
            };
            let raw = if header_only { fetch.header() } else { fetch.body() };
            let Some(raw) = raw else {
                log::warn!("IMAP FETCH: UID {uid} has no content");
                continue;
            };
            messages.push(FetchedMessage {
                uid,
                flags: fetch.flags().map(|f| flag_name(&f)).collect(),
                internal_date: fetch.internal_date().map(|dt| dt.timestamp()),
                raw: raw.to_vec(),
            });
        }

        log::debug!("IMAP FETCH {set}: {} message(s)", messages.len());
        Ok(messages)
    }
}

#[async_trait]
impl ImapTransport for AsyncImapTransport {
    async fn select(&mut self, mailbox: &str) -> Result<SelectedMailbox, TransportError> {
        let info = self.session.select(wire_name(mailbox)).await?;
        Ok(SelectedMailbox {
            exists: info.exists,
            uidvalidity: info.uid_validity.unwrap_or(0),
            uidnext: info.uid_next.unwrap_or(0),
        })
    }

    async fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>, TransportError> {
        let uids = self
            .session
            .uid_search(criteria)
            .await
            .map_err(|e| TransportError::from(e).context("UID SEARCH"))?;
        Ok(uids.into_iter().collect())
    }

    async fn fetch_headers(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, TransportError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        self.uid_fetch(uids, "(UID FLAGS INTERNALDATE BODY.PEEK[HEADER])", true)
            .await
    }

    async fn fetch_message(&mut self, uid: u32) -> Result<Option<FetchedMessage>, TransportError> {
        Ok(self
            .uid_fetch(&[uid], "(UID FLAGS INTERNALDATE BODY[])", false)
            .await?
            .into_iter()
            .next())
    }

    async fn peek_message(&mut self, uid: u32) -> Result<Option<FetchedMessage>, TransportError> {
        Ok(self
            .uid_fetch(&[uid], "(UID FLAGS INTERNALDATE BODY.PEEK[])", false)
            .await?
            .into_iter()
            .next())
    }

    async fn store_flags(&mut self, uid: u32, op: FlagOp, flags: &[&str]) -> Result<(), TransportError> {
        let query = format!("{} ({})", op.as_imap(), flags.join(" "));
        let stream = self
            .session
            .uid_store(uid.to_string(), &query)
            .await
            .map_err(|e| TransportError::from(e).context(format!("UID STORE {uid} {query}")))?;

        // Consume the response stream
        let _: Vec<_> = stream.collect().await;
        Ok(())
    }

    /// Tries MOVE first; falls back to COPY + flag Deleted + UID EXPUNGE.
    async fn move_message(&mut self, uid: u32, destination: &str) -> Result<(), TransportError> {
        let uid_str = uid.to_string();
        let dest = wire_name(destination);

        if let Err(e) = self.session.uid_mv(&uid_str, &dest).await {
            log::debug!("UID MOVE {uid} -> {destination} failed ({e}), trying COPY");

            self.session
                .uid_copy(&uid_str, &dest)
                .await
                .map_err(|e| TransportError::from(e).context(format!("UID COPY {uid} {destination}")))?;

            let store_stream = self
                .session
                .uid_store(&uid_str, "+FLAGS (\\Deleted)")
                .await
                .map_err(|e| TransportError::from(e).context("UID STORE +Deleted"))?;
            let _: Vec<_> = store_stream.collect().await;

            let uidplus = self.has_uidplus().await;
            match fallback_expunge_set(uid, uidplus) {
                Some(set) => {
                    let expunge_stream = self
                        .session
                        .uid_expunge(&set)
                        .await
                        .map_err(|e| TransportError::from(e).context(format!("UID EXPUNGE {set}")))?;
                    let _: Vec<_> = expunge_stream.collect().await;
                }
                None => log::warn!(
                    "No UIDPLUS; UID {uid} stays flagged \\Deleted after COPY to {destination}"
                ),
            }
        }

        Ok(())
    }

    async fn append(&mut self, mailbox: &str, flags: &[&str], raw: &[u8]) -> Result<(), TransportError> {
        let flags = (!flags.is_empty()).then(|| format!("({})", flags.join(" ")));
        self.session
            .append(wire_name(mailbox), flags.as_deref(), None, raw)
            .await
            .map_err(|e| TransportError::from(e).context(format!("APPEND {mailbox}")))
    }

    async fn list_mailboxes(&mut self) -> Result<Vec<MailboxEntry>, TransportError> {
        let names = self
            .session
            .list(Some(""), Some("*"))
            .await
            .map_err(|e| TransportError::from(e).context("LIST"))?;

        let names: Vec<_> = names
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .filter_map(|r| r.ok())
            .collect();

        Ok(names
            .iter()
            .map(|name| MailboxEntry {
                // Decode modified UTF-7 (RFC 3501 §5.1.3) to UTF-8
                path: utf7_imap::decode_utf7_imap(name.name().to_string()),
                delimiter: name.delimiter().map(str::to_string),
            })
            .collect())
    }

    async fn hierarchy_delimiter(&mut self) -> Result<Option<String>, TransportError> {
        // LIST "" "" answers with the root and its hierarchy delimiter
        let names = self
            .session
            .list(Some(""), Some(""))
            .await
            .map_err(|e| TransportError::from(e).context("LIST \"\" \"\""))?;
        let names: Vec<_> = names.collect::<Vec<_>>().await;
        Ok(names
            .into_iter()
            .filter_map(|r| r.ok())
            .find_map(|n| n.delimiter().map(str::to_string)))
    }

    async fn create_mailbox(&mut self, name: &str) -> Result<(), TransportError> {
        self.session
            .create(wire_name(name))
            .await
            .map_err(|e| TransportError::from(e).context(format!("CREATE {name}")))
    }

    async fn rename_mailbox(&mut self, from: &str, to: &str) -> Result<(), TransportError> {
        self.session
            .rename(wire_name(from), wire_name(to))
            .await
            .map_err(|e| TransportError::from(e).context(format!("RENAME {from} {to}")))
    }

    async fn delete_mailbox(&mut self, name: &str) -> Result<(), TransportError> {
        self.session
            .delete(wire_name(name))
            .await
            .map_err(|e| TransportError::from(e).context(format!("DELETE {name}")))
    }

    async fn message_count(&mut self, mailbox: &str) -> Result<u32, TransportError> {
        let status = self
            .session
            .status(wire_name(mailbox), "(MESSAGES)")
            .await
            .map_err(|e| TransportError::from(e).context(format!("STATUS {mailbox}")))?;
        Ok(status.exists)
    }

    async fn logout(&mut self) -> Result<(), TransportError> {
        self.session
            .logout()
            .await
            .map_err(|e| TransportError::from(e).context("LOGOUT"))
    }
}

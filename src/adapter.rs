//! Mailbox operations for one account.
//!
//! Every public method takes the session lock for its whole run, so commands
//! from different calls never interleave on the connection and nobody can
//! change the selected mailbox under a running operation. Every failure leaves
//! through [`MailAdapter::fail`] as a [`ClassifiedError`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::AdapterConfig;
use crate::credentials::{CredentialStore, NoopCredentialStore};
use crate::error::{ClassifiedError, ErrorClassifier, TransportError};
use crate::ids::{self, MessageId, DRAFTS, SENT, TRASH};
use crate::imap::client::AsyncImapConnector;
use crate::imap::parse::{self, Depth};
use crate::imap::session::{ConnectionState, Session};
use crate::imap::types::{FetchedMessage, FlagOp};
use crate::imap::{ImapConnector, ImapTransport};
use crate::labels;
use crate::pagination::{self, PageToken, DEFAULT_PAGE_SIZE};
use crate::smtp::client::{LettreSmtpSender, SmtpSender};
use crate::smtp::compose::{compose, Purpose};
use crate::types::{
    CreatedDraft, DraftView, EmailAlias, Label, LabelChanges, LabelCount, ListParams, ListResult,
    OutgoingMessage, Recipient, SentMessage, ThreadSummary, ThreadView, UserInfo,
};

pub struct MailAdapter<C: ImapConnector, S: SmtpSender> {
    email: String,
    display_name: Option<String>,
    session: Mutex<Session<C>>,
    smtp: S,
    store: Arc<dyn CredentialStore>,
    classifier: ErrorClassifier,
}

impl MailAdapter<AsyncImapConnector, LettreSmtpSender> {
    /// Adapter over real IMAP/SMTP servers. Nothing connects until the first
    /// operation.
    pub fn from_config(config: &AdapterConfig, store: Arc<dyn CredentialStore>) -> Self {
        Self::new(
            config,
            AsyncImapConnector::new(config.imap_config()),
            LettreSmtpSender::new(config.smtp_config()),
            store,
        )
    }

    pub fn without_store(config: &AdapterConfig) -> Self {
        Self::from_config(config, Arc::new(NoopCredentialStore))
    }
}

impl<C: ImapConnector, S: SmtpSender> MailAdapter<C, S> {
    pub fn new(config: &AdapterConfig, connector: C, smtp: S, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            email: config.email.clone(),
            display_name: config.display_name.clone(),
            session: Mutex::new(Session::new(connector)),
            smtp,
            store,
            classifier: config.classifier(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub async fn state(&self) -> ConnectionState {
        self.session.lock().await.state()
    }

    /// Log out and drop the IMAP connection. The next operation reconnects.
    pub async fn close(&self) {
        self.session.lock().await.teardown().await;
    }

    fn account(&self) -> Recipient {
        Recipient {
            email: self.email.clone(),
            name: self.display_name.clone(),
        }
    }

    async fn finish<T>(
        &self,
        session: &mut Session<C>,
        operation: &str,
        context: Value,
        result: Result<T, TransportError>,
    ) -> Result<T, ClassifiedError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(session, operation, &e, context).await),
        }
    }

    /// Classify `error`. Fatal failures drop the session and the stored
    /// credential; a lost connection drops only the session.
    async fn fail(
        &self,
        session: &mut Session<C>,
        operation: &str,
        error: &TransportError,
        context: Value,
    ) -> ClassifiedError {
        let classified = self.classifier.classify(operation, error, context);
        if classified.fatal {
            log::error!("{classified}; discarding session for {}", self.email);
            session.discard();
            if let Err(e) = self.store.invalidate(&self.email).await {
                log::warn!("Failed to invalidate stored credentials for {}: {e}", self.email);
            }
        } else if error.is_connection_loss() {
            log::warn!("{classified}; connection lost, reconnecting on next call");
            session.discard();
        } else {
            log::warn!("{classified}");
        }
        classified
    }

    // ---------- messages ----------

    /// Fetch one message in full. Marks it seen.
    pub async fn get(&self, id: &str) -> Result<ThreadView, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result = get_message(&mut session, id).await;
        self.finish(&mut session, "get", json!({ "id": id }), result).await
    }

    /// One page of a folder, newest first, header data only.
    pub async fn list(&self, params: &ListParams) -> Result<ListResult, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result: Result<ListResult, TransportError> = async {
            let mailbox = server_path(&mut session, &ids::normalize_folder(&params.folder)).await?;
            list_mailbox(&mut session, &mailbox, params).await
        }
        .await;
        let context = json!({ "folder": params.folder, "query": params.query });
        self.finish(&mut session, "list", context, result).await
    }

    /// Send a message and file a copy in Sent.
    pub async fn create(&self, message: &OutgoingMessage) -> Result<SentMessage, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result = self.send(&mut session, message).await;
        let context = json!({ "subject": message.subject });
        self.finish(&mut session, "create", context, result).await
    }

    /// Move to Trash, or flag `\Deleted` where that is not possible.
    pub async fn delete(&self, id: &str) -> Result<(), ClassifiedError> {
        let mut session = self.session.lock().await;
        let result: Result<(), TransportError> = async {
            let id: MessageId = id.parse()?;
            session.connect().await?;
            session.select_mailbox(id.mailbox()).await?;
            delete_selected(&mut session, &id).await
        }
        .await;
        self.finish(&mut session, "delete", json!({ "id": id }), result).await
    }

    /// Labels are mailboxes, so adding one moves the message. Only the first
    /// entry of `add_labels` can be honored; removal has nothing to map onto.
    pub async fn modify_labels(&self, ids: &[String], changes: &LabelChanges) -> Result<(), ClassifiedError> {
        let mut session = self.session.lock().await;
        let result = modify_labels(&mut session, ids, changes).await;
        let context = json!({
            "ids": ids,
            "addLabels": changes.add_labels,
            "removeLabels": changes.remove_labels,
        });
        self.finish(&mut session, "modifyLabels", context, result).await
    }

    pub async fn mark_as_read(&self, ids: &[String]) -> Result<(), ClassifiedError> {
        let mut session = self.session.lock().await;
        let result = set_seen(&mut session, ids, FlagOp::Add).await;
        self.finish(&mut session, "markAsRead", json!({ "ids": ids }), result).await
    }

    pub async fn mark_as_unread(&self, ids: &[String]) -> Result<(), ClassifiedError> {
        let mut session = self.session.lock().await;
        let result = set_seen(&mut session, ids, FlagOp::Remove).await;
        self.finish(&mut session, "markAsUnread", json!({ "ids": ids }), result).await
    }

    // ---------- drafts ----------

    /// Store a draft in Drafts and return its `Drafts:<uid>` id.
    pub async fn create_draft(&self, data: &OutgoingMessage) -> Result<CreatedDraft, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result = self.save_draft(&mut session, data).await;
        let context = json!({ "subject": data.subject });
        self.finish(&mut session, "createDraft", context, result).await
    }

    pub async fn get_draft(&self, id: &str) -> Result<DraftView, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result = get_draft(&mut session, id).await;
        self.finish(&mut session, "getDraft", json!({ "id": id }), result).await
    }

    pub async fn list_drafts(&self, params: &ListParams) -> Result<ListResult, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result = list_mailbox(&mut session, DRAFTS, params).await;
        let context = json!({ "folder": DRAFTS, "query": params.query });
        self.finish(&mut session, "listDrafts", context, result).await
    }

    /// Send `message`, then remove the stored draft `id`.
    pub async fn send_draft(&self, id: &str, message: &OutgoingMessage) -> Result<SentMessage, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result = self.send_and_discard_draft(&mut session, id, message).await;
        self.finish(&mut session, "sendDraft", json!({ "id": id }), result).await
    }

    // ---------- folders & labels ----------

    /// Message totals for the well-known folders. A folder that cannot be
    /// read counts as zero.
    pub async fn count(&self) -> Result<Vec<LabelCount>, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result = count_folders(&mut session).await;
        self.finish(&mut session, "count", json!({}), result).await
    }

    pub async fn get_user_labels(&self) -> Result<Vec<Label>, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result = user_labels(&mut session).await;
        self.finish(&mut session, "getUserLabels", json!({}), result).await
    }

    pub async fn get_label(&self, id: &str) -> Result<Label, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result: Result<Label, TransportError> = async {
            user_labels(&mut session)
                .await?
                .into_iter()
                .find(|label| label.id == id)
                .ok_or_else(|| TransportError::NotFound(format!("label {id}")))
        }
        .await;
        self.finish(&mut session, "getLabel", json!({ "id": id }), result).await
    }

    pub async fn create_label(&self, name: &str) -> Result<Label, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result: Result<Label, TransportError> = async {
            let name = label_name(name)?;
            let path = server_path(&mut session, name).await?;
            session.transport()?.create_mailbox(&path).await?;
            log::info!("Created mailbox {path}");
            Ok(Label::folder(name, name))
        }
        .await;
        self.finish(&mut session, "createLabel", json!({ "name": name }), result).await
    }

    /// Rename a label. Renaming to the current name sends nothing.
    pub async fn update_label(&self, id: &str, name: &str) -> Result<Label, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result: Result<Label, TransportError> = async {
            let name = label_name(name)?;
            if name == id {
                log::debug!("Label {id} unchanged, skipping RENAME");
                return Ok(Label::folder(id, id));
            }
            let from = server_path(&mut session, id).await?;
            let to = server_path(&mut session, name).await?;
            session.transport()?.rename_mailbox(&from, &to).await?;
            log::info!("Renamed mailbox {from} to {to}");
            Ok(Label::folder(name, name))
        }
        .await;
        let context = json!({ "id": id, "name": name });
        self.finish(&mut session, "updateLabel", context, result).await
    }

    pub async fn delete_label(&self, id: &str) -> Result<(), ClassifiedError> {
        let mut session = self.session.lock().await;
        let result: Result<(), TransportError> = async {
            let path = server_path(&mut session, label_name(id)?).await?;
            session.transport()?.delete_mailbox(&path).await?;
            log::info!("Deleted mailbox {path}");
            Ok(())
        }
        .await;
        self.finish(&mut session, "deleteLabel", json!({ "id": id }), result).await
    }

    // ---------- attachments & account ----------

    /// Base64 body of one attachment, or `None` if the message has no
    /// attachment with that id. Leaves the message's flags alone.
    pub async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Option<String>, ClassifiedError> {
        let mut session = self.session.lock().await;
        let result: Result<Option<String>, TransportError> = async {
            let id: MessageId = message_id.parse()?;
            session.connect().await?;
            session.select_mailbox(id.mailbox()).await?;
            let fetched = session
                .in_mailbox(id.mailbox())?
                .peek_message(id.uid())
                .await?
                .ok_or_else(|| TransportError::NotFound(format!("message {id}")))?;
            let delimiter = session.delimiter().await?;
            let message = parse::normalize(&fetched, id.mailbox(), &delimiter, Depth::Full)?;
            Ok(message
                .attachments
                .into_iter()
                .find(|a| a.attachment_id == attachment_id)
                .map(|a| a.body))
        }
        .await;
        let context = json!({ "messageId": message_id, "attachmentId": attachment_id });
        self.finish(&mut session, "getAttachment", context, result).await
    }

    /// Plain IMAP has no alias directory; the account address is the only one.
    pub fn get_email_aliases(&self) -> Vec<EmailAlias> {
        vec![EmailAlias {
            email: self.email.clone(),
            name: self.display_name.clone(),
            primary: true,
        }]
    }

    pub fn get_user_info(&self) -> UserInfo {
        let name = self
            .display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.email.split('@').next().unwrap_or_default().to_string());
        UserInfo {
            address: self.email.clone(),
            name,
            photo: None,
        }
    }

    // ---------- helpers that need the SMTP side ----------

    async fn send(
        &self,
        session: &mut Session<C>,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, TransportError> {
        let composed = compose(&self.account(), message, Purpose::Send)?;
        self.smtp.send(&composed.envelope, &composed.raw).await?;
        log::info!("Sent {} to {} recipient(s)", composed.message_id, composed.envelope.to().len());

        let saved: Result<(), TransportError> = async {
            session.connect().await?;
            session.transport()?.append(SENT, &["\\Seen"], &composed.raw).await
        }
        .await;
        if let Err(e) = saved {
            log::warn!("Message {} was sent but not saved to {SENT}: {e}", composed.message_id);
        }

        Ok(SentMessage {
            id: composed.message_id,
        })
    }

    async fn save_draft(
        &self,
        session: &mut Session<C>,
        data: &OutgoingMessage,
    ) -> Result<CreatedDraft, TransportError> {
        let composed = compose(&self.account(), data, Purpose::Draft)?;
        session.connect().await?;
        session
            .transport()?
            .append(DRAFTS, &["\\Draft", "\\Seen"], &composed.raw)
            .await?;

        let found: Result<Vec<u32>, TransportError> = async {
            session.select_mailbox(DRAFTS).await?;
            let criteria = pagination::header_criteria("Message-ID", &composed.message_id);
            session.in_mailbox(DRAFTS)?.uid_search(&criteria).await
        }
        .await;

        let id = match found.map(|uids| uids.into_iter().max()) {
            Ok(Some(uid)) => ids::encode(DRAFTS, uid),
            Ok(None) => {
                let id = synthetic_draft_id();
                log::warn!("Draft {} not found after APPEND, returning {id}", composed.message_id);
                id
            }
            Err(e) => {
                let id = synthetic_draft_id();
                log::warn!("Draft {} lookup failed ({e}), returning {id}", composed.message_id);
                id
            }
        };
        log::info!("Saved draft {id}");
        Ok(CreatedDraft { id })
    }

    async fn send_and_discard_draft(
        &self,
        session: &mut Session<C>,
        id: &str,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, TransportError> {
        let sent = self.send(session, message).await?;

        match id.parse::<MessageId>() {
            Ok(draft) if draft.mailbox() == DRAFTS => {
                let removed: Result<(), TransportError> = async {
                    session.connect().await?;
                    session.select_mailbox(DRAFTS).await?;
                    delete_selected(session, &draft).await
                }
                .await;
                if let Err(e) = removed {
                    log::warn!("Draft {draft} was sent but could not be removed: {e}");
                }
            }
            _ => log::debug!("Draft {id} has no stored copy to remove"),
        }

        Ok(sent)
    }
}

fn synthetic_draft_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "draft-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

fn parse_ids(ids: &[String]) -> Result<Vec<MessageId>, TransportError> {
    ids.iter().map(|id| id.parse()).collect()
}

fn label_name(name: &str) -> Result<&str, TransportError> {
    let name = name.trim().trim_matches('/');
    if name.is_empty() {
        return Err(TransportError::InvalidInput("label name is empty".into()));
    }
    Ok(name)
}

/// Server path for a label id, using the server's hierarchy delimiter.
async fn server_path<C: ImapConnector>(session: &mut Session<C>, label: &str) -> Result<String, TransportError> {
    session.connect().await?;
    let delimiter = session.delimiter().await?;
    Ok(labels::to_server_path(label, &delimiter))
}

async fn get_message<C: ImapConnector>(session: &mut Session<C>, id: &str) -> Result<ThreadView, TransportError> {
    let id: MessageId = id.parse()?;
    session.connect().await?;
    session.select_mailbox(id.mailbox()).await?;

    let fetched = session
        .in_mailbox(id.mailbox())?
        .fetch_message(id.uid())
        .await?
        .ok_or_else(|| TransportError::NotFound(format!("message {id}")))?;
    let delimiter = session.delimiter().await?;
    let message = parse::normalize(&fetched, id.mailbox(), &delimiter, Depth::Full)?;
    log::info!("Fetched {id} ({} bytes)", message.size);

    Ok(ThreadView::single(message))
}

async fn list_mailbox<C: ImapConnector>(
    session: &mut Session<C>,
    mailbox: &str,
    params: &ListParams,
) -> Result<ListResult, TransportError> {
    let token = params
        .page_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(PageToken::decode)
        .transpose()?;
    let page_size = params
        .max_results
        .or(token.map(|t| t.page_size))
        .unwrap_or(DEFAULT_PAGE_SIZE);

    session.connect().await?;
    let delimiter = session.delimiter().await?;
    session.select_mailbox(mailbox).await?;

    let criteria = pagination::search_criteria(params.query.as_deref());
    let uids = session.in_mailbox(mailbox)?.uid_search(&criteria).await?;
    let page = pagination::paginate(&uids, page_size, token.as_ref());

    let fetched = if page.uids.is_empty() {
        Vec::new()
    } else {
        session.in_mailbox(mailbox)?.fetch_headers(&page.uids).await?
    };
    log::info!(
        "Listed {mailbox}: {} match(es), returning {}",
        uids.len(),
        fetched.len()
    );

    // FETCH answers in server order; put the page back in UID order.
    let mut by_uid: HashMap<u32, FetchedMessage> = fetched.into_iter().map(|f| (f.uid, f)).collect();
    let mut threads = Vec::with_capacity(page.uids.len());
    for uid in &page.uids {
        let Some(fetched) = by_uid.remove(uid) else {
            log::debug!("UID {uid} vanished from {mailbox} before FETCH");
            continue;
        };
        match parse::normalize(&fetched, mailbox, &delimiter, Depth::Headers) {
            Ok(message) => threads.push(ThreadSummary {
                id: message.id.clone(),
                latest: message,
            }),
            Err(e) => log::warn!("Skipping {mailbox}:{uid}: {e}"),
        }
    }

    Ok(ListResult {
        threads,
        next_page_token: page.next.map(|t| t.encode()),
    })
}

/// Expects `id.mailbox()` to be selected.
async fn delete_selected<C: ImapConnector>(session: &mut Session<C>, id: &MessageId) -> Result<(), TransportError> {
    let transport = session.in_mailbox(id.mailbox())?;

    let moved = if id.mailbox() == TRASH {
        Err(TransportError::new("message is already in Trash"))
    } else {
        transport.move_message(id.uid(), TRASH).await
    };

    match moved {
        Ok(()) => {
            log::info!("Moved {id} to {TRASH}");
            Ok(())
        }
        Err(move_err) => {
            log::warn!("Could not move {id} to {TRASH} ({move_err}), flagging \\Deleted instead");
            transport
                .store_flags(id.uid(), FlagOp::Add, &["\\Deleted"])
                .await
                .map_err(|e| e.context(format!("delete {id} (move failed: {move_err})")))?;
            log::info!("Flagged {id} \\Deleted");
            Ok(())
        }
    }
}

async fn modify_labels<C: ImapConnector>(
    session: &mut Session<C>,
    ids: &[String],
    changes: &LabelChanges,
) -> Result<(), TransportError> {
    if !changes.remove_labels.is_empty() {
        log::debug!("removeLabels has no mailbox equivalent, ignoring {:?}", changes.remove_labels);
    }
    let Some(target) = changes.add_labels.first() else {
        return Ok(());
    };
    if changes.add_labels.len() > 1 {
        log::warn!(
            "A message lives in one mailbox; applying {target} and ignoring {:?}",
            &changes.add_labels[1..]
        );
    }

    let ids = parse_ids(ids)?;
    let destination = server_path(session, &ids::normalize_folder(target)).await?;

    for id in &ids {
        session.ensure_selected(id.mailbox()).await?;
        session
            .in_mailbox(id.mailbox())?
            .move_message(id.uid(), &destination)
            .await?;
        log::debug!("Moved {id} to {destination}");
    }
    Ok(())
}

async fn set_seen<C: ImapConnector>(session: &mut Session<C>, ids: &[String], op: FlagOp) -> Result<(), TransportError> {
    let ids = parse_ids(ids)?;
    session.connect().await?;

    for id in &ids {
        session.ensure_selected(id.mailbox()).await?;
        session
            .in_mailbox(id.mailbox())?
            .store_flags(id.uid(), op, &["\\Seen"])
            .await?;
    }
    log::debug!("{} \\Seen on {} message(s)", op.as_imap(), ids.len());
    Ok(())
}

async fn get_draft<C: ImapConnector>(session: &mut Session<C>, id: &str) -> Result<DraftView, TransportError> {
    let id: MessageId = id.parse()?;
    if id.mailbox() != DRAFTS {
        return Err(TransportError::NotFound(format!("{id} is not a draft")));
    }
    session.connect().await?;
    session.select_mailbox(DRAFTS).await?;

    let fetched = session
        .in_mailbox(DRAFTS)?
        .peek_message(id.uid())
        .await?
        .ok_or_else(|| TransportError::NotFound(format!("draft {id}")))?;
    let delimiter = session.delimiter().await?;
    let message = parse::normalize(&fetched, DRAFTS, &delimiter, Depth::Full)?;

    Ok(DraftView {
        id: message.id,
        to: message.to.into_iter().map(|r| r.email).collect(),
        subject: message.subject,
        content: message.body_html.or(message.body_text).unwrap_or_default(),
        attachments: message.attachments,
    })
}

async fn count_folders<C: ImapConnector>(session: &mut Session<C>) -> Result<Vec<LabelCount>, TransportError> {
    session.connect().await?;

    let mut counts = Vec::with_capacity(ids::COUNTED_FOLDERS.len());
    for folder in ids::COUNTED_FOLDERS {
        let count = match session.transport()?.message_count(folder).await {
            Ok(n) => n,
            Err(e) => {
                log::warn!("Could not count {folder}, reporting 0: {e}");
                0
            }
        };
        counts.push(LabelCount {
            label: folder.to_string(),
            count,
        });
    }
    Ok(counts)
}

async fn user_labels<C: ImapConnector>(session: &mut Session<C>) -> Result<Vec<Label>, TransportError> {
    session.connect().await?;
    let delimiter = session.delimiter().await?;
    let entries = session.transport()?.list_mailboxes().await?;
    log::debug!("LIST returned {} mailbox(es)", entries.len());
    Ok(labels::user_labels(&entries, &delimiter))
}

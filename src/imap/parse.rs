use base64::Engine;
use mail_parser::{MessageParser, MimeHeaders};
use sha2::{Digest, Sha256};

use super::types::FetchedMessage;
use crate::error::TransportError;
use crate::ids;
use crate::labels;
use crate::types::{Attachment, Label, NormalizedMessage, Sender};

/// How much of the message the fetch carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Header block only (listings). Bodies and attachments stay empty.
    Headers,
    Full,
}

/// Parse a fetched message into the normalized shape.
///
/// `unread` comes from the flags on the fetch: anything without `\Seen` is
/// unread. The id keeps the server mailbox name; the folder tag is the label
/// id, built with the server's hierarchy `delimiter`.
pub fn normalize(
    fetched: &FetchedMessage,
    mailbox: &str,
    delimiter: &str,
    depth: Depth,
) -> Result<NormalizedMessage, TransportError> {
    let message = MessageParser::default()
        .parse(&fetched.raw)
        .ok_or_else(|| TransportError::new(format!("Failed to parse MIME message UID {}", fetched.uid)))?;

    let id = ids::encode(mailbox, fetched.uid);

    let received_on = message
        .date()
        .map(|d| d.to_timestamp())
        .or(fetched.internal_date)
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.to_rfc3339());

    // In-Reply-To
    let in_reply_to = match message.in_reply_to() {
        mail_parser::HeaderValue::Text(t) => Some(t.to_string()),
        mail_parser::HeaderValue::TextList(list) => list.first().map(|s| s.to_string()),
        _ => None,
    };

    // References (space-separated message IDs)
    let references = match message.references() {
        mail_parser::HeaderValue::Text(t) => Some(t.to_string()),
        mail_parser::HeaderValue::TextList(list) if !list.is_empty() => {
            Some(list.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(" "))
        }
        _ => None,
    };

    let (body_text, body_html, attachments) = match depth {
        Depth::Headers => (None, None, Vec::new()),
        Depth::Full => (
            message.body_text(0).map(|s| s.to_string()),
            message.body_html(0).map(|s| s.to_string()),
            message.attachments().map(attachment_of).collect(),
        ),
    };

    let snippet = body_text.as_deref().map(snippet_of);
    let label = labels::to_label_id(mailbox, delimiter);

    Ok(NormalizedMessage {
        thread_id: id.clone(),
        id,
        mailbox: mailbox.to_string(),
        uid: fetched.uid,
        message_id: message.message_id().map(|s| s.to_string()),
        sender: address_list(message.from()).into_iter().next().unwrap_or_default(),
        to: address_list(message.to()),
        cc: address_list(message.cc()),
        reply_to: address_list(message.reply_to()),
        subject: message.subject().unwrap_or_default().to_string(),
        received_on,
        unread: !fetched.is_seen(),
        body_html,
        body_text,
        snippet,
        references,
        in_reply_to,
        attachments,
        tags: vec![Label::folder(label.clone(), label)],
        size: fetched.raw.len(),
    })
}

fn attachment_of(att: &mail_parser::MessagePart<'_>) -> Attachment {
    let mime_type = att
        .content_type()
        .map(|ct| {
            let ctype = ct.ctype();
            let subtype = ct.subtype().unwrap_or("octet-stream");
            format!("{ctype}/{subtype}")
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let contents = att.contents();

    Attachment {
        attachment_id: format!("{:x}", Sha256::digest(contents)),
        filename: att.attachment_name().unwrap_or("attachment").to_string(),
        mime_type,
        size: contents.len(),
        content_id: att.content_id().map(|s| s.to_string()),
        is_inline: att.content_disposition().map_or(false, |cd| cd.is_inline()),
        body: base64::engine::general_purpose::STANDARD.encode(contents),
    }
}

/// First 200 characters of the text body on one line.
fn snippet_of(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.chars().count() > 200 {
        let end: String = trimmed.chars().take(200).collect();
        format!("{end}...")
    } else {
        trimmed.to_string()
    }
}

fn address_list(addr: Option<&mail_parser::Address>) -> Vec<Sender> {
    let Some(addr) = addr else {
        return Vec::new();
    };

    addr.iter()
        .filter_map(|a| {
            let email = a.address.as_deref()?.to_string();
            let name = a
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string);
            Some(Sender { name, email })
        })
        .collect()
}

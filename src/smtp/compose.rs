//! Turns an [`OutgoingMessage`] into wire bytes plus an SMTP envelope.

use lettre::address::Envelope;
use lettre::message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};

use crate::error::TransportError;
use crate::types::{OutgoingMessage, Recipient};

#[derive(Debug, Clone)]
pub struct ComposedMessage {
    /// Message-ID header value, angle brackets included.
    pub message_id: String,
    pub envelope: Envelope,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Send,
    /// Drafts may have no recipients yet.
    Draft,
}

pub fn to_mailbox(recipient: &Recipient) -> Result<Mailbox, TransportError> {
    let address = recipient.email.trim().parse::<Address>().map_err(|e| {
        TransportError::InvalidInput(format!("invalid email '{}': {e}", recipient.email))
    })?;
    let name = recipient
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    Ok(Mailbox::new(name, address))
}

/// Wrap a bare message id in angle brackets if it lacks them.
fn format_message_id_for_header(message_id: &str) -> String {
    let trimmed = message_id.trim().trim_start_matches('<').trim_end_matches('>');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("<{trimmed}>")
    }
}

fn new_message_id(from: &Mailbox) -> String {
    format!("<{}@{}>", uuid::Uuid::new_v4().simple(), from.email.domain())
}

/// Sanitized HTML and its plain-text rendering.
fn bodies(html: &str) -> (String, String) {
    let clean = ammonia::clean(html);
    let text = html2text::from_read(clean.as_bytes(), 80).unwrap_or_else(|e| {
        log::debug!("html2text failed ({e}), sending sanitized HTML as text");
        clean.clone()
    });
    (clean, text)
}

pub fn compose(
    from: &Recipient,
    outgoing: &OutgoingMessage,
    purpose: Purpose,
) -> Result<ComposedMessage, TransportError> {
    let from = to_mailbox(from)?;
    let message_id = new_message_id(&from);

    let recipients = outgoing.to.len() + outgoing.cc.len() + outgoing.bcc.len();
    if recipients == 0 && purpose == Purpose::Send {
        return Err(TransportError::InvalidInput("message has no recipients".into()));
    }

    let mut builder = Message::builder()
        .from(from.clone())
        .subject(outgoing.subject.clone())
        .message_id(Some(message_id.clone()))
        .date_now();

    for to in &outgoing.to {
        builder = builder.to(to_mailbox(to)?);
    }
    for cc in &outgoing.cc {
        builder = builder.cc(to_mailbox(cc)?);
    }
    for bcc in &outgoing.bcc {
        builder = builder.bcc(to_mailbox(bcc)?);
    }
    if let Some(reply_to) = &outgoing.reply_to {
        builder = builder.reply_to(to_mailbox(reply_to)?);
    }

    if let Some(in_reply_to) = outgoing.in_reply_to.as_deref() {
        let in_reply_to = format_message_id_for_header(in_reply_to);
        if !in_reply_to.is_empty() {
            builder = builder.in_reply_to(in_reply_to);
        }
    }
    if let Some(references) = outgoing.references.as_deref() {
        let references = references
            .split_whitespace()
            .map(format_message_id_for_header)
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !references.is_empty() {
            builder = builder.references(references);
        }
    }

    if recipients == 0 {
        // A draft with nobody to send to still needs an envelope to build.
        builder = builder.envelope(Envelope::new(Some(from.email.clone()), vec![from.email.clone()])?);
    }

    let (html, text) = bodies(&outgoing.message);
    let alternative = MultiPart::alternative()
        .singlepart(SinglePart::plain(text))
        .singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(html),
        );

    let payload = if outgoing.attachments.is_empty() {
        alternative
    } else {
        let mut mixed = MultiPart::mixed().multipart(alternative);
        for attachment in &outgoing.attachments {
            let mime = ContentType::parse(&attachment.content_type).map_err(|e| {
                TransportError::InvalidInput(format!(
                    "invalid content type '{}' for {}: {e}",
                    attachment.content_type, attachment.filename
                ))
            })?;
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone()).body(attachment.data.clone(), mime),
            );
        }
        mixed
    };

    let message = builder.multipart(payload)?;

    Ok(ComposedMessage {
        message_id,
        envelope: message.envelope().clone(),
        raw: message.formatted(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutgoingAttachment;

    fn account() -> Recipient {
        Recipient::named("Me", "me@example.com")
    }

    fn outgoing() -> OutgoingMessage {
        OutgoingMessage {
            to: vec![Recipient::named("Ada Lovelace", "ada@example.com")],
            cc: vec![Recipient::new("cc@example.com")],
            bcc: vec![Recipient::new("hidden@example.com")],
            subject: "Hello".into(),
            message: "<p>Hi <b>there</b></p><script>alert(1)</script>".into(),
            in_reply_to: Some("parent@example.com".into()),
            references: Some("<root@example.com> parent@example.com".into()),
            ..OutgoingMessage::default()
        }
    }

    #[test]
    fn test_mailbox_matches_display_string() {
        let r = Recipient::named("Ada", "ada@example.com");
        assert_eq!(to_mailbox(&r).unwrap().to_string(), r.to_string());
        let r = Recipient::new("bob@example.com");
        assert_eq!(to_mailbox(&r).unwrap().to_string(), "bob@example.com");
    }

    #[test]
    fn test_invalid_address() {
        let err = to_mailbox(&Recipient::new("not an address")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidInput(_)));
    }

    #[test]
    fn test_compose_headers_and_envelope() {
        let composed = compose(&account(), &outgoing(), Purpose::Send).unwrap();
        let raw = String::from_utf8_lossy(&composed.raw);

        assert!(composed.message_id.starts_with('<'));
        assert!(composed.message_id.ends_with("@example.com>"));
        assert!(raw.contains(&composed.message_id));
        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("In-Reply-To: <parent@example.com>"));
        assert!(raw.contains("<root@example.com> <parent@example.com>"));
        assert!(!raw.contains("<script>"));
        assert!(!raw.contains("hidden@example.com"));

        // bcc is delivered even though it is not in the headers
        assert_eq!(composed.envelope.to().len(), 3);
    }

    #[test]
    fn test_compose_requires_recipients_to_send() {
        let empty = OutgoingMessage {
            subject: "nobody".into(),
            ..OutgoingMessage::default()
        };
        assert!(matches!(
            compose(&account(), &empty, Purpose::Send),
            Err(TransportError::InvalidInput(_))
        ));
        let draft = compose(&account(), &empty, Purpose::Draft).unwrap();
        assert_eq!(draft.envelope.to().len(), 1);
    }

    #[test]
    fn test_compose_with_attachment() {
        let mut msg = outgoing();
        msg.attachments.push(OutgoingAttachment {
            filename: "notes.txt".into(),
            content_type: "text/plain".into(),
            data: b"remember the milk".to_vec(),
        });
        let composed = compose(&account(), &msg, Purpose::Send).unwrap();
        let raw = String::from_utf8_lossy(&composed.raw);
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("notes.txt"));

        msg.attachments[0].content_type = "not a mime".into();
        assert!(compose(&account(), &msg, Purpose::Send).is_err());
    }

    #[test]
    fn test_message_id_formatting() {
        assert_eq!(format_message_id_for_header("abc@x"), "<abc@x>");
        assert_eq!(format_message_id_for_header("<abc@x>"), "<abc@x>");
        assert_eq!(format_message_id_for_header(" <> "), "");
    }
}

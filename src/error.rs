//! Failure taxonomy for the adapter boundary.
//!
//! Every protocol failure starts life as a [`TransportError`] and leaves the
//! adapter as a [`ClassifiedError`]. The mapping is one ordered signature
//! table in [`ErrorClassifier::classify`]; first match wins.

use serde::Serialize;

/// Raw failure from the IMAP/SMTP transports or the adapter's own validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("{message}")]
    Protocol {
        code: Option<String>,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError::Protocol {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        TransportError::Protocol {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            TransportError::Protocol { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The connection died under a command (reset, EOF, broken pipe). The
    /// session is unusable but the credentials are not in question.
    pub fn is_connection_loss(&self) -> bool {
        self.code() == Some("ECONNRESET")
    }

    /// Prefix the message with the command that failed, keeping the code.
    pub(crate) fn context(self, what: impl std::fmt::Display) -> Self {
        match self {
            TransportError::Protocol { code, message } => TransportError::Protocol {
                code,
                message: format!("{what}: {message}"),
            },
            other => other,
        }
    }
}

/// Map an io error kind onto the errno-style codes the classifier keys on.
fn io_code(kind: std::io::ErrorKind) -> Option<&'static str> {
    use std::io::ErrorKind;
    match kind {
        ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
        ErrorKind::TimedOut => Some("ETIMEDOUT"),
        ErrorKind::NotFound => Some("ENOTFOUND"),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => Some("ECONNRESET"),
        ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => Some("ECONNRESET"),
        _ => None,
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        // getaddrinfo failures surface as Other with a resolver message
        let message = err.to_string();
        let code = io_code(err.kind()).or_else(|| {
            let lower = message.to_lowercase();
            (lower.contains("failed to lookup address") || lower.contains("name or service not known"))
                .then_some("ENOTFOUND")
        });
        TransportError::Protocol {
            code: code.map(str::to_string),
            message,
        }
    }
}

/// Pull `FOO` out of an IMAP status text like `[FOO] details`.
fn response_code(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let rest = &text[start + 1..];
    let end = rest.find(']')?;
    let code = rest[..end].split_whitespace().next()?;
    (!code.is_empty()).then(|| code.to_ascii_uppercase())
}

impl From<async_imap::error::Error> for TransportError {
    fn from(err: async_imap::error::Error) -> Self {
        use async_imap::error::Error;
        match err {
            Error::Io(io) => io.into(),
            Error::No(text) | Error::Bad(text) => TransportError::Protocol {
                code: response_code(&text),
                message: text,
            },
            Error::ConnectionLost => {
                TransportError::with_code("ECONNRESET", "IMAP connection lost")
            }
            other => TransportError::new(other.to_string()),
        }
    }
}

impl From<lettre::transport::smtp::Error> for TransportError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        let message = err.to_string();

        let io_source = std::error::Error::source(&err)
            .and_then(|source| source.downcast_ref::<std::io::Error>())
            .and_then(|io| io_code(io.kind()));
        if let Some(code) = io_source {
            return TransportError::with_code(code, message);
        }
        if err.is_timeout() {
            return TransportError::with_code("ETIMEDOUT", message);
        }
        if err.is_tls() {
            return TransportError::with_code("ETLS", message);
        }

        let code = match err.status().map(|c| c.to_string()) {
            Some(status) if matches!(status.as_str(), "530" | "534" | "535") => "EAUTH".to_string(),
            Some(status) => format!("SMTP{status}"),
            None => "SMTP".to_string(),
        };
        TransportError::with_code(code, message)
    }
}

impl From<lettre::error::Error> for TransportError {
    fn from(err: lettre::error::Error) -> Self {
        TransportError::InvalidInput(format!("message build failed: {err}"))
    }
}

impl From<lettre::address::AddressError> for TransportError {
    fn from(err: lettre::address::AddressError) -> Self {
        TransportError::InvalidInput(format!("invalid address: {err}"))
    }
}

/// Closed set of failure kinds callers can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConnectionRefused,
    AuthenticationError,
    TlsError,
    QuotaError,
    SmtpError,
    CapabilityError,
    NotFound,
    InvalidInput,
    UnknownError,
}

impl ErrorKind {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::ConnectionRefused => 503,
            ErrorKind::AuthenticationError => 401,
            ErrorKind::TlsError => 502,
            ErrorKind::QuotaError => 507,
            ErrorKind::SmtpError => 502,
            ErrorKind::CapabilityError => 501,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidInput => 400,
            ErrorKind::UnknownError => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorKind::AuthenticationError => "AUTHENTICATION_ERROR",
            ErrorKind::TlsError => "TLS_ERROR",
            ErrorKind::QuotaError => "QUOTA_ERROR",
            ErrorKind::SmtpError => "SMTP_ERROR",
            ErrorKind::CapabilityError => "CAPABILITY_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error shape that crosses the adapter boundary.
///
/// `fatal` means the session has been discarded and the stored credential is
/// probably no longer usable.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{operation} failed ({kind}): {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub http_status: u16,
    pub operation: String,
    pub message: String,
    pub fatal: bool,
    pub context: serde_json::Value,
}

const CONNECTION_CODES: &[&str] = &["ECONNREFUSED", "ETIMEDOUT", "ENOTFOUND"];
const AUTH_CODES: &[&str] = &["AUTHENTICATIONFAILED", "EAUTH", "AUTHORIZATIONFAILED"];
const QUOTA_CODES: &[&str] = &["OVERQUOTA", "LIMIT"];

/// Stateless apart from the configured fatal-code allowlist.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    fatal_codes: Vec<String>,
}

impl ErrorClassifier {
    pub fn new(fatal_codes: Vec<String>) -> Self {
        Self {
            fatal_codes: fatal_codes
                .into_iter()
                .map(|c| c.to_ascii_uppercase())
                .collect(),
        }
    }

    pub fn classify(
        &self,
        operation: &str,
        error: &TransportError,
        context: serde_json::Value,
    ) -> ClassifiedError {
        let (kind, fatal) = self.kind_of(error);
        ClassifiedError {
            kind,
            http_status: kind.http_status(),
            operation: operation.to_string(),
            message: error.to_string(),
            fatal,
            context,
        }
    }

    fn kind_of(&self, error: &TransportError) -> (ErrorKind, bool) {
        let (code, message) = match error {
            TransportError::NotFound(_) => return (ErrorKind::NotFound, false),
            TransportError::InvalidInput(_) => return (ErrorKind::InvalidInput, false),
            TransportError::Protocol { code, message } => (
                code.as_deref().map(str::to_ascii_uppercase),
                message.to_lowercase(),
            ),
        };
        let code = code.as_deref().unwrap_or("");
        let has = |needle: &str| message.contains(needle);

        if CONNECTION_CODES.contains(&code)
            || has("connection refused")
            || has("timed out")
            || has("timeout")
        {
            return (ErrorKind::ConnectionRefused, true);
        }
        if AUTH_CODES.contains(&code)
            || has("authentication failed")
            || has("invalid credentials")
        {
            return (ErrorKind::AuthenticationError, true);
        }
        if code == "ETLS" || has("tls") || has("ssl") {
            return (ErrorKind::TlsError, false);
        }
        if QUOTA_CODES.contains(&code) || has("quota") || has("storage") {
            return (ErrorKind::QuotaError, false);
        }
        if code.starts_with("SMTP") {
            return (ErrorKind::SmtpError, false);
        }
        if code == "CANNOT" || has("not supported") || has("capability") {
            return (ErrorKind::CapabilityError, false);
        }
        if code == "NONEXISTENT" || code == "TRYCREATE" {
            return (ErrorKind::NotFound, false);
        }

        let fatal = !code.is_empty() && self.fatal_codes.iter().any(|c| c == code);
        (ErrorKind::UnknownError, fatal)
    }
}

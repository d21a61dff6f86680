//! Provider-agnostic mailbox operations over IMAP and SMTP.
//!
//! [`MailAdapter`] is the entry point: one instance per account, one IMAP
//! session per instance, every failure reported as a [`ClassifiedError`].

pub mod adapter;
pub mod config;
pub mod credentials;
pub mod error;
pub mod ids;
pub mod imap;
pub mod labels;
pub mod pagination;
pub mod providers;
pub mod smtp;
pub mod types;

#[cfg(test)]
mod testing;

pub use adapter::MailAdapter;
pub use config::{AdapterConfig, AuthMethod, Security, ServerOverride};
pub use credentials::{CredentialStore, NoopCredentialStore};
pub use error::{ClassifiedError, ErrorClassifier, ErrorKind, TransportError};
pub use ids::MessageId;
pub use imap::session::ConnectionState;

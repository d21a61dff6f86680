//! Where the host keeps account credentials.
//!
//! The adapter never reads credentials back out of the store; it only tells
//! the store to forget them after a fatal failure.

use async_trait::async_trait;

use crate::error::TransportError;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Drop the stored connection record for `email`.
    async fn invalidate(&self, email: &str) -> Result<(), TransportError>;
}

/// For hosts that keep no connection records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCredentialStore;

#[async_trait]
impl CredentialStore for NoopCredentialStore {
    async fn invalidate(&self, email: &str) -> Result<(), TransportError> {
        log::debug!("No credential store configured; nothing to invalidate for {email}");
        Ok(())
    }
}

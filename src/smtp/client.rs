use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    address::Envelope,
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{Tls, TlsParameters, TlsParametersBuilder},
    },
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};

use super::types::SmtpConfig;
use crate::config::{AuthMethod, Security};
use crate::error::TransportError;

/// Delivers one already-formatted message.
#[async_trait]
pub trait SmtpSender: Send + Sync {
    async fn send(&self, envelope: &Envelope, raw: &[u8]) -> Result<(), TransportError>;
}

/// Sends through lettre, opening a fresh SMTP connection per message.
#[derive(Debug, Clone)]
pub struct LettreSmtpSender {
    config: SmtpConfig,
}

impl LettreSmtpSender {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SmtpSender for LettreSmtpSender {
    async fn send(&self, envelope: &Envelope, raw: &[u8]) -> Result<(), TransportError> {
        let transport = build_transport(&self.config)?;
        log::info!(
            "SMTP sending via {}:{} to {} recipient(s)",
            self.config.host,
            self.config.port,
            envelope.to().len()
        );

        transport
            .send_raw(envelope, raw)
            .await
            .map(|_response| ())
            .map_err(|e| TransportError::from(e).context("SMTP send"))
    }
}

fn tls_parameters(config: &SmtpConfig) -> Result<TlsParameters, TransportError> {
    TlsParametersBuilder::new(config.host.clone())
        .dangerous_accept_invalid_certs(true)
        .dangerous_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| TransportError::with_code("ETLS", format!("SMTP TLS params error: {e}")))
}

/// Build an async SMTP transport from the given config.
fn build_transport(config: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
    let credentials = Credentials::new(config.username.clone(), config.password.clone());

    // For OAuth2, force XOAUTH2 mechanism; for password, use default mechanisms
    let auth_mechanisms = match config.auth_method {
        AuthMethod::OAuth2 => vec![Mechanism::Xoauth2],
        AuthMethod::Password => vec![Mechanism::Plain, Mechanism::Login],
    };

    let timeout = Some(Duration::from_secs(config.timeout_secs));

    let transport = match config.security {
        Security::Tls => {
            // Implicit TLS (typically port 465)
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| TransportError::from(e).context("SMTP relay error"))?
                .port(config.port)
                .credentials(credentials)
                .authentication(auth_mechanisms)
                .timeout(timeout);

            if config.accept_invalid_certs {
                builder = builder.tls(Tls::Wrapper(tls_parameters(config)?));
            }

            builder.build()
        }
        Security::StartTls => {
            // STARTTLS (typically port 587)
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| TransportError::from(e).context("SMTP STARTTLS error"))?
                .port(config.port)
                .credentials(credentials)
                .authentication(auth_mechanisms)
                .timeout(timeout);

            if config.accept_invalid_certs {
                builder = builder.tls(Tls::Required(tls_parameters(config)?));
            }

            builder.build()
        }
        Security::None => {
            // Plain / no encryption (typically port 25)
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .credentials(credentials)
                .authentication(auth_mechanisms)
                .timeout(timeout)
                .build()
        }
    };

    Ok(transport)
}

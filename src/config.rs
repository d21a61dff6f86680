use serde::{Deserialize, Serialize};

use crate::error::{ErrorClassifier, TransportError};
use crate::imap::types::ImapConfig;
use crate::providers;
use crate::smtp::types::SmtpConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    Tls,
    #[serde(alias = "start_tls")]
    StartTls,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Password,
    OAuth2,
}

/// Explicit server settings; anything unset comes from the provider table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerOverride {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub security: Option<Security>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Everything the adapter needs at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub email: String,

    /// Password or OAuth2 access token, depending on `auth_method`.
    pub secret: String,

    #[serde(default)]
    pub auth_method: AuthMethod,

    pub display_name: Option<String>,

    #[serde(default)]
    pub imap: Option<ServerOverride>,

    #[serde(default)]
    pub smtp: Option<ServerOverride>,

    /// Bound on TCP connect + authentication. Nothing else is timed out.
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,

    /// Codes that make an otherwise unrecognized failure fatal.
    #[serde(default)]
    pub fatal_codes: Vec<String>,
}

fn default_auth_timeout_secs() -> u64 {
    30
}

impl AdapterConfig {
    pub fn new(email: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            secret: secret.into(),
            auth_method: AuthMethod::Password,
            display_name: None,
            imap: None,
            smtp: None,
            auth_timeout_secs: default_auth_timeout_secs(),
            fatal_codes: Vec::new(),
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self, TransportError> {
        let config: AdapterConfig = toml::from_str(input)
            .map_err(|e| TransportError::InvalidInput(format!("config: {e}")))?;
        if !config.email.contains('@') {
            return Err(TransportError::InvalidInput(format!(
                "config: '{}' is not an email address",
                config.email
            )));
        }
        Ok(config)
    }

    pub fn imap_config(&self) -> ImapConfig {
        let default = providers::endpoints_for(&self.email).imap;
        let over = self.imap.clone().unwrap_or_default();
        ImapConfig {
            host: over.host.unwrap_or(default.host),
            port: over.port.unwrap_or(default.port),
            security: over.security.unwrap_or(default.security),
            username: self.email.clone(),
            password: self.secret.clone(),
            auth_method: self.auth_method,
            accept_invalid_certs: over.accept_invalid_certs,
            auth_timeout_secs: self.auth_timeout_secs,
        }
    }

    pub fn smtp_config(&self) -> SmtpConfig {
        let default = providers::endpoints_for(&self.email).smtp;
        let over = self.smtp.clone().unwrap_or_default();
        SmtpConfig {
            host: over.host.unwrap_or(default.host),
            port: over.port.unwrap_or(default.port),
            security: over.security.unwrap_or(default.security),
            username: self.email.clone(),
            password: self.secret.clone(),
            auth_method: self.auth_method,
            accept_invalid_certs: over.accept_invalid_certs,
            timeout_secs: self.auth_timeout_secs,
        }
    }

    pub fn classifier(&self) -> ErrorClassifier {
        ErrorClassifier::new(self.fatal_codes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derives_hosts_from_domain() {
        let config = AdapterConfig::new("me@fastmail.com", "pw");
        let imap = config.imap_config();
        assert_eq!(imap.host, "imap.fastmail.com");
        assert_eq!(imap.port, 993);
        assert_eq!(imap.username, "me@fastmail.com");
        assert_eq!(config.smtp_config().host, "smtp.fastmail.com");
    }

    #[test]
    fn test_overrides_win() {
        let toml = r#"
            email = "me@corp.example"
            secret = "hunter2"
            auth_method = "oauth2"
            fatal_codes = ["ALERT"]

            [imap]
            host = "mail.corp.example"
            port = 143
            security = "starttls"
        "#;
        let config = AdapterConfig::from_toml_str(toml).unwrap();
        let imap = config.imap_config();
        assert_eq!(imap.host, "mail.corp.example");
        assert_eq!(imap.port, 143);
        assert_eq!(imap.security, Security::StartTls);
        assert_eq!(imap.auth_method, AuthMethod::OAuth2);
        assert_eq!(imap.auth_timeout_secs, 30);

        // no smtp section: derived from domain
        let smtp = config.smtp_config();
        assert_eq!(smtp.host, "smtp.corp.example");
        assert_eq!(smtp.port, 465);
    }

    #[test]
    fn test_rejects_non_email() {
        let err = AdapterConfig::from_toml_str("email = \"nobody\"\nsecret = \"x\"").unwrap_err();
        assert!(matches!(err, TransportError::InvalidInput(_)));
    }
}

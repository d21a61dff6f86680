use serde::{Deserialize, Serialize};

use crate::config::{AuthMethod, Security};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub security: Security,
    pub username: String,
    pub password: String, // plaintext password or OAuth2 access token
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    pub timeout_secs: u64,
}

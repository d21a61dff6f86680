//! Known mail provider endpoints.
//!
//! Used when the account config carries no explicit host. Unknown domains
//! fall back to `imap.<domain>` / `smtp.<domain>` over implicit TLS.

use crate::config::Security;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub security: Security,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub imap: Endpoint,
    pub smtp: Endpoint,
}

fn tls(host: &str, port: u16) -> Endpoint {
    Endpoint {
        host: host.to_string(),
        port,
        security: Security::Tls,
    }
}

fn starttls(host: &str, port: u16) -> Endpoint {
    Endpoint {
        host: host.to_string(),
        port,
        security: Security::StartTls,
    }
}

/// Look up a known provider by email domain.
pub fn known_provider(domain: &str) -> Option<ProviderEndpoints> {
    let domain = domain.to_lowercase();

    let (imap, smtp) = match domain.as_str() {
        "gmail.com" | "googlemail.com" | "google.com" => {
            (tls("imap.gmail.com", 993), tls("smtp.gmail.com", 465))
        }
        "outlook.com" | "hotmail.com" | "live.com" | "msn.com" | "hotmail.co.uk"
        | "outlook.co.uk" | "hotmail.fr" | "outlook.fr" | "hotmail.de" | "outlook.de" => (
            tls("outlook.office365.com", 993),
            starttls("smtp.office365.com", 587),
        ),
        "yahoo.com" | "yahoo.co.uk" | "yahoo.fr" | "yahoo.de" | "yahoo.ca" | "ymail.com"
        | "rocketmail.com" => (tls("imap.mail.yahoo.com", 993), tls("smtp.mail.yahoo.com", 465)),
        "aol.com" => (tls("imap.aol.com", 993), tls("smtp.aol.com", 465)),
        "icloud.com" | "me.com" | "mac.com" => {
            (tls("imap.mail.me.com", 993), starttls("smtp.mail.me.com", 587))
        }
        "fastmail.com" | "fastmail.fm" | "messagingengine.com" => {
            (tls("imap.fastmail.com", 993), tls("smtp.fastmail.com", 465))
        }
        "zoho.com" => (tls("imap.zoho.com", 993), tls("smtp.zoho.com", 465)),
        "gmx.com" | "gmx.de" | "gmx.net" | "gmx.at" | "gmx.ch" => {
            (tls("imap.gmx.net", 993), tls("mail.gmx.net", 465))
        }
        _ => return None,
    };

    Some(ProviderEndpoints { imap, smtp })
}

/// Resolve endpoints for an email address, falling back to `<service>.<domain>`.
pub fn endpoints_for(email: &str) -> ProviderEndpoints {
    let domain = email
        .rsplit_once('@')
        .map(|(_, d)| d.trim())
        .unwrap_or(email)
        .to_lowercase();

    known_provider(&domain).unwrap_or_else(|| ProviderEndpoints {
        imap: tls(&format!("imap.{domain}"), 993),
        smtp: tls(&format!("smtp.{domain}"), 465),
    })
}

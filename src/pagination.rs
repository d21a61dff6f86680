//! Newest-first paging over UID search results.
//!
//! Servers return SEARCH hits in no particular order. Within one mailbox a
//! higher UID means a later arrival, so pages are cut from the UID set sorted
//! descending, and a page token records where the next page starts.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::error::TransportError;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Resume point of a descending scan.
///
/// `max_uid` is the highest UID the next page may contain, i.e. one below
/// the last UID already returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageToken {
    pub max_uid: u32,
    pub page_size: usize,
}

impl PageToken {
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.max_uid, self.page_size))
    }

    pub fn decode(token: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidInput(format!("invalid page token '{token}'"));

        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (max_uid, page_size) = text.split_once(':').ok_or_else(invalid)?;

        Ok(Self {
            max_uid: max_uid.parse().map_err(|_| invalid())?,
            page_size: page_size.parse().map_err(|_| invalid())?,
        })
    }

    /// UIDs greater than this were returned by earlier pages.
    pub fn last_uid_exclusive(&self) -> u64 {
        u64::from(self.max_uid) + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub uids: Vec<u32>,
    pub next: Option<PageToken>,
}

/// Cut one page out of an unordered UID set.
pub fn paginate(uids: &[u32], max_results: usize, token: Option<&PageToken>) -> Page {
    let page_size = max_results.max(1);

    let mut sorted: Vec<u32> = uids
        .iter()
        .copied()
        .filter(|&uid| token.map_or(true, |t| uid <= t.max_uid))
        .collect();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();

    let more = sorted.len() > page_size;
    sorted.truncate(page_size);

    let next = match sorted.last() {
        Some(&last) if more => Some(PageToken {
            max_uid: last - 1,
            page_size,
        }),
        _ => None,
    };

    Page { uids: sorted, next }
}

/// SEARCH criteria for a listing. The query is a subject substring filter,
/// nothing more.
pub fn search_criteria(query: Option<&str>) -> String {
    match sanitize_search_value(query) {
        Some(q) => format!("SUBJECT {}", quote_search_value(&q)),
        None => "ALL".to_string(),
    }
}

/// `HEADER <name> "<value>"`, used to find a message this client appended.
pub fn header_criteria(name: &str, value: &str) -> String {
    let value = value.replace(['\r', '\n'], " ");
    format!("HEADER {name} {}", quote_search_value(value.trim()))
}

fn sanitize_search_value(value: Option<&str>) -> Option<String> {
    let normalized = value?.replace(['\r', '\n'], " ");
    let normalized = normalized.trim();
    (!normalized.is_empty()).then(|| normalized.to_string())
}

fn quote_search_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

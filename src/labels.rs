//! Mailboxes presented as folder labels.
//!
//! LIST returns flat server paths joined with the server's hierarchy
//! delimiter (`.` on many Courier/Dovecot setups, `/` elsewhere). Labels always
//! use `/`, so the tree is rebuilt from the LIST output and flattened again.

use std::collections::BTreeMap;

use crate::imap::types::MailboxEntry;
use crate::types::Label;

pub const LABEL_SEPARATOR: &str = "/";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxNode {
    pub children: BTreeMap<String, MailboxNode>,
}

/// Rebuild the mailbox hierarchy. Parents that LIST did not report (the
/// server only had children under them) are created implicitly.
pub fn build_tree(entries: &[MailboxEntry], delimiter: &str) -> BTreeMap<String, MailboxNode> {
    let mut root: BTreeMap<String, MailboxNode> = BTreeMap::new();

    for entry in entries {
        let delim = entry.delimiter.as_deref().unwrap_or(delimiter);
        let mut level = &mut root;
        for part in split_path(&entry.path, delim) {
            level = &mut level.entry(part.to_string()).or_default().children;
        }
    }

    root
}

fn split_path<'a>(path: &'a str, delimiter: &str) -> Vec<&'a str> {
    if delimiter.is_empty() {
        return vec![path];
    }
    path.split(delimiter).filter(|p| !p.is_empty()).collect()
}

/// Depth-first, parents before children.
pub fn flatten(tree: &BTreeMap<String, MailboxNode>) -> Vec<Label> {
    let mut labels = Vec::new();
    walk(tree, "", &mut labels);
    labels
}

fn walk(level: &BTreeMap<String, MailboxNode>, prefix: &str, out: &mut Vec<Label>) {
    for (name, node) in level {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}{LABEL_SEPARATOR}{name}")
        };
        out.push(Label::folder(path.clone(), path.clone()));
        walk(&node.children, &path, out);
    }
}

pub fn user_labels(entries: &[MailboxEntry], delimiter: &str) -> Vec<Label> {
    flatten(&build_tree(entries, delimiter))
}

/// Turn a label id back into the server path.
pub fn to_server_path(label_id: &str, delimiter: &str) -> String {
    if delimiter.is_empty() || delimiter == LABEL_SEPARATOR {
        return label_id.to_string();
    }
    label_id.replace(LABEL_SEPARATOR, delimiter)
}

/// Label id for a server path, the inverse of [`to_server_path`].
pub fn to_label_id(path: &str, delimiter: &str) -> String {
    if delimiter.is_empty() || delimiter == LABEL_SEPARATOR {
        return path.to_string();
    }
    path.replace(delimiter, LABEL_SEPARATOR)
}

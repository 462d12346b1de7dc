//! Conversion between the MessageML envelope and plain message text.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::directory::DirectoryEntry;
use crate::types::RawMessage;

static MESSAGE_ML: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<messageML>(.*)</messageML>").expect("messageML pattern is valid")
});

/// An inbound chat message with its sender resolved and markup stripped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub id: String,
    pub timestamp: String,
    pub stream_id: String,
    pub sender: DirectoryEntry,
    pub text: String,
    pub raw: RawMessage,
}

pub fn decode(raw: RawMessage, sender: DirectoryEntry) -> NormalizedMessage {
    let text = match MESSAGE_ML.captures(&raw.message) {
        Some(captures) => unescape(&captures[1]),
        None => raw.message.clone(),
    };
    NormalizedMessage {
        id: raw.id.clone(),
        timestamp: raw.timestamp.clone(),
        stream_id: raw.stream_id.clone(),
        sender,
        text,
        raw,
    }
}

/// Wraps bare text in a `<messageML>` container. Text that already carries
/// the container is sent as is.
pub fn encode(text: &str) -> String {
    if is_wrapped(text) {
        return text.to_string();
    }
    format!("<messageML>{}</messageML>", escape(text))
}

/// Reply body addressed to `email` with an @-mention in front. The text
/// follows the mention tag directly.
pub fn mention_reply(email: &str, text: &str) -> String {
    format!(
        "<messageML><mention email=\"{}\"/>{}</messageML>",
        escape(email),
        escape(text)
    )
}

pub fn is_wrapped(text: &str) -> bool {
    MESSAGE_ML.is_match(text)
}

/// Replaces the five predefined XML entities.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Reverses the entity escaping done by the platform on message bodies.
pub fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

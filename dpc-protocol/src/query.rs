//! Query name grammar
//!
//! After removing the parent-domain suffix and lowercasing, a DPC query
//! name is 1-3 labels:
//!
//! ```text
//! new-session := <decimal-int>                           ; Unix nanoseconds
//! reverse     := <base36-uint> "." <id>
//! forward     := <base36-uint> "." <base32-nopad> "." <id>
//! ```
//!
//! Classification is by label count only; the content of each label is
//! parsed by the handler so that a malformed counter or payload yields a
//! name-error response rather than a silent drop.

use crate::codec::{encode_payload, format_counter};
use crate::error::{Error, Result};

/// A classified DPC request, split out of a stripped query name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// One label: a decimal Unix-nanosecond timestamp asking for a session
    NewSession { timestamp: String },
    /// Two labels: poll for upstream-to-client data
    Reverse { counter: String, id: String },
    /// Three labels: client-to-upstream data
    Forward {
        counter: String,
        payload: String,
        id: String,
    },
}

impl Request {
    /// Classify a stripped, lowercased query name by label count
    pub fn parse(stripped: &str) -> Result<Self> {
        if stripped.is_empty() {
            return Err(Error::LabelCount(0));
        }
        let labels: Vec<&str> = stripped.split('.').collect();
        match labels.as_slice() {
            [timestamp] => Ok(Request::NewSession {
                timestamp: timestamp.to_string(),
            }),
            [counter, id] => Ok(Request::Reverse {
                counter: counter.to_string(),
                id: id.to_string(),
            }),
            [counter, payload, id] => Ok(Request::Forward {
                counter: counter.to_string(),
                payload: payload.to_string(),
                id: id.to_string(),
            }),
            _ => Err(Error::LabelCount(labels.len())),
        }
    }
}

/// Strip the parent domain from a fully-qualified query name.
///
/// `parent` is the configured domain, with or without surrounding dots;
/// `qname` is the question name as it came off the wire, with its trailing
/// root dot. The match is case-insensitive. Returns the lowercased
/// remainder without a trailing dot, or `None` when the name is outside
/// the parent domain.
pub fn strip_parent(qname: &str, parent: &str) -> Option<String> {
    let suffix = format!(".{}.", parent.trim_matches('.').to_ascii_lowercase());
    let name = qname.to_ascii_lowercase();
    name.strip_suffix(&suffix).map(str::to_string)
}

/// Build the label for a new-session request
pub fn session_label(timestamp_ns: i64) -> String {
    timestamp_ns.to_string()
}

/// Build the label for a reverse poll
pub fn poll_label(counter: u64) -> String {
    format_counter(counter)
}

/// Build the labels for a forward data query
pub fn data_label(counter: u64, payload: &[u8]) -> String {
    format!("{}.{}", format_counter(counter), encode_payload(payload))
}

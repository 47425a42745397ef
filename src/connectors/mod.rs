//! Source connectors: one per upstream, each knows how to fetch its native
//! rows and normalize them into the canonical unified shape.

pub mod callrec;
pub mod chatlog;
pub mod extcall;
pub mod live;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::types::{ConversationBundle, Source};

pub use callrec::CallRecordConnector;
pub use chatlog::ChatLogConnector;
pub use extcall::ExternalCallConnector;
pub use live::LiveMessagingConnector;

/// Contract every cached-source connector implements for the sync
/// orchestrator. Implementations fail soft internally where a single row is
/// malformed (skip or degrade it); a returned error means the whole source
/// was unreachable for this run.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn source(&self) -> Source;

    /// Whether the sync run should persist this connector's message windows.
    /// Sources whose messages are always fetched live return false.
    fn caches_messages(&self) -> bool {
        true
    }

    /// Fetch the source's current conversation window, normalized.
    async fn fetch_conversations(&self) -> Result<Vec<ConversationBundle>>;
}

/// The full connector set, constructed once at startup and shared by the
/// sync orchestrator, the aggregation layer, and the message router.
pub struct Connectors {
    pub live: LiveMessagingConnector,
    pub chatlog: Arc<ChatLogConnector>,
    pub callrec: Arc<CallRecordConnector>,
    pub extcall: Arc<ExternalCallConnector>,
}

impl Connectors {
    /// Connectors whose output is written into the unified store. The live
    /// source is absent on purpose: it is read fresh on every inbox request
    /// and never persisted.
    pub fn cached(&self) -> Vec<Arc<dyn SourceConnector>> {
        vec![
            self.chatlog.clone() as Arc<dyn SourceConnector>,
            self.callrec.clone() as Arc<dyn SourceConnector>,
            self.extcall.clone() as Arc<dyn SourceConnector>,
        ]
    }
}

/// Percent-encode a value for use in a URL path or query segment.
pub(crate) fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Classify a native customer identifier as phone or email. Sources that
/// don't distinguish the two use this heuristic: contains `@` means email.
pub(crate) fn split_phone_email(identifier: &str) -> (String, String) {
    if identifier.contains('@') {
        (String::new(), identifier.to_string())
    } else {
        (identifier.to_string(), String::new())
    }
}

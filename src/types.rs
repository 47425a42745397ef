use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four conversation sources feeding the unified inbox.
///
/// Every source except [`Source::Live`] stamps its native identifier with a
/// fixed prefix, which is what the message router later dispatches on. The
/// live source is never cached, so its ids pass through unprefixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Live,
    ChatLog,
    CallRecord,
    ExternalCall,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Live => "live",
            Source::ChatLog => "chatlog",
            Source::CallRecord => "callrec",
            Source::ExternalCall => "extcall",
        }
    }

    pub fn from_tag(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Some(Source::Live),
            "chatlog" => Some(Source::ChatLog),
            "callrec" => Some(Source::CallRecord),
            "extcall" => Some(Source::ExternalCall),
            _ => None,
        }
    }

    /// Prefix stamped onto native conversation ids. The live source has none.
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Source::Live => None,
            Source::ChatLog => Some("chatlog_"),
            Source::CallRecord => Some("callrec_"),
            Source::ExternalCall => Some("extcall_"),
        }
    }

    /// Resolve the owning source from a unified conversation id.
    ///
    /// Prefixes are checked in a fixed priority order; an id with no
    /// recognized prefix belongs to the live source.
    pub fn from_conversation_id(id: &str) -> Self {
        if id.starts_with("chatlog_") {
            Source::ChatLog
        } else if id.starts_with("extcall_") {
            Source::ExternalCall
        } else if id.starts_with("callrec_") {
            Source::CallRecord
        } else {
            Source::Live
        }
    }

    /// Strip this source's prefix, recovering the native identifier.
    pub fn native_id<'a>(&self, conversation_id: &'a str) -> &'a str {
        match self.prefix() {
            Some(prefix) => conversation_id
                .strip_prefix(prefix)
                .unwrap_or(conversation_id),
            None => conversation_id,
        }
    }
}

/// Message author, collapsed from source-specific roles.
///
/// Sources that emit a "system" role (call platforms use it for call events)
/// collapse to `Assistant`; anything unrecognized collapses to `User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "assistant" | "system" => MessageRole::Assistant,
            _ => MessageRole::User,
        }
    }
}

/// Canonical conversation shape all sources normalize into.
///
/// `last_message_at` keeps whatever encoding the source produced — an
/// epoch-millisecond digit string from the live upstream or a date-time
/// string from the cached sources. Comparison always goes through
/// [`crate::aggregate::normalize_timestamp`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedConversation {
    pub conversation_id: String,
    pub source: Source,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub last_message_content: String,
    pub last_message_at: String,
    pub metadata: serde_json::Value,
}

/// Canonical message shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedMessage {
    pub conversation_id: String,
    pub message_content: String,
    pub message_role: MessageRole,
    pub created_at: DateTime<Utc>,
    pub source: Source,
    /// Opaque structured blob: tool invocation name/input/output for chat
    /// sources, call id / recording / transcript metadata for call sources.
    pub function_data: serde_json::Value,
}

/// One normalized conversation together with its current message window,
/// as produced by a connector fetch.
#[derive(Debug, Clone)]
pub struct ConversationBundle {
    pub conversation: UnifiedConversation,
    pub messages: Vec<UnifiedMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_routing_is_deterministic() {
        assert_eq!(
            Source::from_conversation_id("chatlog_abc-123"),
            Source::ChatLog
        );
        assert_eq!(
            Source::from_conversation_id("extcall_+15551234567"),
            Source::ExternalCall
        );
        assert_eq!(
            Source::from_conversation_id("callrec_xyz"),
            Source::CallRecord
        );
        assert_eq!(Source::from_conversation_id("raw-id-1"), Source::Live);
    }

    #[test]
    fn native_id_strips_only_own_prefix() {
        assert_eq!(Source::ChatLog.native_id("chatlog_abc-123"), "abc-123");
        assert_eq!(
            Source::ExternalCall.native_id("extcall_+15551234567"),
            "+15551234567"
        );
        assert_eq!(Source::Live.native_id("raw-id-1"), "raw-id-1");
    }

    #[test]
    fn roles_collapse_to_two_variants() {
        assert_eq!(MessageRole::from_str("user"), MessageRole::User);
        assert_eq!(MessageRole::from_str("assistant"), MessageRole::Assistant);
        assert_eq!(MessageRole::from_str("system"), MessageRole::Assistant);
        assert_eq!(MessageRole::from_str("customer"), MessageRole::User);
    }

    #[test]
    fn source_tags_round_trip() {
        for source in [
            Source::Live,
            Source::ChatLog,
            Source::CallRecord,
            Source::ExternalCall,
        ] {
            assert_eq!(Source::from_tag(source.as_str()), Some(source));
        }
        assert_eq!(Source::from_tag("webchat"), None);
    }
}

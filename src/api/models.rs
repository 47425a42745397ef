/// API request and response models
use serde::{Deserialize, Serialize};

use crate::aggregate::{InboxItem, SourceCounts};
use crate::routing::MessageView;

/// Query parameters for the inbox list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ListConversationsQuery {
    /// Platform tag: `all`, a source tag, or an alias tag.
    pub platform: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Query parameters for the message list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<usize>,
}

/// Inbox list response. `total` counts the full merged candidate set, not
/// just the returned page; `sources` breaks that same set down per source.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationListResponse {
    pub status: &'static str,
    pub data: Vec<InboxItem>,
    pub total: usize,
    pub sources: SourceCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageListResponse {
    pub status: &'static str,
    pub data: Vec<MessageView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResponse {
    pub status: &'static str,
    pub message: String,
}

/// Error payload. The read endpoints return this with HTTP 200 on purpose:
/// callers inspect the `status` field, not the transport code.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_carries_error_status() {
        let err = ErrorResponse::new("source unreachable");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "source unreachable");
    }

    #[test]
    fn list_response_serializes_source_counts() {
        let resp = ConversationListResponse {
            status: "success",
            data: vec![],
            total: 3,
            sources: SourceCounts {
                live: 1,
                chatlog: 2,
                callrec: 0,
                extcall: 0,
            },
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["total"], 3);
        assert_eq!(json["sources"]["chatlog"], 2);
    }
}

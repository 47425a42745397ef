//! External call-transcript API connector.
//!
//! A third-party REST API keyed by phone number. Conversation summaries are
//! synced into the unified store, but messages are always fetched live and
//! never cached, so the router calls back here on every message read.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{urlencode, SourceConnector};
use crate::types::{ConversationBundle, Source, UnifiedConversation};

/// Per-request deadline; the API has no documented SLA.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Conversation rows pulled per sync run.
const SYNC_PAGE_SIZE: usize = 100;

pub struct ExternalCallConnector {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ConversationsResponse {
    success: bool,
    conversations: Option<Vec<ConversationRow>>,
}

#[derive(Debug, Deserialize)]
struct ConversationRow {
    /// Phone-number-keyed identity.
    user_identifier: String,
    display_name: Option<String>,
    last_message_content: Option<String>,
    last_message_at: Option<String>,
    message_count: Option<i64>,
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    success: bool,
    messages: Option<Vec<ExternalCallMessage>>,
}

/// Raw message as the API returns it. The role string is kept verbatim here
/// because call detection in the router needs to see "system" before roles
/// collapse into the canonical enum.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalCallMessage {
    pub message_id: Option<String>,
    pub message_content: String,
    pub message_role: String,
    pub created_at: String,
    pub message_type: Option<String>,
    #[serde(default)]
    pub function_data: Value,
}

impl ExternalCallConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }

    /// Live message fetch for one phone-keyed identity. Limit and offset pass
    /// straight through to the API.
    pub async fn fetch_messages(
        &self,
        phone: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ExternalCallMessage>> {
        let url = format!(
            "{}/conversations/{}/messages?limit={}&offset={}",
            self.base_url,
            urlencode(phone),
            limit,
            offset
        );
        let response: MessagesResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("calling external call API for messages")?
            .json()
            .await
            .context("decoding external call messages response")?;
        if !response.success {
            return Err(anyhow!("external call API reported failure"));
        }
        Ok(response.messages.unwrap_or_default())
    }
}

#[async_trait]
impl SourceConnector for ExternalCallConnector {
    fn source(&self) -> Source {
        Source::ExternalCall
    }

    /// Messages for this source are always fetched live; only conversation
    /// summaries are cached.
    fn caches_messages(&self) -> bool {
        false
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationBundle>> {
        let url = format!(
            "{}/conversations?limit={}&offset=0",
            self.base_url, SYNC_PAGE_SIZE
        );
        let response: ConversationsResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("calling external call API for conversations")?
            .json()
            .await
            .context("decoding external call conversations response")?;
        if !response.success {
            return Err(anyhow!("external call API reported failure"));
        }

        Ok(response
            .conversations
            .unwrap_or_default()
            .into_iter()
            .map(normalize_conversation)
            .collect())
    }
}

fn normalize_conversation(row: ConversationRow) -> ConversationBundle {
    let mut metadata = match row.metadata {
        Some(Value::Object(map)) => Value::Object(map),
        _ => json!({}),
    };
    if let Value::Object(map) = &mut metadata {
        map.insert(
            "message_count".to_string(),
            json!(row.message_count.unwrap_or(0)),
        );
    }
    ConversationBundle {
        conversation: UnifiedConversation {
            conversation_id: format!("extcall_{}", row.user_identifier),
            source: Source::ExternalCall,
            customer_name: row
                .display_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| row.user_identifier.clone()),
            customer_phone: row.user_identifier,
            customer_email: String::new(),
            last_message_content: row.last_message_content.unwrap_or_default(),
            last_message_at: row.last_message_at.unwrap_or_default(),
            metadata,
        },
        messages: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_gets_prefix_and_phone() {
        let bundle = normalize_conversation(ConversationRow {
            user_identifier: "+15551234567".to_string(),
            display_name: Some("Sam".to_string()),
            last_message_content: Some("see you".to_string()),
            last_message_at: Some("2024-02-01T08:30:00Z".to_string()),
            message_count: Some(12),
            metadata: Some(json!({"region": "midwest"})),
        });
        let conv = bundle.conversation;
        assert_eq!(conv.conversation_id, "extcall_+15551234567");
        assert_eq!(conv.customer_phone, "+15551234567");
        assert_eq!(conv.customer_name, "Sam");
        assert_eq!(conv.metadata["region"], "midwest");
        assert_eq!(conv.metadata["message_count"], 12);
        assert!(bundle.messages.is_empty());
    }

    #[test]
    fn display_name_falls_back_to_identifier() {
        let bundle = normalize_conversation(ConversationRow {
            user_identifier: "+15550000000".to_string(),
            display_name: None,
            last_message_content: None,
            last_message_at: None,
            message_count: None,
            metadata: None,
        });
        assert_eq!(bundle.conversation.customer_name, "+15550000000");
    }

    #[test]
    fn phone_numbers_urlencode_for_path_segments() {
        assert_eq!(urlencode("+15551234567"), "%2B15551234567");
        assert_eq!(urlencode("plain"), "plain");
    }
}

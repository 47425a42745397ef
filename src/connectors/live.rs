//! Live messaging upstream connector.
//!
//! The one source that is never cached: the aggregation layer calls it
//! synchronously on every inbox read, and the message router calls it for
//! any conversation id without a recognized prefix.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::types::{MessageRole, Source, UnifiedConversation, UnifiedMessage};

/// Per-request deadline. The upstream publishes no SLA; without a deadline a
/// stalled call would hang the whole inbox read.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Upstream caps message pages at 100 rows regardless of what we ask for.
const MESSAGE_PAGE_CAP: usize = 100;

#[derive(Debug, Clone)]
pub struct LiveMessagingConnector {
    client: Client,
    endpoint: String,
    access_token: String,
    account_id: String,
}

#[derive(Debug, Deserialize)]
struct UpstreamEnvelope {
    status: Option<String>,
    data: Option<Vec<Value>>,
}

/// Conversation row as the upstream returns it. Ids and timestamps arrive as
/// either numbers or strings depending on upstream version, hence `Value`.
#[derive(Debug, Deserialize)]
struct LiveConversationRow {
    ms_id: Option<Value>,
    id: Option<Value>,
    full_name: Option<String>,
    profile_pic: Option<String>,
    timestamp: Option<Value>,
    last_msg: Option<String>,
    channel: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LiveMessageRow {
    message: Option<String>,
    dir: Option<Value>,
    timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MessagePart {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
    attachment: Option<PartAttachment>,
}

#[derive(Debug, Deserialize)]
struct PartAttachment {
    payload: Option<AttachmentPayload>,
}

#[derive(Debug, Deserialize)]
struct AttachmentPayload {
    url: Option<String>,
    elements: Option<Vec<AttachmentElement>>,
}

#[derive(Debug, Deserialize)]
struct AttachmentElement {
    url: Option<String>,
}

impl LiveMessagingConnector {
    pub fn new(
        endpoint: impl Into<String>,
        access_token: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            access_token: access_token.into(),
            account_id: account_id.into(),
        }
    }

    /// Fetch the upstream conversation list, optionally filtered to one
    /// channel, normalized in memory. Results are never persisted.
    pub async fn fetch_conversations(
        &self,
        channel: Option<&str>,
        limit: usize,
    ) -> Result<Vec<UnifiedConversation>> {
        let envelope = self
            .call(json!({
                "op": "conversations",
                "op1": "get",
                "account_id": self.account_id,
                "offset": 0,
                "limit": limit,
            }))
            .await?;

        let rows = envelope.data.unwrap_or_default();
        let mut out = Vec::with_capacity(rows.len());
        for (idx, value) in rows.into_iter().enumerate() {
            let row: LiveConversationRow = match serde_json::from_value(value) {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!("skipping malformed live conversation row: {}", e);
                    continue;
                }
            };
            let row_channel = value_to_string(row.channel.as_ref()).unwrap_or_default();
            if let Some(filter) = channel {
                if row_channel != filter {
                    continue;
                }
            }
            out.push(normalize_conversation(row, row_channel, idx));
        }
        Ok(out)
    }

    /// Fetch and normalize one conversation's messages, keyed by the raw
    /// upstream id. Bodies are parsed from the structured parts array.
    pub async fn fetch_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<UnifiedMessage>> {
        let envelope = self
            .call(json!({
                "op": "conversations",
                "op1": "get",
                "id": conversation_id,
                "account_id": self.account_id,
                "offset": 0,
                "limit": limit.min(MESSAGE_PAGE_CAP),
                "expand": { "comments": {}, "refs": {}, "appointments": {} },
            }))
            .await?;

        let rows = envelope.data.unwrap_or_default();
        let mut out = Vec::with_capacity(rows.len());
        for value in rows {
            let row: LiveMessageRow = match serde_json::from_value(value) {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!("skipping malformed live message row: {}", e);
                    continue;
                }
            };
            let content = render_message_parts(row.message.as_deref().unwrap_or(""));
            if content.is_empty() {
                continue;
            }
            let role = match value_to_string(row.dir.as_ref()).as_deref() {
                Some("0") => MessageRole::Assistant,
                _ => MessageRole::User,
            };
            let raw_ts = value_to_string(row.timestamp.as_ref()).unwrap_or_default();
            out.push(UnifiedMessage {
                conversation_id: conversation_id.to_string(),
                message_content: content,
                message_role: role,
                created_at: crate::aggregate::normalize_timestamp(&raw_ts),
                source: Source::Live,
                function_data: json!({}),
            });
        }
        Ok(out)
    }

    async fn call(&self, body: Value) -> Result<UpstreamEnvelope> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-ACCESS-TOKEN", &self.access_token)
            .header("User-Agent", "inbox-bridge")
            .json(&body)
            .send()
            .await
            .context("calling live messaging upstream")?;

        let envelope: UpstreamEnvelope = response
            .json()
            .await
            .context("decoding live upstream response")?;
        if envelope.status.as_deref() != Some("OK") {
            return Err(anyhow!(
                "live upstream returned status {:?}",
                envelope.status
            ));
        }
        Ok(envelope)
    }
}

fn normalize_conversation(
    row: LiveConversationRow,
    channel: String,
    idx: usize,
) -> UnifiedConversation {
    let conversation_id = value_to_string(row.ms_id.as_ref())
        .or_else(|| value_to_string(row.id.as_ref()))
        .unwrap_or_else(|| (idx + 1).to_string());
    let customer_name = row
        .full_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Guest {}", idx + 1));
    UnifiedConversation {
        conversation_id,
        source: Source::Live,
        customer_name,
        customer_phone: String::new(),
        customer_email: String::new(),
        last_message_content: row.last_msg.unwrap_or_default(),
        // Epoch-millisecond digit string; normalized at sort time.
        last_message_at: value_to_string(row.timestamp.as_ref()).unwrap_or_default(),
        metadata: json!({
            "channel": channel,
            "avatar_url": row.profile_pic.unwrap_or_default(),
        }),
    }
}

/// Flatten the upstream's structured parts array into one message body:
/// typing indicators are dropped, text parts concatenated, attachments
/// replaced by a placeholder carrying the attachment URL. An unparseable
/// array degrades to the raw string.
fn render_message_parts(raw: &str) -> String {
    let parts: Vec<MessagePart> = match serde_json::from_str(raw) {
        Ok(parts) => parts,
        Err(_) => return raw.trim().to_string(),
    };
    let mut rendered = Vec::new();
    for part in parts {
        if part.kind.as_deref() == Some("typing") {
            continue;
        }
        if let Some(text) = part.text.as_deref() {
            if !text.trim().is_empty() {
                rendered.push(text.to_string());
                continue;
            }
        }
        if let Some(payload) = part.attachment.and_then(|a| a.payload) {
            let url = payload
                .elements
                .as_ref()
                .and_then(|els| els.first())
                .and_then(|el| el.url.clone())
                .or(payload.url);
            if let Some(url) = url {
                rendered.push(format!("[media] {}", url));
            }
        }
    }
    rendered.join("\n").trim().to_string()
}

fn value_to_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_text_parts_and_skips_typing() {
        let raw = r#"[
            {"type": "typing"},
            {"type": "text", "text": "hello"},
            {"type": "text", "text": "world"}
        ]"#;
        assert_eq!(render_message_parts(raw), "hello\nworld");
    }

    #[test]
    fn renders_attachment_placeholder() {
        let raw = r#"[
            {"attachment": {"payload": {"elements": [{"url": "https://cdn.example/a.png"}]}}},
            {"attachment": {"payload": {"url": "https://cdn.example/b.png"}}}
        ]"#;
        assert_eq!(
            render_message_parts(raw),
            "[media] https://cdn.example/a.png\n[media] https://cdn.example/b.png"
        );
    }

    #[test]
    fn unparseable_parts_degrade_to_raw_text() {
        assert_eq!(render_message_parts("plain text body"), "plain text body");
        assert_eq!(render_message_parts(""), "");
    }

    #[test]
    fn conversation_row_normalization_falls_back() {
        let row = LiveConversationRow {
            ms_id: None,
            id: Some(Value::Number(42.into())),
            full_name: Some("  ".to_string()),
            profile_pic: None,
            timestamp: Some(Value::String("1696176000000".to_string())),
            last_msg: None,
            channel: Some(Value::String("9".to_string())),
        };
        let conv = normalize_conversation(row, "9".to_string(), 3);
        assert_eq!(conv.conversation_id, "42");
        assert_eq!(conv.customer_name, "Guest 4");
        assert_eq!(conv.last_message_at, "1696176000000");
        assert_eq!(conv.metadata["channel"], "9");
    }
}

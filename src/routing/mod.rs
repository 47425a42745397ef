//! Message retrieval router.
//!
//! Given a unified conversation id, dispatches to the retrieval strategy its
//! source prefix selects (fresh chat-log query, live external-call API,
//! unified store cache, or live upstream call) and applies source-specific
//! content enrichment to each returned message.

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::connectors::extcall::ExternalCallMessage;
use crate::connectors::Connectors;
use crate::store::UnifiedStore;
use crate::types::{MessageRole, Source, UnifiedMessage};

/// One rendered message as the inbox UI consumes it.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    /// Epoch milliseconds, already normalized.
    pub message_created_at: i64,
    pub message_content: String,
    pub message_role: MessageRole,
    pub function_execution_status: &'static str,
    pub function_data: Value,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
}

impl MessageView {
    fn from_unified(msg: UnifiedMessage) -> Self {
        Self {
            message_created_at: msg.created_at.timestamp_millis(),
            message_content: msg.message_content,
            message_role: msg.message_role,
            function_execution_status: "read",
            function_data: msg.function_data,
            source: msg.source,
            message_id: None,
            message_type: None,
        }
    }
}

pub struct MessageRouter {
    store: UnifiedStore,
    connectors: Arc<Connectors>,
}

impl MessageRouter {
    pub fn new(store: UnifiedStore, connectors: Arc<Connectors>) -> Self {
        Self { store, connectors }
    }

    /// Retrieve one conversation's messages via the strategy its id prefix
    /// selects.
    pub async fn messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<MessageView>> {
        match Source::from_conversation_id(conversation_id) {
            // Always fresh: bypasses the cache and queries the chat log
            // directly.
            Source::ChatLog => {
                let native = Source::ChatLog.native_id(conversation_id);
                let messages = self.connectors.chatlog.fetch_messages(native, limit)?;
                Ok(messages
                    .into_iter()
                    .map(|msg| {
                        let mut view = MessageView::from_unified(msg);
                        view.message_content =
                            render_function_call(&view.message_content, &view.function_data);
                        view
                    })
                    .collect())
            }
            // Always fresh: live call to the external API, limit passed
            // through.
            Source::ExternalCall => {
                let phone = Source::ExternalCall.native_id(conversation_id);
                let messages = self
                    .connectors
                    .extcall
                    .fetch_messages(phone, limit, 0)
                    .await?;
                Ok(messages.into_iter().map(enrich_external_call).collect())
            }
            // Cached: the store holds this source's synthesized call
            // messages.
            Source::CallRecord => {
                let messages = self.store.list_messages(conversation_id, limit)?;
                Ok(messages
                    .into_iter()
                    .map(|msg| {
                        let mut view = MessageView::from_unified(msg);
                        if is_call_message("", &view.function_data) {
                            view.message_type = Some("call".to_string());
                        }
                        view
                    })
                    .collect())
            }
            // No recognized prefix: live upstream keyed by the raw id.
            Source::Live => {
                let messages = self
                    .connectors
                    .live
                    .fetch_messages(conversation_id, limit)
                    .await?;
                Ok(messages.into_iter().map(MessageView::from_unified).collect())
            }
        }
    }
}

/// A message is a call message when its raw role is "system" or its
/// structured metadata carries a call identifier.
fn is_call_message(raw_role: &str, function_data: &Value) -> bool {
    raw_role == "system"
        || function_data
            .get("call_id")
            .map(|v| !v.is_null())
            .unwrap_or(false)
}

/// Enrich an external-call message: call messages get transcript, recording
/// URL, duration, summary, and termination reason pulled up out of their
/// metadata; everything else passes through with its native type.
fn enrich_external_call(msg: ExternalCallMessage) -> MessageView {
    let mut function_data = match msg.function_data.clone() {
        Value::Object(map) => Value::Object(map),
        _ => json!({}),
    };
    let mut message_type = msg.message_type.clone().unwrap_or_else(|| "sms".to_string());

    if is_call_message(&msg.message_role, &msg.function_data) {
        message_type = "call".to_string();
        if let Value::Object(map) = &mut function_data {
            let source = &msg.function_data;
            for (from, to) in [
                ("call_id", "call_id"),
                ("call_status", "call_status"),
                ("duration_seconds", "call_duration"),
                ("summary", "call_summary"),
                ("recording_url", "recording_url"),
                ("ended_reason", "ended_reason"),
                ("ended_at", "ended_at"),
            ] {
                if let Some(value) = source.get(from) {
                    map.insert(to.to_string(), value.clone());
                }
            }
            // The transcript is the message body itself.
            map.insert("transcript".to_string(), json!(msg.message_content));
        }
    }

    if let Value::Object(map) = &mut function_data {
        if let Some(id) = &msg.message_id {
            map.insert("message_id".to_string(), json!(id));
        }
        map.insert("message_type".to_string(), json!(message_type));
    }

    MessageView {
        message_created_at: crate::aggregate::normalize_timestamp(&msg.created_at)
            .timestamp_millis(),
        message_content: msg.message_content,
        message_role: MessageRole::from_str(&msg.message_role),
        function_execution_status: "read",
        function_data,
        source: Source::ExternalCall,
        message_id: msg.message_id,
        message_type: Some(message_type),
    }
}

/// Append a readable rendering of a tool invocation to the message body.
fn render_function_call(content: &str, function_data: &Value) -> String {
    let name = match function_data.get("function_name").and_then(|v| v.as_str()) {
        Some(name) if !name.is_empty() => name,
        _ => return content.to_string(),
    };

    let mut enhanced = format!("{}\n\nFunction call: {}", content, name);
    if let Some(input) = function_data.get("input_parameters") {
        if !input.is_null() {
            enhanced.push_str(&format!("\nInput: {}", pretty_json(input)));
        }
    }
    if let Some(output) = function_data.get("output_result") {
        if !output.is_null() {
            enhanced.push_str(&format!("\nResult: {}", pretty_json(output)));
        }
    }
    enhanced
}

/// Structured fields sometimes arrive double-encoded as JSON strings.
fn pretty_json(value: &Value) -> String {
    let parsed = match value {
        Value::String(s) => serde_json::from_str::<Value>(s).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    };
    serde_json::to_string_pretty(&parsed).unwrap_or_else(|_| parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_classification_checks_role_then_metadata() {
        assert!(is_call_message("system", &json!({})));
        assert!(is_call_message("user", &json!({"call_id": "c-1"})));
        assert!(!is_call_message("user", &json!({})));
        assert!(!is_call_message("assistant", &json!({"call_id": null})));
    }

    #[test]
    fn external_call_message_enriched_with_call_metadata() {
        let view = enrich_external_call(ExternalCallMessage {
            message_id: Some("m-7".to_string()),
            message_content: "hello, this is the transcript".to_string(),
            message_role: "system".to_string(),
            created_at: "2024-02-01T08:30:00Z".to_string(),
            message_type: None,
            function_data: json!({
                "call_id": "c-42",
                "duration_seconds": 95,
                "summary": "asked about hours",
                "recording_url": "https://rec.example/c-42.mp3",
                "ended_reason": "customer-ended-call",
            }),
        });
        assert_eq!(view.message_type.as_deref(), Some("call"));
        assert_eq!(view.message_role, MessageRole::Assistant);
        assert_eq!(view.function_data["call_id"], "c-42");
        assert_eq!(view.function_data["call_duration"], 95);
        assert_eq!(view.function_data["call_summary"], "asked about hours");
        assert_eq!(
            view.function_data["transcript"],
            "hello, this is the transcript"
        );
        assert_eq!(view.function_data["message_id"], "m-7");
    }

    #[test]
    fn plain_sms_keeps_native_type() {
        let view = enrich_external_call(ExternalCallMessage {
            message_id: None,
            message_content: "are you open today?".to_string(),
            message_role: "user".to_string(),
            created_at: "1696176000000".to_string(),
            message_type: Some("sms".to_string()),
            function_data: json!({}),
        });
        assert_eq!(view.message_type.as_deref(), Some("sms"));
        assert_eq!(view.message_role, MessageRole::User);
        assert_eq!(view.message_created_at, 1696176000000);
        assert!(view.function_data.get("transcript").is_none());
    }

    #[test]
    fn function_call_rendering_appends_io() {
        let rendered = render_function_call(
            "Looking that up",
            &json!({
                "function_name": "get_order_status",
                "input_parameters": "{\"order\":123}",
                "output_result": {"status": "shipped"},
            }),
        );
        assert!(rendered.starts_with("Looking that up"));
        assert!(rendered.contains("Function call: get_order_status"));
        assert!(rendered.contains("\"order\": 123"));
        assert!(rendered.contains("\"status\": \"shipped\""));
    }

    #[test]
    fn messages_without_function_data_pass_through() {
        assert_eq!(render_function_call("plain", &json!({})), "plain");
        assert_eq!(render_function_call("plain", &Value::Null), "plain");
    }
}

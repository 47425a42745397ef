//! Call-record database connector.
//!
//! Reads a `call_records` table populated by call-platform webhooks and
//! synthesizes a message sequence per call (call started, transcript,
//! summary, recording link). Unlike the chat log, message reads for this
//! source are served from the unified store cache.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::SourceConnector;
use crate::aggregate::normalize_timestamp;
use crate::types::{
    ConversationBundle, MessageRole, Source, UnifiedConversation, UnifiedMessage,
};

/// Sync window: calls recorded in the last 24 hours.
const CALL_QUERY: &str = "SELECT call_id, customer_phone, customer_name,
        transcript, summary,
        CAST(call_started_at AS TEXT) as call_started_at,
        CAST(call_ended_at AS TEXT) as call_ended_at,
        recording_url,
        CAST(created_at AS TEXT) as created_at
     FROM call_records
     WHERE created_at > NOW() - INTERVAL 24 HOUR
     ORDER BY call_started_at DESC";

pub struct CallRecordConnector {
    conn: Arc<Mutex<Connection>>,
}

struct RawCall {
    call_id: String,
    customer_phone: String,
    customer_name: Option<String>,
    transcript: Option<String>,
    summary: Option<String>,
    started_at: String,
    ended_at: Option<String>,
    recording_url: Option<String>,
}

impl CallRecordConnector {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).context("opening call-record database")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .expect("call-record connection mutex poisoned")
    }
}

#[async_trait]
impl SourceConnector for CallRecordConnector {
    fn source(&self) -> Source {
        Source::CallRecord
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationBundle>> {
        let raw: Vec<RawCall> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(CALL_QUERY)?;
            let mut rows = stmt.query([])?;
            let mut raw = Vec::new();
            while let Some(row) = rows.next()? {
                raw.push(RawCall {
                    call_id: row.get(0)?,
                    customer_phone: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    customer_name: row.get(2)?,
                    transcript: row.get(3)?,
                    summary: row.get(4)?,
                    started_at: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    ended_at: row.get(6)?,
                    recording_url: row.get(7)?,
                });
            }
            raw
        };

        Ok(raw.into_iter().map(normalize_call).collect())
    }
}

fn normalize_call(call: RawCall) -> ConversationBundle {
    let conversation_id = format!("callrec_{}", call.call_id);
    let started = normalize_timestamp(&call.started_at);
    let ended = call.ended_at.as_deref().map(normalize_timestamp);
    let duration_secs = ended.map(|e| (e - started).num_seconds());

    let last_message_at = call
        .ended_at
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| call.started_at.clone());

    let conversation = UnifiedConversation {
        conversation_id: conversation_id.clone(),
        source: Source::CallRecord,
        customer_name: call
            .customer_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Phone Customer".to_string()),
        customer_phone: call.customer_phone.clone(),
        customer_email: String::new(), // phone calls carry no email
        last_message_content: call
            .summary
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Phone call completed".to_string()),
        last_message_at,
        metadata: json!({
            "call_id": call.call_id,
            "recording_url": call.recording_url,
            "call_duration": duration_secs,
        }),
    };

    let messages = synthesize_messages(&conversation_id, &call, started, ended);
    ConversationBundle {
        conversation,
        messages,
    }
}

/// A call has no native message rows; render its lifecycle as a short
/// transcript-style sequence instead.
fn synthesize_messages(
    conversation_id: &str,
    call: &RawCall,
    started: DateTime<Utc>,
    ended: Option<DateTime<Utc>>,
) -> Vec<UnifiedMessage> {
    let end_ts = ended.unwrap_or(started);
    let make = |content: String, role: MessageRole, at: DateTime<Utc>| UnifiedMessage {
        conversation_id: conversation_id.to_string(),
        message_content: content,
        message_role: role,
        created_at: at,
        source: Source::CallRecord,
        function_data: json!({ "call_id": call.call_id }),
    };

    let mut messages = vec![make(
        "Phone call started".to_string(),
        MessageRole::Assistant,
        started,
    )];
    if let Some(transcript) = call.transcript.as_deref().filter(|t| !t.is_empty()) {
        messages.push(make(transcript.to_string(), MessageRole::User, started));
    }
    if let Some(summary) = call.summary.as_deref().filter(|s| !s.is_empty()) {
        messages.push(make(
            format!("Call summary: {}", summary),
            MessageRole::Assistant,
            end_ts,
        ));
    }
    if let Some(url) = call.recording_url.as_deref().filter(|u| !u.is_empty()) {
        messages.push(make(
            format!("Recording: {}", url),
            MessageRole::Assistant,
            end_ts,
        ));
    }
    messages
}

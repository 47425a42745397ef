//! Chat-log database connector.
//!
//! Reads a relational chat log owned by another system: a
//! `chatbot_conversations` table keyed by a native conversation UUID and a
//! `chatbot_messages` table that optionally carries an executed function's
//! name, input, and output per row. Synced conversations land in the unified
//! store, but message reads on the inbox side always come back here fresh.

use anyhow::{Context, Result};
use async_trait::async_trait;
use duckdb::{params, Connection};
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{split_phone_email, SourceConnector};
use crate::aggregate::normalize_timestamp;
use crate::types::{
    ConversationBundle, MessageRole, Source, UnifiedConversation, UnifiedMessage,
};

/// Sync window: conversations active in the last 30 days, capped at 50 per
/// run; per conversation the last 7 days of messages, capped at 20 rows.
/// Anything older silently ages out of the cache (replace semantics).
const CONVERSATION_QUERY: &str = "SELECT conversation_id, user_identifier,
        platform_type, CAST(conversation_started_at AS TEXT) as started_at,
        CAST(last_message_at AS TEXT) as last_message_at
     FROM chatbot_conversations
     WHERE is_active = true
       AND last_message_at > NOW() - INTERVAL 30 DAY
     ORDER BY last_message_at DESC
     LIMIT 50";

const LAST_MESSAGE_QUERY: &str = "SELECT message_content
     FROM chatbot_messages
     WHERE conversation_id = ?
     ORDER BY message_created_at DESC
     LIMIT 1";

const MESSAGE_WINDOW_QUERY: &str = "SELECT message_content, message_role,
        CAST(message_created_at AS TEXT) as created_at,
        executed_function_name, function_input_parameters, function_output_result
     FROM chatbot_messages
     WHERE conversation_id = ?
       AND message_created_at > NOW() - INTERVAL 7 DAY
     ORDER BY message_created_at ASC
     LIMIT 20";

const MESSAGE_HISTORY_QUERY: &str = "SELECT message_content, message_role,
        CAST(message_created_at AS TEXT) as created_at,
        executed_function_name, function_input_parameters, function_output_result
     FROM chatbot_messages
     WHERE conversation_id = ?
     ORDER BY message_created_at ASC
     LIMIT ?";

pub struct ChatLogConnector {
    conn: Arc<Mutex<Connection>>,
}

impl ChatLogConnector {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).context("opening chat-log database")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("chat-log connection mutex poisoned")
    }

    /// Full message history for one native conversation id, bypassing the
    /// cache. The router uses this so chat-log reads are always fresh.
    pub fn fetch_messages(&self, native_id: &str, limit: usize) -> Result<Vec<UnifiedMessage>> {
        let unified_id = format!("chatlog_{}", native_id);
        let conn = self.conn();
        let mut stmt = conn.prepare(MESSAGE_HISTORY_QUERY)?;
        let mut rows = stmt.query(params![native_id, limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(message_from_row(row, &unified_id)?);
        }
        Ok(out)
    }

    fn last_message_content(&self, native_id: &str) -> Result<String> {
        let conn = self.conn();
        let mut stmt = conn.prepare(LAST_MESSAGE_QUERY)?;
        let mut rows = stmt.query(params![native_id])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok("No messages".to_string()),
        }
    }

    fn message_window(&self, native_id: &str, unified_id: &str) -> Result<Vec<UnifiedMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(MESSAGE_WINDOW_QUERY)?;
        let mut rows = stmt.query(params![native_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(message_from_row(row, unified_id)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceConnector for ChatLogConnector {
    fn source(&self) -> Source {
        Source::ChatLog
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationBundle>> {
        struct RawConversation {
            native_id: String,
            user_identifier: String,
            platform_type: Option<String>,
            started_at: Option<String>,
            last_message_at: String,
        }

        let raw: Vec<RawConversation> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(CONVERSATION_QUERY)?;
            let mut rows = stmt.query([])?;
            let mut raw = Vec::new();
            while let Some(row) = rows.next()? {
                raw.push(RawConversation {
                    native_id: row.get(0)?,
                    user_identifier: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    platform_type: row.get(2)?,
                    started_at: row.get(3)?,
                    last_message_at: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                });
            }
            raw
        };

        let mut bundles = Vec::with_capacity(raw.len());
        for conv in raw {
            let unified_id = format!("chatlog_{}", conv.native_id);
            let last_message_content = self.last_message_content(&conv.native_id)?;
            let messages = self.message_window(&conv.native_id, &unified_id)?;
            let (customer_phone, customer_email) = split_phone_email(&conv.user_identifier);
            bundles.push(ConversationBundle {
                conversation: UnifiedConversation {
                    conversation_id: unified_id,
                    source: Source::ChatLog,
                    customer_name: format!("AI Customer {}", conv.user_identifier),
                    customer_phone,
                    customer_email,
                    last_message_content,
                    last_message_at: conv.last_message_at,
                    metadata: json!({
                        "original_id": conv.native_id,
                        "platform_type": conv.platform_type,
                        "started_at": conv.started_at,
                    }),
                },
                messages,
            });
        }
        Ok(bundles)
    }
}

fn message_from_row(row: &duckdb::Row<'_>, unified_id: &str) -> Result<UnifiedMessage> {
    let message_content: String = row.get(0)?;
    let message_role: String = row.get(1)?;
    let created_at: String = row.get(2)?;
    let function_name: Option<String> = row.get(3)?;
    let input_parameters: Option<String> = row.get(4)?;
    let output_result: Option<String> = row.get(5)?;

    let function_data = match function_name {
        Some(name) if !name.is_empty() => json!({
            "function_name": name,
            "input_parameters": input_parameters,
            "output_result": output_result,
        }),
        _ => json!({}),
    };

    Ok(UnifiedMessage {
        conversation_id: unified_id.to_string(),
        message_content,
        message_role: MessageRole::from_str(&message_role),
        created_at: normalize_timestamp(&created_at),
        source: Source::ChatLog,
        function_data,
    })
}

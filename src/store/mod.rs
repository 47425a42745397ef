pub mod migrations;

use anyhow::{Context, Result};
use duckdb::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::aggregate::normalize_timestamp;
use crate::types::{MessageRole, Source, UnifiedConversation, UnifiedMessage};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Relational cache of normalized conversations and messages for the
/// non-live sources. Only the sync orchestrator writes here; the read path
/// treats it as an eventually-consistent snapshot.
#[derive(Clone)]
pub struct UnifiedStore {
    conn: Arc<Mutex<Connection>>,
}

impl UnifiedStore {
    /// Create or open the cache database at the provided path and run migrations.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = expand_tilde(db_path.as_ref())?;
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).context("creating DB directory")?;
        }
        let conn = Connection::open(&db_path).context("opening DuckDB")?;
        migrations::run(&conn).context("running migrations")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Checkpoint the database so all WAL data reaches the main file.
    /// Call before shutdown.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch("CHECKPOINT;")
            .context("checkpointing database")
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .expect("database connection mutex poisoned")
    }

    // ---------- Conversations ----------

    /// Last-write-wins upsert keyed by `conversation_id`.
    ///
    /// All mutable scalar fields and the whole metadata blob are overwritten;
    /// there is no field-level merge, so a later run carrying sparser data
    /// erases previously known fields. `created_at` survives the conflict.
    pub fn upsert_conversation(&self, conv: &UnifiedConversation) -> Result<()> {
        let last_message_at =
            normalize_timestamp(&conv.last_message_at).format(TIMESTAMP_FORMAT).to_string();
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "INSERT INTO unified_conversations (
                conversation_id, source, customer_name, customer_phone, customer_email,
                last_message_content, last_message_at, updated_at, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, ?)
            ON CONFLICT (conversation_id) DO UPDATE SET
                source = EXCLUDED.source,
                customer_name = EXCLUDED.customer_name,
                customer_phone = EXCLUDED.customer_phone,
                customer_email = EXCLUDED.customer_email,
                last_message_content = EXCLUDED.last_message_content,
                last_message_at = EXCLUDED.last_message_at,
                updated_at = EXCLUDED.updated_at,
                metadata = EXCLUDED.metadata",
        )?;
        stmt.execute(params![
            conv.conversation_id,
            conv.source.as_str(),
            conv.customer_name,
            conv.customer_phone,
            conv.customer_email,
            conv.last_message_content,
            last_message_at,
            conv.metadata.to_string(),
        ])?;
        Ok(())
    }

    /// List cached conversations, newest last message first, optionally
    /// filtered to a single source.
    pub fn list_conversations(
        &self,
        source: Option<Source>,
        limit: usize,
    ) -> Result<Vec<UnifiedConversation>> {
        let conn = self.conn();
        let base = "SELECT conversation_id, source, customer_name, customer_phone, customer_email,
                    last_message_content, CAST(last_message_at AS TEXT) as last_message_at, metadata
             FROM unified_conversations";
        let mut out = Vec::new();
        let mut read_rows = |rows: &mut duckdb::Rows<'_>| -> Result<()> {
            while let Some(row) = rows.next()? {
                out.push(conversation_from_row(row)?);
            }
            Ok(())
        };
        match source {
            Some(source) => {
                let sql = format!(
                    "{base} WHERE source = ? ORDER BY last_message_at DESC LIMIT ?"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params![source.as_str(), limit as i64])?;
                read_rows(&mut rows)?;
            }
            None => {
                let sql = format!("{base} ORDER BY last_message_at DESC LIMIT ?");
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params![limit as i64])?;
                read_rows(&mut rows)?;
            }
        }
        Ok(out)
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Option<UnifiedConversation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT conversation_id, source, customer_name, customer_phone, customer_email,
                    last_message_content, CAST(last_message_at AS TEXT) as last_message_at, metadata
             FROM unified_conversations WHERE conversation_id = ?",
        )?;
        let mut rows = stmt.query(params![conversation_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(conversation_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn count_conversations(&self, source: Option<Source>) -> Result<i64> {
        let conn = self.conn();
        match source {
            Some(source) => {
                let mut stmt =
                    conn.prepare("SELECT COUNT(*) FROM unified_conversations WHERE source = ?")?;
                Ok(stmt.query_row(params![source.as_str()], |row| row.get(0))?)
            }
            None => {
                let mut stmt = conn.prepare("SELECT COUNT(*) FROM unified_conversations")?;
                Ok(stmt.query_row([], |row| row.get(0))?)
            }
        }
    }

    // ---------- Messages ----------

    /// Replace the conversation's whole message set with the given window.
    ///
    /// Delete-then-reinsert inside one transaction: no duplicate accumulation
    /// across sync runs, but rows outside the source's current query window
    /// disappear from the cache.
    pub fn replace_messages(
        &self,
        conversation_id: &str,
        messages: &[UnifiedMessage],
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch("BEGIN TRANSACTION;")?;
        {
            let mut del =
                conn.prepare("DELETE FROM unified_messages WHERE conversation_id = ?")?;
            let _ = del.execute(params![conversation_id])?;
            let mut ins = conn.prepare(
                "INSERT INTO unified_messages (
                    conversation_id, message_content, message_role, created_at, source, function_data
                ) VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            for msg in messages {
                ins.execute(params![
                    conversation_id,
                    msg.message_content,
                    msg.message_role.as_str(),
                    msg.created_at.format(TIMESTAMP_FORMAT).to_string(),
                    msg.source.as_str(),
                    msg.function_data.to_string(),
                ])?;
            }
        }
        conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    /// Cached messages for one conversation, oldest first.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<UnifiedMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT conversation_id, message_content, message_role,
                    CAST(created_at AS TEXT) as created_at, source, function_data
             FROM unified_messages
             WHERE conversation_id = ?
             ORDER BY created_at ASC
             LIMIT ?",
        )?;
        let mut rows = stmt.query(params![conversation_id, limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let conversation_id: String = row.get(0)?;
            let message_content: String = row.get(1)?;
            let message_role: String = row.get(2)?;
            let created_at: String = row.get(3)?;
            let source: String = row.get(4)?;
            let function_data: String = row.get(5)?;
            out.push(UnifiedMessage {
                conversation_id,
                message_content,
                message_role: MessageRole::from_str(&message_role),
                created_at: normalize_timestamp(&created_at),
                source: Source::from_tag(&source).unwrap_or(Source::Live),
                function_data: serde_json::from_str(&function_data)
                    .unwrap_or(serde_json::Value::Null),
            });
        }
        Ok(out)
    }

    pub fn count_messages(&self, conversation_id: &str) -> Result<i64> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT COUNT(*) FROM unified_messages WHERE conversation_id = ?")?;
        Ok(stmt.query_row(params![conversation_id], |row| row.get(0))?)
    }
}

fn conversation_from_row(row: &duckdb::Row<'_>) -> Result<UnifiedConversation> {
    let conversation_id: String = row.get(0)?;
    let source: String = row.get(1)?;
    let customer_name: Option<String> = row.get(2)?;
    let customer_phone: Option<String> = row.get(3)?;
    let customer_email: Option<String> = row.get(4)?;
    let last_message_content: Option<String> = row.get(5)?;
    let last_message_at: Option<String> = row.get(6)?;
    let metadata: Option<String> = row.get(7)?;
    Ok(UnifiedConversation {
        conversation_id,
        source: Source::from_tag(&source).unwrap_or(Source::Live),
        customer_name: customer_name.unwrap_or_default(),
        customer_phone: customer_phone.unwrap_or_default(),
        customer_email: customer_email.unwrap_or_default(),
        last_message_content: last_message_content.unwrap_or_default(),
        last_message_at: last_message_at.unwrap_or_default(),
        metadata: metadata
            .as_deref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or(serde_json::Value::Null),
    })
}

fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if path_str == "~" {
        let base = directories::BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().to_path_buf())
    } else if let Some(stripped) = path_str.strip_prefix("~/") {
        let base = directories::BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn expands_home_directory_prefix() {
        let base = directories::BaseDirs::new().expect("home directory available");
        let expected = base.home_dir().join("demo.db");
        let result = expand_tilde(Path::new("~/demo.db")).expect("path expansion succeeds");
        assert_eq!(result, expected);
    }

    #[test]
    fn leaves_regular_paths_unchanged() {
        let input = Path::new("relative/path.db");
        let result = expand_tilde(input).expect("path expansion succeeds");
        assert_eq!(result, input);
    }
}

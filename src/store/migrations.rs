use anyhow::{Context, Result};
use duckdb::Connection;

pub fn run(conn: &Connection) -> Result<()> {
    // Simple migration system: ensure a schema version table and apply migrations sequentially.
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .context("creating schema_migrations table")?;

    let current = current_version(conn)?;
    let mut migrations_applied = false;

    if current < 1 {
        apply_v1(conn)?;
        set_version(conn, 1)?;
        migrations_applied = true;
    }

    // Force checkpoint after migrations so DDL is not left sitting in the WAL,
    // which can break WAL replay on subsequent startups.
    if migrations_applied {
        conn.execute_batch("FORCE CHECKPOINT;")
            .context("forcing checkpoint after migrations")?;
    }

    Ok(())
}

fn current_version(conn: &Connection) -> Result<i64> {
    let mut stmt = conn.prepare("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")?;
    let v: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(v)
}

fn set_version(conn: &Connection, v: i64) -> Result<()> {
    conn.execute("INSERT INTO schema_migrations (version) VALUES (?)", [v])?;
    Ok(())
}

fn apply_v1(conn: &Connection) -> Result<()> {
    // Unified cache tables: one row per conversation keyed by the prefixed
    // conversation id, plus the per-conversation message window.
    conn.execute_batch(
        r#"
        CREATE SEQUENCE IF NOT EXISTS unified_messages_id_seq START 1;

        CREATE TABLE IF NOT EXISTS unified_conversations (
            conversation_id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            customer_name TEXT,
            customer_phone TEXT,
            customer_email TEXT,
            last_message_content TEXT,
            last_message_at TIMESTAMP,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            metadata TEXT DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS unified_messages (
            id BIGINT PRIMARY KEY DEFAULT nextval('unified_messages_id_seq'),
            conversation_id TEXT NOT NULL,
            message_content TEXT NOT NULL,
            message_role TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL,
            source TEXT NOT NULL,
            function_data TEXT DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_unified_conversations_source ON unified_conversations(source);
        CREATE INDEX IF NOT EXISTS idx_unified_conversations_updated ON unified_conversations(updated_at);
        CREATE INDEX IF NOT EXISTS idx_unified_messages_conversation ON unified_messages(conversation_id);
        "#,
    )
    .context("applying v1 schema (unified cache tables)")?;

    Ok(())
}

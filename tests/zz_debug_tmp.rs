use std::sync::Arc;
use std::time::Duration;

use duckdb::Connection;
use inbox_bridge::connectors::{
    CallRecordConnector, ChatLogConnector, Connectors, ExternalCallConnector,
    LiveMessagingConnector,
};
use inbox_bridge::store::UnifiedStore;
use inbox_bridge::sync::SyncOrchestrator;
use tempfile::tempdir;

fn temp_db_path(name: &str) -> std::path::PathBuf {
    let dir = tempdir().unwrap();
    let path = dir.path().join(name);
    Box::leak(Box::new(dir));
    path
}

fn seed_chatlog(path: &std::path::Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE chatbot_conversations (
            conversation_id TEXT,
            user_identifier TEXT,
            platform_type TEXT,
            conversation_started_at TIMESTAMP,
            last_message_at TIMESTAMP,
            is_active BOOLEAN
        );
        CREATE TABLE chatbot_messages (
            conversation_id TEXT,
            message_content TEXT,
            message_role TEXT,
            message_created_at TIMESTAMP,
            executed_function_name TEXT,
            function_input_parameters TEXT,
            function_output_result TEXT
        );
        INSERT INTO chatbot_conversations VALUES
            ('conv-1', 'jane@example.com', 'web',
             NOW()::TIMESTAMP - INTERVAL 2 HOUR,
             NOW()::TIMESTAMP - INTERVAL 5 MINUTE, true);",
    )
    .unwrap();
}

fn seed_callrec(path: &std::path::Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE call_records (
            call_id TEXT,
            customer_phone TEXT,
            customer_name TEXT,
            transcript TEXT,
            summary TEXT,
            call_started_at TIMESTAMP,
            call_ended_at TIMESTAMP,
            recording_url TEXT,
            created_at TIMESTAMP
        );
        INSERT INTO call_records VALUES
            ('call-77', '+15550002222', 'Bob', 'asked about hours',
             'Hours inquiry',
             NOW()::TIMESTAMP - INTERVAL 30 MINUTE,
             NOW()::TIMESTAMP - INTERVAL 25 MINUTE,
             'https://rec.example/call-77.mp3',
             NOW()::TIMESTAMP - INTERVAL 25 MINUTE);",
    )
    .unwrap();
}

#[tokio::test]
async fn debug_report() {
    let chatlog_path = temp_db_path("chatlog.duckdb");
    let callrec_path = temp_db_path("callrec.duckdb");
    seed_chatlog(&chatlog_path);
    seed_callrec(&callrec_path);

    let connectors = Arc::new(Connectors {
        live: LiveMessagingConnector::new("http://127.0.0.1:9/api/", "token", "acct"),
        chatlog: Arc::new(ChatLogConnector::new(&chatlog_path).unwrap()),
        callrec: Arc::new(CallRecordConnector::new(&callrec_path).unwrap()),
        extcall: Arc::new(ExternalCallConnector::new("http://127.0.0.1:9")),
    });
    let store = UnifiedStore::new(temp_db_path("unified.duckdb")).unwrap();
    let orchestrator = SyncOrchestrator::new(store, connectors, Duration::from_secs(300));
    let report = orchestrator.run_once().await;
    for (source, err) in &report.failed {
        println!("FAILED {}: {}", source.as_str(), err);
    }
    for (source, n) in &report.synced {
        println!("SYNCED {}: {}", source.as_str(), n);
    }
}

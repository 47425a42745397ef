use chrono::{TimeZone, Utc};
use inbox_bridge::store::UnifiedStore;
use inbox_bridge::types::{MessageRole, Source, UnifiedConversation, UnifiedMessage};
use serde_json::json;
use tempfile::tempdir;

fn temp_db_path() -> std::path::PathBuf {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.duckdb");
    // Keep directory alive by leaking it for test duration to avoid drop before use
    Box::leak(Box::new(dir));
    path
}

fn conversation(id: &str, source: Source, last_at: &str) -> UnifiedConversation {
    UnifiedConversation {
        conversation_id: id.to_string(),
        source,
        customer_name: "Jane".to_string(),
        customer_phone: "+15550001111".to_string(),
        customer_email: String::new(),
        last_message_content: "hello".to_string(),
        last_message_at: last_at.to_string(),
        metadata: json!({"original_id": "n-1"}),
    }
}

fn message(conversation_id: &str, content: &str, secs: i64) -> UnifiedMessage {
    UnifiedMessage {
        conversation_id: conversation_id.to_string(),
        message_content: content.to_string(),
        message_role: MessageRole::User,
        created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        source: Source::ChatLog,
        function_data: json!({}),
    }
}

#[test]
fn store_initializes_empty() {
    let store = UnifiedStore::new(temp_db_path()).expect("init db");
    assert_eq!(store.count_conversations(None).unwrap(), 0);
    assert_eq!(store.count_messages("chatlog_x").unwrap(), 0);
}

#[test]
fn upsert_is_idempotent() {
    let store = UnifiedStore::new(temp_db_path()).unwrap();
    let conv = conversation("chatlog_abc", Source::ChatLog, "2024-03-01T10:00:00Z");

    store.upsert_conversation(&conv).unwrap();
    store.upsert_conversation(&conv).unwrap();

    assert_eq!(store.count_conversations(None).unwrap(), 1);
    let stored = store.get_conversation("chatlog_abc").unwrap().unwrap();
    assert_eq!(stored.customer_name, "Jane");
    assert_eq!(stored.source, Source::ChatLog);
}

#[test]
fn upsert_overwrites_all_mutable_fields() {
    let store = UnifiedStore::new(temp_db_path()).unwrap();
    store
        .upsert_conversation(&conversation(
            "chatlog_abc",
            Source::ChatLog,
            "2024-03-01T10:00:00Z",
        ))
        .unwrap();

    // A later run carrying sparser data wins wholesale: metadata is
    // replaced, not merged.
    let mut sparse = conversation("chatlog_abc", Source::ChatLog, "2024-03-02T10:00:00Z");
    sparse.customer_name = "Jane D.".to_string();
    sparse.metadata = json!({});
    store.upsert_conversation(&sparse).unwrap();

    let stored = store.get_conversation("chatlog_abc").unwrap().unwrap();
    assert_eq!(stored.customer_name, "Jane D.");
    assert!(stored.metadata.get("original_id").is_none());
}

#[test]
fn replace_messages_replaces_not_appends() {
    let store = UnifiedStore::new(temp_db_path()).unwrap();
    let id = "chatlog_abc";
    store
        .upsert_conversation(&conversation(id, Source::ChatLog, "2024-03-01T10:00:00Z"))
        .unwrap();

    store
        .replace_messages(
            id,
            &[message(id, "one", 1_000), message(id, "two", 2_000)],
        )
        .unwrap();
    assert_eq!(store.count_messages(id).unwrap(), 2);

    // Shifted window: only the rows in the new window survive.
    store
        .replace_messages(
            id,
            &[message(id, "two", 2_000), message(id, "three", 3_000)],
        )
        .unwrap();
    assert_eq!(store.count_messages(id).unwrap(), 2);

    let contents: Vec<String> = store
        .list_messages(id, 10)
        .unwrap()
        .into_iter()
        .map(|m| m.message_content)
        .collect();
    assert_eq!(contents, vec!["two", "three"]);

    // Empty window wipes the cache for this conversation.
    store.replace_messages(id, &[]).unwrap();
    assert_eq!(store.count_messages(id).unwrap(), 0);
}

#[test]
fn conversations_list_newest_first_across_formats() {
    let store = UnifiedStore::new(temp_db_path()).unwrap();
    // Mixed input encodings: RFC3339, epoch millis, SQL timestamp. All are
    // normalized at write time so ordering is by instant, not by string.
    store
        .upsert_conversation(&conversation(
            "chatlog_old",
            Source::ChatLog,
            "2023-10-01T12:00:00Z",
        ))
        .unwrap();
    store
        .upsert_conversation(&conversation(
            "extcall_mid",
            Source::ExternalCall,
            "1696176000000", // 2023-10-01T16:00:00Z
        ))
        .unwrap();
    store
        .upsert_conversation(&conversation(
            "callrec_new",
            Source::CallRecord,
            "2023-10-02 09:00:00",
        ))
        .unwrap();

    let ids: Vec<String> = store
        .list_conversations(None, 10)
        .unwrap()
        .into_iter()
        .map(|c| c.conversation_id)
        .collect();
    assert_eq!(ids, vec!["callrec_new", "extcall_mid", "chatlog_old"]);
}

#[test]
fn conversations_filter_by_source() {
    let store = UnifiedStore::new(temp_db_path()).unwrap();
    store
        .upsert_conversation(&conversation(
            "chatlog_a",
            Source::ChatLog,
            "2024-03-01T10:00:00Z",
        ))
        .unwrap();
    store
        .upsert_conversation(&conversation(
            "callrec_b",
            Source::CallRecord,
            "2024-03-01T11:00:00Z",
        ))
        .unwrap();

    let only_calls = store
        .list_conversations(Some(Source::CallRecord), 10)
        .unwrap();
    assert_eq!(only_calls.len(), 1);
    assert_eq!(only_calls[0].conversation_id, "callrec_b");
    assert_eq!(store.count_conversations(Some(Source::ChatLog)).unwrap(), 1);
}

#[test]
fn messages_list_oldest_first_with_limit() {
    let store = UnifiedStore::new(temp_db_path()).unwrap();
    let id = "callrec_c1";
    store
        .upsert_conversation(&conversation(id, Source::CallRecord, "2024-03-01T10:00:00Z"))
        .unwrap();
    store
        .replace_messages(
            id,
            &[
                message(id, "third", 3_000),
                message(id, "first", 1_000),
                message(id, "second", 2_000),
            ],
        )
        .unwrap();

    let all = store.list_messages(id, 10).unwrap();
    let contents: Vec<&str> = all.iter().map(|m| m.message_content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);

    let limited = store.list_messages(id, 2).unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].message_content, "first");
}

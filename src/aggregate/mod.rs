//! Aggregation and sort layer.
//!
//! On each inbox read this merges a fresh call to the live connector with
//! cached rows from the unified store, normalizes every timestamp to one
//! comparable instant, sorts descending, and slices the requested page.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::connectors::{urlencode, Connectors};
use crate::store::UnifiedStore;
use crate::types::{Source, UnifiedConversation};

/// Per-source row cap applied before merging. Pagination past this cap can
/// drop rows from a source holding more than the cap, and `total` reflects
/// the capped merge rather than the true global count. Preserved behavior —
/// do not "fix" by raising or removing the cap.
pub const SOURCE_ROW_CAP: usize = 200;

/// Normalize the two timestamp encodings that reach the merge: an all-digit
/// string is epoch milliseconds (live upstream), anything else is parsed as
/// a date/time string (cached sources). Unparseable input pins to the epoch
/// so it sorts last rather than erroring the read path.
pub fn normalize_timestamp(raw: &str) -> DateTime<Utc> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DateTime::UNIX_EPOCH;
    }
    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return trimmed
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(DateTime::UNIX_EPOCH);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return naive.and_utc();
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return naive.and_utc();
        }
    }
    DateTime::UNIX_EPOCH
}

/// Parsed `platform` query tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformFilter {
    /// No source filter.
    All,
    /// Exactly one source.
    Source(Source),
    /// The live source restricted to one upstream channel.
    LiveChannel(&'static str),
    /// Unrecognized tag: matches nothing.
    Unknown,
}

impl PlatformFilter {
    /// UI-facing tags, including alias tags that resolve to one underlying
    /// source ("sms", "calls", "rural" all mean the external-call source) and
    /// channel tags that narrow the live source.
    pub fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "" | "all" => PlatformFilter::All,
            "sms" | "calls" | "rural" => PlatformFilter::Source(Source::ExternalCall),
            "webchat" => PlatformFilter::LiveChannel("9"),
            "facebook" => PlatformFilter::LiveChannel("0"),
            "instagram" => PlatformFilter::LiveChannel("10"),
            other => match Source::from_tag(other) {
                Some(source) => PlatformFilter::Source(source),
                None => PlatformFilter::Unknown,
            },
        }
    }

    fn includes_live(&self) -> bool {
        matches!(
            self,
            PlatformFilter::All
                | PlatformFilter::Source(Source::Live)
                | PlatformFilter::LiveChannel(_)
        )
    }

    fn live_channel(&self) -> Option<&'static str> {
        match self {
            PlatformFilter::LiveChannel(channel) => Some(channel),
            _ => None,
        }
    }

    /// `None` means skip the cache entirely; `Some(None)` means all cached
    /// sources; `Some(Some(s))` means one cached source.
    fn cached_filter(&self) -> Option<Option<Source>> {
        match self {
            PlatformFilter::All => Some(None),
            PlatformFilter::Source(Source::Live) => None,
            PlatformFilter::Source(source) => Some(Some(*source)),
            PlatformFilter::LiveChannel(_) => None,
            PlatformFilter::Unknown => None,
        }
    }
}

/// One row of the inbox list: the canonical conversation plus the display
/// fields the UI renders directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxItem {
    pub conversation_id: String,
    pub display_name: String,
    pub username: String,
    pub user_identifier: String,
    pub avatar_url: String,
    pub last_message_at: String,
    pub last_message_content: String,
    #[serde(rename = "_platform")]
    pub platform: String,
    pub channel: String,
    pub source: Source,
    pub metadata: serde_json::Value,
}

/// Per-source row counts over the entire merged candidate set (not just the
/// returned page). The four fields sum to `total`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceCounts {
    pub live: usize,
    pub chatlog: usize,
    pub callrec: usize,
    pub extcall: usize,
}

impl SourceCounts {
    pub fn sum(&self) -> usize {
        self.live + self.chatlog + self.callrec + self.extcall
    }

    fn record(&mut self, source: Source) {
        match source {
            Source::Live => self.live += 1,
            Source::ChatLog => self.chatlog += 1,
            Source::CallRecord => self.callrec += 1,
            Source::ExternalCall => self.extcall += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InboxPage {
    pub items: Vec<InboxItem>,
    pub total: usize,
    pub sources: SourceCounts,
}

pub struct Aggregator {
    store: UnifiedStore,
    connectors: Arc<Connectors>,
}

impl Aggregator {
    pub fn new(store: UnifiedStore, connectors: Arc<Connectors>) -> Self {
        Self { store, connectors }
    }

    /// Serve one inbox page. A failing side (live upstream down, cache
    /// unreadable) degrades to zero rows from that side rather than failing
    /// the request.
    pub async fn list(&self, filter: &PlatformFilter, limit: usize, offset: usize) -> InboxPage {
        let mut merged: Vec<InboxItem> = Vec::new();

        if filter.includes_live() {
            match self
                .connectors
                .live
                .fetch_conversations(filter.live_channel(), SOURCE_ROW_CAP)
                .await
            {
                Ok(rows) => merged.extend(rows.into_iter().map(inbox_item)),
                Err(e) => tracing::warn!("live source unavailable for inbox read: {}", e),
            }
        }

        if let Some(source) = filter.cached_filter() {
            match self.store.list_conversations(source, SOURCE_ROW_CAP) {
                Ok(rows) => merged.extend(rows.into_iter().map(inbox_item)),
                Err(e) => tracing::warn!("unified store unavailable for inbox read: {}", e),
            }
        }

        paginate(merged, limit, offset)
    }
}

/// Sort the merged candidate set descending by normalized instant and slice
/// the page. `total` and the per-source counts cover the whole merged set.
/// The sort is stable, so ties keep their relative input order.
pub fn paginate(mut merged: Vec<InboxItem>, limit: usize, offset: usize) -> InboxPage {
    merged.sort_by_key(|item| std::cmp::Reverse(normalize_timestamp(&item.last_message_at)));

    let total = merged.len();
    let mut sources = SourceCounts::default();
    for item in &merged {
        sources.record(item.source);
    }

    let items = merged
        .into_iter()
        .skip(offset)
        .take(limit)
        .collect();

    InboxPage {
        items,
        total,
        sources,
    }
}

/// Display enrichment: icon-prefixed display name, per-source defaults, a
/// deterministic identicon avatar, and the channel number the UI expects.
pub fn inbox_item(conv: UnifiedConversation) -> InboxItem {
    let source = conv.source;
    let name = if conv.customer_name.trim().is_empty() {
        default_customer_name(source).to_string()
    } else {
        conv.customer_name.clone()
    };
    let avatar_url = conv
        .metadata
        .get("avatar_url")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "https://api.dicebear.com/7.x/identicon/svg?seed={}",
                urlencode(&conv.conversation_id)
            )
        });
    let channel = conv
        .metadata
        .get("channel")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| channel_number(source).to_string());

    InboxItem {
        display_name: format!("{} {}", source_icon(source), name),
        username: name,
        user_identifier: conv.conversation_id.clone(),
        conversation_id: conv.conversation_id,
        avatar_url,
        last_message_at: conv.last_message_at,
        last_message_content: conv.last_message_content,
        platform: platform_label(source).to_string(),
        channel,
        source,
        metadata: conv.metadata,
    }
}

fn source_icon(source: Source) -> &'static str {
    match source {
        Source::Live => "💬",
        Source::ChatLog => "📝",
        Source::CallRecord => "📞",
        Source::ExternalCall => "📱",
    }
}

fn default_customer_name(source: Source) -> &'static str {
    match source {
        Source::Live => "Live Chat Customer",
        Source::ChatLog => "Chat Log Customer",
        Source::CallRecord => "Phone Customer",
        Source::ExternalCall => "SMS Customer",
    }
}

fn platform_label(source: Source) -> &'static str {
    match source {
        Source::Live => "Live Chat",
        Source::ChatLog => "Chat Log",
        Source::CallRecord => "Calls",
        Source::ExternalCall => "SMS & Calls",
    }
}

fn channel_number(source: Source) -> &'static str {
    match source {
        Source::Live => "9",
        Source::ChatLog => "9",
        Source::CallRecord => "11",
        Source::ExternalCall => "12",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conv(id: &str, source: Source, last_at: &str) -> UnifiedConversation {
        UnifiedConversation {
            conversation_id: id.to_string(),
            source,
            customer_name: "Test".to_string(),
            customer_phone: String::new(),
            customer_email: String::new(),
            last_message_content: String::new(),
            last_message_at: last_at.to_string(),
            metadata: json!({}),
        }
    }

    #[test]
    fn digit_strings_parse_as_epoch_millis() {
        let a = normalize_timestamp("1696176000000");
        let b = normalize_timestamp("2023-10-01T12:00:00Z");
        // 1696176000000 ms = 2023-10-01T16:00:00Z, later than noon
        assert!(a > b);
    }

    #[test]
    fn sql_timestamps_and_bare_dates_parse() {
        let a = normalize_timestamp("2023-10-01 12:00:00.000000");
        let b = normalize_timestamp("2023-10-01T12:00:00Z");
        assert_eq!(a, b);
        let midnight = normalize_timestamp("2023-10-01");
        assert!(midnight < b);
    }

    #[test]
    fn garbage_timestamps_pin_to_epoch() {
        assert_eq!(normalize_timestamp("not a time"), DateTime::UNIX_EPOCH);
        assert_eq!(normalize_timestamp(""), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn filter_parses_aliases_and_channels() {
        assert_eq!(PlatformFilter::parse("all"), PlatformFilter::All);
        assert_eq!(
            PlatformFilter::parse("sms"),
            PlatformFilter::Source(Source::ExternalCall)
        );
        assert_eq!(
            PlatformFilter::parse("calls"),
            PlatformFilter::Source(Source::ExternalCall)
        );
        assert_eq!(
            PlatformFilter::parse("webchat"),
            PlatformFilter::LiveChannel("9")
        );
        assert_eq!(
            PlatformFilter::parse("chatlog"),
            PlatformFilter::Source(Source::ChatLog)
        );
        assert_eq!(PlatformFilter::parse("smoke-signal"), PlatformFilter::Unknown);
    }

    #[test]
    fn pages_sort_descending_across_formats() {
        let merged: Vec<InboxItem> = vec![
            inbox_item(conv("a", Source::ChatLog, "2023-10-01T12:00:00Z")),
            inbox_item(conv("b", Source::Live, "1696176000000")),
            inbox_item(conv("c", Source::CallRecord, "2023-10-02 09:00:00")),
        ];
        let page = paginate(merged, 10, 0);
        let ids: Vec<&str> = page.items.iter().map(|i| i.conversation_id.as_str()).collect();
        // 2023-10-02 09:00 > 2023-10-01 16:00 (epoch ms) > 2023-10-01 12:00
        assert_eq!(ids, vec!["c", "b", "a"]);
        for pair in page.items.windows(2) {
            assert!(
                normalize_timestamp(&pair[0].last_message_at)
                    >= normalize_timestamp(&pair[1].last_message_at)
            );
        }
    }

    #[test]
    fn total_and_counts_cover_the_whole_merge() {
        let merged: Vec<InboxItem> = (0..7)
            .map(|i| {
                let source = if i % 2 == 0 { Source::ChatLog } else { Source::ExternalCall };
                inbox_item(conv(&format!("c{i}"), source, "2024-01-01T00:00:00Z"))
            })
            .collect();
        let page = paginate(merged, 2, 1);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 7);
        assert_eq!(page.sources.chatlog, 4);
        assert_eq!(page.sources.extcall, 3);
        assert_eq!(page.sources.sum(), page.total);
    }

    #[test]
    fn ties_keep_input_order() {
        let merged: Vec<InboxItem> = vec![
            inbox_item(conv("first", Source::ChatLog, "2024-01-01T00:00:00Z")),
            inbox_item(conv("second", Source::ChatLog, "2024-01-01T00:00:00Z")),
        ];
        let page = paginate(merged, 10, 0);
        assert_eq!(page.items[0].conversation_id, "first");
        assert_eq!(page.items[1].conversation_id, "second");
    }

    #[test]
    fn display_enrichment_fills_defaults() {
        let mut c = conv("callrec_x", Source::CallRecord, "2024-01-01T00:00:00Z");
        c.customer_name = String::new();
        let item = inbox_item(c);
        assert_eq!(item.username, "Phone Customer");
        assert!(item.display_name.starts_with("📞"));
        assert_eq!(item.channel, "11");
        assert!(item.avatar_url.contains("seed=callrec_x"));
    }
}

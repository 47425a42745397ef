/// API request handlers
use crate::aggregate::{Aggregator, PlatformFilter};
use crate::api::models::*;
use crate::routing::MessageRouter;
use crate::sync::SyncOrchestrator;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_CONVERSATION_LIMIT: usize = 25;
const MAX_CONVERSATION_LIMIT: usize = 500;
const DEFAULT_MESSAGE_LIMIT: usize = 200;
const MAX_MESSAGE_LIMIT: usize = 1000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub router: Arc<MessageRouter>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        aggregator: Arc<Aggregator>,
        router: Arc<MessageRouter>,
        orchestrator: Arc<SyncOrchestrator>,
    ) -> Self {
        Self {
            aggregator,
            router,
            orchestrator,
            start_time: Instant::now(),
        }
    }
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    };

    Json(response)
}

/// List the unified inbox, filtered and paginated.
///
/// Never fails at the transport level: a side that cannot be read (live
/// upstream down, cache unreadable) contributes zero rows and the rest of
/// the inbox still renders.
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
) -> Response {
    let filter = PlatformFilter::parse(query.platform.as_deref().unwrap_or(""));
    let limit = clamp_limit(query.limit, DEFAULT_CONVERSATION_LIMIT, MAX_CONVERSATION_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let page = state.aggregator.list(&filter, limit, offset).await;
    Json(ConversationListResponse {
        status: "success",
        data: page.items,
        total: page.total,
        sources: page.sources,
    })
    .into_response()
}

/// List one conversation's messages via the prefix-selected strategy.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Response {
    let limit = clamp_limit(query.limit, DEFAULT_MESSAGE_LIMIT, MAX_MESSAGE_LIMIT);

    match state.router.messages(&conversation_id, limit).await {
        Ok(messages) => Json(MessageListResponse {
            status: "success",
            data: messages,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(
                "message retrieval for {} failed: {:#}",
                conversation_id,
                e
            );
            Json(ErrorResponse::new(format!("{:#}", e))).into_response()
        }
    }
}

/// Trigger a manual sync run. Partial failures still count as success;
/// only a run where every source failed is a server error.
pub async fn trigger_sync(State(state): State<AppState>) -> Response {
    let report = state.orchestrator.run_once().await;

    if report.all_failed() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(report.summary())),
        )
            .into_response();
    }

    Json(SyncResponse {
        status: "success",
        message: report.summary(),
    })
    .into_response()
}

fn clamp_limit(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max)
}

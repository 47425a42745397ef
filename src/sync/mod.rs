//! Sync orchestrator.
//!
//! Owns the lifecycle of the cached-source connectors: an immediate sync on
//! startup, a recurring interval sync, and manual runs triggered over the
//! API. Runs are deliberately not serialized against each other — two
//! overlapping runs resolve through the store's last-write-wins upsert.

use anyhow::Result;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::connectors::{Connectors, SourceConnector};
use crate::store::UnifiedStore;
use crate::types::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Outcome of one sync run. A run "fails" only if every connector failed;
/// anything less is a partial run that still refreshed the healthy sources.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub synced: Vec<(Source, usize)>,
    pub failed: Vec<(Source, String)>,
}

impl SyncReport {
    pub fn all_failed(&self) -> bool {
        self.synced.is_empty() && !self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        let conversations: usize = self.synced.iter().map(|(_, n)| n).sum();
        if self.failed.is_empty() {
            format!(
                "synced {} conversations across {} sources",
                conversations,
                self.synced.len()
            )
        } else {
            let failed: Vec<&str> = self.failed.iter().map(|(s, _)| s.as_str()).collect();
            format!(
                "synced {} conversations across {} sources; failed: {}",
                conversations,
                self.synced.len(),
                failed.join(", ")
            )
        }
    }
}

pub struct SyncOrchestrator {
    store: UnifiedStore,
    connectors: Arc<Connectors>,
    interval: Duration,
    state: RwLock<SyncState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    pub fn new(store: UnifiedStore, connectors: Arc<Connectors>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            connectors,
            interval,
            state: RwLock::new(SyncState::Uninitialized),
            task: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SyncState {
        *self.state.read().expect("sync state lock poisoned")
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write().expect("sync state lock poisoned") = state;
    }

    /// Run an immediate sync, then schedule the recurring one. Idempotent:
    /// calling again once `Ready` is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.state() != SyncState::Uninitialized {
            return;
        }
        self.set_state(SyncState::Initializing);

        info!(
            "starting sync orchestrator (interval {}s)",
            self.interval.as_secs()
        );
        let report = self.run_once().await;
        info!("initial sync: {}", report.summary());

        let orchestrator = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(orchestrator.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            // The first tick completes immediately; the initial sync already
            // ran, so consume it.
            interval.tick().await;
            loop {
                interval.tick().await;
                let report = orchestrator.run_once().await;
                if report.all_failed() {
                    error!("scheduled sync failed on every source");
                } else {
                    debug!("scheduled sync: {}", report.summary());
                }
            }
        });
        *self.task.lock().expect("sync task lock poisoned") = Some(handle);

        self.set_state(SyncState::Ready);
    }

    /// Execute one sync cycle: all cached-source connectors concurrently,
    /// each failure isolated to its own source.
    pub async fn run_once(&self) -> SyncReport {
        let connectors = self.connectors.cached();
        let outcomes = futures::future::join_all(
            connectors
                .iter()
                .map(|connector| self.sync_source(connector.clone())),
        )
        .await;

        let mut report = SyncReport::default();
        for (connector, outcome) in connectors.iter().zip(outcomes) {
            let source = connector.source();
            match outcome {
                Ok(count) => {
                    debug!("synced {} conversations from {}", count, source.as_str());
                    report.synced.push((source, count));
                }
                Err(e) => {
                    warn!("sync of {} failed: {:#}", source.as_str(), e);
                    report.failed.push((source, format!("{:#}", e)));
                }
            }
        }
        report
    }

    async fn sync_source(&self, connector: Arc<dyn SourceConnector>) -> Result<usize> {
        let bundles = connector.fetch_conversations().await?;
        let count = bundles.len();
        for bundle in bundles {
            self.store.upsert_conversation(&bundle.conversation)?;
            if connector.caches_messages() {
                // Full replace of the conversation's message window, even
                // when the new window is empty.
                self.store
                    .replace_messages(&bundle.conversation.conversation_id, &bundle.messages)?;
            }
        }
        Ok(count)
    }

    /// Stop the recurring sync task. In-flight manual runs are unaffected.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .task
            .lock()
            .expect("sync task lock poisoned")
            .take()
        {
            handle.abort();
        }
        info!("sync orchestrator stopped");
    }
}

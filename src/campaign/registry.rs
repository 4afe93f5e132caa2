//! Campaign registry: live and recently finished campaigns, keyed by id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::dispatcher::DispatchHandle;
use super::job::CampaignJob;

/// Holds one handle per campaign. Terminal entries are pruned after a TTL.
#[derive(Default)]
pub struct CampaignRegistry {
    campaigns: RwLock<HashMap<String, Arc<DispatchHandle>>>,
}

impl CampaignRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, handle: DispatchHandle) -> Arc<DispatchHandle> {
        let handle = Arc::new(handle);
        self.campaigns
            .write()
            .await
            .insert(handle.id().to_string(), Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, id: &str) -> Option<Arc<DispatchHandle>> {
        self.campaigns.read().await.get(id).cloned()
    }

    /// Snapshots of every tracked campaign, newest first.
    pub async fn list(&self) -> Vec<CampaignJob> {
        let mut jobs: Vec<CampaignJob> = self
            .campaigns
            .read()
            .await
            .values()
            .map(|h| h.status())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn len(&self) -> usize {
        self.campaigns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.campaigns.read().await.is_empty()
    }

    /// Drop terminal campaigns that finished more than `ttl` ago.
    pub async fn prune(&self, ttl: Duration) -> usize {
        self.prune_at(Utc::now(), ttl).await
    }

    async fn prune_at(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let mut campaigns = self.campaigns.write().await;
        let before = campaigns.len();
        campaigns.retain(|_, handle| {
            let job = handle.status();
            match job.finished_at {
                Some(finished) if job.status.is_terminal() => now - finished < ttl,
                _ => true,
            }
        });
        let pruned = before - campaigns.len();
        if pruned > 0 {
            debug!(pruned, remaining = campaigns.len(), "Pruned finished campaigns");
        }
        pruned
    }
}

/// Spawn a background task that prunes the registry every `interval`.
pub fn spawn_prune_task(
    registry: Arc<CampaignRegistry>,
    interval: Duration,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    info!(
        interval_secs = interval.as_secs(),
        ttl_secs = ttl.as_secs(),
        "Campaign registry prune task started"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            registry.prune(ttl).await;
        }
    })
}

//! Periodic and on-demand discovery runs.
//!
//! Every run is wrapped in a wall-clock timeout. Runs are spawned on a
//! `TaskTracker` so shutdown can cancel them and wait for them to drain.

use crate::{
    errors::{DiscoveryError, DiscoveryResult},
    services::orchestrator::{DiscoveryOrchestrator, ScanReport, TriggerSource},
};
use std::{sync::Arc, time::Duration};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct DiscoveryScheduler {
    orchestrator: Arc<DiscoveryOrchestrator>,
    scan_timeout: Duration,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl DiscoveryScheduler {
    pub fn new(orchestrator: Arc<DiscoveryOrchestrator>, scan_timeout: Duration) -> Self {
        Self {
            orchestrator,
            scan_timeout,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start a manual run in the background and return its run id at once.
    pub fn trigger(&self) -> String {
        let run_id = Uuid::new_v4().to_string();
        let orchestrator = self.orchestrator.clone();
        let limit = self.scan_timeout;
        let cancel = self.shutdown.child_token();
        let id = run_id.clone();

        info!(run_id = %run_id, "manual discovery run triggered");
        self.tracker.spawn(async move {
            // Outcome is logged by `execute`.
            let _ = execute(&orchestrator, TriggerSource::Manual, id, limit, &cancel).await;
        });
        run_id
    }

    /// Run a scan every `every`, starting one period from now. A zero
    /// period disables the loop. Each run completes before the next tick
    /// is awaited, so periodic runs never overlap.
    pub fn start_periodic(&self, every: Duration) {
        if every.is_zero() {
            info!("periodic discovery disabled");
            return;
        }
        let orchestrator = self.orchestrator.clone();
        let limit = self.scan_timeout;
        let cancel = self.shutdown.clone();

        info!(interval = ?every, "periodic discovery enabled");
        self.tracker.spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let run_id = Uuid::new_v4().to_string();
                let _ = execute(&orchestrator, TriggerSource::Scheduled, run_id, limit, &cancel).await;
            }
            info!("periodic discovery stopped");
        });
    }

    /// Cancel in-flight runs and wait for every spawned task to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("discovery scheduler stopped");
    }
}

/// One run under the wall-clock ceiling.
pub async fn execute(
    orchestrator: &DiscoveryOrchestrator,
    source: TriggerSource,
    run_id: String,
    limit: Duration,
    cancel: &CancellationToken,
) -> DiscoveryResult<ScanReport> {
    match timeout(limit, orchestrator.run(source, run_id.clone(), cancel)).await {
        Ok(report) => Ok(report),
        Err(_) => {
            error!(run_id = %run_id, limit = ?limit, "discovery run timed out");
            Err(DiscoveryError::Timeout(limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AccountConfig, ScanSettings},
        models::object::{DiscoveredObject, ScanScope},
        services::{
            discovery_store::{DiscoveryStore, memory_store},
            orchestrator::tests::{
                FakeStorage, RecordingNotifier, discovery_config, orchestrator,
            },
            retry::RetryPolicy,
            storage_client::{StorageClient, StorageConnector},
        },
    };
    use async_trait::async_trait;
    use bytes::Bytes;

    const ACCOUNT: &str = r#"
        [[accounts]]
        name = "acct"
        dsn = "memory://"
        containers = ["raw"]
    "#;

    async fn scheduler_with_one_object(timeout: Duration) -> (DiscoveryScheduler, DiscoveryStore) {
        let store = memory_store().await;
        let storage = Arc::new(FakeStorage::default());
        storage.put("raw", "a.csv", "E1", b"id,name\n1,alice\n");
        let orch = orchestrator(
            discovery_config(ACCOUNT),
            store.clone(),
            &storage,
            Arc::new(RecordingNotifier::default()),
            100,
        );
        (DiscoveryScheduler::new(Arc::new(orch), timeout), store)
    }

    struct StalledStorage;

    #[async_trait]
    impl StorageClient for StalledStorage {
        async fn list(
            &self,
            _scope: &ScanScope,
            _extensions: Option<&[String]>,
        ) -> DiscoveryResult<Vec<DiscoveredObject>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }

        async fn read_head(&self, _object: &DiscoveredObject, _max: u64) -> Bytes {
            Bytes::new()
        }

        async fn read_tail(&self, _object: &DiscoveredObject, _max: u64) -> Bytes {
            Bytes::new()
        }
    }

    struct StalledConnector;

    impl StorageConnector for StalledConnector {
        fn connect(&self, _account: &AccountConfig) -> DiscoveryResult<Arc<dyn StorageClient>> {
            Ok(Arc::new(StalledStorage))
        }
    }

    #[tokio::test]
    async fn trigger_returns_run_id_and_runs_in_background() {
        let (scheduler, store) = scheduler_with_one_object(Duration::from_secs(30)).await;

        let run_id = scheduler.trigger();
        assert!(Uuid::parse_str(&run_id).is_ok());

        scheduler.tracker.close();
        scheduler.tracker.wait().await;
        let stats = store.summary_stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.pending_review, 1);
    }

    #[tokio::test]
    async fn run_exceeding_limit_times_out() {
        let store = memory_store().await;
        let orch = DiscoveryOrchestrator::new(
            discovery_config(ACCOUNT),
            ScanSettings::default(),
            store,
            Arc::new(StalledConnector),
            Arc::new(RecordingNotifier::default()),
            RetryPolicy::default(),
        );

        let result = execute(
            &orch,
            TriggerSource::Scheduled,
            "slow".into(),
            Duration::from_millis(50),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(DiscoveryError::Timeout(_))));
    }

    #[tokio::test]
    async fn periodic_loop_runs_and_stops_on_shutdown() {
        let (scheduler, store) = scheduler_with_one_object(Duration::from_secs(30)).await;
        scheduler.start_periodic(Duration::from_millis(20));

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.summary_stats().await.unwrap().total == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.shutdown().await;

        let stats = store.summary_stats().await.unwrap();
        assert_eq!(stats.total, 1);
        let record = store.list(&Default::default(), 0, 1).await.unwrap().0.remove(0);
        assert_eq!(record.created_by, "scheduler");
    }

    #[tokio::test]
    async fn zero_interval_spawns_nothing() {
        let (scheduler, _) = scheduler_with_one_object(Duration::from_secs(30)).await;
        scheduler.start_periodic(Duration::ZERO);
        assert!(scheduler.tracker.is_empty());
        scheduler.shutdown().await;
    }
}

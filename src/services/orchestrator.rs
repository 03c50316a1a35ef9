//! src/services/orchestrator.rs
//!
//! Batch discovery run: walks accounts, containers and folders, fingerprints
//! every listed object, and writes the reconciled result. A failure is
//! contained at the smallest level it occurs in (object, folder, container,
//! account) and never aborts the rest of the run.

use crate::{
    config::{AccountConfig, DiscoveryConfig, ScanSettings},
    errors::{DiscoveryError, DiscoveryResult},
    models::{
        discovery::{
            BusinessKey, DiscoveryRefresh, NewDiscovery, StoredFingerprint, SurfacedDiscovery,
        },
        object::{DiscoveredObject, ScanScope},
    },
    services::{
        discovery_store::DiscoveryStore,
        fingerprint::{self, FILE_HASH_ALGORITHM, FingerprintedObject, SampleWindow},
        notifier::Notifier,
        reconcile::{self, ReconcileAction},
        retry::RetryPolicy,
        schema,
        storage_client::{StorageClient, StorageConnector},
    },
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SOURCE_NAME: &str = "blob-discovery";

/// What started a run.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduled,
    Manual,
}

impl TriggerSource {
    /// Value stored in `created_by` for records this run inserts.
    pub fn created_by(&self) -> &'static str {
        match self {
            TriggerSource::Scheduled => "scheduler",
            TriggerSource::Manual => "api_trigger",
        }
    }

    fn source_type(&self) -> &'static str {
        match self {
            TriggerSource::Scheduled => "scheduled_scan",
            TriggerSource::Manual => "manual_trigger",
        }
    }
}

/// Per-scope counters, summed into the run report.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanCounters {
    pub processed: u64,
    pub skipped: u64,
    pub touched: u64,
    pub updated: u64,
    pub inserted: u64,
    pub surfaced: u64,
    pub failed: u64,
}

impl ScanCounters {
    fn record(&mut self, action: ReconcileAction) {
        match action {
            ReconcileAction::Insert => self.inserted += 1,
            ReconcileAction::FullUpdate => self.updated += 1,
            ReconcileAction::TouchOnly => self.touched += 1,
            ReconcileAction::Skip => self.skipped += 1,
        }
        if action.surfaces() {
            self.surfaced += 1;
        }
    }

    fn absorb(&mut self, other: &ScanCounters) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.touched += other.touched;
        self.updated += other.updated;
        self.inserted += other.inserted;
        self.surfaced += other.surfaced;
        self.failed += other.failed;
    }
}

/// Outcome of one run.
#[derive(Serialize, Clone, Debug)]
pub struct ScanReport {
    pub run_id: String,
    pub batch_id: String,
    pub source: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub totals: ScanCounters,
    pub scopes_scanned: u64,
    pub scopes_failed: u64,
    pub accounts_failed: u64,
    pub surfaced: Vec<SurfacedDiscovery>,
    pub cancelled: bool,
}

impl ScanReport {
    fn new(run_id: String, source: TriggerSource) -> Self {
        Self {
            run_id,
            batch_id: Uuid::new_v4().to_string(),
            source,
            started_at: Utc::now(),
            finished_at: None,
            totals: ScanCounters::default(),
            scopes_scanned: 0,
            scopes_failed: 0,
            accounts_failed: 0,
            surfaced: Vec::new(),
            cancelled: false,
        }
    }
}

/// Shared, immutable state of a single object write.
struct ObjectWork<'a> {
    account: &'a AccountConfig,
    scope: &'a ScanScope,
    object: &'a DiscoveredObject,
    key: BusinessKey,
    fingerprinted: FingerprintedObject,
}

impl<'a> ObjectWork<'a> {
    fn new(
        account: &'a AccountConfig,
        scope: &'a ScanScope,
        object: &'a DiscoveredObject,
        sample: &[u8],
    ) -> Self {
        Self {
            account,
            scope,
            object,
            key: BusinessKey {
                storage_type: account.storage_type(),
                storage_identifier: object.storage_identifier.clone(),
                storage_path: format!("{}/{}", object.container, object.path),
            },
            fingerprinted: fingerprint::fingerprint(object, sample),
        }
    }
}

pub struct DiscoveryOrchestrator {
    config: Arc<DiscoveryConfig>,
    settings: ScanSettings,
    store: DiscoveryStore,
    connector: Arc<dyn StorageConnector>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl DiscoveryOrchestrator {
    pub fn new(
        config: Arc<DiscoveryConfig>,
        settings: ScanSettings,
        store: DiscoveryStore,
        connector: Arc<dyn StorageConnector>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            config,
            settings,
            store,
            connector,
            notifier,
            retry,
        }
    }

    /// Execute one full run. Never fails as a whole: failures are counted
    /// in the report. Cancellation is honoured between chunks.
    pub async fn run(
        &self,
        source: TriggerSource,
        run_id: String,
        cancel: &CancellationToken,
    ) -> ScanReport {
        let mut report = ScanReport::new(run_id, source);
        info!(
            run_id = %report.run_id,
            batch_id = %report.batch_id,
            source = source.created_by(),
            accounts = self.config.accounts.len(),
            "discovery run started"
        );

        for account in &self.config.accounts {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if let Err(err) = self.scan_account(account, &mut report, cancel).await {
                report.accounts_failed += 1;
                error!(account = %account.name, error = %err, "account scan failed");
            }
        }

        if !report.surfaced.is_empty() {
            if let Err(err) = self.notifier.notify(&report.surfaced).await {
                warn!(error = %err, count = report.surfaced.len(), "notification failed");
            }
        }

        report.finished_at = Some(Utc::now());
        info!(
            run_id = %report.run_id,
            processed = report.totals.processed,
            inserted = report.totals.inserted,
            updated = report.totals.updated,
            touched = report.totals.touched,
            skipped = report.totals.skipped,
            failed = report.totals.failed,
            scopes_failed = report.scopes_failed,
            accounts_failed = report.accounts_failed,
            cancelled = report.cancelled,
            "discovery run finished"
        );
        report
    }

    async fn scan_account(
        &self,
        account: &AccountConfig,
        report: &mut ScanReport,
        cancel: &CancellationToken,
    ) -> DiscoveryResult<()> {
        let client = self.connector.connect(account)?;

        for container in &account.containers {
            for folder in account.folders() {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(());
                }
                let scope = ScanScope::new(&account.name, container, folder);
                report.scopes_scanned += 1;

                match self
                    .scan_scope(client.as_ref(), account, &scope, report, cancel)
                    .await
                {
                    Ok(counters) => {
                        info!(
                            account = %scope.account,
                            container = %scope.container,
                            folder = %scope.folder,
                            processed = counters.processed,
                            surfaced = counters.surfaced,
                            failed = counters.failed,
                            "scope scanned"
                        );
                        report.totals.absorb(&counters);
                    }
                    Err(err) => {
                        report.scopes_failed += 1;
                        error!(
                            account = %scope.account,
                            container = %scope.container,
                            folder = %scope.folder,
                            error = %err,
                            "scope scan failed"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn scan_scope(
        &self,
        client: &dyn StorageClient,
        account: &AccountConfig,
        scope: &ScanScope,
        report: &mut ScanReport,
        cancel: &CancellationToken,
    ) -> DiscoveryResult<ScanCounters> {
        let objects = client
            .list(scope, account.file_extensions.as_deref())
            .await?;
        let mut counters = ScanCounters::default();
        let chunk_size = self.settings.chunk_size.max(1);
        let chunk_count = objects.len().div_ceil(chunk_size);

        for (index, chunk) in objects.chunks(chunk_size).enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            for object in chunk {
                counters.processed += 1;
                match self.process_object(client, account, scope, report, object).await {
                    Ok((action, surfaced)) => {
                        counters.record(action);
                        report.surfaced.extend(surfaced);
                    }
                    Err(err) => {
                        counters.failed += 1;
                        warn!(
                            account = %scope.account,
                            container = %scope.container,
                            path = %object.path,
                            error = %err,
                            "object processing failed"
                        );
                    }
                }
            }
            info!(
                container = %scope.container,
                folder = %scope.folder,
                chunk = index + 1,
                chunks = chunk_count,
                processed = counters.processed,
                "chunk processed"
            );
        }
        Ok(counters)
    }

    async fn process_object(
        &self,
        client: &dyn StorageClient,
        account: &AccountConfig,
        scope: &ScanScope,
        report: &ScanReport,
        object: &DiscoveredObject,
    ) -> DiscoveryResult<(ReconcileAction, Option<SurfacedDiscovery>)> {
        let sample = self.sample(client, object).await;
        let work = ObjectWork::new(account, scope, object, &sample);
        let existing = self.find(&work.key).await?;
        self.reconcile_object(&work, existing, report).await
    }

    /// Decide and write one object against what the store held when it was
    /// read. Losing an insert race re-reads the key and decides once more.
    async fn reconcile_object(
        &self,
        work: &ObjectWork<'_>,
        mut existing: Option<StoredFingerprint>,
        report: &ScanReport,
    ) -> DiscoveryResult<(ReconcileAction, Option<SurfacedDiscovery>)> {
        for _ in 0..2 {
            let action = reconcile::decide(existing.as_ref(), &work.fingerprinted.fingerprint);
            let stored_id = existing.as_ref().map(|stored| stored.id);
            debug!(
                path = %work.key.storage_path,
                action = action.as_str(),
                columns = work.fingerprinted.schema.as_ref().map_or(0, |s| s.column_count),
                "object reconciled"
            );
            let id = match (action, stored_id) {
                (ReconcileAction::Skip, _) => return Ok((action, None)),
                (ReconcileAction::Insert, _) => {
                    let new = self.new_discovery(work, report);
                    match self.retry.run("insert", || self.store.insert(&new)).await? {
                        Some(id) => id,
                        None => {
                            existing = self.find(&work.key).await?;
                            continue;
                        }
                    }
                }
                (ReconcileAction::TouchOnly, Some(id)) => {
                    let file_hash = &work.fingerprinted.fingerprint.file_hash;
                    self.retry
                        .run("touch", || self.store.touch(id, file_hash))
                        .await?;
                    return Ok((action, None));
                }
                (ReconcileAction::FullUpdate, Some(id)) => {
                    let refresh = self.refresh(work, report);
                    self.retry
                        .run("update_full", || self.store.update_full(id, &refresh))
                        .await?;
                    id
                }
                (_, None) => break,
            };

            return Ok((
                action,
                Some(SurfacedDiscovery {
                    id,
                    file_name: work.object.name().to_string(),
                    storage_path: work.key.storage_path.clone(),
                }),
            ));
        }

        // The key conflicted on insert yet cannot be read back.
        Err(DiscoveryError::Sqlx(sqlx::Error::RowNotFound))
    }

    async fn find(&self, key: &BusinessKey) -> DiscoveryResult<Option<StoredFingerprint>> {
        self.retry
            .run("find_by_key", || self.store.find_by_key(key))
            .await
    }

    async fn sample(&self, client: &dyn StorageClient, object: &DiscoveredObject) -> Bytes {
        let extension = object.extension();
        if object.size == 0 || !schema::supports(&extension) {
            return Bytes::new();
        }
        match SampleWindow::for_extension(
            &extension,
            self.settings.head_sample_bytes,
            self.settings.tail_sample_bytes,
        ) {
            SampleWindow::Head(max) => client.read_head(object, max).await,
            SampleWindow::Tail(max) => client.read_tail(object, max).await,
        }
    }

    fn new_discovery(&self, work: &ObjectWork<'_>, report: &ScanReport) -> NewDiscovery {
        NewDiscovery {
            key: work.key.clone(),
            storage_location: storage_location(&work.key, work.object),
            refresh: self.refresh(work, report),
            environment: work.account.environment.clone(),
            env_type: work.account.env_type.clone(),
            data_source_type: work.account.data_source_type.clone(),
            folder_path: work.scope.folder.clone(),
            created_by: report.source.created_by().to_string(),
        }
    }

    fn refresh(&self, work: &ObjectWork<'_>, report: &ScanReport) -> DiscoveryRefresh {
        let fp = &work.fingerprinted;
        DiscoveryRefresh {
            file_metadata: file_metadata(work.object, &fp.fingerprint.file_hash),
            file_hash: fp.fingerprint.file_hash.clone(),
            schema_json: fp.schema_json.clone(),
            schema_hash: fp.fingerprint.schema_hash.clone(),
            storage_metadata: storage_metadata(&work.key.storage_type, work.object),
            discovery_info: json!({
                "batch": {
                    "id": report.batch_id,
                    "started_at": rfc3339(&report.started_at),
                },
                "source": {
                    "type": report.source.source_type(),
                    "name": SOURCE_NAME,
                    "run_id": report.run_id,
                },
                "scan": {
                    "container": work.scope.container,
                    "folder": work.scope.folder,
                },
            }),
        }
    }
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn storage_location(key: &BusinessKey, object: &DiscoveredObject) -> Value {
    json!({
        "type": key.storage_type,
        "account": object.storage_identifier,
        "container": object.container,
        "path": object.path,
        "uri": format!(
            "{}://{}/{}/{}",
            key.storage_type, object.storage_identifier, object.container, object.path
        ),
    })
}

fn file_metadata(object: &DiscoveredObject, file_hash: &str) -> Value {
    let extension = object.extension();
    let content_type = object
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    let (dotted, format) = if extension.is_empty() {
        (String::new(), "unknown".to_string())
    } else {
        (format!(".{extension}"), extension.clone())
    };
    json!({
        "basic": {
            "name": object.name(),
            "extension": dotted,
            "format": format,
            "size_bytes": object.size,
            "content_type": content_type,
            "mime_type": content_type,
        },
        "hash": {
            "algorithm": FILE_HASH_ALGORITHM,
            "value": file_hash,
            "computed_at": rfc3339(&Utc::now()),
            "source": "etag_composite",
        },
        "timestamps": {
            "created_at": object.created_at.as_ref().map(rfc3339),
            "last_modified": object.last_modified.as_ref().map(rfc3339),
        },
    })
}

fn storage_metadata(storage_type: &str, object: &DiscoveredObject) -> Value {
    json!({
        "provider": storage_type,
        "etag": object.etag,
        "content_type": object.content_type,
        "creation_time": object.created_at.as_ref().map(rfc3339),
        "last_modified": object.last_modified.as_ref().map(rfc3339),
        "attributes": object.provider_metadata,
    })
}

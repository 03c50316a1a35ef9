//! src/services/discovery_store.rs
//!
//! DiscoveryStore: persistence for discovery records backed by SQLite.
//! Every write runs in its own transaction scoped to a single record; the
//! transaction commits on success and rolls back when dropped on any error
//! path. The business key is guarded by a `UNIQUE` constraint so concurrent
//! scans racing on the same object cannot create duplicates.

use crate::{
    errors::{DiscoveryError, DiscoveryResult},
    models::discovery::{
        ApprovalStatus, BusinessKey, Decision, DiscoveryRecord, DiscoveryRefresh, DiscoveryStats,
        ListFilter, NewDiscovery, StoredFingerprint,
    },
};
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::sync::Arc;
use tracing::debug;

const MIGRATIONS: &str = include_str!("../../migrations/0001_init.sql");

const RECORD_COLUMNS: &str = "id, storage_type, storage_identifier, storage_path, \
     storage_location, file_metadata, file_hash, schema_json, schema_hash, \
     storage_metadata, discovery_info, status, approval_status, is_visible, is_active, \
     environment, env_type, data_source_type, folder_path, discovered_at, \
     last_checked_at, updated_at, created_by, decided_by, decided_role, \
     decision_comments, rejection_reason, decided_at";

#[derive(Clone)]
pub struct DiscoveryStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl DiscoveryStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Look up the stored hashes for a business key.
    pub async fn find_by_key(&self, key: &BusinessKey) -> DiscoveryResult<Option<StoredFingerprint>> {
        let found = sqlx::query_as::<_, StoredFingerprint>(
            "SELECT id, file_hash, schema_hash
             FROM data_discovery
             WHERE storage_type = ? AND storage_identifier = ? AND storage_path = ?
             LIMIT 1",
        )
        .bind(&key.storage_type)
        .bind(&key.storage_identifier)
        .bind(&key.storage_path)
        .fetch_optional(&*self.db)
        .await?;
        Ok(found)
    }

    /// Insert a new record in `pending` / `pending_review` state.
    ///
    /// Returns `None` when another writer already holds the business key;
    /// the caller is expected to re-read and reconcile against that record.
    pub async fn insert(&self, new: &NewDiscovery) -> DiscoveryResult<Option<i64>> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO data_discovery (
                storage_type, storage_identifier, storage_path, storage_location,
                file_metadata, file_hash, schema_json, schema_hash, storage_metadata,
                discovery_info, status, approval_status, is_visible, is_active,
                environment, env_type, data_source_type, folder_path,
                discovered_at, last_checked_at, updated_at, created_by
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, 1, 1, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(storage_type, storage_identifier, storage_path) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&new.key.storage_type)
        .bind(&new.key.storage_identifier)
        .bind(&new.key.storage_path)
        .bind(Json(&new.storage_location))
        .bind(Json(&new.refresh.file_metadata))
        .bind(&new.refresh.file_hash)
        .bind(Json(&new.refresh.schema_json))
        .bind(&new.refresh.schema_hash)
        .bind(Json(&new.refresh.storage_metadata))
        .bind(Json(&new.refresh.discovery_info))
        .bind(ApprovalStatus::PendingReview)
        .bind(&new.environment)
        .bind(&new.env_type)
        .bind(&new.data_source_type)
        .bind(&new.folder_path)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(&new.created_by)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        if id.is_none() {
            debug!(path = %new.key.storage_path, "insert lost business key race");
        }
        Ok(id)
    }

    /// Acknowledge a change-indicator-only change: bump `last_checked_at` and
    /// remember the new file hash. Metadata columns are left untouched.
    pub async fn touch(&self, id: i64, file_hash: &str) -> DiscoveryResult<()> {
        let mut tx = self.db.begin().await?;
        let result =
            sqlx::query("UPDATE data_discovery SET last_checked_at = ?, file_hash = ? WHERE id = ?")
                .bind(Utc::now())
                .bind(file_hash)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DiscoveryError::NotFound(id));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replace metadata after a schema change.
    pub async fn update_full(&self, id: i64, refresh: &DiscoveryRefresh) -> DiscoveryResult<()> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            "UPDATE data_discovery
             SET file_metadata = ?, file_hash = ?, schema_json = ?, schema_hash = ?,
                 storage_metadata = ?, discovery_info = ?,
                 last_checked_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(Json(&refresh.file_metadata))
        .bind(&refresh.file_hash)
        .bind(Json(&refresh.schema_json))
        .bind(&refresh.schema_hash)
        .bind(Json(&refresh.storage_metadata))
        .bind(Json(&refresh.discovery_info))
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DiscoveryError::NotFound(id));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Fetch a full record by id.
    pub async fn get(&self, id: i64) -> DiscoveryResult<Option<DiscoveryRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM data_discovery WHERE id = ?");
        let record = sqlx::query_as::<_, DiscoveryRecord>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    /// List records matching `filter`, newest first, with the total match
    /// count. `page` is zero-based.
    pub async fn list(
        &self,
        filter: &ListFilter,
        page: u32,
        size: u32,
    ) -> DiscoveryResult<(Vec<DiscoveryRecord>, i64)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM data_discovery WHERE 1 = 1");
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&*self.db).await?;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM data_discovery WHERE 1 = 1"
        ));
        push_filters(&mut builder, filter);
        builder.push(" ORDER BY discovered_at DESC, id DESC LIMIT ");
        builder.push_bind(i64::from(size));
        builder.push(" OFFSET ");
        builder.push_bind(i64::from(page) * i64::from(size));

        let rows = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok((rows, total))
    }

    /// Record an approval or rejection.
    ///
    /// `guard` sees the current approval status inside the transaction and
    /// may refuse the transition.
    pub async fn record_decision<G>(
        &self,
        id: i64,
        decision: &Decision,
        guard: G,
    ) -> DiscoveryResult<DiscoveryRecord>
    where
        G: FnOnce(ApprovalStatus) -> DiscoveryResult<()>,
    {
        let mut tx = self.db.begin().await?;

        let current = sqlx::query_scalar::<_, ApprovalStatus>(
            "SELECT approval_status FROM data_discovery WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DiscoveryError::NotFound(id))?;
        guard(current)?;

        let now = Utc::now();
        sqlx::query(
            "UPDATE data_discovery
             SET approval_status = ?, status = ?, decided_by = ?, decided_role = ?,
                 decision_comments = ?, rejection_reason = ?, decided_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(decision.outcome)
        .bind(decision.outcome.as_str())
        .bind(&decision.actor)
        .bind(&decision.role)
        .bind(&decision.comments)
        .bind(&decision.rejection_reason)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let sql = format!("SELECT {RECORD_COLUMNS} FROM data_discovery WHERE id = ?");
        let record = sqlx::query_as::<_, DiscoveryRecord>(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Aggregate counts for the dashboard.
    pub async fn summary_stats(&self) -> DiscoveryResult<DiscoveryStats> {
        let (total, pending_review, approved, rejected, active) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN approval_status = 'pending_review' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN approval_status = 'approved' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN approval_status = 'rejected' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN is_active THEN 1 ELSE 0 END), 0)
                 FROM data_discovery",
            )
            .fetch_one(&*self.db)
            .await?;

        let by_environment = sqlx::query_as::<_, (String, i64)>(
            "SELECT environment, COUNT(*) FROM data_discovery GROUP BY environment",
        )
        .fetch_all(&*self.db)
        .await?
        .into_iter()
        .collect();

        let by_data_source_type = sqlx::query_as::<_, (String, i64)>(
            "SELECT data_source_type, COUNT(*) FROM data_discovery GROUP BY data_source_type",
        )
        .fetch_all(&*self.db)
        .await?
        .into_iter()
        .collect();

        Ok(DiscoveryStats {
            total,
            pending_review,
            approved,
            rejected,
            active,
            by_environment,
            by_data_source_type,
        })
    }
}

/// Run the embedded SQLite migration statement by statement.
pub async fn run_migrations(db: &SqlitePool) -> DiscoveryResult<()> {
    let statements = MIGRATIONS
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ListFilter) {
    if let Some(status) = non_blank(&filter.status) {
        builder.push(" AND (status = ");
        builder.push_bind(status.to_string());
        builder.push(" OR approval_status = ");
        builder.push_bind(status.to_string());
        builder.push(")");
    }
    if let Some(environment) = non_blank(&filter.environment) {
        builder.push(" AND environment = ");
        builder.push_bind(environment.to_string());
    }
    if let Some(data_source_type) = non_blank(&filter.data_source_type) {
        builder.push(" AND data_source_type = ");
        builder.push_bind(data_source_type.to_string());
    }
    if let Some(search) = non_blank(&filter.search) {
        // SQLite LIKE folds ASCII case only; both sides are left as given.
        builder.push(" AND storage_path LIKE ");
        builder.push_bind(format!("%{}%", escape_like(search)));
        builder.push(" ESCAPE '\\'");
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Escape LIKE wildcards so user search text matches literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
pub(crate) async fn memory_store() -> DiscoveryStore {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    DiscoveryStore::new(Arc::new(pool))
}

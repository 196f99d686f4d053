use chrono::NaiveDateTime;
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::domain::broadcast_log::{BroadcastLog, ImportBatch, ImportStatus, MatchReason};
use super::{IntoUuid, RepositoryError};

// SQLite has a bind-variable ceiling; 400 rows x 8 columns stays well under it.
pub const INSERT_CHUNK: usize = 400;

#[derive(FromRow)]
struct DbBroadcastLog {
    id: Vec<u8>,
    station_id: Vec<u8>,
    played_at: NaiveDateTime,
    raw_artist: String,
    raw_title: String,
    work_id: Option<Vec<u8>>,
    match_reason: Option<String>,
    import_batch_id: Option<Vec<u8>>
}

impl TryFrom<DbBroadcastLog> for BroadcastLog {
    type Error = RepositoryError;
    fn try_from(db_log: DbBroadcastLog) -> Result<Self, Self::Error> {
        Ok(BroadcastLog {
            id: Uuid::from_slice(&db_log.id)?,
            station_id: Uuid::from_slice(&db_log.station_id)?,
            played_at: db_log.played_at,
            raw_artist: db_log.raw_artist,
            raw_title: db_log.raw_title,
            work_id: db_log.work_id.map(|bytes| Uuid::from_slice(&bytes)).transpose()?,
            match_reason: db_log.match_reason.as_deref().map(MatchReason::parse),
            import_batch_id: db_log.import_batch_id.map(|bytes| Uuid::from_slice(&bytes)).transpose()?,
        })
    }
}

/// Row shape for bulk ingestion; ids are minted by the repository.
#[derive(Clone, Debug)]
pub struct NewBroadcastLog {
    pub station_id: Uuid,
    pub played_at: NaiveDateTime,
    pub raw_artist: String,
    pub raw_title: String,
    pub work_id: Option<Uuid>,
    pub match_reason: Option<MatchReason>,
    pub import_batch_id: Option<Uuid>,
}

/// Filters for the export queries.
#[derive(Clone, Debug, Default)]
pub struct LogExportFilter {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub station_id: Option<Uuid>,
    pub matched_only: bool,
    pub unmatched_only: bool,
}

pub struct SqliteBroadcastLogsRepository;

impl SqliteBroadcastLogsRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteBroadcastLogsRepository {
    pub async fn bulk_insert(&self, connection: &mut SqliteConnection, rows: &[NewBroadcastLog]) -> Result<u64, RepositoryError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0u64;

        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO broadcast_logs(id, station_id, played_at, raw_artist, raw_title, work_id, match_reason, import_batch_id) "
            );

            qbuilder.push_values(chunk.iter(), |mut builder, row| {
                builder
                    .push_bind(Uuid::new_v4())
                    .push_bind(row.station_id)
                    .push_bind(row.played_at)
                    .push_bind(&row.raw_artist)
                    .push_bind(&row.raw_title)
                    .push_bind(row.work_id)
                    .push_bind(row.match_reason.as_ref().map(|r| r.to_string()))
                    .push_bind(row.import_batch_id);
            });
            qbuilder.push(";");

            let result = qbuilder.build()
                .execute(&mut *connection)
                .await
                .map_err(RepositoryError::from_sqlx_error)?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    pub async fn by_id_fetch<'e, E, ID>(&self, executor: E, id: ID) -> Result<Option<BroadcastLog>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = id.into_uuid()?;
        let db_log = sqlx::query_as::<_, DbBroadcastLog>(
            "SELECT id, station_id, played_at, raw_artist, raw_title, work_id, match_reason, import_batch_id
            FROM broadcast_logs WHERE id = ? LIMIT 1;")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_log.map(BroadcastLog::try_from).transpose()
    }

    /// Every unmatched log as (id, raw_artist, raw_title); the verification
    /// service recomputes signatures over these to find the affected rows.
    pub async fn unmatched_logs<'e, E>(&self, executor: E) -> Result<Vec<(Uuid, String, String)>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let rows = sqlx::query_as::<_, (Vec<u8>, String, String)>(
            "SELECT id, raw_artist, raw_title FROM broadcast_logs WHERE work_id IS NULL;")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(|(id, artist, title)| Ok((Uuid::from_slice(&id)?, artist, title)))
            .collect()
    }

    /// Logs previously matched through a bridge onto the given work; undo
    /// re-scans these to catch rows linked after the original action. Covers
    /// both stored forms: the verification-written "identity_bridge" and the
    /// matcher's "Identity Bridge (Exact Match)".
    pub async fn bridge_matched_logs<'e, E>(&self, executor: E, work_id: &Uuid) -> Result<Vec<(Uuid, String, String)>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let rows = sqlx::query_as::<_, (Vec<u8>, String, String)>(
            "SELECT id, raw_artist, raw_title FROM broadcast_logs
            WHERE work_id = ?
              AND (match_reason = 'identity_bridge' OR match_reason LIKE 'Identity Bridge%');")
            .bind(work_id)
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(|(id, artist, title)| Ok((Uuid::from_slice(&id)?, artist, title)))
            .collect()
    }

    pub async fn assign_work<'e, E>(
        &self,
        executor: E,
        log_ids: &[Uuid],
        work_id: &Uuid,
        reason: &MatchReason,
    ) -> Result<u64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        if log_ids.is_empty() {
            return Ok(0);
        }

        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE broadcast_logs SET work_id = ");
        qbuilder.push_bind(work_id);
        qbuilder.push(", match_reason = ");
        qbuilder.push_bind(reason.to_string());
        qbuilder.push(" WHERE id IN (");
        let mut separated = qbuilder.separated(", ");
        for id in log_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(");");

        let result = qbuilder.build()
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(result.rows_affected())
    }

    pub async fn detach<'e, E>(&self, executor: E, log_ids: &[Uuid]) -> Result<u64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        if log_ids.is_empty() {
            return Ok(0);
        }

        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "UPDATE broadcast_logs SET work_id = NULL, match_reason = NULL WHERE id IN ("
        );
        let mut separated = qbuilder.separated(", ");
        for id in log_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(");");

        let result = qbuilder.build()
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(result.rows_affected())
    }

    /// Distinct raw pairs still worth re-evaluating: never matched, or
    /// matched only at review confidence.
    pub async fn distinct_pairs_for_reevaluation<'e, E>(&self, executor: E) -> Result<Vec<(String, String)>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        sqlx::query_as::<_, (String, String)>(
            "SELECT DISTINCT raw_artist, raw_title FROM broadcast_logs
            WHERE work_id IS NULL OR match_reason LIKE '%Review%';")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)
    }

    /// Bulk re-evaluation update for one raw pair, guarded by the same
    /// predicate that selected it so settled rows are never overwritten.
    /// Rows already carrying the identical outcome are left alone, which
    /// keeps repeat re-evaluation over unchanged state a true no-op.
    pub async fn update_pair_match<'e, E>(
        &self,
        executor: E,
        raw_artist: &str,
        raw_title: &str,
        work_id: Option<&Uuid>,
        reason: &MatchReason,
    ) -> Result<u64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let result = sqlx::query(
            "UPDATE broadcast_logs SET work_id = ?, match_reason = ?
            WHERE raw_artist = ? AND raw_title = ?
              AND (work_id IS NULL OR match_reason LIKE '%Review%')
              AND NOT (work_id IS ? AND match_reason IS ?);")
            .bind(work_id)
            .bind(reason.to_string())
            .bind(raw_artist)
            .bind(raw_title)
            .bind(work_id)
            .bind(reason.to_string())
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(result.rows_affected())
    }

    pub async fn fetch_for_export<'e, E>(&self, executor: E, filter: &LogExportFilter) -> Result<Vec<BroadcastLog>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, station_id, played_at, raw_artist, raw_title, work_id, match_reason, import_batch_id
            FROM broadcast_logs WHERE 1 = 1"
        );

        if let Some(start) = filter.start {
            qbuilder.push(" AND played_at >= ");
            qbuilder.push_bind(start);
        }
        if let Some(end) = filter.end {
            qbuilder.push(" AND played_at <= ");
            qbuilder.push_bind(end);
        }
        if let Some(station_id) = filter.station_id {
            qbuilder.push(" AND station_id = ");
            qbuilder.push_bind(station_id);
        }
        if filter.matched_only {
            qbuilder.push(" AND work_id IS NOT NULL");
        }
        if filter.unmatched_only {
            qbuilder.push(" AND work_id IS NULL");
        }

        qbuilder.push(" ORDER BY played_at ASC;");

        let rows = qbuilder.build_query_as::<DbBroadcastLog>()
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(BroadcastLog::try_from).collect()
    }

    pub async fn create_batch<'e, E>(&self, executor: E, filename: &str) -> Result<ImportBatch, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO import_batches(id, filename, status) VALUES (?, ?, ?);")
            .bind(id)
            .bind(filename)
            .bind(ImportStatus::Processing.as_str())
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(ImportBatch {
            id,
            filename: filename.to_string(),
            status: ImportStatus::Processing,
            total_rows: 0,
            processed_rows: 0,
            error_log: None,
        })
    }

    pub async fn finish_batch<'e, E>(
        &self,
        executor: E,
        batch_id: &Uuid,
        status: ImportStatus,
        processed_rows: i64,
        error_log: Option<&str>,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        sqlx::query(
            "UPDATE import_batches SET status = ?, processed_rows = ?, error_log = ? WHERE id = ?;")
            .bind(status.as_str())
            .bind(processed_rows)
            .bind(error_log)
            .bind(batch_id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use chrono::NaiveDate;
    use sqlx::SqlitePool;

    use super::*;
    use crate::repository::SqliteStationsRepository;
    use crate::repository::test_helpers::{prepare_db, TestSetupError};

    struct TestContext {
        pool: SqlitePool,
        repo: SqliteBroadcastLogsRepository,
        station_id: Uuid,
    }

    impl TestContext {
        async fn new() -> Result<Self, TestSetupError> {
            let pool = prepare_db().await?;
            let mut conn = pool.acquire().await?;
            let station = SqliteStationsRepository::new().upsert(&mut conn, "KEXP").await?;

            Ok(
                Self {
                    pool,
                    repo: SqliteBroadcastLogsRepository::new(),
                    station_id: *station.id(),
                }
            )
        }

        fn row(&self, artist: &str, title: &str, hour: u32) -> NewBroadcastLog {
            NewBroadcastLog {
                station_id: self.station_id,
                played_at: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(hour, 0, 0).unwrap(),
                raw_artist: artist.to_string(),
                raw_title: title.to_string(),
                work_id: None,
                match_reason: None,
                import_batch_id: None,
            }
        }
    }

    #[tokio::test]
    async fn bulk_insert_and_unmatched_listing() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;

        let inserted = ctx.repo.bulk_insert(&mut conn, &[
            ctx.row("GnR", "Sweet Child", 1),
            ctx.row("Queen", "Bohemian Rhapsody", 2),
        ]).await?;
        assert_eq!(inserted, 2);

        let unmatched = ctx.repo.unmatched_logs(&ctx.pool).await?;
        assert_eq!(unmatched.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn assign_then_detach() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;
        ctx.repo.bulk_insert(&mut conn, &[ctx.row("GnR", "Sweet Child", 1)]).await?;

        let unmatched = ctx.repo.unmatched_logs(&ctx.pool).await?;
        let log_ids: Vec<Uuid> = unmatched.iter().map(|(id, _, _)| *id).collect();
        let work_id = Uuid::new_v4();

        let updated = ctx.repo.assign_work(&ctx.pool, &log_ids, &work_id, &MatchReason::VerifiedLink).await?;
        assert_eq!(updated, 1);

        let log = ctx.repo.by_id_fetch(&ctx.pool, &log_ids[0]).await?.unwrap();
        assert_eq!(log.work_id, Some(work_id));
        assert_eq!(log.match_reason, Some(MatchReason::VerifiedLink));

        let bridged = ctx.repo.bridge_matched_logs(&ctx.pool, &work_id).await?;
        assert_eq!(bridged.len(), 1);

        ctx.repo.detach(&ctx.pool, &log_ids).await?;
        let log = ctx.repo.by_id_fetch(&ctx.pool, &log_ids[0]).await?.unwrap();
        assert_eq!(log.work_id, None);
        assert_eq!(log.match_reason, None);

        Ok(())
    }

    #[tokio::test]
    async fn reevaluation_pairs_cover_unmatched_and_review() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;

        let work_id = Uuid::new_v4();
        ctx.repo.bulk_insert(&mut conn, &[
            ctx.row("GnR", "Sweet Child", 1),
            NewBroadcastLog {
                work_id: Some(work_id),
                match_reason: Some(MatchReason::ReviewCandidate { artist_pct: 75, title_pct: 72 }),
                ..ctx.row("Queen", "Bohemian", 2)
            },
            NewBroadcastLog {
                work_id: Some(work_id),
                match_reason: Some(MatchReason::ExactDb),
                ..ctx.row("Muse", "Uprising", 3)
            },
        ]).await?;

        let pairs = ctx.repo.distinct_pairs_for_reevaluation(&ctx.pool).await?;
        assert_eq!(pairs.len(), 2);
        assert!(!pairs.contains(&("Muse".to_string(), "Uprising".to_string())));

        Ok(())
    }

    #[tokio::test]
    async fn update_pair_respects_guard() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;

        let settled_work = Uuid::new_v4();
        ctx.repo.bulk_insert(&mut conn, &[
            ctx.row("GnR", "Sweet Child", 1),
            NewBroadcastLog {
                work_id: Some(settled_work),
                match_reason: Some(MatchReason::ExactDb),
                ..ctx.row("GnR", "Sweet Child", 2)
            },
        ]).await?;

        let new_work = Uuid::new_v4();
        let updated = ctx.repo.update_pair_match(
            &ctx.pool,
            "GnR",
            "Sweet Child",
            Some(&new_work),
            &MatchReason::ExactDb,
        ).await?;

        // Only the unmatched row moves; the settled one is protected.
        assert_eq!(updated, 1);

        Ok(())
    }

    #[tokio::test]
    async fn update_pair_with_identical_outcome_is_noop() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;

        let work_id = Uuid::new_v4();
        let reason = MatchReason::ReviewCandidate { artist_pct: 75, title_pct: 72 };
        ctx.repo.bulk_insert(&mut conn, &[NewBroadcastLog {
            work_id: Some(work_id),
            match_reason: Some(reason.clone()),
            ..ctx.row("GnR", "Sweet Child", 1)
        }]).await?;

        // Review rows are eligible for re-evaluation, but re-applying the
        // exact same outcome must not rewrite them.
        let updated = ctx.repo.update_pair_match(
            &ctx.pool,
            "GnR",
            "Sweet Child",
            Some(&work_id),
            &reason,
        ).await?;
        assert_eq!(updated, 0);

        let moved = ctx.repo.update_pair_match(
            &ctx.pool,
            "GnR",
            "Sweet Child",
            Some(&Uuid::new_v4()),
            &MatchReason::ExactDb,
        ).await?;
        assert_eq!(moved, 1);

        Ok(())
    }

    #[tokio::test]
    async fn export_filters_by_window_and_match() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;

        let work_id = Uuid::new_v4();
        ctx.repo.bulk_insert(&mut conn, &[
            NewBroadcastLog {
                work_id: Some(work_id),
                match_reason: Some(MatchReason::ExactDb),
                ..ctx.row("Queen", "Bohemian", 2)
            },
            ctx.row("GnR", "Sweet Child", 5),
        ]).await?;

        let filter = LogExportFilter { matched_only: true, ..LogExportFilter::default() };
        let logs = ctx.repo.fetch_for_export(&ctx.pool, &filter).await?;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].raw_artist, "Queen");

        let filter = LogExportFilter {
            start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(4, 0, 0),
            ..LogExportFilter::default()
        };
        let logs = ctx.repo.fetch_for_export(&ctx.pool, &filter).await?;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].raw_artist, "GnR");

        Ok(())
    }

    #[tokio::test]
    async fn import_batch_lifecycle() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        let batch = ctx.repo.create_batch(&ctx.pool, "logs.csv").await?;
        assert_eq!(batch.status, ImportStatus::Processing);

        ctx.repo.finish_batch(&ctx.pool, &batch.id, ImportStatus::Completed, 42, None).await?;

        let (status, processed): (String, i64) = sqlx::query_as(
            "SELECT status, processed_rows FROM import_batches WHERE id = ?;")
            .bind(batch.id)
            .fetch_one(&ctx.pool)
            .await?;
        assert_eq!(ImportStatus::parse(&status), ImportStatus::Completed);
        assert_eq!(processed, 42);

        Ok(())
    }
}

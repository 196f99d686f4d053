use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::domain::recording::{Recording, VersionType};
use super::{IntoUuid, RepositoryError};

// SQLite bind-variable headroom: (artist, title) pairs per IN chunk.
pub const EXACT_MATCH_CHUNK: usize = 500;

#[derive(FromRow)]
struct DbRecording {
    id: Vec<u8>,
    work_id: Vec<u8>,
    title: String,
    version_type: Option<String>,
    duration: Option<f64>,
    isrc: Option<String>,
    is_verified: bool
}

impl TryFrom<DbRecording> for Recording {
    type Error = RepositoryError;
    fn try_from(db_recording: DbRecording) -> Result<Self, Self::Error> {
        Ok(Recording::from_stored(
            Uuid::from_slice(&db_recording.id)?,
            Uuid::from_slice(&db_recording.work_id)?,
            db_recording.title,
            db_recording.version_type
                .as_deref()
                .map(VersionType::parse)
                .unwrap_or(VersionType::Original),
            db_recording.duration,
            db_recording.isrc,
            db_recording.is_verified,
        ))
    }
}

/// A recording joined with the normalized name of its work's primary artist,
/// as returned by the exact-match sweep.
#[derive(Debug)]
pub struct ExactMatchRow {
    pub artist_name: String,
    pub recording: Recording,
}

pub struct SqliteRecordingsRepository;

impl SqliteRecordingsRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteRecordingsRepository {
    pub async fn save<'e, E, R>(&self, executor: E, recording: R) -> Result<Recording, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        R: AsRef<Recording> + Sync
    {
        let rec = recording.as_ref();
        let db_recording = sqlx::query_as::<_, DbRecording>(
            "INSERT INTO recordings(id, work_id, title, version_type, duration, isrc, is_verified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, work_id, title, version_type, duration, isrc, is_verified;")
            .bind(rec.id())
            .bind(rec.work_id())
            .bind(rec.title())
            .bind(rec.version_type().to_string())
            .bind(rec.duration())
            .bind(rec.isrc())
            .bind(rec.is_verified())
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_recording.try_into()
    }

    pub async fn by_id_fetch<'e, E, ID>(&self, executor: E, id: ID) -> Result<Option<Recording>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = id.into_uuid()?;
        let db_recording = sqlx::query_as::<_, DbRecording>(
            "SELECT id, work_id, title, version_type, duration, isrc, is_verified
            FROM recordings WHERE id = ? LIMIT 1;")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_recording.map(Recording::try_from).transpose()
    }

    pub async fn by_ids_fetch<'e, E>(&self, executor: E, ids: &[Uuid]) -> Result<Vec<Recording>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, work_id, title, version_type, duration, isrc, is_verified
            FROM recordings WHERE id IN ("
        );
        let mut separated = qbuilder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(");");

        let rows = qbuilder.build_query_as::<DbRecording>()
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(Recording::try_from).collect()
    }

    /// Recordings of a work, verified rows first so the resolver fallback
    /// prefers them without a second query.
    pub async fn for_work<'e, E>(&self, executor: E, work_id: &Uuid) -> Result<Vec<Recording>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let rows = sqlx::query_as::<_, DbRecording>(
            "SELECT id, work_id, title, version_type, duration, isrc, is_verified
            FROM recordings WHERE work_id = ?
            ORDER BY is_verified DESC, created_at ASC;")
            .bind(work_id)
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(Recording::try_from).collect()
    }

    /// Get-or-create a recording under (work_id, title). A later sighting of
    /// the same recording may carry the ISRC the first one lacked.
    pub async fn upsert(
        &self,
        connection: &mut SqliteConnection,
        work_id: &Uuid,
        clean_title: &str,
        version_type: VersionType,
        duration: Option<f64>,
        isrc: Option<String>,
    ) -> Result<Recording, RepositoryError> {
        let existing = sqlx::query_as::<_, DbRecording>(
            "SELECT id, work_id, title, version_type, duration, isrc, is_verified
            FROM recordings WHERE work_id = ? AND title = ? LIMIT 1;")
            .bind(work_id)
            .bind(clean_title)
            .fetch_optional(&mut *connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        if let Some(row) = existing {
            let recording: Recording = row.try_into()?;
            if recording.isrc().is_none() {
                if let Some(new_isrc) = &isrc {
                    sqlx::query("UPDATE recordings SET isrc = ? WHERE id = ?;")
                        .bind(new_isrc)
                        .bind(recording.id())
                        .execute(&mut *connection)
                        .await
                        .map_err(RepositoryError::from_sqlx_error)?;
                    return Ok(recording.with_isrc(isrc));
                }
            }
            return Ok(recording);
        }

        let recording = Recording::new(Uuid::new_v4(), *work_id, clean_title, version_type)?
            .with_duration(duration)
            .with_isrc(isrc);

        match self.save(&mut *connection, &recording).await {
            Ok(saved) => Ok(saved),
            Err(err) if err.is_constraint_violation() => {
                log::warn!("Recording insert raced for '{}', re-reading", clean_title);
                let row = sqlx::query_as::<_, DbRecording>(
                    "SELECT id, work_id, title, version_type, duration, isrc, is_verified
                    FROM recordings WHERE work_id = ? AND title = ? LIMIT 1;")
                    .bind(work_id)
                    .bind(clean_title)
                    .fetch_optional(&mut *connection)
                    .await
                    .map_err(RepositoryError::from_sqlx_error)?;
                row.map(Recording::try_from).transpose()?.ok_or(RepositoryError::RowNotFound)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn mark_verified<'e, E>(&self, executor: E, recording_id: &Uuid) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        sqlx::query("UPDATE recordings SET is_verified = 1 WHERE id = ?;")
            .bind(recording_id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    /// Chunked exact sweep: normalized (artist, title) row-value IN join over
    /// Recording ↔ Work ↔ primary Artist. Artist names in the DB are already
    /// normalized, so this is a pure equality join.
    pub async fn exact_match_pairs<'e, E>(
        &self,
        executor: E,
        pairs: &[(String, String)],
    ) -> Result<Vec<ExactMatchRow>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite> + Copy
    {
        let mut matches = Vec::new();

        for chunk in pairs.chunks(EXACT_MATCH_CHUNK) {
            let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT a.name AS artist_name,
                        r.id, r.work_id, r.title, r.version_type, r.duration, r.isrc, r.is_verified
                FROM recordings r
                JOIN works w ON w.id = r.work_id
                JOIN artists a ON a.id = w.primary_artist_id
                WHERE (a.name, r.title) IN ("
            );

            let mut separated = qbuilder.separated(", ");
            for (artist, title) in chunk {
                separated.push("(");
                separated.push_bind_unseparated(artist);
                separated.push_unseparated(", ");
                separated.push_bind_unseparated(title);
                separated.push_unseparated(")");
            }
            separated.push_unseparated(");");

            let rows = qbuilder.build_query_as::<(String, Vec<u8>, Vec<u8>, String, Option<String>, Option<f64>, Option<String>, bool)>()
                .fetch_all(executor)
                .await
                .map_err(RepositoryError::from_sqlx_error)?;

            for (artist_name, id, work_id, title, version_type, duration, isrc, is_verified) in rows {
                let recording = Recording::from_stored(
                    Uuid::from_slice(&id)?,
                    Uuid::from_slice(&work_id)?,
                    title,
                    version_type.as_deref().map(VersionType::parse).unwrap_or(VersionType::Original),
                    duration,
                    isrc,
                    is_verified,
                );
                matches.push(ExactMatchRow { artist_name, recording });
            }
        }

        Ok(matches)
    }

    /// Deletes ghost recordings: never verified, no library file, and not
    /// reachable from any matched log or active bridge through their work.
    pub async fn delete_ghosts<'e, E>(&self, executor: E) -> Result<u64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let result = sqlx::query(
            "DELETE FROM recordings
            WHERE is_verified = 0
              AND id NOT IN (SELECT recording_id FROM library_files)
              AND work_id NOT IN (SELECT work_id FROM broadcast_logs WHERE work_id IS NOT NULL)
              AND work_id NOT IN (SELECT work_id FROM identity_bridge WHERE is_revoked = 0);")
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(result.rows_affected())
    }

    /// Everything the vector index needs for a full rebuild:
    /// (recording_id, artist name, recording title).
    pub async fn all_for_reindex<'e, E>(&self, executor: E) -> Result<Vec<(Uuid, String, String)>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let rows = sqlx::query_as::<_, (Vec<u8>, String, String)>(
            "SELECT r.id, a.name, r.title
            FROM recordings r
            JOIN works w ON w.id = r.work_id
            JOIN artists a ON a.id = w.primary_artist_id;")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(|(id, name, title)| Ok((Uuid::from_slice(&id)?, name, title)))
            .collect()
    }
}

#[cfg(test)]
mod tests {

    use sqlx::SqlitePool;

    use super::*;
    use crate::repository::{SqliteArtistsRepository, SqliteWorksRepository};
    use crate::repository::test_helpers::{prepare_db, TestSetupError};

    struct TestContext {
        pool: SqlitePool,
        repo: SqliteRecordingsRepository,
        artists: SqliteArtistsRepository,
        works: SqliteWorksRepository,
    }

    impl TestContext {
        async fn new() -> Result<Self, TestSetupError> {
            Ok(
                Self {
                    pool: prepare_db().await?,
                    repo: SqliteRecordingsRepository::new(),
                    artists: SqliteArtistsRepository::new(),
                    works: SqliteWorksRepository::new(),
                }
            )
        }

        async fn seed_recording(&self, artist: &str, title: &str) -> Result<Recording, TestSetupError> {
            let mut conn = self.pool.acquire().await?;
            let artist = self.artists.upsert(&mut conn, artist).await?;
            let work = self.works.upsert(&mut conn, title, artist.id(), 0.85, 500).await?;
            let recording = self.repo.upsert(&mut conn, work.id(), title, VersionType::Original, None, None).await?;
            Ok(recording)
        }
    }

    #[tokio::test]
    async fn upsert_reuses_existing_row() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        let first = ctx.seed_recording("queen", "bohemian rhapsody").await?;
        let second = ctx.seed_recording("queen", "bohemian rhapsody").await?;

        assert_eq!(first.id(), second.id());

        Ok(())
    }

    #[tokio::test]
    async fn upsert_backfills_isrc() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let first = ctx.seed_recording("queen", "bohemian rhapsody").await?;
        assert!(first.isrc().is_none());

        let mut conn = ctx.pool.acquire().await?;
        let updated = ctx.repo.upsert(
            &mut conn,
            first.work_id(),
            "bohemian rhapsody",
            VersionType::Original,
            None,
            Some("GBUM71029604".to_string()),
        ).await?;

        assert_eq!(updated.id(), first.id());
        assert_eq!(updated.isrc(), Some("GBUM71029604"));

        Ok(())
    }

    #[tokio::test]
    async fn exact_match_pairs_finds_normalized_pair() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let recording = ctx.seed_recording("guns n roses", "sweet child o mine").await?;
        ctx.seed_recording("queen", "bohemian rhapsody").await?;

        let pairs = vec![
            ("guns n roses".to_string(), "sweet child o mine".to_string()),
            ("nobody".to_string(), "nothing".to_string()),
        ];
        let rows = ctx.repo.exact_match_pairs(&ctx.pool, &pairs).await?;

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].artist_name, "guns n roses");
        assert_eq!(rows[0].recording.id(), recording.id());

        Ok(())
    }

    #[tokio::test]
    async fn for_work_orders_verified_first() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let original = ctx.seed_recording("muse", "uprising").await?;

        let mut conn = ctx.pool.acquire().await?;
        let live = ctx.repo.upsert(&mut conn, original.work_id(), "uprising live", VersionType::Live, None, None).await?;
        ctx.repo.mark_verified(&ctx.pool, live.id()).await?;

        let recordings = ctx.repo.for_work(&ctx.pool, original.work_id()).await?;
        assert_eq!(recordings.len(), 2);
        assert_eq!(recordings[0].id(), live.id());
        assert!(recordings[0].is_verified());

        Ok(())
    }

    #[tokio::test]
    async fn reindex_rows_cover_catalog() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        ctx.seed_recording("queen", "bohemian rhapsody").await?;
        ctx.seed_recording("muse", "uprising").await?;

        let rows = ctx.repo.all_for_reindex(&ctx.pool).await?;
        assert_eq!(rows.len(), 2);

        Ok(())
    }
}

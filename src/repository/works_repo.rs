use std::collections::HashMap;

use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::domain::artist::Artist;
use crate::domain::work::{ArtistRole, Work};
use crate::utils::normalizations::parts_differ;
use crate::utils::similarity::similarity_ratio;
use super::{IntoUuid, RepositoryError};

// Above this ratio the fuzzy search stops scanning further candidates.
const FUZZY_EARLY_EXIT: f64 = 0.95;

#[derive(FromRow)]
struct DbWork {
    id: Vec<u8>,
    title: String,
    primary_artist_id: Option<Vec<u8>>,
    is_instrumental: bool
}

impl TryFrom<DbWork> for Work {
    type Error = RepositoryError;
    fn try_from(db_work: DbWork) -> Result<Self, Self::Error> {
        let primary = db_work.primary_artist_id
            .map(|bytes| Uuid::from_slice(&bytes))
            .transpose()?;

        Ok(Work::from_stored(
            Uuid::from_slice(&db_work.id)?,
            db_work.title,
            primary,
            db_work.is_instrumental,
        ))
    }
}

pub struct SqliteWorksRepository;

impl SqliteWorksRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteWorksRepository {
    pub async fn save<'e, E, W>(&self, executor: E, work: W) -> Result<Work, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        W: AsRef<Work> + Sync
    {
        let db_work = sqlx::query_as::<_, DbWork>(
            "INSERT INTO works(id, title, primary_artist_id, is_instrumental)
            VALUES (?, ?, ?, ?)
            RETURNING id, title, primary_artist_id, is_instrumental;")
            .bind(work.as_ref().id())
            .bind(work.as_ref().title())
            .bind(work.as_ref().primary_artist_id())
            .bind(work.as_ref().is_instrumental())
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_work.try_into()
    }

    pub async fn by_id_fetch<'e, E, ID>(&self, executor: E, id: ID) -> Result<Option<Work>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = id.into_uuid()?;
        let db_work = sqlx::query_as::<_, DbWork>(
            "SELECT id, title, primary_artist_id, is_instrumental FROM works WHERE id = ? LIMIT 1;")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_work.map(Work::try_from).transpose()
    }

    pub async fn by_title_and_artist<'e, E>(
        &self,
        executor: E,
        clean_title: &str,
        primary_artist_id: &Uuid,
    ) -> Result<Option<Work>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let db_work = sqlx::query_as::<_, DbWork>(
            "SELECT id, title, primary_artist_id, is_instrumental FROM works
            WHERE title = ? AND primary_artist_id = ? LIMIT 1;")
            .bind(clean_title)
            .bind(primary_artist_id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_work.map(Work::try_from).transpose()
    }

    async fn count_for_artist(&self, connection: &mut SqliteConnection, artist_id: &Uuid) -> Result<i64, RepositoryError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM works WHERE primary_artist_id = ?;")
            .bind(artist_id)
            .fetch_one(connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)
    }

    /// Fuzzy lookup among one artist's works. Candidates whose part markers
    /// disagree with the query never match, regardless of ratio; one side
    /// carrying a part the other lacks also disqualifies (asymmetric rule).
    pub async fn find_similar(
        &self,
        connection: &mut SqliteConnection,
        clean_title: &str,
        primary_artist_id: &Uuid,
        similarity_threshold: f64,
    ) -> Result<Option<Work>, RepositoryError> {
        let rows = sqlx::query_as::<_, (Vec<u8>, String)>(
            "SELECT id, title FROM works WHERE primary_artist_id = ?;")
            .bind(primary_artist_id)
            .fetch_all(&mut *connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        let mut best: Option<(Uuid, f64)> = None;

        for (id_bytes, title) in rows {
            if parts_differ(clean_title, &title) {
                continue;
            }

            let ratio = similarity_ratio(clean_title, &title);
            if ratio < similarity_threshold {
                continue;
            }

            let id = Uuid::from_slice(&id_bytes)?;
            if best.map(|(_, score)| ratio > score).unwrap_or(true) {
                best = Some((id, ratio));
            }
            if ratio >= FUZZY_EARLY_EXIT {
                break;
            }
        }

        match best {
            Some((id, _)) => self.by_id_fetch(&mut *connection, id).await,
            None => Ok(None),
        }
    }

    /// Get-or-create a Work for (clean_title, primary_artist). Exact match
    /// first; fuzzy only while the artist's catalog stays small enough to
    /// scan (`fuzzy_max_works`).
    pub async fn upsert(
        &self,
        connection: &mut SqliteConnection,
        clean_title: &str,
        primary_artist_id: &Uuid,
        fuzzy_threshold: f64,
        fuzzy_max_works: i64,
    ) -> Result<Work, RepositoryError> {
        if let Some(existing) = self.by_title_and_artist(&mut *connection, clean_title, primary_artist_id).await? {
            return Ok(existing);
        }

        let work_count = self.count_for_artist(&mut *connection, primary_artist_id).await?;
        if work_count > 0 && work_count <= fuzzy_max_works {
            if let Some(similar) = self
                .find_similar(&mut *connection, clean_title, primary_artist_id, fuzzy_threshold)
                .await?
            {
                return Ok(similar);
            }
        }

        let work = Work::new(Uuid::new_v4(), clean_title, Some(*primary_artist_id))?;

        match self.save(&mut *connection, &work).await {
            Ok(saved) => Ok(saved),
            Err(err) if err.is_constraint_violation() => {
                log::warn!("Work insert raced for '{}', re-reading", clean_title);
                self.by_title_and_artist(&mut *connection, work.title(), primary_artist_id)
                    .await?
                    .ok_or(RepositoryError::RowNotFound)
            }
            Err(err) => Err(err),
        }
    }

    /// Idempotently attach artists to a work with their roles. The composite
    /// primary key makes re-links no-ops.
    pub async fn link_work_artists(
        &self,
        connection: &mut SqliteConnection,
        work_id: &Uuid,
        artist_ids: &[Uuid],
        primary_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        for artist_id in artist_ids {
            let role = if artist_id == primary_id {
                ArtistRole::Primary
            } else {
                ArtistRole::Featured
            };

            sqlx::query(
                "INSERT OR IGNORE INTO work_artists(work_id, artist_id, role)
                VALUES (?, ?, ?);")
                .bind(work_id)
                .bind(artist_id)
                .bind(role.as_str())
                .execute(&mut *connection)
                .await
                .map_err(RepositoryError::from_sqlx_error)?;
        }

        Ok(())
    }

    /// All artists associated with each work: the WorkArtist rows plus the
    /// primary artist column (older rows may predate the bridge table).
    pub async fn artists_for_works<'e, E>(
        &self,
        executor: E,
        work_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Artist>>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite> + Copy
    {
        let mut map: HashMap<Uuid, Vec<Artist>> = HashMap::new();
        if work_ids.is_empty() {
            return Ok(map);
        }

        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT wa.work_id, a.id, a.name, a.musicbrainz_id
            FROM work_artists wa JOIN artists a ON a.id = wa.artist_id
            WHERE wa.work_id IN ("
        );
        let mut separated = qbuilder.separated(", ");
        for id in work_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(");");

        let rows = qbuilder.build_query_as::<(Vec<u8>, Vec<u8>, String, Option<String>)>()
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        for (work_id_bytes, artist_id_bytes, name, mbid) in rows {
            let work_id = Uuid::from_slice(&work_id_bytes)?;
            let artist = Artist::from_stored(Uuid::from_slice(&artist_id_bytes)?, name, mbid);
            map.entry(work_id).or_default().push(artist);
        }

        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT w.id, a.id, a.name, a.musicbrainz_id
            FROM works w JOIN artists a ON a.id = w.primary_artist_id
            WHERE w.id IN ("
        );
        let mut separated = qbuilder.separated(", ");
        for id in work_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(");");

        let rows = qbuilder.build_query_as::<(Vec<u8>, Vec<u8>, String, Option<String>)>()
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        for (work_id_bytes, artist_id_bytes, name, mbid) in rows {
            let work_id = Uuid::from_slice(&work_id_bytes)?;
            let artist_id = Uuid::from_slice(&artist_id_bytes)?;
            let artists = map.entry(work_id).or_default();
            if !artists.iter().any(|a| a.id() == &artist_id) {
                artists.push(Artist::from_stored(artist_id, name, mbid));
            }
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {

    use sqlx::SqlitePool;

    use super::*;
    use crate::repository::SqliteArtistsRepository;
    use crate::repository::test_helpers::{prepare_db, TestSetupError};

    const FUZZY_THRESHOLD: f64 = 0.85;
    const FUZZY_MAX_WORKS: i64 = 500;

    struct TestContext {
        pool: SqlitePool,
        repo: SqliteWorksRepository,
        artists: SqliteArtistsRepository,
    }

    impl TestContext {
        async fn new() -> Result<Self, TestSetupError> {
            Ok(
                Self {
                    pool: prepare_db().await?,
                    repo: SqliteWorksRepository::new(),
                    artists: SqliteArtistsRepository::new(),
                }
            )
        }

        async fn artist(&self, name: &str) -> Result<Uuid, TestSetupError> {
            let mut conn = self.pool.acquire().await?;
            Ok(*self.artists.upsert(&mut conn, name).await?.id())
        }
    }

    #[tokio::test]
    async fn upsert_reuses_exact_title() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let artist_id = ctx.artist("test artist").await?;
        let mut conn = ctx.pool.acquire().await?;

        let first = ctx.repo.upsert(&mut conn, "song title", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;
        let second = ctx.repo.upsert(&mut conn, "song title", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;

        assert_eq!(first.id(), second.id());

        Ok(())
    }

    #[tokio::test]
    async fn upsert_fuzzy_matches_minor_typo() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let artist_id = ctx.artist("test artist").await?;
        let mut conn = ctx.pool.acquire().await?;

        let first = ctx.repo.upsert(&mut conn, "song title", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;
        let second = ctx.repo.upsert(&mut conn, "song titl", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;

        assert_eq!(first.id(), second.id());

        Ok(())
    }

    #[tokio::test]
    async fn upsert_below_threshold_creates_new_work() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let artist_id = ctx.artist("test artist").await?;
        let mut conn = ctx.pool.acquire().await?;

        let first = ctx.repo.upsert(&mut conn, "song title", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;
        let second = ctx.repo.upsert(&mut conn, "completely different", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;

        assert_ne!(first.id(), second.id());

        Ok(())
    }

    #[tokio::test]
    async fn different_artists_never_share_works() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let artist_a = ctx.artist("artist a").await?;
        let artist_b = ctx.artist("artist b").await?;
        let mut conn = ctx.pool.acquire().await?;

        let first = ctx.repo.upsert(&mut conn, "wonderwall", &artist_a, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;
        let second = ctx.repo.upsert(&mut conn, "wonderwall", &artist_b, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;

        assert_ne!(first.id(), second.id());

        Ok(())
    }

    #[tokio::test]
    async fn part_numbers_separate_works() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let artist_id = ctx.artist("test artist").await?;
        let mut conn = ctx.pool.acquire().await?;

        let part_one = ctx.repo.upsert(&mut conn, "symphony part 1", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;
        let part_two = ctx.repo.upsert(&mut conn, "symphony part 2", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;
        assert_ne!(part_one.id(), part_two.id());

        // Abbreviated form of the same part folds into the existing work.
        let part_one_abbrev = ctx.repo.upsert(&mut conn, "symphony pt 1", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;
        assert_eq!(part_one.id(), part_one_abbrev.id());

        Ok(())
    }

    #[tokio::test]
    async fn asymmetric_part_creates_separate_works() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let artist_id = ctx.artist("test artist").await?;
        let mut conn = ctx.pool.acquire().await?;

        let plain = ctx.repo.upsert(&mut conn, "symphony", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;
        let part = ctx.repo.upsert(&mut conn, "symphony part 1", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;

        assert_ne!(plain.id(), part.id());

        Ok(())
    }

    #[tokio::test]
    async fn fuzzy_skipped_for_large_catalogs() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let artist_id = ctx.artist("prolific artist").await?;
        let mut conn = ctx.pool.acquire().await?;

        ctx.repo.upsert(&mut conn, "song title", &artist_id, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;

        // With the cap at one work the typo no longer fuzzy-matches.
        let second = ctx.repo.upsert(&mut conn, "song titl", &artist_id, FUZZY_THRESHOLD, 0).await?;
        assert_eq!(second.title(), "song titl");

        Ok(())
    }

    #[tokio::test]
    async fn link_work_artists_is_idempotent() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let primary = ctx.artist("primary one").await?;
        let featured = ctx.artist("featured one").await?;
        let mut conn = ctx.pool.acquire().await?;

        let work = ctx.repo.upsert(&mut conn, "collab song", &primary, FUZZY_THRESHOLD, FUZZY_MAX_WORKS).await?;

        ctx.repo.link_work_artists(&mut conn, work.id(), &[primary, featured], &primary).await?;
        ctx.repo.link_work_artists(&mut conn, work.id(), &[primary, featured], &primary).await?;

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM work_artists WHERE work_id = ?;")
            .bind(work.id())
            .fetch_one(&ctx.pool)
            .await?;
        assert_eq!(count, 2);

        let artist_map = ctx.repo.artists_for_works(&ctx.pool, &[*work.id()]).await?;
        assert_eq!(artist_map.get(work.id()).map(|a| a.len()), Some(2));

        Ok(())
    }
}

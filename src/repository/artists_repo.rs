use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::domain::artist::Artist;
use super::{IntoUuid, RepositoryError};

#[derive(FromRow)]
struct DbArtist {
    id: Vec<u8>,
    name: String,
    musicbrainz_id: Option<String>
}

impl TryFrom<DbArtist> for Artist {
    type Error = RepositoryError;
    fn try_from(db_artist: DbArtist) -> Result<Self, Self::Error> {
        Ok(Artist::from_stored(
            Uuid::from_slice(&db_artist.id)?,
            db_artist.name,
            db_artist.musicbrainz_id,
        ))
    }
}

pub struct SqliteArtistsRepository;

impl SqliteArtistsRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteArtistsRepository {
    pub async fn save<'e, E, A>(&self, executor: E, artist: A) -> Result<Artist, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        A: AsRef<Artist> + Sync
    {
        let db_artist = sqlx::query_as::<_, DbArtist>(
            "INSERT INTO artists(id, name, musicbrainz_id)
            VALUES (?, ?, ?)
            RETURNING id, name, musicbrainz_id;")
            .bind(artist.as_ref().id())
            .bind(artist.as_ref().name())
            .bind(artist.as_ref().musicbrainz_id())
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_artist.try_into()
    }

    /// Get-or-create by normalized name. A unique-constraint collision means
    /// a parallel task won the insert race; re-read and use their row.
    pub async fn upsert(&self, connection: &mut SqliteConnection, clean_name: &str) -> Result<Artist, RepositoryError> {
        if let Some(existing) = self.by_name_fetch(&mut *connection, clean_name).await? {
            return Ok(existing);
        }

        let artist = Artist::new(Uuid::new_v4(), clean_name)?;

        match self.save(&mut *connection, &artist).await {
            Ok(saved) => Ok(saved),
            Err(err) if err.is_constraint_violation() => {
                log::warn!("Artist insert raced for '{}', re-reading", clean_name);
                self.by_name_fetch(&mut *connection, artist.name())
                    .await?
                    .ok_or(RepositoryError::RowNotFound)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn by_id_fetch<'e, E, ID>(&self, executor: E, id: ID) -> Result<Option<Artist>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = id.into_uuid()?;
        let db_artist = sqlx::query_as::<_, DbArtist>(
            "SELECT id, name, musicbrainz_id FROM artists WHERE id = ? LIMIT 1;")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_artist.map(Artist::try_from).transpose()
    }

    pub async fn by_name_fetch<'e, E, S>(&self, executor: E, name: S) -> Result<Option<Artist>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        S: Into<String>
    {
        let name_string = name.into();
        let db_artist = sqlx::query_as::<_, DbArtist>(
            "SELECT id, name, musicbrainz_id FROM artists WHERE name = ? LIMIT 1;"
        )
        .bind(name_string)
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        db_artist.map(Artist::try_from).transpose()
    }

    pub async fn by_ids_fetch<'e, E>(&self, executor: E, ids: &[Uuid]) -> Result<Vec<Artist>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, name, musicbrainz_id FROM artists WHERE id IN ("
        );
        let mut separated = qbuilder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(");");

        let rows = qbuilder.build_query_as::<DbArtist>()
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(Artist::try_from).collect()
    }

    pub async fn name_exists<'e, E, S>(&self, executor: E, name: S) -> Result<bool, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        S: Into<String>
    {
        let name_string = name.into();
        let the_answer = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM artists WHERE name = ? LIMIT 1);"
        )
        .bind(&name_string)
        .fetch_one(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        match the_answer {
            0 => Ok(false),
            1 => Ok(true),
            something_else => {
                let err_string = format!("Unexpected value returned from EXISTS query for name {}: {}", name_string, something_else);
                Err(RepositoryError::UnknownError(err_string))
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use sqlx::SqlitePool;

    use super::*;
    use crate::repository::test_helpers::{prepare_db, TestSetupError};

    struct TestContext {
        pool: SqlitePool,
        repo: SqliteArtistsRepository,
    }

    impl TestContext {
        async fn new() -> Result<Self, TestSetupError> {
            Ok(
                Self {
                    pool: prepare_db().await?,
                    repo: SqliteArtistsRepository::new(),
                }
            )
        }
    }

    #[tokio::test]
    async fn save_and_fetch_by_name() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let artist = Artist::new(Uuid::new_v4(), "The Beatles")?;

        let saved = ctx.repo.save(&ctx.pool, &artist).await?;
        assert_eq!(saved.name(), "beatles");

        let fetched = ctx.repo.by_name_fetch(&ctx.pool, "beatles").await?;
        assert_eq!(fetched.unwrap().id(), artist.id());

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_name_is_constraint_violation() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let artist = Artist::new(Uuid::new_v4(), "Queen")?;
        ctx.repo.save(&ctx.pool, &artist).await?;

        let twin = Artist::new(Uuid::new_v4(), "Queen")?;
        let result = ctx.repo.save(&ctx.pool, &twin).await;

        match result {
            Err(err) => assert!(err.is_constraint_violation()),
            Ok(_) => panic!("Expected a unique constraint violation"),
        }

        Ok(())
    }

    #[tokio::test]
    async fn upsert_returns_existing_row() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;

        let first = ctx.repo.upsert(&mut conn, "daft punk").await?;
        let second = ctx.repo.upsert(&mut conn, "daft punk").await?;

        assert_eq!(first.id(), second.id());

        Ok(())
    }

    #[tokio::test]
    async fn by_ids_fetch_returns_requested() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;

        let a = ctx.repo.upsert(&mut conn, "artist one").await?;
        let b = ctx.repo.upsert(&mut conn, "artist two").await?;
        ctx.repo.upsert(&mut conn, "artist three").await?;

        let fetched = ctx.repo.by_ids_fetch(&ctx.pool, &[*a.id(), *b.id()]).await?;
        assert_eq!(fetched.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn name_exists_answers() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;
        ctx.repo.upsert(&mut conn, "interpol").await?;

        assert!(ctx.repo.name_exists(&ctx.pool, "interpol").await?);
        assert!(!ctx.repo.name_exists(&ctx.pool, "fake as hell").await?);

        Ok(())
    }
}

use std::collections::HashMap;

use chrono::Utc;
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::domain::library_file::LibraryFile;
use super::{IntoUuid, RepositoryError};

#[derive(FromRow)]
struct DbLibraryFile {
    id: Vec<u8>,
    recording_id: Vec<u8>,
    path: String,
    file_hash: Option<String>,
    size: Option<i64>,
    mtime: Option<f64>,
    format: Option<String>,
    bitrate: Option<i64>
}

impl TryFrom<DbLibraryFile> for LibraryFile {
    type Error = RepositoryError;
    fn try_from(db_file: DbLibraryFile) -> Result<Self, Self::Error> {
        Ok(LibraryFile::from_stored(
            Uuid::from_slice(&db_file.id)?,
            Uuid::from_slice(&db_file.recording_id)?,
            db_file.path,
            db_file.file_hash,
            db_file.size.unwrap_or(0).try_into()?,
            db_file.mtime,
            db_file.format.unwrap_or_default(),
            db_file.bitrate.map(|b| b.try_into()).transpose()?,
        ))
    }
}

/// One row of the in-memory path index the scanner builds up front so the
/// stat-first skip needs no per-file DB round trip.
#[derive(Clone, Debug)]
pub struct PathIndexEntry {
    pub id: Uuid,
    pub size: Option<i64>,
    pub mtime: Option<f64>,
}

/// A known file whose path was not seen this scan; candidate for move
/// detection, keyed by content PID and size.
#[derive(Clone, Debug)]
pub struct MissingFileRow {
    pub id: Uuid,
    pub path: String,
    pub size: Option<i64>,
    pub artist_name: Option<String>,
    pub work_title: Option<String>,
}

pub struct SqliteLibraryFilesRepository;

impl SqliteLibraryFilesRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteLibraryFilesRepository {
    pub async fn save<'e, E, F>(&self, executor: E, file: F) -> Result<LibraryFile, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        F: AsRef<LibraryFile> + Sync
    {
        let f = file.as_ref();
        let path_str = f.path().to_str()
            .ok_or_else(|| RepositoryError::InvalidPathEncoding(f.path().clone()))?;

        let db_file = sqlx::query_as::<_, DbLibraryFile>(
            "INSERT INTO library_files(id, recording_id, path, file_hash, size, mtime, format, bitrate)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, recording_id, path, file_hash, size, mtime, format, bitrate;")
            .bind(f.id())
            .bind(f.recording_id())
            .bind(path_str)
            .bind(f.file_hash())
            .bind(f.size() as i64)
            .bind(f.mtime())
            .bind(f.format())
            .bind(f.bitrate().map(|b| b as i64))
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_file.try_into()
    }

    pub async fn by_path_fetch<'e, E>(&self, executor: E, path: &str) -> Result<Option<LibraryFile>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let db_file = sqlx::query_as::<_, DbLibraryFile>(
            "SELECT id, recording_id, path, file_hash, size, mtime, format, bitrate
            FROM library_files WHERE path = ? LIMIT 1;")
            .bind(path)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_file.map(LibraryFile::try_from).transpose()
    }

    /// Full (path → id/size/mtime) snapshot, loaded once per scan. Paths are
    /// normalized to forward slashes on the way out.
    pub async fn load_path_index<'e, E>(&self, executor: E) -> Result<HashMap<String, PathIndexEntry>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let rows = sqlx::query_as::<_, (Vec<u8>, String, Option<i64>, Option<f64>)>(
            "SELECT id, path, size, mtime FROM library_files;")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        let mut index = HashMap::with_capacity(rows.len());
        for (id, path, size, mtime) in rows {
            let normalized = path.replace('\\', "/");
            index.insert(normalized, PathIndexEntry { id: Uuid::from_slice(&id)?, size, mtime });
        }

        Ok(index)
    }

    pub async fn update_size_and_mtime<'e, E, ID>(&self, executor: E, id: ID, size: i64, mtime: f64) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = id.into_uuid()?;
        sqlx::query("UPDATE library_files SET size = ?, mtime = ? WHERE id = ?;")
            .bind(size)
            .bind(mtime)
            .bind(id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn update_mtime<'e, E, ID>(&self, executor: E, id: ID, mtime: f64) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = id.into_uuid()?;
        sqlx::query("UPDATE library_files SET mtime = ? WHERE id = ?;")
            .bind(mtime)
            .bind(id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    /// Batched "seen this scan" marker: refreshes updated_at for files whose
    /// content did not change.
    pub async fn touch_batch<'e, E>(&self, executor: E, ids: &[Uuid]) -> Result<u64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE library_files SET updated_at = ");
        qbuilder.push_bind(now);
        qbuilder.push(" WHERE id IN (");
        let mut separated = qbuilder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(");");

        let result = qbuilder.build()
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(result.rows_affected())
    }

    /// Re-points a known row at a file's new location (move detection hit).
    pub async fn retarget<'e, E, ID>(&self, executor: E, id: ID, new_path: &str, size: i64, mtime: f64) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = id.into_uuid()?;
        sqlx::query("UPDATE library_files SET path = ?, size = ?, mtime = ? WHERE id = ?;")
            .bind(new_path)
            .bind(size)
            .bind(mtime)
            .bind(id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    /// Loads identity context for missing paths (one chunk at a time) so the
    /// scanner can compute their content PIDs without touching the files.
    pub async fn missing_candidates<'e, E>(&self, executor: E, paths: &[String]) -> Result<Vec<MissingFileRow>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT lf.id, lf.path, lf.size, a.name, w.title
            FROM library_files lf
            JOIN recordings r ON r.id = lf.recording_id
            JOIN works w ON w.id = r.work_id
            LEFT JOIN artists a ON a.id = w.primary_artist_id
            WHERE lf.path IN ("
        );
        let mut separated = qbuilder.separated(", ");
        for path in paths {
            separated.push_bind(path);
        }
        separated.push_unseparated(");");

        let rows = qbuilder.build_query_as::<(Vec<u8>, String, Option<i64>, Option<String>, Option<String>)>()
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(|(id, path, size, artist_name, work_title)| Ok(MissingFileRow {
                id: Uuid::from_slice(&id)?,
                path,
                size,
                artist_name,
                work_title,
            }))
            .collect()
    }

    pub async fn has_file_for_recording<'e, E>(&self, executor: E, recording_id: &Uuid) -> Result<bool, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM library_files WHERE recording_id = ? LIMIT 1);")
            .bind(recording_id)
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(found == 1)
    }

    pub async fn first_file_for_recording<'e, E>(&self, executor: E, recording_id: &Uuid) -> Result<Option<LibraryFile>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let db_file = sqlx::query_as::<_, DbLibraryFile>(
            "SELECT id, recording_id, path, file_hash, size, mtime, format, bitrate
            FROM library_files WHERE recording_id = ?
            ORDER BY created_at ASC LIMIT 1;")
            .bind(recording_id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_file.map(LibraryFile::try_from).transpose()
    }
}

use std::collections::HashMap;

use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::domain::policy::{FormatPreference, StationPreference, WorkDefaultRecording};
use super::RepositoryError;

#[derive(FromRow)]
struct DbStationPreference {
    id: Vec<u8>,
    station_id: Vec<u8>,
    work_id: Vec<u8>,
    preferred_recording_id: Vec<u8>,
    priority: i64
}

impl TryFrom<DbStationPreference> for StationPreference {
    type Error = RepositoryError;
    fn try_from(row: DbStationPreference) -> Result<Self, Self::Error> {
        Ok(StationPreference {
            id: Uuid::from_slice(&row.id)?,
            station_id: Uuid::from_slice(&row.station_id)?,
            work_id: Uuid::from_slice(&row.work_id)?,
            preferred_recording_id: Uuid::from_slice(&row.preferred_recording_id)?,
            priority: row.priority,
        })
    }
}

#[derive(FromRow)]
struct DbFormatPreference {
    id: Vec<u8>,
    format_code: String,
    work_id: Vec<u8>,
    preferred_recording_id: Vec<u8>,
    priority: i64,
    exclude_tags: String
}

impl TryFrom<DbFormatPreference> for FormatPreference {
    type Error = RepositoryError;
    fn try_from(row: DbFormatPreference) -> Result<Self, Self::Error> {
        Ok(FormatPreference {
            id: Uuid::from_slice(&row.id)?,
            format_code: row.format_code,
            work_id: Uuid::from_slice(&row.work_id)?,
            preferred_recording_id: Uuid::from_slice(&row.preferred_recording_id)?,
            priority: row.priority,
            exclude_tags: serde_json::from_str(&row.exclude_tags)?,
        })
    }
}

pub struct SqlitePreferencesRepository;

impl SqlitePreferencesRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqlitePreferencesRepository {
    /// Station preferences for a (station, work), best priority first.
    pub async fn station_preferences<'e, E>(
        &self,
        executor: E,
        station_id: &Uuid,
        work_id: &Uuid,
    ) -> Result<Vec<StationPreference>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let rows = sqlx::query_as::<_, DbStationPreference>(
            "SELECT id, station_id, work_id, preferred_recording_id, priority
            FROM station_preferences
            WHERE station_id = ? AND work_id = ?
            ORDER BY priority ASC;")
            .bind(station_id)
            .bind(work_id)
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(StationPreference::try_from).collect()
    }

    pub async fn format_preferences<'e, E>(
        &self,
        executor: E,
        format_code: &str,
        work_id: &Uuid,
    ) -> Result<Vec<FormatPreference>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let rows = sqlx::query_as::<_, DbFormatPreference>(
            "SELECT id, format_code, work_id, preferred_recording_id, priority, exclude_tags
            FROM format_preferences
            WHERE format_code = ? AND work_id = ?
            ORDER BY priority ASC;")
            .bind(format_code)
            .bind(work_id)
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(FormatPreference::try_from).collect()
    }

    pub async fn work_default<'e, E>(&self, executor: E, work_id: &Uuid) -> Result<Option<WorkDefaultRecording>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let row = sqlx::query_as::<_, (Vec<u8>, Vec<u8>)>(
            "SELECT work_id, default_recording_id FROM work_default_recordings WHERE work_id = ? LIMIT 1;")
            .bind(work_id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        row.map(|(work_id, default_recording_id)| Ok(WorkDefaultRecording {
            work_id: Uuid::from_slice(&work_id)?,
            default_recording_id: Uuid::from_slice(&default_recording_id)?,
        }))
        .transpose()
    }

    pub async fn set_station_preference(
        &self,
        connection: &mut SqliteConnection,
        station_id: &Uuid,
        work_id: &Uuid,
        recording_id: &Uuid,
        priority: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO station_preferences(id, station_id, work_id, preferred_recording_id, priority)
            VALUES (?, ?, ?, ?, ?);")
            .bind(Uuid::new_v4())
            .bind(station_id)
            .bind(work_id)
            .bind(recording_id)
            .bind(priority)
            .execute(connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn set_format_preference(
        &self,
        connection: &mut SqliteConnection,
        format_code: &str,
        work_id: &Uuid,
        recording_id: &Uuid,
        priority: i64,
        exclude_tags: &[String],
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO format_preferences(id, format_code, work_id, preferred_recording_id, priority, exclude_tags)
            VALUES (?, ?, ?, ?, ?, ?);")
            .bind(Uuid::new_v4())
            .bind(format_code)
            .bind(work_id)
            .bind(recording_id)
            .bind(priority)
            .bind(serde_json::to_string(exclude_tags)?)
            .execute(connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn set_work_default(
        &self,
        connection: &mut SqliteConnection,
        work_id: &Uuid,
        recording_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO work_default_recordings(work_id, default_recording_id)
            VALUES (?, ?)
            ON CONFLICT(work_id) DO UPDATE SET default_recording_id = excluded.default_recording_id;")
            .bind(work_id)
            .bind(recording_id)
            .execute(connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }
}

// ---- Persisted dynamic settings -------------------------------------------

impl SqlitePreferencesRepository {
    pub async fn settings_all<'e, E>(&self, executor: E) -> Result<HashMap<String, String>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM system_settings;")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(rows.into_iter().collect())
    }

    pub async fn settings_set(
        &self,
        connection: &mut SqliteConnection,
        key: &str,
        value: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO system_settings(key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now');")
            .bind(key)
            .bind(value)
            .execute(connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }
}

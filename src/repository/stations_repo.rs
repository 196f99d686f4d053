use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::domain::station::Station;
use super::{IntoUuid, RepositoryError};

#[derive(FromRow)]
struct DbStation {
    id: Vec<u8>,
    callsign: String,
    format_code: Option<String>
}

impl TryFrom<DbStation> for Station {
    type Error = RepositoryError;
    fn try_from(db_station: DbStation) -> Result<Self, Self::Error> {
        Ok(Station::from_stored(
            Uuid::from_slice(&db_station.id)?,
            db_station.callsign,
            db_station.format_code,
        ))
    }
}

pub struct SqliteStationsRepository;

impl SqliteStationsRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteStationsRepository {
    pub async fn save<'e, E, S>(&self, executor: E, station: S) -> Result<Station, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        S: AsRef<Station> + Sync
    {
        let db_station = sqlx::query_as::<_, DbStation>(
            "INSERT INTO stations(id, callsign, format_code)
            VALUES (?, ?, ?)
            RETURNING id, callsign, format_code;")
            .bind(station.as_ref().id())
            .bind(station.as_ref().callsign())
            .bind(station.as_ref().format_code())
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_station.try_into()
    }

    pub async fn by_id_fetch<'e, E, ID>(&self, executor: E, id: ID) -> Result<Option<Station>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = id.into_uuid()?;
        let db_station = sqlx::query_as::<_, DbStation>(
            "SELECT id, callsign, format_code FROM stations WHERE id = ? LIMIT 1;")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_station.map(Station::try_from).transpose()
    }

    pub async fn by_callsign_fetch<'e, E>(&self, executor: E, callsign: &str) -> Result<Option<Station>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let db_station = sqlx::query_as::<_, DbStation>(
            "SELECT id, callsign, format_code FROM stations WHERE callsign = ? LIMIT 1;")
            .bind(callsign.to_uppercase())
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_station.map(Station::try_from).transpose()
    }

    pub async fn upsert(&self, connection: &mut SqliteConnection, callsign: &str) -> Result<Station, RepositoryError> {
        if let Some(existing) = self.by_callsign_fetch(&mut *connection, callsign).await? {
            return Ok(existing);
        }

        let station = Station::new(Uuid::new_v4(), callsign)?;

        match self.save(&mut *connection, &station).await {
            Ok(saved) => Ok(saved),
            Err(err) if err.is_constraint_violation() => {
                self.by_callsign_fetch(&mut *connection, callsign)
                    .await?
                    .ok_or(RepositoryError::RowNotFound)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn format_code_for<'e, E, ID>(&self, executor: E, station_id: ID) -> Result<Option<String>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = station_id.into_uuid()?;
        let code = sqlx::query_scalar::<_, Option<String>>(
            "SELECT format_code FROM stations WHERE id = ?;")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(code.flatten())
    }

    pub async fn set_format_code<'e, E, ID>(&self, executor: E, station_id: ID, format_code: Option<&str>) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = station_id.into_uuid()?;
        sqlx::query("UPDATE stations SET format_code = ? WHERE id = ?;")
            .bind(format_code)
            .bind(id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }
}

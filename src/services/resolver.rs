use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::recording::Recording;
use crate::repository::{
    RepositoryError, SqliteLibraryFilesRepository, SqlitePreferencesRepository,
    SqliteRecordingsRepository, SqliteStationsRepository,
};

/// Resolves a Work to the Recording that should actually play, walking the
/// policy ladder: station preference, format preference, work default, any
/// available recording (verified first), and finally any recording at all.
///
/// Availability means "at least one LibraryFile row exists". The resolver is
/// allowed to be stale about files that vanished from disk; periodic scans
/// reconcile that.
pub struct RecordingResolver {
    pool: SqlitePool,
    preferences: SqlitePreferencesRepository,
    recordings: SqliteRecordingsRepository,
    files: SqliteLibraryFilesRepository,
    stations: SqliteStationsRepository,
}

impl RecordingResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            preferences: SqlitePreferencesRepository::new(),
            recordings: SqliteRecordingsRepository::new(),
            files: SqliteLibraryFilesRepository::new(),
            stations: SqliteStationsRepository::new(),
        }
    }

    pub async fn resolve(
        &self,
        work_id: &Uuid,
        station_id: Option<&Uuid>,
        format_code: Option<&str>,
    ) -> Result<Option<Recording>, RepositoryError> {
        // 1. Station-specific preference.
        if let Some(station_id) = station_id {
            if let Some(recording) = self.resolve_station_preference(station_id, work_id).await? {
                log::debug!("Resolved work {} via station preference -> {}", work_id, recording.id());
                return Ok(Some(recording));
            }
        }

        // 2. Format preference; an explicit format code wins over the
        // station's own.
        let effective_format = match format_code {
            Some(code) => Some(code.to_string()),
            None => match station_id {
                Some(station_id) => self.stations.format_code_for(&self.pool, station_id).await?,
                None => None,
            },
        };

        if let Some(code) = effective_format {
            if let Some(recording) = self.resolve_format_preference(&code, work_id).await? {
                log::debug!("Resolved work {} via format preference ({}) -> {}", work_id, code, recording.id());
                return Ok(Some(recording));
            }
        }

        // 3. Work default.
        if let Some(default) = self.preferences.work_default(&self.pool, work_id).await? {
            if self.files.has_file_for_recording(&self.pool, &default.default_recording_id).await? {
                if let Some(recording) = self.recordings.by_id_fetch(&self.pool, &default.default_recording_id).await? {
                    log::debug!("Resolved work {} via work default -> {}", work_id, recording.id());
                    return Ok(Some(recording));
                }
            }
        }

        // 4./5. Any recording with a file (verified rows sort first); failing
        // that, the first recording even without a file. Callers must
        // tolerate the file-less case.
        let recordings = self.recordings.for_work(&self.pool, work_id).await?;
        for recording in &recordings {
            if self.files.has_file_for_recording(&self.pool, recording.id()).await? {
                return Ok(Some(recording.clone()));
            }
        }

        if recordings.is_empty() {
            log::warn!("No recording at all for work {}", work_id);
        }

        Ok(recordings.into_iter().next())
    }

    /// Convenience entry for playback of a broadcast log: station context
    /// only, no explicit format.
    pub async fn resolve_for_broadcast_log(
        &self,
        work_id: &Uuid,
        station_id: Option<&Uuid>,
    ) -> Result<Option<Recording>, RepositoryError> {
        self.resolve(work_id, station_id, None).await
    }

    async fn resolve_station_preference(&self, station_id: &Uuid, work_id: &Uuid) -> Result<Option<Recording>, RepositoryError> {
        let preferences = self.preferences.station_preferences(&self.pool, station_id, work_id).await?;

        for preference in preferences {
            if self.files.has_file_for_recording(&self.pool, &preference.preferred_recording_id).await? {
                return self.recordings.by_id_fetch(&self.pool, &preference.preferred_recording_id).await;
            }
        }

        Ok(None)
    }

    async fn resolve_format_preference(&self, format_code: &str, work_id: &Uuid) -> Result<Option<Recording>, RepositoryError> {
        let preferences = self.preferences.format_preferences(&self.pool, format_code, work_id).await?;

        for preference in preferences {
            if self.files.has_file_for_recording(&self.pool, &preference.preferred_recording_id).await? {
                return self.recordings.by_id_fetch(&self.pool, &preference.preferred_recording_id).await;
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use sqlx::SqlitePool;

    use super::*;
    use crate::domain::recording::VersionType;
    use crate::services::test_helpers::{
        attach_file, init_logger, prepare_db, seed_catalog_entry, seed_station, TestSetupError,
    };

    struct TestContext {
        pool: SqlitePool,
        resolver: RecordingResolver,
    }

    impl TestContext {
        async fn new() -> Result<Self, TestSetupError> {
            init_logger()?;
            let pool = prepare_db().await?;
            Ok(Self {
                resolver: RecordingResolver::new(pool.clone()),
                pool,
            })
        }

        async fn add_recording(&self, work_id: &Uuid, title: &str, version: VersionType) -> Result<Uuid, TestSetupError> {
            let mut conn = self.pool.acquire().await?;
            let recording = SqliteRecordingsRepository::new()
                .upsert(&mut conn, work_id, title, version, None, None)
                .await?;
            Ok(*recording.id())
        }
    }

    #[tokio::test]
    async fn station_preference_wins_when_available() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let station_id = seed_station(&ctx.pool, "KEXP").await?;
        let (work_id, original) = seed_catalog_entry(&ctx.pool, "queen", "bohemian rhapsody").await?;
        let live = ctx.add_recording(&work_id, "bohemian rhapsody live", VersionType::Live).await?;

        attach_file(&ctx.pool, original, "m/original.mp3").await?;
        attach_file(&ctx.pool, live, "m/live.mp3").await?;

        let mut conn = ctx.pool.acquire().await?;
        SqlitePreferencesRepository::new()
            .set_station_preference(&mut conn, &station_id, &work_id, &live, 1)
            .await?;

        let resolved = ctx.resolver.resolve(&work_id, Some(&station_id), None).await?.unwrap();
        assert_eq!(resolved.id(), &live);

        Ok(())
    }

    #[tokio::test]
    async fn station_preference_skipped_without_file() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let station_id = seed_station(&ctx.pool, "KEXP").await?;
        let (work_id, original) = seed_catalog_entry(&ctx.pool, "queen", "bohemian rhapsody").await?;
        let live = ctx.add_recording(&work_id, "bohemian rhapsody live", VersionType::Live).await?;

        // Preferred recording has no file; only the original does.
        attach_file(&ctx.pool, original, "m/original.mp3").await?;

        let mut conn = ctx.pool.acquire().await?;
        SqlitePreferencesRepository::new()
            .set_station_preference(&mut conn, &station_id, &work_id, &live, 1)
            .await?;

        let resolved = ctx.resolver.resolve(&work_id, Some(&station_id), None).await?.unwrap();
        assert_eq!(resolved.id(), &original);

        Ok(())
    }

    #[tokio::test]
    async fn format_preference_uses_station_format_fallback() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let station_id = seed_station(&ctx.pool, "WXRT").await?;
        SqliteStationsRepository::new().set_format_code(&ctx.pool, &station_id, Some("AC")).await?;

        let (work_id, original) = seed_catalog_entry(&ctx.pool, "queen", "bohemian rhapsody").await?;
        let radio = ctx.add_recording(&work_id, "bohemian rhapsody radio", VersionType::Radio).await?;

        attach_file(&ctx.pool, original, "m/original.mp3").await?;
        attach_file(&ctx.pool, radio, "m/radio.mp3").await?;

        let mut conn = ctx.pool.acquire().await?;
        SqlitePreferencesRepository::new()
            .set_format_preference(&mut conn, "AC", &work_id, &radio, 1, &[])
            .await?;

        // No explicit format code: the station's own code kicks in.
        let resolved = ctx.resolver.resolve(&work_id, Some(&station_id), None).await?.unwrap();
        assert_eq!(resolved.id(), &radio);

        Ok(())
    }

    #[tokio::test]
    async fn work_default_rung() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (work_id, original) = seed_catalog_entry(&ctx.pool, "queen", "bohemian rhapsody").await?;
        let acoustic = ctx.add_recording(&work_id, "bohemian rhapsody acoustic", VersionType::Acoustic).await?;

        attach_file(&ctx.pool, original, "m/original.mp3").await?;
        attach_file(&ctx.pool, acoustic, "m/acoustic.mp3").await?;

        let mut conn = ctx.pool.acquire().await?;
        SqlitePreferencesRepository::new().set_work_default(&mut conn, &work_id, &acoustic).await?;

        let resolved = ctx.resolver.resolve(&work_id, None, None).await?.unwrap();
        assert_eq!(resolved.id(), &acoustic);

        Ok(())
    }

    #[tokio::test]
    async fn fallback_prefers_verified_recording_with_file() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (work_id, original) = seed_catalog_entry(&ctx.pool, "queen", "bohemian rhapsody").await?;
        let verified = ctx.add_recording(&work_id, "bohemian rhapsody verified", VersionType::Original).await?;
        SqliteRecordingsRepository::new().mark_verified(&ctx.pool, &verified).await?;

        attach_file(&ctx.pool, original, "m/original.mp3").await?;
        attach_file(&ctx.pool, verified, "m/verified.mp3").await?;

        let resolved = ctx.resolver.resolve(&work_id, None, None).await?.unwrap();
        assert_eq!(resolved.id(), &verified);

        Ok(())
    }

    #[tokio::test]
    async fn last_resort_returns_fileless_recording() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (work_id, original) = seed_catalog_entry(&ctx.pool, "queen", "bohemian rhapsody").await?;

        // No files anywhere; the caller gets the recording anyway and must
        // tolerate the missing file.
        let resolved = ctx.resolver.resolve(&work_id, None, None).await?.unwrap();
        assert_eq!(resolved.id(), &original);

        Ok(())
    }

    #[tokio::test]
    async fn unknown_work_resolves_to_none() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let resolved = ctx.resolver.resolve(&Uuid::new_v4(), None, None).await?;
        assert!(resolved.is_none());

        Ok(())
    }
}

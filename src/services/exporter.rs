use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::broadcast_log::BroadcastLog;
use crate::repository::logs_repo::LogExportFilter;
use crate::repository::{
    SqliteArtistsRepository, SqliteBroadcastLogsRepository, SqliteLibraryFilesRepository,
    SqliteStationsRepository, SqliteWorksRepository,
};
use crate::services::resolver::RecordingResolver;
use super::ExportError;

#[derive(Debug)]
pub struct M3uReport {
    pub path: PathBuf,
    pub included: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub struct CsvExportReport {
    pub path: PathBuf,
    pub rows: usize,
}

/// File exports over the broadcast history: an M3U playlist of resolved
/// library files and a CSV dump for external scheduling software.
pub struct LogExporter {
    pool: SqlitePool,
    logs: SqliteBroadcastLogsRepository,
    works: SqliteWorksRepository,
    artists: SqliteArtistsRepository,
    files: SqliteLibraryFilesRepository,
    stations: SqliteStationsRepository,
    resolver: RecordingResolver,
}

impl LogExporter {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            resolver: RecordingResolver::new(pool.clone()),
            logs: SqliteBroadcastLogsRepository::new(),
            works: SqliteWorksRepository::new(),
            artists: SqliteArtistsRepository::new(),
            files: SqliteLibraryFilesRepository::new(),
            stations: SqliteStationsRepository::new(),
            pool,
        }
    }

    /// Writes `airwave_playlist_{timestamp}.m3u` into `output_dir`. Logs in
    /// chronological order; one line pair per log whose Work resolves to a
    /// recording with a file. Everything else is counted as skipped.
    pub async fn export_m3u(&self, filter: &LogExportFilter, output_dir: &Path) -> Result<M3uReport, ExportError> {
        let mut filter = filter.clone();
        filter.matched_only = true;
        let logs = self.logs.fetch_for_export(&self.pool, &filter).await?;

        let mut lines = vec!["#EXTM3U".to_string()];
        let mut included = 0usize;
        let mut skipped = 0usize;

        for log in &logs {
            let Some(work_id) = log.work_id else {
                skipped += 1;
                continue;
            };

            let recording = self.resolver
                .resolve_for_broadcast_log(&work_id, Some(&log.station_id))
                .await?;
            let Some(recording) = recording else {
                skipped += 1;
                continue;
            };

            let Some(file) = self.files.first_file_for_recording(&self.pool, recording.id()).await? else {
                log::warn!("Recording {} has no library files; skipping log {}", recording.id(), log.id);
                skipped += 1;
                continue;
            };

            let artist_name = match self.artist_display_name(&work_id).await? {
                Some(name) => name,
                None => "Unknown".to_string(),
            };

            // Commas inside EXTINF break many M3U parsers.
            let display = format!("{} - {}", artist_name, recording.title()).replace(',', " ");
            let duration = recording.duration().map(|d| d as i64).unwrap_or(-1);

            lines.push(format!("#EXTINF:{},{}", duration, display));
            lines.push(file.path().to_string_lossy().to_string());
            included += 1;
        }

        let filename = format!("airwave_playlist_{}.m3u", Utc::now().format("%Y%m%d_%H%M%S"));
        let output_path = output_dir.join(filename);
        std::fs::write(&output_path, lines.join("\n"))?;

        log::info!("M3U export: {} logs queried, {} included, {} skipped", logs.len(), included, skipped);

        Ok(M3uReport { path: output_path, included, skipped })
    }

    /// CSV dump with the full raw/matched column set.
    pub async fn export_csv(&self, filter: &LogExportFilter, output_dir: &Path) -> Result<CsvExportReport, ExportError> {
        let logs = self.logs.fetch_for_export(&self.pool, &filter).await?;

        let filename = format!("airwave_export_{}.csv", Utc::now().format("%Y%m%d_%H%M%S"));
        let output_path = output_dir.join(filename);

        let mut writer = csv::Writer::from_path(&output_path)?;
        writer.write_record([
            "Date",
            "Time",
            "Station",
            "Raw Artist",
            "Raw Title",
            "Matched Artist",
            "Matched Title",
            "Match Type",
            "Match Confidence",
        ])?;

        let station_names = self.station_names_for(&logs).await?;

        let mut rows = 0usize;
        for log in &logs {
            let (matched_artist, matched_title) = match log.work_id {
                Some(work_id) => self.matched_display(&work_id).await?,
                None => (String::new(), String::new()),
            };

            let match_type = log.match_reason
                .as_ref()
                .map(|reason| reason.to_string())
                .unwrap_or_else(|| "Unmatched".to_string());

            let confidence = match &log.match_reason {
                Some(reason) if reason.is_bridge() => "High",
                Some(_) if log.work_id.is_some() => "Medium",
                _ => "",
            };

            writer.write_record([
                log.played_at.format("%Y-%m-%d").to_string().as_str(),
                log.played_at.format("%H:%M:%S").to_string().as_str(),
                station_names.get(&log.station_id).map(String::as_str).unwrap_or("Unknown"),
                log.raw_artist.as_str(),
                log.raw_title.as_str(),
                matched_artist.as_str(),
                matched_title.as_str(),
                match_type.as_str(),
                confidence,
            ])?;
            rows += 1;
        }

        writer.flush()?;
        log::info!("CSV export: {} rows written to {}", rows, output_path.display());

        Ok(CsvExportReport { path: output_path, rows })
    }

    async fn artist_display_name(&self, work_id: &Uuid) -> Result<Option<String>, ExportError> {
        let Some(work) = self.works.by_id_fetch(&self.pool, work_id).await? else {
            return Ok(None);
        };
        let Some(artist_id) = work.primary_artist_id() else {
            return Ok(None);
        };
        Ok(self.artists.by_id_fetch(&self.pool, artist_id).await?.map(|a| a.name().to_string()))
    }

    async fn matched_display(&self, work_id: &Uuid) -> Result<(String, String), ExportError> {
        let Some(work) = self.works.by_id_fetch(&self.pool, work_id).await? else {
            return Ok((String::new(), String::new()));
        };
        let artist = match work.primary_artist_id() {
            Some(artist_id) => self.artists
                .by_id_fetch(&self.pool, artist_id)
                .await?
                .map(|a| a.name().to_string())
                .unwrap_or_default(),
            None => String::new(),
        };
        Ok((artist, work.title().to_string()))
    }

    async fn station_names_for(&self, logs: &[BroadcastLog]) -> Result<HashMap<Uuid, String>, ExportError> {
        let mut names = HashMap::new();
        for log in logs {
            if names.contains_key(&log.station_id) {
                continue;
            }
            if let Some(station) = self.stations.by_id_fetch(&self.pool, &log.station_id).await? {
                names.insert(log.station_id, station.callsign().to_string());
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::broadcast_log::MatchReason;
    use crate::repository::logs_repo::NewBroadcastLog;
    use crate::services::test_helpers::{
        attach_file, init_logger, prepare_db, seed_catalog_entry, seed_station, TestSetupError,
    };

    struct TestContext {
        pool: SqlitePool,
        exporter: LogExporter,
        station_id: Uuid,
        out_dir: TempDir,
    }

    impl TestContext {
        async fn new() -> Result<Self, TestSetupError> {
            init_logger()?;
            let pool = prepare_db().await?;
            let station_id = seed_station(&pool, "KEXP").await?;
            Ok(Self {
                exporter: LogExporter::new(pool.clone()),
                station_id,
                out_dir: TempDir::new()?,
                pool,
            })
        }

        async fn seed_log(&self, artist: &str, title: &str, hour: u32, work_id: Option<Uuid>, reason: Option<MatchReason>) -> Result<(), TestSetupError> {
            let mut conn = self.pool.acquire().await?;
            SqliteBroadcastLogsRepository::new().bulk_insert(&mut conn, &[NewBroadcastLog {
                station_id: self.station_id,
                played_at: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(hour, 0, 0).unwrap(),
                raw_artist: artist.to_string(),
                raw_title: title.to_string(),
                work_id,
                match_reason: reason,
                import_batch_id: None,
            }]).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn m3u_includes_resolvable_logs_in_time_order() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        let (work_a, recording_a) = seed_catalog_entry(&ctx.pool, "queen", "bohemian rhapsody").await?;
        let (work_b, recording_b) = seed_catalog_entry(&ctx.pool, "muse", "uprising").await?;
        let (work_fileless, _) = seed_catalog_entry(&ctx.pool, "ghost act", "ghost song").await?;

        attach_file(&ctx.pool, recording_a, "m/a.mp3").await?;
        attach_file(&ctx.pool, recording_b, "m/b.mp3").await?;

        // Out-of-order hours; the playlist must come out chronological.
        ctx.seed_log("Muse", "Uprising", 9, Some(work_b), Some(MatchReason::ExactDb)).await?;
        ctx.seed_log("Queen", "Bohemian Rhapsody", 8, Some(work_a), Some(MatchReason::ExactDb)).await?;
        ctx.seed_log("Ghost Act", "Ghost Song", 10, Some(work_fileless), Some(MatchReason::ExactDb)).await?;
        ctx.seed_log("Nobody", "Unmatched", 11, None, None).await?;

        let report = ctx.exporter.export_m3u(&LogExportFilter::default(), ctx.out_dir.path()).await?;
        assert_eq!(report.included, 2);
        assert_eq!(report.skipped, 1);
        assert!(report.path.file_name().unwrap().to_string_lossy().starts_with("airwave_playlist_"));

        let content = std::fs::read_to_string(&report.path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert!(lines[1].starts_with("#EXTINF:-1,queen - bohemian rhapsody"));
        assert_eq!(lines[2], "m/a.mp3");
        assert!(lines[3].contains("muse - uprising"));
        assert_eq!(lines[4], "m/b.mp3");

        Ok(())
    }

    #[tokio::test]
    async fn csv_export_carries_match_columns() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (work_id, recording_id) = seed_catalog_entry(&ctx.pool, "queen", "bohemian rhapsody").await?;
        attach_file(&ctx.pool, recording_id, "m/a.mp3").await?;

        ctx.seed_log("Queen", "Bohemian Rhapsody", 8, Some(work_id), Some(MatchReason::VerifiedLink)).await?;
        ctx.seed_log("Nobody", "Unmatched Song", 9, None, None).await?;

        let report = ctx.exporter.export_csv(&LogExportFilter::default(), ctx.out_dir.path()).await?;
        assert_eq!(report.rows, 2);

        let content = std::fs::read_to_string(&report.path)?;
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Date,Time,Station,Raw Artist,Raw Title,Matched Artist,Matched Title,Match Type,Match Confidence"
        );

        let matched_row = lines.next().unwrap();
        assert!(matched_row.contains("KEXP"));
        assert!(matched_row.contains("queen"));
        assert!(matched_row.contains("identity_bridge"));
        assert!(matched_row.contains("High"));

        let unmatched_row = lines.next().unwrap();
        assert!(unmatched_row.contains("Unmatched"));

        Ok(())
    }

    #[tokio::test]
    async fn csv_export_preserves_numeric_reason_payloads() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (work_id, recording_id) = seed_catalog_entry(&ctx.pool, "queen", "bohemian rhapsody").await?;
        attach_file(&ctx.pool, recording_id, "m/a.mp3").await?;

        ctx.seed_log(
            "Queen",
            "Bohemian Rhapsody",
            8,
            Some(work_id),
            Some(MatchReason::HighConfidence { artist_pct: 92, title_pct: 88, vector: 0.91 }),
        ).await?;

        let report = ctx.exporter.export_csv(&LogExportFilter::default(), ctx.out_dir.path()).await?;
        assert_eq!(report.rows, 1);

        // The stored percentages survive the fetch-and-format round trip
        // instead of degrading to zeros.
        let content = std::fs::read_to_string(&report.path)?;
        assert!(content.contains("High Confidence Match (Artist: 92%, Title: 88%, Vector: 0.91)"));
        assert!(content.contains("Medium"));

        Ok(())
    }
}

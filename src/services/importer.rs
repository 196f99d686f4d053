use std::collections::HashMap;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::broadcast_log::ImportStatus;
use crate::repository::logs_repo::NewBroadcastLog;
use crate::repository::{SqliteBroadcastLogsRepository, SqliteStationsRepository};
use crate::services::aliases::ArtistAliasResolver;
use crate::services::matcher::Matcher;
use super::ImportError;

// Rows parsed per processing round; inserts are further chunked by the repo.
const PROCESS_CHUNK: usize = 2000;

/// Counters for one import run. Skipped rows are malformed (bad date, empty
/// artist/title) and never abort the batch.
#[derive(Debug, Default, Clone)]
pub struct ImportReport {
    pub batch_id: Option<Uuid>,
    pub total_rows: usize,
    pub inserted: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub skipped: usize,
}

struct ParsedRow {
    callsign: String,
    played_at: NaiveDateTime,
    raw_artist: String,
    raw_title: String,
}

/// Best-effort timestamp parsing over the formats station logs actually use.
pub fn parse_flexible_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %I:%M:%S %p",
        "%m/%d/%Y %H:%M",
    ];

    for format in FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }

    // Date-only rows land at midnight.
    for format in &["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, format) {
            return parsed.and_hms_opt(0, 0, 0);
        }
    }

    None
}

/// Broadcast-log CSV ingestion: parse, resolve stations and artist aliases,
/// match unique pairs in bulk, insert rows already linked to their Works.
pub struct CsvImporter {
    pool: SqlitePool,
    matcher: Matcher,
    aliases: ArtistAliasResolver,
    logs: SqliteBroadcastLogsRepository,
    stations: SqliteStationsRepository,
    station_cache: HashMap<String, Uuid>,
}

impl CsvImporter {
    pub fn new(pool: SqlitePool, matcher: Matcher) -> Self {
        Self {
            aliases: ArtistAliasResolver::new(pool.clone()),
            matcher,
            logs: SqliteBroadcastLogsRepository::new(),
            stations: SqliteStationsRepository::new(),
            station_cache: HashMap::new(),
            pool,
        }
    }

    /// Imports one CSV file. Columns: `Station` (or a default passed in),
    /// `Played` or `Date` + `Time`, `Artist`, `Title`.
    pub async fn import_file(&mut self, path: &Path, default_station: Option<&str>) -> Result<ImportReport, ImportError> {
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        let batch = self.logs.create_batch(&self.pool, &path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default()).await?;

        let mut report = ImportReport { batch_id: Some(batch.id), ..ImportReport::default() };

        let outcome = self.import_rows(path, default_station, &mut report).await;

        match &outcome {
            Ok(()) => {
                self.logs.finish_batch(&self.pool, &batch.id, ImportStatus::Completed, report.inserted as i64, None).await?;
                log::info!(
                    "Import complete: {} rows ({} matched, {} unmatched, {} skipped)",
                    report.inserted, report.matched, report.unmatched, report.skipped
                );
            }
            Err(err) => {
                let message = err.to_string();
                self.logs.finish_batch(&self.pool, &batch.id, ImportStatus::Failed, report.inserted as i64, Some(&message)).await?;
                log::warn!("Import failed after {} rows: {}", report.inserted, message);
            }
        }

        outcome.map(|_| report)
    }

    async fn import_rows(&mut self, path: &Path, default_station: Option<&str>, report: &mut ImportReport) -> Result<(), ImportError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

        let station_col = column("Station");
        let played_col = column("Played");
        let date_col = column("Date");
        let time_col = column("Time");
        let artist_col = column("Artist");
        let title_col = column("Title");

        let mut chunk: Vec<ParsedRow> = Vec::with_capacity(PROCESS_CHUNK);

        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    log::warn!("Skipping malformed CSV record: {}", err);
                    report.skipped += 1;
                    continue;
                }
            };
            report.total_rows += 1;

            let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("").trim().to_string();

            // Try 'Played' first, then the Date + Time pair.
            let mut played_at = parse_flexible_date(&field(played_col));
            if played_at.is_none() {
                let date = field(date_col);
                let time = field(time_col);
                if !date.is_empty() && !time.is_empty() {
                    played_at = parse_flexible_date(&format!("{} {}", date, time));
                }
            }

            let Some(played_at) = played_at else {
                report.skipped += 1;
                continue;
            };

            let raw_artist = field(artist_col);
            let raw_title = field(title_col);
            if raw_artist.is_empty() || raw_title.is_empty() {
                report.skipped += 1;
                continue;
            }

            let callsign = {
                let from_row = field(station_col);
                if from_row.is_empty() {
                    default_station.unwrap_or("UNKNOWN").to_string()
                } else {
                    from_row
                }
            };

            chunk.push(ParsedRow { callsign, played_at, raw_artist, raw_title });

            if chunk.len() >= PROCESS_CHUNK {
                self.process_chunk(&mut chunk, report).await?;
            }
        }

        self.process_chunk(&mut chunk, report).await?;
        Ok(())
    }

    async fn process_chunk(&mut self, chunk: &mut Vec<ParsedRow>, report: &mut ImportReport) -> Result<(), ImportError> {
        if chunk.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(chunk);

        // Stations, via the callsign cache.
        for row in &rows {
            self.resolve_station(&row.callsign).await?;
        }

        // Alias resolution over the unique raw artists, then one bulk match
        // over the unique resolved pairs. The heavy lifting runs once per
        // distinct song, not once per row.
        let mut unique_artists: Vec<String> = Vec::new();
        for row in &rows {
            if !unique_artists.contains(&row.raw_artist) {
                unique_artists.push(row.raw_artist.clone());
            }
        }
        let resolved_artists = self.aliases.resolve_batch(&unique_artists).await?;

        let mut match_queries: Vec<(String, String)> = Vec::new();
        let mut pair_to_resolved: HashMap<(String, String), (String, String)> = HashMap::new();
        for row in &rows {
            let raw_pair = (row.raw_artist.clone(), row.raw_title.clone());
            if pair_to_resolved.contains_key(&raw_pair) {
                continue;
            }
            let resolved_artist = resolved_artists.get(&row.raw_artist).cloned().unwrap_or_else(|| row.raw_artist.clone());
            let resolved_pair = (resolved_artist, row.raw_title.clone());
            if !match_queries.contains(&resolved_pair) {
                match_queries.push(resolved_pair.clone());
            }
            pair_to_resolved.insert(raw_pair, resolved_pair);
        }

        let match_results = self.matcher.match_batch(&match_queries).await?;

        let mut inserts = Vec::with_capacity(rows.len());
        for row in rows {
            let station_id = self.resolve_station(&row.callsign).await?;

            let raw_pair = (row.raw_artist.clone(), row.raw_title.clone());
            let resolved_pair = pair_to_resolved.get(&raw_pair).cloned().unwrap_or(raw_pair);
            let matched = match_results.get(&resolved_pair);

            let work_id = matched.and_then(|m| m.work_id);
            let match_reason = matched.map(|m| m.reason.clone());

            if work_id.is_some() {
                report.matched += 1;
            } else {
                report.unmatched += 1;
            }

            inserts.push(NewBroadcastLog {
                station_id,
                played_at: row.played_at,
                raw_artist: row.raw_artist,
                raw_title: row.raw_title,
                work_id,
                match_reason,
                import_batch_id: report.batch_id,
            });
        }

        let mut conn = self.pool.acquire().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;
        report.inserted += self.logs.bulk_insert(&mut conn, &inserts).await? as usize;

        Ok(())
    }

    async fn resolve_station(&mut self, callsign: &str) -> Result<Uuid, ImportError> {
        let key = callsign.to_uppercase();
        if let Some(id) = self.station_cache.get(&key) {
            return Ok(*id);
        }

        let mut conn = self.pool.acquire().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;
        let station = self.stations.upsert(&mut conn, callsign).await?;
        self.station_cache.insert(key, *station.id());
        Ok(*station.id())
    }
}

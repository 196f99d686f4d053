use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use lofty::probe::Probe;
use md5::{Digest, Md5};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::domain::audiofile::{AudioFileMetadata, AudioFileType};
use crate::domain::identity::{ProposedSplit, SplitStatus};
use crate::domain::library_file::LibraryFile;
use crate::domain::recording::VersionType;
use crate::repository::files_repo::PathIndexEntry;
use crate::repository::{
    SqliteArtistsRepository, SqliteIdentityRepository, SqliteLibraryFilesRepository,
    SqliteRecordingsRepository, SqliteWorksRepository,
};
use crate::utils::config::ScannerConfig;
use crate::utils::normalizations::{clean, clean_artist, content_pid, extract_version_type, normalize_path, split_artists};
use crate::vector::VectorIndex;
use super::ScanError;

// Raw artist strings that contain '/' but are single entities; these never
// become split proposals.
const SPLIT_EXCEPTIONS: &[&str] = &["AC/DC"];

const SPLIT_CONFIDENCE_HEURISTIC: f64 = 0.5;

/// Counters for one scan run. `cancelled` is a status, not an error.
#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    pub processed: usize,
    pub skipped: usize,
    pub created: usize,
    pub moved: usize,
    pub errors: usize,
    pub touched: usize,
    pub commits_executed: usize,
    pub commits_skipped: usize,
    pub cancelled: bool,
}

/// Air-lock between raw tag values and the database: normalization and
/// version parsing happen exactly once, here.
#[derive(Debug, Clone)]
pub struct LibraryMetadata {
    pub raw_artist: String,
    pub raw_title: String,
    pub artist: String,
    pub title: String,
    pub version_type: VersionType,
    pub work_title: String,
    pub album_artist: String,
    pub duration: Option<f64>,
    pub isrc: Option<String>,
}

impl LibraryMetadata {
    pub fn new(
        raw_artist: &str,
        raw_title: &str,
        album_artist: Option<&str>,
        duration: Option<f64>,
        isrc: Option<String>,
    ) -> Self {
        let artist = clean_artist(if raw_artist.trim().is_empty() { "Unknown Artist" } else { raw_artist });

        let (base_title, version_type) = extract_version_type(
            if raw_title.trim().is_empty() { "Untitled" } else { raw_title }
        );
        let title = clean(&base_title);

        let album_artist = match album_artist {
            Some(name) if !name.trim().is_empty() => clean_artist(name),
            _ => artist.clone(),
        };

        Self {
            raw_artist: raw_artist.to_string(),
            raw_title: raw_title.to_string(),
            artist,
            work_title: title.clone(),
            title,
            version_type,
            album_artist,
            duration,
            isrc,
        }
    }
}

#[derive(Debug, Clone)]
struct MissingCandidate {
    lib_id: Uuid,
    old_path: String,
    size: Option<i64>,
    pid_primary: String,
    pid_fallback: Option<String>,
}

/// Everything mutated by concurrent file tasks lives behind one async mutex:
/// the seen-set, touch buffer, vector buffer, missing-candidates list, path
/// index and stats. Holding it across the catalog upserts also serializes
/// the writer, which is what the storage layer expects.
struct ScanState {
    path_index: HashMap<String, PathIndexEntry>,
    seen: HashSet<String>,
    touch_ids: HashSet<Uuid>,
    vector_buffer: Vec<(Uuid, String, String)>,
    missing_candidates: Option<Vec<MissingCandidate>>,
    stats: ScanStats,
    last_commit_created: usize,
    last_commit_moved: usize,
}

pub struct LibraryScanner {
    pool: SqlitePool,
    vector: Arc<VectorIndex>,
    config: ScannerConfig,
    artists: SqliteArtistsRepository,
    works: SqliteWorksRepository,
    recordings: SqliteRecordingsRepository,
    files: SqliteLibraryFilesRepository,
    identity: SqliteIdentityRepository,
    state: Mutex<ScanState>,
}

impl LibraryScanner {
    pub fn new(pool: SqlitePool, vector: Arc<VectorIndex>, config: ScannerConfig) -> Self {
        Self {
            pool,
            vector,
            config,
            artists: SqliteArtistsRepository::new(),
            works: SqliteWorksRepository::new(),
            recordings: SqliteRecordingsRepository::new(),
            files: SqliteLibraryFilesRepository::new(),
            identity: SqliteIdentityRepository::new(),
            state: Mutex::new(ScanState {
                path_index: HashMap::new(),
                seen: HashSet::new(),
                touch_ids: HashSet::new(),
                vector_buffer: Vec::new(),
                missing_candidates: None,
                stats: ScanStats::default(),
                last_commit_created: 0,
                last_commit_moved: 0,
            }),
        }
    }

    /// Walks the root and reconciles every supported audio file with the
    /// catalog. Cancellation flushes pending buffers and returns partial
    /// stats with `cancelled = true`.
    pub async fn scan_directory(&self, root: &Path, cancel: &CancellationToken) -> Result<ScanStats, ScanError> {
        // Fail fast if the root itself is unreadable; everything below is a
        // soft, per-file error.
        std::fs::read_dir(root).map_err(|e| ScanError::RootDirAccessError {
            path: root.display().to_string(),
            source: e,
        })?;

        {
            let mut state = self.state.lock().await;
            state.path_index = self.files.load_path_index(&self.pool).await?;
            state.seen.clear();
            state.stats = ScanStats::default();
            log::info!("Loaded path index: {} files", state.path_index.len());
        }

        let mut files_to_process: Vec<PathBuf> = Vec::new();
        for entry_result in WalkDir::new(root).min_depth(1) {
            if cancel.is_cancelled() {
                break;
            }

            match entry_result {
                Err(err) => {
                    log::warn!("Walkdir error under {}: {}", root.display(), err);
                    let mut state = self.state.lock().await;
                    state.stats.errors += 1;
                }
                Ok(dir_entry) => {
                    let path = dir_entry.path();
                    if path.is_dir() || path.is_symlink() {
                        continue;
                    }
                    if !Self::is_audio_file(path) {
                        continue;
                    }
                    files_to_process.push(path.to_path_buf());
                }
            }
        }

        log::info!(
            "Scanning {} files under {} ({} concurrent)",
            files_to_process.len(),
            root.display(),
            self.config.max_concurrent_files
        );

        futures::stream::iter(files_to_process)
            .for_each_concurrent(self.config.max_concurrent_files, |path| async move {
                if cancel.is_cancelled() {
                    let mut state = self.state.lock().await;
                    state.stats.cancelled = true;
                    return;
                }

                if let Err(err) = self.process_file(&path).await {
                    log::warn!("Failed to process {}: {}", path.display(), err);
                    let mut state = self.state.lock().await;
                    state.stats.errors += 1;
                    state.stats.processed += 1;
                }

                self.maybe_commit().await;
            })
            .await;

        // Final flush covers both the normal end and a cancelled run.
        let mut state = self.state.lock().await;
        if cancel.is_cancelled() {
            state.stats.cancelled = true;
        }
        self.flush_buffers(&mut state).await;
        if let Err(err) = self.vector.persist() {
            log::warn!("Failed to persist vector index: {}", err);
        }

        if state.stats.cancelled {
            log::warn!("Scan cancelled after {} files", state.stats.processed);
        } else {
            log::info!(
                "Scan complete: processed={} created={} moved={} skipped={} errors={}",
                state.stats.processed, state.stats.created, state.stats.moved,
                state.stats.skipped, state.stats.errors
            );
        }

        Ok(state.stats.clone())
    }

    fn is_audio_file(path: &Path) -> bool {
        path.extension()
            .map(|ext| AudioFileType::is_supported_extension(ext))
            .unwrap_or(false)
    }

    async fn process_file(&self, path: &Path) -> Result<(), ScanError> {
        let metadata = tokio::fs::metadata(path).await?;
        let size = metadata.len();
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64());

        let path_str = normalize_path(path).to_string_lossy().to_string();

        // Stat-first: most files are unchanged and never get opened.
        if self.stat_first_skip(&path_str, size, mtime).await? {
            return Ok(());
        }

        // Metadata extraction happens off-thread; a file lofty cannot read
        // degrades to filename parsing, like any other untagged file.
        let owned_path = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || Self::extract_metadata(&owned_path))
            .await
            .unwrap_or_default();

        let (raw_artist, raw_title) = Self::apply_filename_fallback(
            &extracted.artist_name,
            &extracted.track_name,
            path,
        );

        let meta = LibraryMetadata::new(
            &raw_artist,
            &raw_title,
            Some(extracted.album_artist.as_str()).filter(|a| !a.trim().is_empty()),
            extracted.duration_secs,
            extracted.isrc.clone(),
        );

        if self.detect_move(&path_str, &meta, path, size, mtime).await? {
            return Ok(());
        }

        self.create_hierarchy(&path_str, path, &meta, &extracted, size, mtime).await
    }

    /// Returns true when the file needs no further work this scan.
    async fn stat_first_skip(&self, path_str: &str, size: u64, mtime: Option<f64>) -> Result<bool, ScanError> {
        let mut state = self.state.lock().await;
        state.seen.insert(path_str.to_string());

        let Some(entry) = state.path_index.get(path_str).cloned() else {
            return Ok(false);
        };

        // Size changed: refresh the row, skip the expensive work.
        if entry.size != Some(size as i64) {
            log::info!("File size changed for {}: {:?} -> {}", path_str, entry.size, size);
            self.files.update_size_and_mtime(&self.pool, &entry.id, size as i64, mtime.unwrap_or(0.0)).await?;
            state.stats.skipped += 1;
            state.stats.processed += 1;
            return Ok(true);
        }

        // Exact match: just record "seen this scan" in the touch buffer.
        if entry.mtime.is_some() && entry.mtime == mtime {
            state.touch_ids.insert(entry.id);
            state.stats.skipped += 1;
            state.stats.processed += 1;
            if state.touch_ids.len() >= self.config.touch_batch_size {
                self.flush_touch(&mut state).await;
            }
            return Ok(true);
        }

        // Legacy row without an mtime: backfill it, no metadata work.
        if entry.mtime.is_none() {
            self.files.update_mtime(&self.pool, &entry.id, mtime.unwrap_or(0.0)).await?;
            state.touch_ids.insert(entry.id);
            state.stats.skipped += 1;
            state.stats.processed += 1;
            return Ok(true);
        }

        // mtime changed with equal size: re-extract.
        Ok(false)
    }

    fn extract_metadata(path: &Path) -> AudioFileMetadata {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                log::warn!("Could not open {} for tag reading: {}", path.display(), err);
                return AudioFileMetadata::default();
            }
        };

        let reader = BufReader::new(file);
        match Probe::new(reader).guess_file_type() {
            Ok(probe) => AudioFileMetadata::extract_or_default(probe.read()),
            Err(err) => {
                log::warn!("Failed to probe {}: {}", path.display(), err);
                AudioFileMetadata::default()
            }
        }
    }

    /// "{Artist} - {Title}" filename parsing when tags are missing or
    /// placeholders.
    fn apply_filename_fallback(raw_artist: &str, raw_title: &str, path: &Path) -> (String, String) {
        let artist_missing = raw_artist.trim().is_empty() || raw_artist.trim().eq_ignore_ascii_case("unknown");
        let title_missing = raw_title.trim().is_empty() || raw_title.trim().eq_ignore_ascii_case("untitled");

        if !artist_missing && !title_missing {
            return (raw_artist.to_string(), raw_title.to_string());
        }

        let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();

        if let Some((artist_part, title_part)) = stem.split_once(" - ") {
            let artist = if artist_missing { artist_part.to_string() } else { raw_artist.to_string() };
            let title = if title_missing { title_part.to_string() } else { raw_title.to_string() };
            (artist, title)
        } else {
            let artist = if artist_missing { "Unknown Artist".to_string() } else { raw_artist.to_string() };
            let title = if title_missing && !stem.is_empty() { stem } else { raw_title.to_string() };
            (artist, title)
        }
    }

    /// Lazily loads move candidates: every indexed path not seen this scan,
    /// with enough identity context to compute its content PID.
    async fn ensure_missing_candidates(&self, state: &mut ScanState) -> Result<(), ScanError> {
        if state.missing_candidates.is_some() {
            return Ok(());
        }

        let missing_paths: Vec<String> = state.path_index.keys()
            .filter(|path| !state.seen.contains(*path))
            .cloned()
            .collect();

        if missing_paths.is_empty() {
            state.missing_candidates = Some(Vec::new());
            log::debug!("No missing files detected, move detection query skipped");
            return Ok(());
        }

        log::info!("Detected {} missing files, loading move candidates", missing_paths.len());
        let mut candidates = Vec::new();

        for chunk in missing_paths.chunks(self.config.missing_chunk_size) {
            let rows = self.files.missing_candidates(&self.pool, chunk).await?;
            for row in rows {
                let artist_name = row.artist_name.unwrap_or_else(|| "unknown artist".to_string());
                let work_title = row.work_title.unwrap_or_else(|| "untitled".to_string());
                let file_name = Path::new(&row.path)
                    .file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_default();

                let (pid_primary, pid_fallback) = content_pid(&artist_name, &work_title, &file_name);
                candidates.push(MissingCandidate {
                    lib_id: row.id,
                    old_path: row.path,
                    size: row.size,
                    pid_primary,
                    pid_fallback,
                });
            }
        }

        state.missing_candidates = Some(candidates);
        Ok(())
    }

    /// Checks whether this new path is actually a known file that moved.
    /// Pops the candidate so two files can never claim the same row.
    async fn detect_move(
        &self,
        path_str: &str,
        meta: &LibraryMetadata,
        path: &Path,
        size: u64,
        mtime: Option<f64>,
    ) -> Result<bool, ScanError> {
        let file_name = path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
        let (pid_primary, pid_fallback) = content_pid(&meta.artist, &meta.title, &file_name);

        let mut state = self.state.lock().await;
        self.ensure_missing_candidates(&mut state).await?;

        let candidates = state.missing_candidates.as_mut().expect("candidates initialized above");
        let position = candidates.iter().position(|c| {
            if c.size != Some(size as i64) {
                return false;
            }
            if c.pid_primary == pid_primary {
                return true;
            }
            matches!((&pid_fallback, &c.pid_fallback), (Some(a), Some(b)) if a == b)
        });

        let Some(position) = position else {
            return Ok(false);
        };
        let candidate = candidates.remove(position);

        self.files.retarget(&self.pool, &candidate.lib_id, path_str, size as i64, mtime.unwrap_or(0.0)).await?;

        state.path_index.remove(&candidate.old_path);
        state.path_index.insert(path_str.to_string(), PathIndexEntry {
            id: candidate.lib_id,
            size: Some(size as i64),
            mtime,
        });
        state.stats.moved += 1;
        state.stats.processed += 1;

        log::info!("Move detected: {} -> {}", candidate.old_path, path_str);
        Ok(true)
    }

    async fn create_hierarchy(
        &self,
        path_str: &str,
        path: &Path,
        meta: &LibraryMetadata,
        extracted: &AudioFileMetadata,
        size: u64,
        mtime: Option<f64>,
    ) -> Result<(), ScanError> {
        // Hash outside the state lock; it is the slowest part of this path.
        let owned_path = path.to_path_buf();
        let file_hash = tokio::task::spawn_blocking(move || Self::hash_file(&owned_path))
            .await
            .unwrap_or(None);

        let mut state = self.state.lock().await;
        let mut conn = self.pool.acquire().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;

        self.flag_ambiguous_split(&mut conn, &meta.raw_artist, &extracted.album_artist).await?;

        let primary_artist = self.artists.upsert(&mut conn, &meta.artist).await?;
        let work = self.works.upsert(
            &mut conn,
            &meta.work_title,
            primary_artist.id(),
            self.config.work_fuzzy_threshold,
            self.config.work_fuzzy_max_works,
        ).await?;

        // All collaborators (track artist string plus album artist) link to
        // the work; the primary keeps its role.
        let mut collaborator_ids = vec![*primary_artist.id()];
        let mut raw_candidates = vec![meta.raw_artist.clone()];
        if !extracted.album_artist.trim().is_empty() {
            raw_candidates.push(extracted.album_artist.clone());
        }
        for raw in &raw_candidates {
            for name in split_artists(raw) {
                let artist = self.artists.upsert(&mut conn, &name).await?;
                if !collaborator_ids.contains(artist.id()) {
                    collaborator_ids.push(*artist.id());
                }
            }
        }
        self.works.link_work_artists(&mut conn, work.id(), &collaborator_ids, primary_artist.id()).await?;

        let recording = self.recordings.upsert(
            &mut conn,
            work.id(),
            &meta.title,
            meta.version_type.clone(),
            meta.duration,
            meta.isrc.clone(),
        ).await?;

        let format = path.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default();
        let library_file = LibraryFile::new(
            Uuid::new_v4(),
            *recording.id(),
            path_str,
            size,
            mtime,
            format,
        )?
        .with_hash(file_hash)
        .with_bitrate(extracted.bitrate);

        let saved = self.files.save(&mut *conn, &library_file).await?;

        state.path_index.insert(path_str.to_string(), PathIndexEntry {
            id: *saved.id(),
            size: Some(size as i64),
            mtime,
        });

        state.vector_buffer.push((*recording.id(), meta.artist.clone(), meta.title.clone()));
        if state.vector_buffer.len() >= self.config.vector_batch_size {
            self.flush_vector(&mut state);
        }

        state.stats.created += 1;
        state.stats.processed += 1;

        Ok(())
    }

    /// A '/' in the track artist with no album artist to arbitrate is an
    /// ambiguous collaboration; park it for human review.
    async fn flag_ambiguous_split(
        &self,
        conn: &mut sqlx::SqliteConnection,
        raw_artist: &str,
        album_artist: &str,
    ) -> Result<(), ScanError> {
        if !raw_artist.contains('/') || !album_artist.trim().is_empty() {
            return Ok(());
        }
        if SPLIT_EXCEPTIONS.iter().any(|e| e.eq_ignore_ascii_case(raw_artist.trim())) {
            return Ok(());
        }

        let proposed = if raw_artist.contains(" / ") {
            split_artists(raw_artist)
        } else {
            raw_artist.split('/')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        };

        let split = ProposedSplit {
            id: Uuid::new_v4(),
            raw_artist: raw_artist.to_string(),
            proposed_artists: proposed,
            status: SplitStatus::Pending,
            confidence: SPLIT_CONFIDENCE_HEURISTIC,
        };
        self.identity.insert_split(&mut *conn, &split).await?;
        log::info!("Flagged ambiguous artist for review: {}", raw_artist);

        Ok(())
    }

    fn hash_file(path: &Path) -> Option<String> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                log::warn!("Failed to hash {}: {}", path.display(), err);
                return None;
            }
        };

        let mut hasher = Md5::new();
        let mut buffer = [0u8; 4096];
        loop {
            match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => hasher.update(&buffer[..n]),
                Err(err) => {
                    log::warn!("Failed to hash {}: {}", path.display(), err);
                    return None;
                }
            }
        }

        Some(format!("{:x}", hasher.finalize()))
    }

    /// Fires at most once per commit-interval boundary, and only when there
    /// is something to write. Crossing a boundary with no pending changes is
    /// recorded as a skipped commit.
    async fn maybe_commit(&self) {
        let mut state = self.state.lock().await;

        let processed = state.stats.processed;
        if processed == 0 || self.config.commit_interval == 0 {
            return;
        }

        let prev_interval = processed.saturating_sub(1) / self.config.commit_interval;
        let current_interval = processed / self.config.commit_interval;
        if current_interval == prev_interval {
            return;
        }

        let has_changes = state.stats.created > state.last_commit_created
            || state.stats.moved > state.last_commit_moved
            || !state.touch_ids.is_empty()
            || !state.vector_buffer.is_empty();

        if has_changes {
            self.flush_buffers(&mut state).await;
            state.stats.commits_executed += 1;
            log::debug!(
                "Committed at {} files (created={}, moved={})",
                processed, state.stats.created, state.stats.moved
            );
        } else {
            state.stats.commits_skipped += 1;
            log::debug!("Skipped commit at {} files (no changes)", processed);
        }
    }

    async fn flush_buffers(&self, state: &mut ScanState) {
        self.flush_touch(state).await;
        self.flush_vector(state);
        state.last_commit_created = state.stats.created;
        state.last_commit_moved = state.stats.moved;
    }

    async fn flush_touch(&self, state: &mut ScanState) {
        if state.touch_ids.is_empty() {
            return;
        }

        let ids: Vec<Uuid> = state.touch_ids.drain().collect();
        match self.files.touch_batch(&self.pool, &ids).await {
            Ok(count) => state.stats.touched += count as usize,
            Err(err) => log::warn!("Touch batch failed for {} files: {}", ids.len(), err),
        }
    }

    fn flush_vector(&self, state: &mut ScanState) {
        if state.vector_buffer.is_empty() {
            return;
        }

        let tracks: Vec<(Uuid, String, String)> = state.vector_buffer.drain(..).collect();
        self.vector.add(&tracks);
    }
}

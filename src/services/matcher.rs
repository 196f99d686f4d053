use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::broadcast_log::{MatchClass, MatchReason};
use crate::repository::{
    RepositoryError, SqliteBroadcastLogsRepository, SqliteIdentityRepository,
    SqliteRecordingsRepository, SqliteWorksRepository,
};
use crate::utils::config::Thresholds;
use crate::utils::normalizations::{clean, clean_artist, extract_version_type, generate_signature};
use crate::utils::similarity::similarity_ratio;
use crate::vector::VectorIndex;
use crate::domain::recording::VersionType;

const VECTOR_SEARCH_LIMIT: usize = 10;
const EXPLAIN_CANDIDATE_LIMIT: usize = 5;

/// Outcome of resolving one raw pair. Matches always land on a Work; the
/// recording id is kept when the match came through a concrete recording.
#[derive(Clone, Debug)]
pub struct WorkMatch {
    pub work_id: Option<Uuid>,
    pub recording_id: Option<Uuid>,
    pub reason: MatchReason,
    pub class: MatchClass,
}

impl WorkMatch {
    fn no_match() -> Self {
        Self {
            work_id: None,
            recording_id: None,
            reason: MatchReason::NoMatch,
            class: MatchClass::Reject,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeCase {
    WithinFivePctOfAuto,
    WithinFivePctOfReview,
}

impl EdgeCase {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeCase::WithinFivePctOfAuto => "within_5pct_of_auto",
            EdgeCase::WithinFivePctOfReview => "within_5pct_of_review",
        }
    }
}

/// One scored vector candidate, kept for the explain surface.
#[derive(Clone, Debug)]
pub struct CandidateScore {
    pub recording_id: Uuid,
    pub artist: String,
    pub title: String,
    pub artist_sim: f64,
    pub title_sim: f64,
    pub vector_dist: f64,
    pub match_type: &'static str,
    pub quality_warnings: Vec<String>,
    pub edge_case: Option<EdgeCase>,
}

#[derive(Clone, Debug)]
pub struct MatchExplanation {
    pub outcome: WorkMatch,
    pub candidates: Vec<CandidateScore>,
    pub note: Option<String>,
}

/// Multi-strategy resolution pipeline: bridges, then exact SQL, then vector
/// candidates scored and classified against the threshold snapshot. Batch
/// oriented; one call resolves an arbitrary number of raw pairs with a fixed
/// number of DB round trips plus one vector sweep.
pub struct Matcher {
    pool: SqlitePool,
    vector: Arc<VectorIndex>,
    thresholds: Thresholds,
    identity: SqliteIdentityRepository,
    recordings: SqliteRecordingsRepository,
    works: SqliteWorksRepository,
}

impl Matcher {
    pub fn new(pool: SqlitePool, vector: Arc<VectorIndex>, thresholds: Thresholds) -> Self {
        Self {
            pool,
            vector,
            thresholds,
            identity: SqliteIdentityRepository::new(),
            recordings: SqliteRecordingsRepository::new(),
            works: SqliteWorksRepository::new(),
        }
    }

    /// Resolves a batch of raw (artist, title) pairs. Every input pair gets
    /// an entry; unmatched pairs carry `NoMatch`.
    pub async fn match_batch(
        &self,
        queries: &[(String, String)],
    ) -> Result<HashMap<(String, String), WorkMatch>, RepositoryError> {
        let explained = self.match_batch_internal(queries, false).await?;
        Ok(explained.into_iter().map(|(key, exp)| (key, exp.outcome)).collect())
    }

    /// Same pipeline, but keeps the scored candidates and diagnostic notes.
    pub async fn match_batch_explain(
        &self,
        queries: &[(String, String)],
    ) -> Result<HashMap<(String, String), MatchExplanation>, RepositoryError> {
        self.match_batch_internal(queries, true).await
    }

    pub async fn find_match(&self, raw_artist: &str, raw_title: &str) -> Result<WorkMatch, RepositoryError> {
        let key = (raw_artist.to_string(), raw_title.to_string());
        let mut results = self.match_batch(std::slice::from_ref(&key)).await?;
        Ok(results.remove(&key).unwrap_or_else(WorkMatch::no_match))
    }

    /// Rebuilds the discovery queue from the currently-unmatched logs:
    /// deduplicate by signature (first raw pair seen becomes the reference),
    /// skip signatures an active bridge already answers, store the observed
    /// sighting counts, and attach a suggested work where the pipeline finds
    /// one. Returns the queue size contributed by this pass.
    pub async fn run_discovery(&self) -> Result<usize, RepositoryError> {
        let logs = SqliteBroadcastLogsRepository::new();
        let unmatched = logs.unmatched_logs(&self.pool).await?;

        let mut by_signature: HashMap<String, ((String, String), i64)> = HashMap::new();
        for (_, raw_artist, raw_title) in unmatched {
            if raw_artist.is_empty() || raw_title.is_empty() {
                continue;
            }
            let sig = generate_signature(&raw_artist, &raw_title);
            by_signature.entry(sig)
                .and_modify(|(_, count)| *count += 1)
                .or_insert(((raw_artist, raw_title), 1));
        }

        let signatures: Vec<String> = by_signature.keys().cloned().collect();
        let bridged: Vec<String> = self.identity
            .active_bridges_for(&self.pool, &signatures)
            .await?
            .into_iter()
            .map(|bridge| bridge.log_signature)
            .collect();

        let pending: Vec<(String, (String, String), i64)> = by_signature
            .into_iter()
            .filter(|(sig, _)| !bridged.contains(sig))
            .map(|(sig, (pair, count))| (sig, pair, count))
            .collect();

        // One pipeline pass over the queue pairs yields the suggestions the
        // verification surface shows next to each entry.
        let queries: Vec<(String, String)> = pending.iter().map(|(_, pair, _)| pair.clone()).collect();
        let suggestions = self.match_batch(&queries).await?;

        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from_sqlx_error)?;
        for (sig, pair, count) in &pending {
            self.identity.queue_replace(&mut conn, sig, &pair.0, &pair.1, *count).await?;
            let suggested = suggestions.get(pair).and_then(|m| m.work_id);
            self.identity.queue_set_suggestion(&mut *conn, sig, suggested.as_ref()).await?;
        }

        log::info!("Discovery queue rebuilt: {} signatures awaiting verification", pending.len());
        Ok(pending.len())
    }

    async fn match_batch_internal(
        &self,
        queries: &[(String, String)],
        explain: bool,
    ) -> Result<HashMap<(String, String), MatchExplanation>, RepositoryError> {
        let mut results: HashMap<(String, String), MatchExplanation> = HashMap::new();
        if queries.is_empty() {
            return Ok(results);
        }

        // 0. Deduplicate raw inputs by signature and by normalized pair.
        let mut unique_queries: Vec<(String, String)> = Vec::new();
        for query in queries {
            if !unique_queries.contains(query) {
                unique_queries.push(query.clone());
            }
        }

        let mut sig_map: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for query in &unique_queries {
            let sig = generate_signature(&query.0, &query.1);
            sig_map.entry(sig).or_default().push(query.clone());
        }
        let signatures: Vec<String> = sig_map.keys().cloned().collect();

        // 1. Bridge sweep: one bulk select answers every learned signature.
        let bridges = self.identity.active_bridges_for(&self.pool, &signatures).await?;

        let mut found_signatures = Vec::new();
        for bridge in &bridges {
            found_signatures.push(bridge.log_signature.clone());
            let outcome = WorkMatch {
                work_id: Some(bridge.work_id),
                recording_id: None,
                reason: MatchReason::IdentityBridge,
                class: MatchClass::Auto,
            };
            for raw in sig_map.get(&bridge.log_signature).into_iter().flatten() {
                results.insert(raw.clone(), MatchExplanation {
                    outcome: outcome.clone(),
                    candidates: Vec::new(),
                    note: explain.then(|| "Identity Bridge".to_string()),
                });
            }
        }

        // 2. Residuals, normalized. Several raw pairs may fold into one key.
        let mut norm_map: HashMap<(String, String), Vec<(String, String)>> = HashMap::new();
        for (sig, raws) in &sig_map {
            if found_signatures.contains(sig) {
                continue;
            }
            for raw in raws {
                let norm = (clean_artist(&raw.0), clean(&raw.1));
                norm_map.entry(norm).or_default().push(raw.clone());
            }
        }

        if norm_map.is_empty() {
            return Ok(results);
        }

        // 3. Exact SQL sweep over the normalized residuals.
        let mut residual_norms: Vec<(String, String)> = norm_map.keys().cloned().collect();
        let exact_rows = self.recordings.exact_match_pairs(&self.pool, &residual_norms).await?;

        let mut exact_found: HashMap<(String, String), (Uuid, Uuid)> = HashMap::new();
        for row in exact_rows {
            let key = (row.artist_name.clone(), row.recording.title().to_string());
            exact_found.insert(key, (*row.recording.work_id(), *row.recording.id()));
        }

        residual_norms.retain(|norm| {
            let Some((work_id, recording_id)) = exact_found.get(norm) else {
                return true;
            };

            let outcome = WorkMatch {
                work_id: Some(*work_id),
                recording_id: Some(*recording_id),
                reason: MatchReason::ExactDb,
                class: MatchClass::Auto,
            };
            for raw in norm_map.get(norm).into_iter().flatten() {
                results.insert(raw.clone(), MatchExplanation {
                    outcome: outcome.clone(),
                    candidates: Vec::new(),
                    note: explain.then(|| "Exact SQL Match".to_string()),
                });
            }
            false
        });

        if residual_norms.is_empty() {
            return Ok(results);
        }

        // 4. Vector sweep for whatever is left.
        let search_results = self.vector.search_batch(&residual_norms, VECTOR_SEARCH_LIMIT);

        let mut candidate_ids = Vec::new();
        for matches in &search_results {
            for (id, _) in matches {
                if !candidate_ids.contains(id) {
                    candidate_ids.push(*id);
                }
            }
        }

        let candidate_recordings: HashMap<Uuid, _> = self.recordings
            .by_ids_fetch(&self.pool, &candidate_ids)
            .await?
            .into_iter()
            .map(|rec| (*rec.id(), rec))
            .collect();

        let work_ids: Vec<Uuid> = candidate_recordings.values().map(|rec| *rec.work_id()).collect();
        let work_artists = self.works.artists_for_works(&self.pool, &work_ids).await?;

        // 5-7. Score, classify (first rule wins in ascending vector distance),
        // and fan the verdict out to every raw pair behind the key.
        for (i, norm) in residual_norms.iter().enumerate() {
            let top_matches = search_results.get(i).map(Vec::as_slice).unwrap_or(&[]);
            let (query_artist, query_title) = norm;

            let mut best = WorkMatch::no_match();
            let mut candidates_debug: Vec<CandidateScore> = Vec::new();

            for (recording_id, dist) in top_matches {
                let Some(recording) = candidate_recordings.get(recording_id) else {
                    continue;
                };

                let associated = work_artists.get(recording.work_id());
                // artist_sim is the best ratio across every associated
                // artist; the literal exact-text rule compares against the
                // artist the loop saw last, not the one that scored best.
                let mut artist_sim: f64 = 0.0;
                let mut last_artist_name = String::new();
                let mut last_artist_clean = String::new();
                for artist in associated.into_iter().flatten() {
                    let candidate_artist = clean_artist(artist.name());
                    let sim = similarity_ratio(&candidate_artist, query_artist);
                    if sim > artist_sim {
                        artist_sim = sim;
                    }
                    last_artist_name = artist.name().to_string();
                    last_artist_clean = candidate_artist;
                }

                let candidate_title = clean(recording.title());
                let title_sim = similarity_ratio(&candidate_title, query_title);

                let mut match_type = "None";

                let is_exact = last_artist_clean == *query_artist
                    && candidate_title == *query_title;

                if is_exact {
                    match_type = "Exact";
                    if best.work_id.is_none() {
                        best = WorkMatch {
                            work_id: Some(*recording.work_id()),
                            recording_id: Some(*recording.id()),
                            reason: MatchReason::ExactText,
                            class: MatchClass::Auto,
                        };
                    }
                } else if artist_sim > self.thresholds.artist_auto && title_sim > self.thresholds.title_auto {
                    match_type = "High Confidence";
                    if best.work_id.is_none() {
                        best = WorkMatch {
                            work_id: Some(*recording.work_id()),
                            recording_id: Some(*recording.id()),
                            reason: MatchReason::HighConfidence {
                                artist_pct: (artist_sim * 100.0) as u8,
                                title_pct: (title_sim * 100.0) as u8,
                                vector: 1.0 - dist,
                            },
                            class: MatchClass::Auto,
                        };
                    }
                } else if *dist < self.thresholds.vector_strong
                    && title_sim >= self.thresholds.effective_vector_title_guard()
                {
                    // The title guard keeps near-neighbors with unrelated
                    // titles from riding in on artist similarity alone.
                    match_type = "Vector Strong";
                    if best.work_id.is_none() {
                        best = WorkMatch {
                            work_id: Some(*recording.work_id()),
                            recording_id: Some(*recording.id()),
                            reason: MatchReason::VectorStrong { similarity: 1.0 - dist },
                            class: MatchClass::Auto,
                        };
                    }
                } else if title_sim > self.thresholds.title_vector && *dist < self.thresholds.title_vector_dist {
                    match_type = "Title+Vector";
                    if best.work_id.is_none() {
                        best = WorkMatch {
                            work_id: Some(*recording.work_id()),
                            recording_id: Some(*recording.id()),
                            reason: MatchReason::TitleVector { confidence: 1.0 - dist },
                            class: MatchClass::Review,
                        };
                    }
                } else if artist_sim >= self.thresholds.artist_review && title_sim >= self.thresholds.title_review {
                    match_type = "Review Confidence";
                    if best.work_id.is_none() {
                        best = WorkMatch {
                            work_id: Some(*recording.work_id()),
                            recording_id: Some(*recording.id()),
                            reason: MatchReason::ReviewCandidate {
                                artist_pct: (artist_sim * 100.0) as u8,
                                title_pct: (title_sim * 100.0) as u8,
                            },
                            class: MatchClass::Review,
                        };
                    }
                }

                if explain && candidates_debug.len() < EXPLAIN_CANDIDATE_LIMIT {
                    let raw_examples = norm_map.get(norm).into_iter().flatten().next();
                    let quality_warnings = analyze_match_quality(
                        raw_examples.map(|(a, _)| a.as_str()).unwrap_or(query_artist),
                        raw_examples.map(|(_, t)| t.as_str()).unwrap_or(query_title),
                        &last_artist_name,
                        recording.title(),
                    );

                    candidates_debug.push(CandidateScore {
                        recording_id: *recording.id(),
                        artist: last_artist_name.clone(),
                        title: recording.title().to_string(),
                        artist_sim,
                        title_sim,
                        vector_dist: *dist,
                        match_type,
                        quality_warnings,
                        edge_case: detect_edge_case(artist_sim, title_sim, &self.thresholds),
                    });
                }
            }

            for raw in norm_map.get(norm).into_iter().flatten() {
                results.insert(raw.clone(), MatchExplanation {
                    outcome: best.clone(),
                    candidates: candidates_debug.clone(),
                    note: None,
                });
            }
        }

        Ok(results)
    }
}

/// Heuristic red flags shown next to explain-mode candidates.
pub fn analyze_match_quality(
    raw_artist: &str,
    raw_title: &str,
    candidate_artist: &str,
    candidate_title: &str,
) -> Vec<String> {
    let mut warnings = Vec::new();

    let lowered = format!(" {} ", raw_artist.to_lowercase());
    if [" feat. ", " feat ", " ft. ", " ft ", " featuring "].iter().any(|m| lowered.contains(m)) {
        warnings.push("artist contains featuring suffix".to_string());
    }

    let raw_len = raw_title.trim().len().max(1);
    let cand_len = candidate_title.trim().len().max(1);
    let ratio = raw_len.max(cand_len) as f64 / raw_len.min(cand_len) as f64;
    if ratio > 3.0 {
        warnings.push("title length differs > 3x".to_string());
    }

    let (_, version) = extract_version_type(candidate_title);
    if version != VersionType::Original {
        warnings.push("title contains version tag".to_string());
    }

    if candidate_artist.trim().is_empty() {
        warnings.push("candidate has no artist".to_string());
    }

    warnings
}

/// Flags similarities sitting within 5 points of a threshold boundary, where
/// small threshold moves flip the classification.
pub fn detect_edge_case(artist_sim: f64, title_sim: f64, thresholds: &Thresholds) -> Option<EdgeCase> {
    let near = |sim: f64, threshold: f64| (sim - threshold).abs() <= 0.05;

    if near(artist_sim, thresholds.artist_auto) || near(title_sim, thresholds.title_auto) {
        return Some(EdgeCase::WithinFivePctOfAuto);
    }
    if near(artist_sim, thresholds.artist_review) || near(title_sim, thresholds.title_review) {
        return Some(EdgeCase::WithinFivePctOfReview);
    }

    None
}

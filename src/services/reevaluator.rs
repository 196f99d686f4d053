use crate::repository::{RepositoryError, SqliteBroadcastLogsRepository};
use crate::services::matcher::Matcher;
use sqlx::SqlitePool;

#[derive(Debug, Default, Clone)]
pub struct ReEvaluationReport {
    pub unique_pairs: usize,
    pub logs_updated: usize,
}

/// Re-applies the matching pipeline to historical logs after a threshold
/// change (or on demand). Work happens in units of unique raw pairs; each
/// winning pair becomes a single bulk UPDATE guarded by the same predicate
/// that selected it.
pub struct ReEvaluator {
    pool: SqlitePool,
    matcher: Matcher,
    logs: SqliteBroadcastLogsRepository,
}

impl ReEvaluator {
    pub fn new(pool: SqlitePool, matcher: Matcher) -> Self {
        Self {
            pool,
            matcher,
            logs: SqliteBroadcastLogsRepository::new(),
        }
    }

    pub async fn run(&self) -> Result<ReEvaluationReport, RepositoryError> {
        let pairs = self.logs.distinct_pairs_for_reevaluation(&self.pool).await?;
        let total = pairs.len();
        log::info!("Re-evaluating {} unique song pairs", total);

        let results = self.matcher.match_batch(&pairs).await?;

        let mut report = ReEvaluationReport { unique_pairs: total, ..ReEvaluationReport::default() };
        let mut processed = 0usize;

        for pair in &pairs {
            processed += 1;

            let Some(outcome) = results.get(pair) else {
                continue;
            };
            // A pair the pipeline still cannot place stays exactly as it is;
            // rewriting an unmatched row with another "no match" would make
            // every re-evaluation a spurious mass update.
            let Some(work_id) = outcome.work_id else {
                continue;
            };

            let updated = self.logs.update_pair_match(
                &self.pool,
                &pair.0,
                &pair.1,
                Some(&work_id),
                &outcome.reason,
            ).await?;
            report.logs_updated += updated as usize;

            if processed % 100 == 0 {
                log::info!(
                    "Re-evaluation progress: {}/{} pairs ({} logs updated)",
                    processed, total, report.logs_updated
                );
            }
        }

        log::info!(
            "Re-evaluation complete: {} logs updated across {} unique pairs",
            report.logs_updated, report.unique_pairs
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use sqlx::SqlitePool;
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::*;
    use crate::domain::broadcast_log::MatchReason;
    use crate::repository::logs_repo::{LogExportFilter, NewBroadcastLog};
    use crate::services::test_helpers::{
        init_logger, prepare_db, prepare_vector_index, seed_catalog_entry, seed_station, TestSetupError,
    };
    use crate::utils::config::Thresholds;
    use crate::vector::VectorIndex;

    struct TestContext {
        pool: SqlitePool,
        vector: Arc<VectorIndex>,
        station_id: Uuid,
        _vector_dir: TempDir,
    }

    impl TestContext {
        async fn new() -> Result<Self, TestSetupError> {
            init_logger()?;
            let pool = prepare_db().await?;
            let (vector_dir, vector) = prepare_vector_index()?;
            let station_id = seed_station(&pool, "KEXP").await?;
            Ok(Self { pool, vector, station_id, _vector_dir: vector_dir })
        }

        fn reevaluator(&self) -> ReEvaluator {
            let matcher = Matcher::new(self.pool.clone(), Arc::clone(&self.vector), Thresholds::default());
            ReEvaluator::new(self.pool.clone(), matcher)
        }

        async fn seed_log(&self, artist: &str, title: &str, work_id: Option<Uuid>, reason: Option<MatchReason>) -> Result<(), TestSetupError> {
            let mut conn = self.pool.acquire().await?;
            SqliteBroadcastLogsRepository::new().bulk_insert(&mut conn, &[NewBroadcastLog {
                station_id: self.station_id,
                played_at: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(8, 0, 0).unwrap(),
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
    async fn newly_resolvable_pair_is_bulk_updated() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        // Two copies of a pair ingested before the catalog knew it.
        ctx.seed_log("The Beatles", "Hey Jude", None, None).await?;
        ctx.seed_log("The Beatles", "Hey Jude", None, None).await?;
        let (work_id, _) = seed_catalog_entry(&ctx.pool, "beatles", "hey jude").await?;

        let report = ctx.reevaluator().run().await?;
        assert_eq!(report.unique_pairs, 1);
        assert_eq!(report.logs_updated, 2);

        let filter = LogExportFilter { matched_only: true, ..LogExportFilter::default() };
        let matched = SqliteBroadcastLogsRepository::new().fetch_for_export(&ctx.pool, &filter).await?;
        assert_eq!(matched.len(), 2);
        assert!(matched.iter().all(|log| log.work_id == Some(work_id)));

        Ok(())
    }

    #[tokio::test]
    async fn unchanged_state_is_a_noop() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        let settled_work = Uuid::new_v4();
        ctx.seed_log("Nobody Known", "Nothing Song", None, None).await?;
        ctx.seed_log("Queen", "Bohemian Rhapsody", Some(settled_work), Some(MatchReason::ExactDb)).await?;

        let report = ctx.reevaluator().run().await?;
        assert_eq!(report.unique_pairs, 1);
        assert_eq!(report.logs_updated, 0);

        // Run it again: still nothing to do.
        let report = ctx.reevaluator().run().await?;
        assert_eq!(report.logs_updated, 0);

        Ok(())
    }

    #[tokio::test]
    async fn review_flagged_logs_are_reconsidered() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        let stale_work = Uuid::new_v4();
        ctx.seed_log(
            "The Beatles",
            "Hey Jude",
            Some(stale_work),
            Some(MatchReason::ReviewCandidate { artist_pct: 75, title_pct: 72 }),
        ).await?;
        let (work_id, _) = seed_catalog_entry(&ctx.pool, "beatles", "hey jude").await?;

        let report = ctx.reevaluator().run().await?;
        assert_eq!(report.logs_updated, 1);

        let filter = LogExportFilter { matched_only: true, ..LogExportFilter::default() };
        let matched = SqliteBroadcastLogsRepository::new().fetch_for_export(&ctx.pool, &filter).await?;
        assert_eq!(matched[0].work_id, Some(work_id));
        assert_eq!(matched[0].match_reason, Some(MatchReason::ExactDb));

        Ok(())
    }
}

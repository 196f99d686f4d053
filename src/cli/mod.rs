use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::identity_repo::AuditFilter;
use crate::repository::logs_repo::LogExportFilter;
use crate::repository::{SqliteRecordingsRepository, SqliteStationsRepository};
use crate::services::exporter::LogExporter;
use crate::services::importer::{parse_flexible_date, CsvImporter};
use crate::services::matcher::Matcher;
use crate::services::reevaluator::ReEvaluator;
use crate::services::scanner::LibraryScanner;
use crate::services::verification::VerificationService;
use crate::utils::config::{get_config, MatchSettings, Thresholds};
use crate::utils::db::get_application_db;
use crate::vector::{HashingEmbedder, VectorIndex};

#[derive(Parser)]
#[command(name = "airwave", about = "Broadcast log reconciliation against a curated music catalog")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Import a station CSV log file
    Import {
        file: PathBuf,

        /// Callsign to assume when the CSV has no Station column
        #[arg(long)]
        station: Option<String>,
    },

    /// Scan the music library and sync files into the catalog
    SyncFiles {
        /// Override the configured library root
        path: Option<PathBuf>,
    },

    /// Rebuild the discovery queue from unmatched logs
    Discover,

    /// Re-run matching over unmatched and review-flagged logs
    Reevaluate,

    /// Rebuild the vector index from the catalog
    Reindex,

    /// Show the discovery queue, highest impact first
    Queue {
        #[arg(long, default_value_t = 25)]
        limit: i64,
    },

    /// Link a queued signature to an existing work
    Link {
        signature: String,
        work_id: Uuid,
    },

    /// Promote a queued signature into a new verified catalog entry
    Promote {
        signature: String,
    },

    /// Dismiss a queued signature as noise
    Dismiss {
        signature: String,
    },

    /// Undo a verification action by audit id
    Undo {
        audit_id: Uuid,
    },

    /// Manually teach a raw pair -> recording mapping
    CreateBridge {
        raw_artist: String,
        raw_title: String,
        recording_id: Uuid,
    },

    /// Show the verification audit trail
    Audit {
        #[arg(long, default_value_t = 25)]
        limit: i64,
    },

    /// Show or change the matching thresholds
    Thresholds {
        #[arg(long)]
        artist_auto: Option<f64>,
        #[arg(long)]
        artist_review: Option<f64>,
        #[arg(long)]
        title_auto: Option<f64>,
        #[arg(long)]
        title_review: Option<f64>,
    },

    /// Export matched logs as an M3U playlist
    ExportM3u {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        station: Option<String>,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },

    /// Export logs as CSV
    ExportCsv {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        station: Option<String>,
        #[arg(long, default_value_t = false)]
        unmatched_only: bool,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },

    /// Explain how a single raw pair would match
    DebugMatch {
        artist: String,
        title: String,
    },

    /// Delete unverified recordings with no files and no references
    CleanupGhosts,
}

struct AppContext {
    pool: SqlitePool,
    vector: Arc<VectorIndex>,
    settings: MatchSettings,
}

impl AppContext {
    async fn init() -> anyhow::Result<Self> {
        let config = get_config()?;
        let db = get_application_db().await?;
        let pool = db.get_pool().clone();

        let vector = VectorIndex::open(
            &config.library.vector_index_path,
            Box::new(HashingEmbedder::new()),
        )?;

        let settings = MatchSettings::load(&pool, config.matching).await?;

        Ok(Self {
            pool,
            vector: Arc::new(vector),
            settings,
        })
    }

    fn matcher(&self) -> Matcher {
        Matcher::new(self.pool.clone(), Arc::clone(&self.vector), self.settings.snapshot())
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = AppContext::init().await?;

    match cli.command {
        Command::Import { file, station } => {
            let mut importer = CsvImporter::new(ctx.pool.clone(), ctx.matcher());
            let report = importer.import_file(&file, station.as_deref()).await?;
            println!(
                "Imported {} rows: {} matched, {} unmatched, {} skipped",
                report.inserted, report.matched, report.unmatched, report.skipped
            );
        }

        Command::SyncFiles { path } => {
            let config = get_config()?;
            let root = path.unwrap_or_else(|| config.library.music_path.clone());

            let scanner = LibraryScanner::new(ctx.pool.clone(), Arc::clone(&ctx.vector), config.scanner.clone());
            let cancel = CancellationToken::new();

            let cancel_on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received, finishing current files...");
                    cancel_on_signal.cancel();
                }
            });

            let stats = scanner.scan_directory(&root, &cancel).await?;
            println!(
                "Scan {}: processed={} created={} moved={} skipped={} errors={}",
                if stats.cancelled { "cancelled" } else { "complete" },
                stats.processed, stats.created, stats.moved, stats.skipped, stats.errors
            );
        }

        Command::Discover => {
            let queued = ctx.matcher().run_discovery().await?;
            println!("Discovery queue rebuilt: {} signatures awaiting verification", queued);
        }

        Command::Reevaluate => {
            let reevaluator = ReEvaluator::new(ctx.pool.clone(), ctx.matcher());
            let report = reevaluator.run().await?;
            println!(
                "Re-evaluated {} unique pairs, updated {} logs",
                report.unique_pairs, report.logs_updated
            );
        }

        Command::Reindex => {
            let rows = SqliteRecordingsRepository::new().all_for_reindex(&ctx.pool).await?;
            ctx.vector.clear();
            ctx.vector.add(&rows);
            ctx.vector.persist()?;
            println!("Re-indexed {} recordings", rows.len());
        }

        Command::Queue { limit } => {
            let service = VerificationService::new(ctx.pool.clone());
            let entries = service.list_queue(limit, 0).await?;
            if entries.is_empty() {
                println!("Discovery queue is empty.");
            }
            for entry in entries {
                println!(
                    "{}  x{:<5} {} - {}{}",
                    entry.signature,
                    entry.count,
                    entry.raw_artist,
                    entry.raw_title,
                    entry.suggested_work_id
                        .map(|id| format!("  (suggested work {})", id))
                        .unwrap_or_default()
                );
            }
        }

        Command::Link { signature, work_id } => {
            let service = VerificationService::new(ctx.pool.clone());
            let outcome = service.link(&signature, &work_id, false).await?;
            println!("Linked {} logs; audit {}", outcome.linked_logs, outcome.audit_id);
        }

        Command::Promote { signature } => {
            let service = VerificationService::new(ctx.pool.clone());
            let outcome = service.promote(&signature, false).await?;
            println!(
                "Promoted to work {} (recording {}); {} logs linked; audit {}",
                outcome.work_id, outcome.recording_id, outcome.linked_logs, outcome.audit_id
            );
        }

        Command::Dismiss { signature } => {
            let service = VerificationService::new(ctx.pool.clone());
            let audit_id = service.dismiss(&signature).await?;
            println!("Dismissed; audit {}", audit_id);
        }

        Command::Undo { audit_id } => {
            let service = VerificationService::new(ctx.pool.clone());
            let outcome = service.undo(&audit_id).await?;
            if outcome.was_already_undone {
                println!("Already undone.");
            } else {
                println!("Undone; {} logs returned to the queue", outcome.restored_count);
            }
        }

        Command::CreateBridge { raw_artist, raw_title, recording_id } => {
            let service = VerificationService::new(ctx.pool.clone());
            let (bridge_id, audit_id) = service.create_bridge(&raw_artist, &raw_title, &recording_id).await?;
            println!("Bridge {} created; audit {}", bridge_id, audit_id);
        }

        Command::Audit { limit } => {
            let service = VerificationService::new(ctx.pool.clone());
            let audits = service.list_audit(&AuditFilter { limit, ..AuditFilter::default() }).await?;
            for audit in audits {
                println!(
                    "{}  {:<13} {} - {}  logs={}{}",
                    audit.id,
                    audit.action_type.as_str(),
                    audit.raw_artist,
                    audit.raw_title,
                    audit.log_ids.len(),
                    if audit.is_undone { "  [undone]" } else { "" }
                );
            }
        }

        Command::Thresholds { artist_auto, artist_review, title_auto, title_review } => {
            let changed = artist_auto.is_some() || artist_review.is_some()
                || title_auto.is_some() || title_review.is_some();

            if changed {
                let current = ctx.settings.snapshot();
                let new = Thresholds {
                    artist_auto: artist_auto.unwrap_or(current.artist_auto),
                    artist_review: artist_review.unwrap_or(current.artist_review),
                    title_auto: title_auto.unwrap_or(current.title_auto),
                    title_review: title_review.unwrap_or(current.title_review),
                    ..current
                };
                ctx.settings.update(&ctx.pool, new).await?;
                println!("Thresholds updated. Run `airwave reevaluate` to apply them to history.");
            }

            let snapshot = ctx.settings.snapshot();
            println!("artist_auto={} artist_review={}", snapshot.artist_auto, snapshot.artist_review);
            println!("title_auto={} title_review={}", snapshot.title_auto, snapshot.title_review);
            println!(
                "vector_strong={} vector_title_guard={:.3} title_vector={} title_vector_dist={}",
                snapshot.vector_strong,
                snapshot.effective_vector_title_guard(),
                snapshot.title_vector,
                snapshot.title_vector_dist
            );
        }

        Command::ExportM3u { start, end, station, out } => {
            let filter = build_filter(&ctx.pool, start, end, station, false).await?;
            let exporter = LogExporter::new(ctx.pool.clone());
            let report = exporter.export_m3u(&filter, &out).await?;
            println!(
                "Wrote {} ({} tracks, {} skipped)",
                report.path.display(), report.included, report.skipped
            );
        }

        Command::ExportCsv { start, end, station, unmatched_only, out } => {
            let filter = LogExportFilter {
                unmatched_only,
                ..build_filter(&ctx.pool, start, end, station, false).await?
            };
            let exporter = LogExporter::new(ctx.pool.clone());
            let report = exporter.export_csv(&filter, &out).await?;
            println!("Wrote {} ({} rows)", report.path.display(), report.rows);
        }

        Command::DebugMatch { artist, title } => {
            let matcher = ctx.matcher();
            let results = matcher.match_batch_explain(&[(artist.clone(), title.clone())]).await?;
            let explanation = results
                .get(&(artist.clone(), title.clone()))
                .ok_or_else(|| anyhow!("matcher returned no result"))?;

            match explanation.outcome.work_id {
                Some(work_id) => println!("MATCH: work {} ({})", work_id, explanation.outcome.reason),
                None => println!("NO MATCH"),
            }
            for candidate in &explanation.candidates {
                println!(
                    "  {} - {}  A:{:.2} T:{:.2} V:{:.2} [{}]{}",
                    candidate.artist,
                    candidate.title,
                    candidate.artist_sim,
                    candidate.title_sim,
                    candidate.vector_dist,
                    candidate.match_type,
                    candidate.edge_case.map(|e| format!(" ({})", e.as_str())).unwrap_or_default()
                );
                for warning in &candidate.quality_warnings {
                    println!("      warning: {}", warning);
                }
            }
        }

        Command::CleanupGhosts => {
            let deleted = SqliteRecordingsRepository::new().delete_ghosts(&ctx.pool).await?;
            println!("Deleted {} ghost recordings", deleted);
        }
    }

    Ok(())
}

async fn build_filter(
    pool: &SqlitePool,
    start: Option<String>,
    end: Option<String>,
    station: Option<String>,
    matched_only: bool,
) -> anyhow::Result<LogExportFilter> {
    let start = match start {
        Some(raw) => Some(parse_flexible_date(&raw).ok_or_else(|| anyhow!("Invalid start date '{}'; use YYYY-MM-DD", raw))?),
        None => None,
    };
    let end = match end {
        Some(raw) => Some(
            parse_flexible_date(&format!("{} 23:59:59", raw))
                .or_else(|| parse_flexible_date(&raw))
                .ok_or_else(|| anyhow!("Invalid end date '{}'; use YYYY-MM-DD", raw))?,
        ),
        None => None,
    };

    let station_id = match station {
        Some(callsign) => Some(
            SqliteStationsRepository::new()
                .by_callsign_fetch(pool, &callsign)
                .await?
                .map(|s| *s.id())
                .context(format!("Unknown station '{}'", callsign))?,
        ),
        None => None,
    };

    Ok(LogExportFilter { start, end, station_id, matched_only, unmatched_only: false })
}

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::broadcast_log::MatchReason;
use crate::domain::identity::{DiscoveryQueueEntry, IdentityBridge, VerificationAction, VerificationAudit};
use crate::domain::recording::VersionType;
use crate::repository::identity_repo::AuditFilter;
use crate::repository::{
    SqliteArtistsRepository, SqliteBroadcastLogsRepository, SqliteIdentityRepository,
    SqliteRecordingsRepository, SqliteWorksRepository,
};
use crate::utils::normalizations::{clean, clean_artist, generate_signature};
use super::VerificationError;

#[derive(Debug)]
pub struct LinkOutcome {
    pub audit_id: Uuid,
    pub bridge_id: Uuid,
    pub linked_logs: usize,
}

#[derive(Debug)]
pub struct PromoteOutcome {
    pub audit_id: Uuid,
    pub bridge_id: Uuid,
    pub work_id: Uuid,
    pub recording_id: Uuid,
    pub linked_logs: usize,
}

#[derive(Debug)]
pub struct UndoOutcome {
    pub was_already_undone: bool,
    pub restored_count: usize,
}

/// Operator actions over the discovery queue. Every action is one
/// transaction ending in exactly one audit row; observers see all of a
/// mutation or none of it.
pub struct VerificationService {
    pool: SqlitePool,
    identity: SqliteIdentityRepository,
    logs: SqliteBroadcastLogsRepository,
    artists: SqliteArtistsRepository,
    works: SqliteWorksRepository,
    recordings: SqliteRecordingsRepository,
}

impl VerificationService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            identity: SqliteIdentityRepository::new(),
            logs: SqliteBroadcastLogsRepository::new(),
            artists: SqliteArtistsRepository::new(),
            works: SqliteWorksRepository::new(),
            recordings: SqliteRecordingsRepository::new(),
        }
    }

    pub async fn list_queue(&self, limit: i64, offset: i64) -> Result<Vec<DiscoveryQueueEntry>, VerificationError> {
        Ok(self.identity.queue_list(&self.pool, limit, offset).await?)
    }

    pub async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<VerificationAudit>, VerificationError> {
        Ok(self.identity.audit_list(&self.pool, filter).await?)
    }

    /// Links a queued signature to an existing Work: upserts the bridge,
    /// relinks every currently-unmatched log carrying the signature, drops
    /// the queue entry, and appends the audit row.
    pub async fn link(&self, signature: &str, work_id: &Uuid, is_batch: bool) -> Result<LinkOutcome, VerificationError> {
        let mut tx = self.pool.begin().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;

        let queue_item = self.identity.queue_get(&mut *tx, signature).await?
            .ok_or_else(|| VerificationError::QueueItemNotFound(signature.to_string()))?;

        self.verify_signature_integrity(&queue_item, signature)?;

        self.works.by_id_fetch(&mut *tx, work_id).await?
            .ok_or(VerificationError::WorkNotFound(*work_id))?;

        let log_ids = self.collect_unmatched_for_signature(&mut tx, signature).await?;

        let bridge_id = self.upsert_bridge(&mut tx, signature, &queue_item, work_id).await?;

        self.logs.assign_work(&mut *tx, &log_ids, work_id, &MatchReason::VerifiedLink).await?;
        self.identity.queue_delete(&mut *tx, signature).await?;

        let action = if is_batch { VerificationAction::BulkLink } else { VerificationAction::Link };
        let audit_id = self.append_audit(&mut tx, action, signature, &queue_item, Some(*work_id), None, &log_ids, Some(bridge_id)).await?;

        tx.commit().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;

        Ok(LinkOutcome { audit_id, bridge_id, linked_logs: log_ids.len() })
    }

    /// Promotes a queued signature into the catalog: upserts the normalized
    /// Artist -> Work -> Recording chain (recording marked verified), then
    /// proceeds exactly like link.
    pub async fn promote(&self, signature: &str, is_batch: bool) -> Result<PromoteOutcome, VerificationError> {
        let mut tx = self.pool.begin().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;

        let queue_item = self.identity.queue_get(&mut *tx, signature).await?
            .ok_or_else(|| VerificationError::QueueItemNotFound(signature.to_string()))?;

        self.verify_signature_integrity(&queue_item, signature)?;

        let clean_artist_name = clean_artist(&queue_item.raw_artist);
        let clean_title = clean(&queue_item.raw_title);

        let artist = self.artists.upsert(&mut *tx, &clean_artist_name).await?;
        // Promotion is an explicit operator statement of identity, so work
        // lookup is exact only (fuzzy disabled via a zero work cap).
        let work = self.works.upsert(&mut *tx, &clean_title, artist.id(), 1.0, 0).await?;
        let recording = self.recordings.upsert(&mut *tx, work.id(), &clean_title, VersionType::Original, None, None).await?;
        if !recording.is_verified() {
            self.recordings.mark_verified(&mut *tx, recording.id()).await?;
        }

        let log_ids = self.collect_unmatched_for_signature(&mut tx, signature).await?;
        let bridge_id = self.upsert_bridge(&mut tx, signature, &queue_item, work.id()).await?;

        self.logs.assign_work(&mut *tx, &log_ids, work.id(), &MatchReason::UserVerified).await?;
        self.identity.queue_delete(&mut *tx, signature).await?;

        let action = if is_batch { VerificationAction::BulkPromote } else { VerificationAction::Promote };
        let audit_id = self.append_audit(&mut tx, action, signature, &queue_item, Some(*work.id()), Some(*recording.id()), &log_ids, Some(bridge_id)).await?;

        tx.commit().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;

        Ok(PromoteOutcome {
            audit_id,
            bridge_id,
            work_id: *work.id(),
            recording_id: *recording.id(),
            linked_logs: log_ids.len(),
        })
    }

    /// Removes a queue entry without touching bridges or logs. Noise control.
    pub async fn dismiss(&self, signature: &str) -> Result<Uuid, VerificationError> {
        let mut tx = self.pool.begin().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;

        let queue_item = self.identity.queue_get(&mut *tx, signature).await?
            .ok_or_else(|| VerificationError::QueueItemNotFound(signature.to_string()))?;

        self.identity.queue_delete(&mut *tx, signature).await?;

        let audit_id = self.append_audit(
            &mut tx,
            VerificationAction::Dismiss,
            signature,
            &queue_item,
            None,
            None,
            &[],
            None,
        ).await?;

        tx.commit().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;

        Ok(audit_id)
    }

    /// Manually teaches the system a mapping without a queue entry: raw pair
    /// plus a recording whose work becomes the bridge target.
    pub async fn create_bridge(&self, raw_artist: &str, raw_title: &str, recording_id: &Uuid) -> Result<(Uuid, Uuid), VerificationError> {
        let mut tx = self.pool.begin().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;

        let recording = self.recordings.by_id_fetch(&mut *tx, recording_id).await?
            .ok_or(VerificationError::RecordingNotFound(*recording_id))?;

        let signature = generate_signature(raw_artist, raw_title);

        if self.identity.bridge_by_signature(&mut *tx, &signature).await?.is_some() {
            return Err(VerificationError::BridgeExists);
        }

        let bridge = IdentityBridge::new(
            Uuid::new_v4(),
            signature.clone(),
            raw_artist.to_string(),
            raw_title.to_string(),
            *recording.work_id(),
            1.0,
        )?;
        self.identity.create_bridge(&mut *tx, &bridge).await?;

        let audit = VerificationAudit {
            id: Uuid::new_v4(),
            action_type: VerificationAction::ManualBridge,
            signature,
            raw_artist: raw_artist.to_string(),
            raw_title: raw_title.to_string(),
            work_id: Some(*recording.work_id()),
            recording_id: Some(*recording.id()),
            log_ids: Vec::new(),
            bridge_id: Some(bridge.id),
            is_undone: false,
            undone_at: None,
            performed_by: None,
            created_at: Utc::now().naive_utc(),
        };
        self.identity.audit_insert(&mut *tx, &audit).await?;

        tx.commit().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;

        Ok((bridge.id, audit.id))
    }

    /// Reverses a verification action: revokes the bridge, detaches every
    /// affected log (including ones matched after the original action), and
    /// restores the queue entry. Idempotent: undoing twice is a no-op.
    pub async fn undo(&self, audit_id: &Uuid) -> Result<UndoOutcome, VerificationError> {
        let mut tx = self.pool.begin().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;

        let audit = self.identity.audit_by_id(&mut *tx, audit_id).await?
            .ok_or(VerificationError::AuditNotFound(*audit_id))?;

        if audit.is_undone {
            return Ok(UndoOutcome { was_already_undone: true, restored_count: 0 });
        }

        let mut logs_to_unlink: Vec<Uuid> = audit.log_ids.clone();

        if let Some(bridge_id) = audit.bridge_id {
            if let Some(bridge) = self.identity.bridge_by_id(&mut *tx, &bridge_id).await? {
                self.identity.revoke_bridge(&mut *tx, &bridge.id).await?;

                // Logs that were matched through this bridge after the
                // original action carry the same work and signature but are
                // absent from the audit's id list.
                let bridged = self.logs.bridge_matched_logs(&mut *tx, &bridge.work_id).await?;
                for (log_id, raw_artist, raw_title) in bridged {
                    if generate_signature(&raw_artist, &raw_title) == audit.signature
                        && !logs_to_unlink.contains(&log_id)
                    {
                        logs_to_unlink.push(log_id);
                    }
                }
            }
        }

        self.logs.detach(&mut *tx, &logs_to_unlink).await?;

        if !logs_to_unlink.is_empty() {
            self.identity.queue_bump(
                &mut *tx,
                &audit.signature,
                &audit.raw_artist,
                &audit.raw_title,
                logs_to_unlink.len() as i64,
            ).await?;
        }

        let now = Utc::now().naive_utc();
        self.identity.audit_mark_undone(&mut *tx, &audit.id, now).await?;

        let undo_audit = VerificationAudit {
            id: Uuid::new_v4(),
            action_type: VerificationAction::Undo,
            signature: audit.signature.clone(),
            raw_artist: audit.raw_artist.clone(),
            raw_title: audit.raw_title.clone(),
            work_id: None,
            recording_id: None,
            log_ids: logs_to_unlink.clone(),
            bridge_id: audit.bridge_id,
            is_undone: false,
            undone_at: None,
            performed_by: None,
            created_at: now,
        };
        self.identity.audit_insert(&mut *tx, &undo_audit).await?;

        tx.commit().await.map_err(crate::repository::RepositoryError::from_sqlx_error)?;

        Ok(UndoOutcome { was_already_undone: false, restored_count: logs_to_unlink.len() })
    }

    fn verify_signature_integrity(&self, queue_item: &DiscoveryQueueEntry, signature: &str) -> Result<(), VerificationError> {
        let expected = generate_signature(&queue_item.raw_artist, &queue_item.raw_title);
        if expected != signature {
            return Err(VerificationError::SignatureMismatch {
                expected,
                got: signature.to_string(),
            });
        }
        Ok(())
    }

    async fn collect_unmatched_for_signature(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        signature: &str,
    ) -> Result<Vec<Uuid>, VerificationError> {
        let unmatched = self.logs.unmatched_logs(&mut **tx).await?;

        Ok(unmatched
            .into_iter()
            .filter(|(_, raw_artist, raw_title)| generate_signature(raw_artist, raw_title) == signature)
            .map(|(id, _, _)| id)
            .collect())
    }

    /// Create / revive / reuse the bridge for a signature. An active bridge
    /// pointing somewhere else is a conflict the operator must undo first.
    async fn upsert_bridge(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        signature: &str,
        queue_item: &DiscoveryQueueEntry,
        work_id: &Uuid,
    ) -> Result<Uuid, VerificationError> {
        match self.identity.bridge_by_signature(&mut **tx, signature).await? {
            Some(bridge) if bridge.is_revoked => {
                self.identity.revive_bridge(
                    &mut **tx,
                    &bridge.id,
                    work_id,
                    &queue_item.raw_artist,
                    &queue_item.raw_title,
                ).await?;
                Ok(bridge.id)
            }
            Some(bridge) if bridge.work_id != *work_id => {
                Err(VerificationError::BridgeConflict { existing_work_id: bridge.work_id })
            }
            Some(bridge) => Ok(bridge.id),
            None => {
                let bridge = IdentityBridge::new(
                    Uuid::new_v4(),
                    signature.to_string(),
                    queue_item.raw_artist.clone(),
                    queue_item.raw_title.clone(),
                    *work_id,
                    1.0,
                )?;
                self.identity.create_bridge(&mut **tx, &bridge).await?;
                Ok(bridge.id)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_audit(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        action: VerificationAction,
        signature: &str,
        queue_item: &DiscoveryQueueEntry,
        work_id: Option<Uuid>,
        recording_id: Option<Uuid>,
        log_ids: &[Uuid],
        bridge_id: Option<Uuid>,
    ) -> Result<Uuid, VerificationError> {
        let audit = VerificationAudit {
            id: Uuid::new_v4(),
            action_type: action,
            signature: signature.to_string(),
            raw_artist: queue_item.raw_artist.clone(),
            raw_title: queue_item.raw_title.clone(),
            work_id,
            recording_id,
            log_ids: log_ids.to_vec(),
            bridge_id,
            is_undone: false,
            undone_at: None,
            performed_by: None,
            created_at: Utc::now().naive_utc(),
        };
        self.identity.audit_insert(&mut **tx, &audit).await?;
        Ok(audit.id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use sqlx::SqlitePool;

    use super::*;
    use crate::repository::logs_repo::NewBroadcastLog;
    use crate::services::test_helpers::{
        init_logger, prepare_db, seed_catalog_entry, seed_station, TestSetupError,
    };

    struct TestContext {
        pool: SqlitePool,
        service: VerificationService,
        identity: SqliteIdentityRepository,
        logs: SqliteBroadcastLogsRepository,
        station_id: Uuid,
    }

    impl TestContext {
        async fn new() -> Result<Self, TestSetupError> {
            init_logger()?;
            let pool = prepare_db().await?;
            let station_id = seed_station(&pool, "KEXP").await?;

            Ok(Self {
                service: VerificationService::new(pool.clone()),
                identity: SqliteIdentityRepository::new(),
                logs: SqliteBroadcastLogsRepository::new(),
                pool,
                station_id,
            })
        }

        /// Unmatched log plus a queue entry for the same raw pair, the state
        /// ingestion leaves behind for an unknown signature.
        async fn seed_unmatched(&self, raw_artist: &str, raw_title: &str, count: i64) -> Result<String, TestSetupError> {
            let mut conn = self.pool.acquire().await?;

            for i in 0..count {
                self.logs.bulk_insert(&mut conn, &[NewBroadcastLog {
                    station_id: self.station_id,
                    played_at: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(i as u32, 0, 0).unwrap(),
                    raw_artist: raw_artist.to_string(),
                    raw_title: raw_title.to_string(),
                    work_id: None,
                    match_reason: None,
                    import_batch_id: None,
                }]).await?;
            }

            let signature = generate_signature(raw_artist, raw_title);
            self.identity.queue_bump(&mut conn, &signature, raw_artist, raw_title, count).await?;

            Ok(signature)
        }
    }

    #[tokio::test]
    async fn link_moves_logs_and_clears_queue() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (work_id, _) = seed_catalog_entry(&ctx.pool, "guns n roses", "sweet child o mine").await?;
        let signature = ctx.seed_unmatched("GnR", "Sweet Child", 3).await?;

        let outcome = ctx.service.link(&signature, &work_id, false).await?;
        assert_eq!(outcome.linked_logs, 3);

        // Logs carry the work and the verification reason.
        let unmatched = ctx.logs.unmatched_logs(&ctx.pool).await?;
        assert!(unmatched.is_empty());
        let bridged = ctx.logs.bridge_matched_logs(&ctx.pool, &work_id).await?;
        assert_eq!(bridged.len(), 3);

        // Queue entry is gone, bridge is active, audit exists.
        assert!(ctx.identity.queue_get(&ctx.pool, &signature).await?.is_none());
        let bridge = ctx.identity.bridge_by_signature(&ctx.pool, &signature).await?.unwrap();
        assert!(!bridge.is_revoked);
        assert_eq!(bridge.work_id, work_id);
        let audit = ctx.identity.audit_by_id(&ctx.pool, &outcome.audit_id).await?.unwrap();
        assert_eq!(audit.action_type, VerificationAction::Link);
        assert_eq!(audit.log_ids.len(), 3);

        Ok(())
    }

    #[tokio::test]
    async fn link_rejects_signature_mismatch_without_side_effects() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (work_id, _) = seed_catalog_entry(&ctx.pool, "guns n roses", "sweet child o mine").await?;
        ctx.seed_unmatched("GnR", "Sweet Child", 1).await?;

        // Forge a queue row whose stored raw values do not hash to its key.
        let forged = "00000000000000000000000000000000";
        let mut conn = ctx.pool.acquire().await?;
        ctx.identity.queue_bump(&mut conn, forged, "GnR", "Sweet Child", 1).await?;

        let result = ctx.service.link(forged, &work_id, false).await;
        assert!(matches!(result, Err(VerificationError::SignatureMismatch { .. })));

        // Nothing moved: the log is still unmatched, no bridge, no audit.
        assert_eq!(ctx.logs.unmatched_logs(&ctx.pool).await?.len(), 1);
        assert!(ctx.identity.bridge_by_signature(&ctx.pool, forged).await?.is_none());
        assert!(ctx.identity.queue_get(&ctx.pool, forged).await?.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn link_conflict_leaves_state_untouched() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (work_one, _) = seed_catalog_entry(&ctx.pool, "guns n roses", "sweet child o mine").await?;
        let (work_two, _) = seed_catalog_entry(&ctx.pool, "queen", "bohemian rhapsody").await?;
        let signature = ctx.seed_unmatched("GnR", "Sweet Child", 2).await?;

        ctx.service.link(&signature, &work_one, false).await?;

        // Re-queue the signature, then try to point it somewhere else.
        let mut conn = ctx.pool.acquire().await?;
        ctx.identity.queue_bump(&mut conn, &signature, "GnR", "Sweet Child", 1).await?;

        let result = ctx.service.link(&signature, &work_two, false).await;
        assert!(matches!(result, Err(VerificationError::BridgeConflict { existing_work_id }) if existing_work_id == work_one));

        // The original link result is intact.
        let bridge = ctx.identity.bridge_by_signature(&ctx.pool, &signature).await?.unwrap();
        assert_eq!(bridge.work_id, work_one);
        assert!(!bridge.is_revoked);
        assert_eq!(ctx.logs.bridge_matched_logs(&ctx.pool, &work_one).await?.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn promote_creates_verified_hierarchy() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let signature = ctx.seed_unmatched("The Midnight Howlers", "Gravel Road", 2).await?;

        let outcome = ctx.service.promote(&signature, false).await?;
        assert_eq!(outcome.linked_logs, 2);

        let recording = SqliteRecordingsRepository::new()
            .by_id_fetch(&ctx.pool, &outcome.recording_id)
            .await?
            .unwrap();
        assert!(recording.is_verified());
        assert_eq!(recording.title(), "gravel road");

        let bridge = ctx.identity.bridge_by_signature(&ctx.pool, &signature).await?.unwrap();
        assert_eq!(bridge.work_id, outcome.work_id);
        assert!(ctx.identity.queue_get(&ctx.pool, &signature).await?.is_none());

        let audit = ctx.identity.audit_by_id(&ctx.pool, &outcome.audit_id).await?.unwrap();
        assert_eq!(audit.action_type, VerificationAction::Promote);

        Ok(())
    }

    #[tokio::test]
    async fn dismiss_only_drops_queue_entry() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let signature = ctx.seed_unmatched("Static Noise", "Untitled Demo", 1).await?;

        let audit_id = ctx.service.dismiss(&signature).await?;

        assert!(ctx.identity.queue_get(&ctx.pool, &signature).await?.is_none());
        assert!(ctx.identity.bridge_by_signature(&ctx.pool, &signature).await?.is_none());
        assert_eq!(ctx.logs.unmatched_logs(&ctx.pool).await?.len(), 1);

        let audit = ctx.identity.audit_by_id(&ctx.pool, &audit_id).await?.unwrap();
        assert_eq!(audit.action_type, VerificationAction::Dismiss);

        Ok(())
    }

    #[tokio::test]
    async fn undo_restores_queue_and_detaches_logs() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (work_id, _) = seed_catalog_entry(&ctx.pool, "guns n roses", "sweet child o mine").await?;
        let signature = ctx.seed_unmatched("GnR", "Sweet Child", 3).await?;

        let link = ctx.service.link(&signature, &work_id, false).await?;

        let outcome = ctx.service.undo(&link.audit_id).await?;
        assert!(!outcome.was_already_undone);
        assert_eq!(outcome.restored_count, 3);

        // Logs unlinked, queue restored, bridge revoked, audit flagged.
        assert_eq!(ctx.logs.unmatched_logs(&ctx.pool).await?.len(), 3);
        let entry = ctx.identity.queue_get(&ctx.pool, &signature).await?.unwrap();
        assert!(entry.count >= 1);
        let bridge = ctx.identity.bridge_by_signature(&ctx.pool, &signature).await?.unwrap();
        assert!(bridge.is_revoked);
        let audit = ctx.identity.audit_by_id(&ctx.pool, &link.audit_id).await?.unwrap();
        assert!(audit.is_undone);
        assert!(audit.undone_at.is_some());

        // A fresh undo audit row exists on top.
        let undo_audits = ctx.service.list_audit(&AuditFilter {
            action_type: Some(VerificationAction::Undo),
            limit: 10,
            ..AuditFilter::default()
        }).await?;
        assert_eq!(undo_audits.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn undo_twice_is_idempotent() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (work_id, _) = seed_catalog_entry(&ctx.pool, "guns n roses", "sweet child o mine").await?;
        let signature = ctx.seed_unmatched("GnR", "Sweet Child", 2).await?;

        let link = ctx.service.link(&signature, &work_id, false).await?;
        ctx.service.undo(&link.audit_id).await?;

        let queue_count_after_first = ctx.identity.queue_get(&ctx.pool, &signature).await?.unwrap().count;

        let second = ctx.service.undo(&link.audit_id).await?;
        assert!(second.was_already_undone);
        assert_eq!(second.restored_count, 0);

        // State is identical to after the first undo.
        let entry = ctx.identity.queue_get(&ctx.pool, &signature).await?.unwrap();
        assert_eq!(entry.count, queue_count_after_first);
        assert_eq!(ctx.logs.unmatched_logs(&ctx.pool).await?.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn undo_catches_logs_matched_after_the_action() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (work_id, _) = seed_catalog_entry(&ctx.pool, "guns n roses", "sweet child o mine").await?;
        let signature = ctx.seed_unmatched("GnR", "Sweet Child", 1).await?;

        let link = ctx.service.link(&signature, &work_id, false).await?;

        // A later ingest matched another copy of the pair through the bridge
        // sweep; it carries the matcher's reason form and its id is not in
        // the original audit.
        let mut conn = ctx.pool.acquire().await?;
        ctx.logs.bulk_insert(&mut conn, &[NewBroadcastLog {
            station_id: ctx.station_id,
            played_at: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap().and_hms_opt(1, 0, 0).unwrap(),
            raw_artist: "GnR".to_string(),
            raw_title: "Sweet Child".to_string(),
            work_id: Some(work_id),
            match_reason: Some(MatchReason::IdentityBridge),
            import_batch_id: None,
        }]).await?;

        let outcome = ctx.service.undo(&link.audit_id).await?;
        assert_eq!(outcome.restored_count, 2);
        assert_eq!(ctx.logs.unmatched_logs(&ctx.pool).await?.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn manual_bridge_rejects_duplicates() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let (_, recording_id) = seed_catalog_entry(&ctx.pool, "guns n roses", "sweet child o mine").await?;

        let (bridge_id, _) = ctx.service.create_bridge("GnR", "Sweet Child", &recording_id).await?;
        assert!(ctx.identity.bridge_by_id(&ctx.pool, &bridge_id).await?.is_some());

        let duplicate = ctx.service.create_bridge("GnR", "Sweet Child", &recording_id).await;
        assert!(matches!(duplicate, Err(VerificationError::BridgeExists)));

        Ok(())
    }
}

use chrono::{NaiveDateTime, Utc};
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::domain::identity::{
    ArtistAlias, DiscoveryQueueEntry, IdentityBridge, ProposedSplit, SplitStatus,
    VerificationAction, VerificationAudit,
};
use super::{IntoUuid, RepositoryError};

#[derive(FromRow)]
struct DbBridge {
    id: Vec<u8>,
    log_signature: String,
    reference_artist: String,
    reference_title: String,
    work_id: Vec<u8>,
    confidence: f64,
    is_revoked: bool
}

impl TryFrom<DbBridge> for IdentityBridge {
    type Error = RepositoryError;
    fn try_from(db_bridge: DbBridge) -> Result<Self, Self::Error> {
        Ok(IdentityBridge {
            id: Uuid::from_slice(&db_bridge.id)?,
            log_signature: db_bridge.log_signature,
            reference_artist: db_bridge.reference_artist,
            reference_title: db_bridge.reference_title,
            work_id: Uuid::from_slice(&db_bridge.work_id)?,
            confidence: db_bridge.confidence,
            is_revoked: db_bridge.is_revoked,
        })
    }
}

#[derive(FromRow)]
struct DbQueueEntry {
    signature: String,
    raw_artist: String,
    raw_title: String,
    count: i64,
    suggested_work_id: Option<Vec<u8>>
}

impl TryFrom<DbQueueEntry> for DiscoveryQueueEntry {
    type Error = RepositoryError;
    fn try_from(db_entry: DbQueueEntry) -> Result<Self, Self::Error> {
        Ok(DiscoveryQueueEntry {
            signature: db_entry.signature,
            raw_artist: db_entry.raw_artist,
            raw_title: db_entry.raw_title,
            count: db_entry.count,
            suggested_work_id: db_entry.suggested_work_id.map(|b| Uuid::from_slice(&b)).transpose()?,
        })
    }
}

#[derive(FromRow)]
struct DbAudit {
    id: Vec<u8>,
    action_type: String,
    signature: String,
    raw_artist: String,
    raw_title: String,
    work_id: Option<Vec<u8>>,
    recording_id: Option<Vec<u8>>,
    log_ids: String,
    bridge_id: Option<Vec<u8>>,
    is_undone: bool,
    undone_at: Option<NaiveDateTime>,
    performed_by: Option<String>,
    created_at: NaiveDateTime
}

impl TryFrom<DbAudit> for VerificationAudit {
    type Error = RepositoryError;
    fn try_from(db_audit: DbAudit) -> Result<Self, Self::Error> {
        let log_ids: Vec<Uuid> = serde_json::from_str(&db_audit.log_ids)?;

        Ok(VerificationAudit {
            id: Uuid::from_slice(&db_audit.id)?,
            action_type: VerificationAction::parse(&db_audit.action_type),
            signature: db_audit.signature,
            raw_artist: db_audit.raw_artist,
            raw_title: db_audit.raw_title,
            work_id: db_audit.work_id.map(|b| Uuid::from_slice(&b)).transpose()?,
            recording_id: db_audit.recording_id.map(|b| Uuid::from_slice(&b)).transpose()?,
            log_ids,
            bridge_id: db_audit.bridge_id.map(|b| Uuid::from_slice(&b)).transpose()?,
            is_undone: db_audit.is_undone,
            undone_at: db_audit.undone_at,
            performed_by: db_audit.performed_by,
            created_at: db_audit.created_at,
        })
    }
}

/// Filters for the audit listing surface.
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub action_type: Option<VerificationAction>,
    pub from_date: Option<NaiveDateTime>,
    pub to_date: Option<NaiveDateTime>,
    pub limit: i64,
    pub offset: i64,
}

pub struct SqliteIdentityRepository;

impl SqliteIdentityRepository {
    pub fn new() -> Self {
        Self {}
    }
}

// ---- Identity bridges -----------------------------------------------------

impl SqliteIdentityRepository {
    /// Any bridge row for the signature, active or revoked. The uniqueness
    /// constraint guarantees at most one.
    pub async fn bridge_by_signature<'e, E>(&self, executor: E, signature: &str) -> Result<Option<IdentityBridge>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let db_bridge = sqlx::query_as::<_, DbBridge>(
            "SELECT id, log_signature, reference_artist, reference_title, work_id, confidence, is_revoked
            FROM identity_bridge WHERE log_signature = ? LIMIT 1;")
            .bind(signature)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_bridge.map(IdentityBridge::try_from).transpose()
    }

    pub async fn bridge_by_id<'e, E, ID>(&self, executor: E, id: ID) -> Result<Option<IdentityBridge>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = id.into_uuid()?;
        let db_bridge = sqlx::query_as::<_, DbBridge>(
            "SELECT id, log_signature, reference_artist, reference_title, work_id, confidence, is_revoked
            FROM identity_bridge WHERE id = ? LIMIT 1;")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_bridge.map(IdentityBridge::try_from).transpose()
    }

    /// Bulk sweep for the matcher: all active bridges among the signatures.
    pub async fn active_bridges_for<'e, E>(&self, executor: E, signatures: &[String]) -> Result<Vec<IdentityBridge>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        if signatures.is_empty() {
            return Ok(Vec::new());
        }

        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, log_signature, reference_artist, reference_title, work_id, confidence, is_revoked
            FROM identity_bridge WHERE is_revoked = 0 AND log_signature IN ("
        );
        let mut separated = qbuilder.separated(", ");
        for signature in signatures {
            separated.push_bind(signature);
        }
        separated.push_unseparated(");");

        let rows = qbuilder.build_query_as::<DbBridge>()
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(IdentityBridge::try_from).collect()
    }

    pub async fn create_bridge<'e, E>(&self, executor: E, bridge: &IdentityBridge) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        sqlx::query(
            "INSERT INTO identity_bridge(id, log_signature, reference_artist, reference_title, work_id, confidence, is_revoked)
            VALUES (?, ?, ?, ?, ?, ?, ?);")
            .bind(bridge.id)
            .bind(&bridge.log_signature)
            .bind(&bridge.reference_artist)
            .bind(&bridge.reference_title)
            .bind(bridge.work_id)
            .bind(bridge.confidence)
            .bind(bridge.is_revoked)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    /// Brings a revoked bridge back to life, retargeted at a (possibly new)
    /// work with fresh reference strings.
    pub async fn revive_bridge<'e, E>(
        &self,
        executor: E,
        bridge_id: &Uuid,
        work_id: &Uuid,
        raw_artist: &str,
        raw_title: &str,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        sqlx::query(
            "UPDATE identity_bridge
            SET is_revoked = 0, work_id = ?, reference_artist = ?, reference_title = ?, updated_at = ?
            WHERE id = ?;")
            .bind(work_id)
            .bind(raw_artist)
            .bind(raw_title)
            .bind(Utc::now().naive_utc())
            .bind(bridge_id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn revoke_bridge<'e, E>(&self, executor: E, bridge_id: &Uuid) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        sqlx::query("UPDATE identity_bridge SET is_revoked = 1, updated_at = ? WHERE id = ?;")
            .bind(Utc::now().naive_utc())
            .bind(bridge_id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }
}

// ---- Discovery queue ------------------------------------------------------

impl SqliteIdentityRepository {
    /// Insert-or-increment for a sighted unmatched signature.
    pub async fn queue_bump(
        &self,
        connection: &mut SqliteConnection,
        signature: &str,
        raw_artist: &str,
        raw_title: &str,
        delta: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO discovery_queue(signature, raw_artist, raw_title, count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(signature) DO UPDATE SET count = count + excluded.count, updated_at = datetime('now');")
            .bind(signature)
            .bind(raw_artist)
            .bind(raw_title)
            .bind(delta)
            .execute(connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    /// Sets a queue row to an observed absolute count (discovery rebuild),
    /// unlike `queue_bump` which accumulates deltas.
    pub async fn queue_replace(
        &self,
        connection: &mut SqliteConnection,
        signature: &str,
        raw_artist: &str,
        raw_title: &str,
        count: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO discovery_queue(signature, raw_artist, raw_title, count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(signature) DO UPDATE SET count = excluded.count, updated_at = datetime('now');")
            .bind(signature)
            .bind(raw_artist)
            .bind(raw_title)
            .bind(count)
            .execute(connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn queue_get<'e, E>(&self, executor: E, signature: &str) -> Result<Option<DiscoveryQueueEntry>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let db_entry = sqlx::query_as::<_, DbQueueEntry>(
            "SELECT signature, raw_artist, raw_title, count, suggested_work_id
            FROM discovery_queue WHERE signature = ? LIMIT 1;")
            .bind(signature)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_entry.map(DiscoveryQueueEntry::try_from).transpose()
    }

    pub async fn queue_delete<'e, E>(&self, executor: E, signature: &str) -> Result<bool, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let result = sqlx::query("DELETE FROM discovery_queue WHERE signature = ?;")
            .bind(signature)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    /// Highest-impact first: the queue is sorted by sighting count.
    pub async fn queue_list<'e, E>(&self, executor: E, limit: i64, offset: i64) -> Result<Vec<DiscoveryQueueEntry>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let rows = sqlx::query_as::<_, DbQueueEntry>(
            "SELECT signature, raw_artist, raw_title, count, suggested_work_id
            FROM discovery_queue ORDER BY count DESC LIMIT ? OFFSET ?;")
            .bind(limit)
            .bind(offset)
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(DiscoveryQueueEntry::try_from).collect()
    }

    pub async fn queue_set_suggestion<'e, E>(&self, executor: E, signature: &str, work_id: Option<&Uuid>) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        sqlx::query("UPDATE discovery_queue SET suggested_work_id = ? WHERE signature = ?;")
            .bind(work_id)
            .bind(signature)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }
}

// ---- Verification audit ---------------------------------------------------

impl SqliteIdentityRepository {
    pub async fn audit_insert<'e, E>(&self, executor: E, audit: &VerificationAudit) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let log_ids_json = serde_json::to_string(&audit.log_ids)?;

        sqlx::query(
            "INSERT INTO verification_audit(id, action_type, signature, raw_artist, raw_title, work_id, recording_id, log_ids, bridge_id, is_undone, undone_at, performed_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);")
            .bind(audit.id)
            .bind(audit.action_type.as_str())
            .bind(&audit.signature)
            .bind(&audit.raw_artist)
            .bind(&audit.raw_title)
            .bind(audit.work_id)
            .bind(audit.recording_id)
            .bind(log_ids_json)
            .bind(audit.bridge_id)
            .bind(audit.is_undone)
            .bind(audit.undone_at)
            .bind(&audit.performed_by)
            .bind(audit.created_at)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn audit_by_id<'e, E, ID>(&self, executor: E, id: ID) -> Result<Option<VerificationAudit>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let id = id.into_uuid()?;
        let db_audit = sqlx::query_as::<_, DbAudit>(
            "SELECT id, action_type, signature, raw_artist, raw_title, work_id, recording_id, log_ids, bridge_id, is_undone, undone_at, performed_by, created_at
            FROM verification_audit WHERE id = ? LIMIT 1;")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_audit.map(VerificationAudit::try_from).transpose()
    }

    pub async fn audit_mark_undone<'e, E>(&self, executor: E, audit_id: &Uuid, undone_at: NaiveDateTime) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        sqlx::query("UPDATE verification_audit SET is_undone = 1, undone_at = ? WHERE id = ?;")
            .bind(undone_at)
            .bind(audit_id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn audit_list<'e, E>(&self, executor: E, filter: &AuditFilter) -> Result<Vec<VerificationAudit>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, action_type, signature, raw_artist, raw_title, work_id, recording_id, log_ids, bridge_id, is_undone, undone_at, performed_by, created_at
            FROM verification_audit WHERE 1 = 1"
        );

        if let Some(artist) = &filter.artist {
            qbuilder.push(" AND raw_artist LIKE ");
            qbuilder.push_bind(format!("%{}%", artist));
        }
        if let Some(title) = &filter.title {
            qbuilder.push(" AND raw_title LIKE ");
            qbuilder.push_bind(format!("%{}%", title));
        }
        if let Some(action) = &filter.action_type {
            qbuilder.push(" AND action_type = ");
            qbuilder.push_bind(action.as_str());
        }
        if let Some(from) = filter.from_date {
            qbuilder.push(" AND created_at >= ");
            qbuilder.push_bind(from);
        }
        if let Some(to) = filter.to_date {
            qbuilder.push(" AND created_at <= ");
            qbuilder.push_bind(to);
        }

        qbuilder.push(" ORDER BY created_at DESC LIMIT ");
        qbuilder.push_bind(if filter.limit > 0 { filter.limit } else { 50 });
        qbuilder.push(" OFFSET ");
        qbuilder.push_bind(filter.offset);
        qbuilder.push(";");

        let rows = qbuilder.build_query_as::<DbAudit>()
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(VerificationAudit::try_from).collect()
    }
}

// ---- Artist aliases and proposed splits -----------------------------------

#[derive(FromRow)]
struct DbAlias {
    id: Vec<u8>,
    raw_name: String,
    resolved_name: Option<String>,
    is_verified: bool,
    is_null: bool
}

impl TryFrom<DbAlias> for ArtistAlias {
    type Error = RepositoryError;
    fn try_from(db_alias: DbAlias) -> Result<Self, Self::Error> {
        Ok(ArtistAlias {
            id: Uuid::from_slice(&db_alias.id)?,
            raw_name: db_alias.raw_name,
            resolved_name: db_alias.resolved_name,
            is_verified: db_alias.is_verified,
            is_null: db_alias.is_null,
        })
    }
}

#[derive(FromRow)]
struct DbSplit {
    id: Vec<u8>,
    raw_artist: String,
    proposed_artists: String,
    status: String,
    confidence: f64
}

impl TryFrom<DbSplit> for ProposedSplit {
    type Error = RepositoryError;
    fn try_from(db_split: DbSplit) -> Result<Self, Self::Error> {
        Ok(ProposedSplit {
            id: Uuid::from_slice(&db_split.id)?,
            raw_artist: db_split.raw_artist,
            proposed_artists: serde_json::from_str(&db_split.proposed_artists)?,
            status: SplitStatus::parse(&db_split.status),
            confidence: db_split.confidence,
        })
    }
}

impl SqliteIdentityRepository {
    /// Case-insensitive bulk alias lookup for a batch of raw names.
    pub async fn aliases_for_names<'e, E>(&self, executor: E, raw_names: &[String]) -> Result<Vec<ArtistAlias>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        if raw_names.is_empty() {
            return Ok(Vec::new());
        }

        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, raw_name, resolved_name, is_verified, is_null
            FROM artist_aliases WHERE lower(raw_name) IN ("
        );
        let mut separated = qbuilder.separated(", ");
        for name in raw_names {
            separated.push_bind(name.to_lowercase());
        }
        separated.push_unseparated(");");

        let rows = qbuilder.build_query_as::<DbAlias>()
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(ArtistAlias::try_from).collect()
    }

    pub async fn upsert_alias(
        &self,
        connection: &mut SqliteConnection,
        raw_name: &str,
        resolved_name: Option<&str>,
        verified: bool,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO artist_aliases(id, raw_name, resolved_name, is_verified, is_null)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT(raw_name) DO UPDATE SET resolved_name = excluded.resolved_name, is_verified = excluded.is_verified;")
            .bind(Uuid::new_v4())
            .bind(raw_name)
            .bind(resolved_name)
            .bind(verified)
            .execute(connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn split_by_raw_artist<'e, E>(&self, executor: E, raw_artist: &str) -> Result<Option<ProposedSplit>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let db_split = sqlx::query_as::<_, DbSplit>(
            "SELECT id, raw_artist, proposed_artists, status, confidence
            FROM proposed_splits WHERE raw_artist = ? LIMIT 1;")
            .bind(raw_artist)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_split.map(ProposedSplit::try_from).transpose()
    }

    pub async fn insert_split<'e, E>(&self, executor: E, split: &ProposedSplit) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let proposed_json = serde_json::to_string(&split.proposed_artists)?;

        sqlx::query(
            "INSERT OR IGNORE INTO proposed_splits(id, raw_artist, proposed_artists, status, confidence)
            VALUES (?, ?, ?, ?, ?);")
            .bind(split.id)
            .bind(&split.raw_artist)
            .bind(proposed_json)
            .bind(split.status.as_str())
            .bind(split.confidence)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn set_split_status<'e, E>(&self, executor: E, split_id: &Uuid, status: SplitStatus) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        sqlx::query("UPDATE proposed_splits SET status = ? WHERE id = ?;")
            .bind(status.as_str())
            .bind(split_id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn pending_splits<'e, E>(&self, executor: E) -> Result<Vec<ProposedSplit>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>
    {
        let rows = sqlx::query_as::<_, DbSplit>(
            "SELECT id, raw_artist, proposed_artists, status, confidence
            FROM proposed_splits WHERE status = 'Pending' ORDER BY created_at DESC;")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(ProposedSplit::try_from).collect()
    }
}

#[cfg(test)]
mod tests {

    use sqlx::SqlitePool;

    use super::*;
    use crate::repository::test_helpers::{prepare_db, TestSetupError};
    use crate::utils::normalizations::generate_signature;

    struct TestContext {
        pool: SqlitePool,
        repo: SqliteIdentityRepository,
    }

    impl TestContext {
        async fn new() -> Result<Self, TestSetupError> {
            Ok(
                Self {
                    pool: prepare_db().await?,
                    repo: SqliteIdentityRepository::new(),
                }
            )
        }

        async fn seed_work(&self) -> Result<Uuid, TestSetupError> {
            let mut conn = self.pool.acquire().await?;
            let artist = crate::repository::SqliteArtistsRepository::new().upsert(&mut conn, "seed artist").await?;
            let work = crate::repository::SqliteWorksRepository::new()
                .upsert(&mut conn, "seed title", artist.id(), 0.85, 500)
                .await?;
            Ok(*work.id())
        }

        fn bridge(&self, raw_artist: &str, raw_title: &str, work_id: Uuid) -> IdentityBridge {
            IdentityBridge::new(
                Uuid::new_v4(),
                generate_signature(raw_artist, raw_title),
                raw_artist.to_string(),
                raw_title.to_string(),
                work_id,
                1.0,
            ).expect("test bridge should validate")
        }
    }

    #[tokio::test]
    async fn bridge_create_revoke_revive() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let work_id = ctx.seed_work().await?;
        let bridge = ctx.bridge("GnR", "Sweet Child", work_id);

        ctx.repo.create_bridge(&ctx.pool, &bridge).await?;

        let active = ctx.repo.active_bridges_for(&ctx.pool, &[bridge.log_signature.clone()]).await?;
        assert_eq!(active.len(), 1);

        ctx.repo.revoke_bridge(&ctx.pool, &bridge.id).await?;
        let active = ctx.repo.active_bridges_for(&ctx.pool, &[bridge.log_signature.clone()]).await?;
        assert!(active.is_empty());

        // Row still exists revoked; revival retargets it.
        let revoked = ctx.repo.bridge_by_signature(&ctx.pool, &bridge.log_signature).await?.unwrap();
        assert!(revoked.is_revoked);

        ctx.repo.revive_bridge(&ctx.pool, &bridge.id, &work_id, "Guns N' Roses", "Sweet Child O' Mine").await?;
        let revived = ctx.repo.bridge_by_signature(&ctx.pool, &bridge.log_signature).await?.unwrap();
        assert!(!revived.is_revoked);
        assert_eq!(revived.reference_artist, "Guns N' Roses");

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_bridge_is_constraint_violation() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let work_id = ctx.seed_work().await?;
        let bridge = ctx.bridge("GnR", "Sweet Child", work_id);

        ctx.repo.create_bridge(&ctx.pool, &bridge).await?;

        let twin = ctx.bridge("GnR", "Sweet Child", work_id);
        let result = ctx.repo.create_bridge(&ctx.pool, &twin).await;
        match result {
            Err(err) => assert!(err.is_constraint_violation()),
            Ok(_) => panic!("Expected unique constraint on log_signature"),
        }

        Ok(())
    }

    #[tokio::test]
    async fn queue_bump_accumulates() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;
        let sig = generate_signature("GnR", "Sweet Child");

        ctx.repo.queue_bump(&mut conn, &sig, "GnR", "Sweet Child", 1).await?;
        ctx.repo.queue_bump(&mut conn, &sig, "GnR", "Sweet Child", 2).await?;

        let entry = ctx.repo.queue_get(&ctx.pool, &sig).await?.unwrap();
        assert_eq!(entry.count, 3);

        assert!(ctx.repo.queue_delete(&ctx.pool, &sig).await?);
        assert!(ctx.repo.queue_get(&ctx.pool, &sig).await?.is_none());
        assert!(!ctx.repo.queue_delete(&ctx.pool, &sig).await?);

        Ok(())
    }

    #[tokio::test]
    async fn queue_list_orders_by_count() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;

        ctx.repo.queue_bump(&mut conn, &generate_signature("a", "one"), "a", "one", 1).await?;
        ctx.repo.queue_bump(&mut conn, &generate_signature("b", "two"), "b", "two", 5).await?;

        let entries = ctx.repo.queue_list(&ctx.pool, 10, 0).await?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].raw_artist, "b");

        Ok(())
    }

    #[tokio::test]
    async fn audit_round_trip_with_log_ids() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let work_id = ctx.seed_work().await?;
        let log_ids = vec![Uuid::new_v4(), Uuid::new_v4()];

        let audit = VerificationAudit {
            id: Uuid::new_v4(),
            action_type: VerificationAction::Link,
            signature: generate_signature("GnR", "Sweet Child"),
            raw_artist: "GnR".to_string(),
            raw_title: "Sweet Child".to_string(),
            work_id: Some(work_id),
            recording_id: None,
            log_ids: log_ids.clone(),
            bridge_id: None,
            is_undone: false,
            undone_at: None,
            performed_by: None,
            created_at: Utc::now().naive_utc(),
        };

        ctx.repo.audit_insert(&ctx.pool, &audit).await?;

        let fetched = ctx.repo.audit_by_id(&ctx.pool, &audit.id).await?.unwrap();
        assert_eq!(fetched.action_type, VerificationAction::Link);
        assert_eq!(fetched.log_ids, log_ids);
        assert!(!fetched.is_undone);

        ctx.repo.audit_mark_undone(&ctx.pool, &audit.id, Utc::now().naive_utc()).await?;
        let fetched = ctx.repo.audit_by_id(&ctx.pool, &audit.id).await?.unwrap();
        assert!(fetched.is_undone);
        assert!(fetched.undone_at.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn audit_list_filters_by_action() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        for (action, artist) in [
            (VerificationAction::Link, "a"),
            (VerificationAction::Dismiss, "b"),
        ] {
            let audit = VerificationAudit {
                id: Uuid::new_v4(),
                action_type: action,
                signature: generate_signature(artist, "t"),
                raw_artist: artist.to_string(),
                raw_title: "t".to_string(),
                work_id: None,
                recording_id: None,
                log_ids: Vec::new(),
                bridge_id: None,
                is_undone: false,
                undone_at: None,
                performed_by: None,
                created_at: Utc::now().naive_utc(),
            };
            ctx.repo.audit_insert(&ctx.pool, &audit).await?;
        }

        let filter = AuditFilter {
            action_type: Some(VerificationAction::Dismiss),
            limit: 10,
            ..AuditFilter::default()
        };
        let audits = ctx.repo.audit_list(&ctx.pool, &filter).await?;
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].raw_artist, "b");

        Ok(())
    }

    #[tokio::test]
    async fn alias_lookup_is_case_insensitive() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let mut conn = ctx.pool.acquire().await?;

        ctx.repo.upsert_alias(&mut conn, "GODSMACK", Some("Godsmack"), true).await?;

        let aliases = ctx.repo.aliases_for_names(&ctx.pool, &["godsmack".to_string()]).await?;
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].resolved_name.as_deref(), Some("Godsmack"));

        Ok(())
    }

    #[tokio::test]
    async fn split_insert_is_idempotent() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        let split = ProposedSplit {
            id: Uuid::new_v4(),
            raw_artist: "Santana/Rob Thomas".to_string(),
            proposed_artists: vec!["Santana".to_string(), "Rob Thomas".to_string()],
            status: SplitStatus::Pending,
            confidence: 0.95,
        };

        ctx.repo.insert_split(&ctx.pool, &split).await?;
        ctx.repo.insert_split(&ctx.pool, &split).await?;

        let pending = ctx.repo.pending_splits(&ctx.pool).await?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].proposed_artists.len(), 2);

        ctx.repo.set_split_status(&ctx.pool, &split.id, SplitStatus::Approved).await?;
        assert!(ctx.repo.pending_splits(&ctx.pool).await?.is_empty());

        Ok(())
    }
}

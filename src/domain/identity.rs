use chrono::NaiveDateTime;

use super::{Uuid, ValidationError};

/// Durable signature → Work mapping, the system's memory. At most one row
/// exists per signature; `is_revoked` soft-deletes it while preserving the
/// row for revival.
#[derive(Clone, Debug)]
pub struct IdentityBridge {
    pub id: Uuid,
    pub log_signature: String,
    pub reference_artist: String,
    pub reference_title: String,
    pub work_id: Uuid,
    pub confidence: f64,
    pub is_revoked: bool,
}

impl IdentityBridge {
    pub fn new(
        id: Uuid,
        log_signature: String,
        reference_artist: String,
        reference_title: String,
        work_id: Uuid,
        confidence: f64,
    ) -> Result<Self, ValidationError> {
        if log_signature.len() != 32 || !log_signature.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::MalformedSignature(log_signature));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(confidence));
        }

        Ok(Self {
            id,
            log_signature,
            reference_artist,
            reference_title,
            work_id,
            confidence,
            is_revoked: false,
        })
    }
}

/// Aggregated counter of signatures seen in logs but never identified; the
/// operator inbox. Mutually exclusive with an active bridge per signature.
#[derive(Clone, Debug)]
pub struct DiscoveryQueueEntry {
    pub signature: String,
    pub raw_artist: String,
    pub raw_title: String,
    pub count: i64,
    pub suggested_work_id: Option<Uuid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationAction {
    Link,
    Promote,
    Dismiss,
    ManualBridge,
    BulkLink,
    BulkPromote,
    Undo,
}

impl VerificationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationAction::Link => "link",
            VerificationAction::Promote => "promote",
            VerificationAction::Dismiss => "dismiss",
            VerificationAction::ManualBridge => "manual_bridge",
            VerificationAction::BulkLink => "bulk_link",
            VerificationAction::BulkPromote => "bulk_promote",
            VerificationAction::Undo => "undo",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "promote" => VerificationAction::Promote,
            "dismiss" => VerificationAction::Dismiss,
            "manual_bridge" => VerificationAction::ManualBridge,
            "bulk_link" => VerificationAction::BulkLink,
            "bulk_promote" => VerificationAction::BulkPromote,
            "undo" => VerificationAction::Undo,
            _ => VerificationAction::Link,
        }
    }
}

/// Append-only record of an operator action; the unit of undo. `is_undone`
/// flips at most once.
#[derive(Clone, Debug)]
pub struct VerificationAudit {
    pub id: Uuid,
    pub action_type: VerificationAction,
    pub signature: String,
    pub raw_artist: String,
    pub raw_title: String,
    pub work_id: Option<Uuid>,
    pub recording_id: Option<Uuid>,
    pub log_ids: Vec<Uuid>,
    pub bridge_id: Option<Uuid>,
    pub is_undone: bool,
    pub undone_at: Option<NaiveDateTime>,
    pub performed_by: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitStatus {
    Pending,
    Approved,
    Rejected,
}

impl SplitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitStatus::Pending => "Pending",
            SplitStatus::Approved => "Approved",
            SplitStatus::Rejected => "Rejected",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "Approved" => SplitStatus::Approved,
            "Rejected" => SplitStatus::Rejected,
            _ => SplitStatus::Pending,
        }
    }
}

/// An ambiguous collaboration string ("A/B" with no album artist) waiting
/// for a human to approve or reject the proposed split.
#[derive(Clone, Debug)]
pub struct ProposedSplit {
    pub id: Uuid,
    pub raw_artist: String,
    pub proposed_artists: Vec<String>,
    pub status: SplitStatus,
    pub confidence: f64,
}

/// Canonical-form mapping applied to raw artist strings before matching.
/// `is_null` caches a confirmed miss so the heuristics stop retrying it.
#[derive(Clone, Debug)]
pub struct ArtistAlias {
    pub id: Uuid,
    pub raw_name: String,
    pub resolved_name: Option<String>,
    pub is_verified: bool,
    pub is_null: bool,
}

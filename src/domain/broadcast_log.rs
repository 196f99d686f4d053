use std::fmt;

use chrono::NaiveDateTime;

use super::Uuid;

/// Closed vocabulary for how a log line got its work link. The Display forms
/// are load-bearing: they are what lands in the `match_reason` column and
/// what historical rows are pattern-matched against, so they never change.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchReason {
    /// An active identity bridge answered for the signature.
    IdentityBridge,
    /// Normalized (artist, title) matched a recording row exactly in SQL.
    ExactDb,
    /// A vector candidate compared equal after cleaning.
    ExactText,
    HighConfidence { artist_pct: u8, title_pct: u8, vector: f64 },
    VectorStrong { similarity: f64 },
    TitleVector { confidence: f64 },
    ReviewCandidate { artist_pct: u8, title_pct: u8 },
    /// Written by the verification Link action.
    VerifiedLink,
    /// Written by the verification Promote action.
    UserVerified,
    NoMatch,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchReason::IdentityBridge => write!(f, "Identity Bridge (Exact Match)"),
            MatchReason::ExactDb => write!(f, "Exact DB Match"),
            MatchReason::ExactText => write!(f, "Exact Text Match (Cleaned)"),
            MatchReason::HighConfidence { artist_pct, title_pct, vector } => write!(
                f,
                "High Confidence Match (Artist: {}%, Title: {}%, Vector: {:.2})",
                artist_pct, title_pct, vector
            ),
            MatchReason::VectorStrong { similarity } => {
                write!(f, "Vector Similarity (Very High: {:.2})", similarity)
            }
            MatchReason::TitleVector { confidence } => {
                write!(f, "Title Match + Vector (Confidence: {:.2})", confidence)
            }
            MatchReason::ReviewCandidate { artist_pct, title_pct } => write!(
                f,
                "Review Candidate (Artist: {}%, Title: {}%)",
                artist_pct, title_pct
            ),
            MatchReason::VerifiedLink => write!(f, "identity_bridge"),
            MatchReason::UserVerified => write!(f, "user_verified"),
            MatchReason::NoMatch => write!(f, "No Match Found"),
        }
    }
}

/// Reads the value between `after` and `until` out of a stored reason
/// string, e.g. the "92" of "(Artist: 92%, ...)".
fn parse_field<T: std::str::FromStr>(value: &str, after: &str, until: char) -> Option<T> {
    let start = value.find(after)? + after.len();
    let rest = &value[start..];
    let end = rest.find(until)?;
    rest[..end].trim().parse().ok()
}

impl MatchReason {
    /// Prefix-based, total parse of a stored reason string. Numeric payloads
    /// are recovered from the string itself, so a fetched row re-displays
    /// with the values it was stored with; a malformed number falls back to
    /// zero instead of failing the row.
    pub fn parse(value: &str) -> Self {
        if value == "identity_bridge" {
            return MatchReason::VerifiedLink;
        }
        if value == "user_verified" {
            return MatchReason::UserVerified;
        }
        if value.starts_with("Identity Bridge") {
            return MatchReason::IdentityBridge;
        }
        if value.starts_with("Exact DB") {
            return MatchReason::ExactDb;
        }
        if value.starts_with("Exact Text") {
            return MatchReason::ExactText;
        }
        if value.starts_with("High Confidence") {
            return MatchReason::HighConfidence {
                artist_pct: parse_field(value, "Artist: ", '%').unwrap_or(0),
                title_pct: parse_field(value, "Title: ", '%').unwrap_or(0),
                vector: parse_field(value, "Vector: ", ')').unwrap_or(0.0),
            };
        }
        if value.starts_with("Vector Similarity") {
            return MatchReason::VectorStrong {
                similarity: parse_field(value, "Very High: ", ')').unwrap_or(0.0),
            };
        }
        if value.starts_with("Title Match + Vector") {
            return MatchReason::TitleVector {
                confidence: parse_field(value, "Confidence: ", ')').unwrap_or(0.0),
            };
        }
        if value.starts_with("Review Candidate") {
            return MatchReason::ReviewCandidate {
                artist_pct: parse_field(value, "Artist: ", '%').unwrap_or(0),
                title_pct: parse_field(value, "Title: ", '%').unwrap_or(0),
            };
        }

        MatchReason::NoMatch
    }

    pub fn is_review(&self) -> bool {
        matches!(self, MatchReason::ReviewCandidate { .. })
    }

    pub fn is_bridge(&self) -> bool {
        matches!(self, MatchReason::IdentityBridge | MatchReason::VerifiedLink)
    }
}

/// How confident the matcher is: auto-linked, flagged for an operator, or
/// left unmatched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchClass {
    Auto,
    Review,
    Reject,
}

/// A single play event from a station log. `work_id` is None until the
/// matcher or an operator links it.
#[derive(Clone, Debug)]
pub struct BroadcastLog {
    pub id: Uuid,
    pub station_id: Uuid,
    pub played_at: NaiveDateTime,
    pub raw_artist: String,
    pub raw_title: String,
    pub work_id: Option<Uuid>,
    pub match_reason: Option<MatchReason>,
    pub import_batch_id: Option<Uuid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "Pending",
            ImportStatus::Processing => "Processing",
            ImportStatus::Completed => "Completed",
            ImportStatus::Failed => "Failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "Processing" => ImportStatus::Processing,
            "Completed" => ImportStatus::Completed,
            "Failed" => ImportStatus::Failed,
            _ => ImportStatus::Pending,
        }
    }
}

/// Tracks one bulk CSV ingestion job.
#[derive(Clone, Debug)]
pub struct ImportBatch {
    pub id: Uuid,
    pub filename: String,
    pub status: ImportStatus,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub error_log: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strings_are_stable() {
        assert_eq!(MatchReason::IdentityBridge.to_string(), "Identity Bridge (Exact Match)");
        assert_eq!(MatchReason::ExactDb.to_string(), "Exact DB Match");
        assert_eq!(MatchReason::ExactText.to_string(), "Exact Text Match (Cleaned)");
        assert_eq!(MatchReason::NoMatch.to_string(), "No Match Found");
        assert_eq!(MatchReason::VerifiedLink.to_string(), "identity_bridge");
        assert_eq!(
            MatchReason::HighConfidence { artist_pct: 92, title_pct: 88, vector: 0.91 }.to_string(),
            "High Confidence Match (Artist: 92%, Title: 88%, Vector: 0.91)"
        );
        assert_eq!(
            MatchReason::VectorStrong { similarity: 0.97 }.to_string(),
            "Vector Similarity (Very High: 0.97)"
        );
        assert_eq!(
            MatchReason::TitleVector { confidence: 0.81 }.to_string(),
            "Title Match + Vector (Confidence: 0.81)"
        );
    }

    #[test]
    fn review_reason_is_like_matchable() {
        // The re-evaluator selects flagged logs with LIKE '%Review%'.
        let reason = MatchReason::ReviewCandidate { artist_pct: 75, title_pct: 72 };
        assert!(reason.to_string().contains("Review"));
        assert!(reason.is_review());
    }

    #[test]
    fn parse_round_trips_variants() {
        for reason in [
            MatchReason::IdentityBridge,
            MatchReason::ExactDb,
            MatchReason::ExactText,
            MatchReason::VerifiedLink,
            MatchReason::UserVerified,
            MatchReason::NoMatch,
            MatchReason::HighConfidence { artist_pct: 92, title_pct: 88, vector: 0.91 },
            MatchReason::VectorStrong { similarity: 0.97 },
            MatchReason::TitleVector { confidence: 0.81 },
            MatchReason::ReviewCandidate { artist_pct: 75, title_pct: 72 },
        ] {
            assert_eq!(MatchReason::parse(&reason.to_string()), reason);
        }
    }

    #[test]
    fn parse_zeroes_malformed_payloads_only() {
        assert_eq!(
            MatchReason::parse("High Confidence Match (Artist: ?, Title: 88%, Vector: 0.91)"),
            MatchReason::HighConfidence { artist_pct: 0, title_pct: 88, vector: 0.91 }
        );
        assert_eq!(
            MatchReason::parse("Vector Similarity (Very High: )"),
            MatchReason::VectorStrong { similarity: 0.0 }
        );
    }
}

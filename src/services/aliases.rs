use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::identity::{ProposedSplit, SplitStatus};
use crate::repository::{RepositoryError, SqliteIdentityRepository};
use crate::utils::normalizations::strip_accents;

// Split patterns tried in order; the generic slash comes last so "w/" and
// "f/" get their specific handling first.
static SPLIT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\s+w/\s*").unwrap(),
        Regex::new(r"(?i)\s+f/\s*").unwrap(),
        Regex::new(r"(?i)\s+(?:feat|ft|featuring|with|and|&)\.?\s+").unwrap(),
        Regex::new(r"\s*/\s*").unwrap(),
    ]
});

static DEBRIS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:feat|ft|featuring|with)\b\.?\s*|\s+(?:feat|ft|featuring|with)\b\.?\s*$|^\s*(?:w/|f/)\s+|\s+(?:w/|f/)\s*$").unwrap()
});

const KNOWN_EXCEPTIONS: &[&str] = &["AC/DC", "P!nk", "Panic! At The Disco"];

const CONFIDENCE_HIGH: f64 = 0.95;
const CONFIDENCE_MEDIUM: f64 = 0.7;

/// Clean-first artist identity resolution: verified aliases win, then
/// heuristic collaboration splitting (parked as ProposedSplit rows for a
/// human), then Title-Case cleanup as a last resort.
pub struct ArtistAliasResolver {
    pool: SqlitePool,
    identity: SqliteIdentityRepository,
}

impl ArtistAliasResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            identity: SqliteIdentityRepository::new(),
        }
    }

    /// Maps every raw name in the batch to its resolved form. Unresolvable
    /// names come back cleaned but otherwise unchanged.
    pub async fn resolve_batch(&self, raw_names: &[String]) -> Result<HashMap<String, String>, RepositoryError> {
        let mut results = HashMap::new();
        if raw_names.is_empty() {
            return Ok(results);
        }

        let mut unique_names: Vec<String> = Vec::new();
        for name in raw_names {
            if !unique_names.contains(name) {
                unique_names.push(name.clone());
            }
        }

        // 1. Verified alias map, case-insensitive. An is_null row is a
        // cached miss: keep the raw name and stop re-deriving it.
        let aliases = self.identity.aliases_for_names(&self.pool, &unique_names).await?;
        let mut alias_map: HashMap<String, String> = HashMap::new();
        for alias in aliases {
            let key = alias.raw_name.to_lowercase();
            if alias.is_null {
                alias_map.insert(key, alias.raw_name);
            } else if let Some(resolved) = alias.resolved_name {
                alias_map.insert(key, resolved);
            }
        }

        let mut unresolved = Vec::new();
        for name in unique_names {
            match alias_map.get(&name.to_lowercase()) {
                Some(resolved) => {
                    results.insert(name, resolved.clone());
                }
                None => unresolved.push(name),
            }
        }

        // 2. Heuristic splitting for the rest.
        for name in unresolved {
            match detect_split(&name) {
                Some(parts) => {
                    self.register_proposed_split(&name, &parts).await?;
                    // The joined form helps the matcher find already-clean
                    // rows while the proposal waits for review.
                    results.insert(name, parts.join("; "));
                }
                None => {
                    let cleaned = clean_artist_name(&name);
                    results.insert(name, cleaned);
                }
            }
        }

        Ok(results)
    }

    /// Operator approval: the raw string resolves to the "; "-joined parts
    /// from now on.
    pub async fn approve_split(&self, split_id: &Uuid) -> Result<String, RepositoryError> {
        let split = self.require_split(split_id).await?;
        let resolved = split.proposed_artists.join("; ");

        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from_sqlx_error)?;
        self.identity.set_split_status(&mut *conn, split_id, SplitStatus::Approved).await?;
        self.identity.upsert_alias(&mut conn, &split.raw_artist, Some(&resolved), true).await?;

        Ok(resolved)
    }

    /// Operator rejection: self-alias the raw string so the heuristic never
    /// proposes this split again.
    pub async fn reject_split(&self, split_id: &Uuid) -> Result<(), RepositoryError> {
        let split = self.require_split(split_id).await?;

        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from_sqlx_error)?;
        self.identity.set_split_status(&mut *conn, split_id, SplitStatus::Rejected).await?;
        self.identity.upsert_alias(&mut conn, &split.raw_artist, Some(&split.raw_artist), true).await?;

        Ok(())
    }

    pub async fn add_alias(&self, raw_name: &str, resolved_name: &str) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from_sqlx_error)?;
        self.identity.upsert_alias(&mut conn, raw_name, Some(resolved_name), true).await
    }

    async fn require_split(&self, split_id: &Uuid) -> Result<ProposedSplit, RepositoryError> {
        let pending = self.identity.pending_splits(&self.pool).await?;
        pending.into_iter()
            .find(|split| &split.id == split_id)
            .ok_or(RepositoryError::IdNotFound(*split_id))
    }

    async fn register_proposed_split(&self, raw_name: &str, parts: &[String]) -> Result<(), RepositoryError> {
        if self.identity.split_by_raw_artist(&self.pool, raw_name).await?.is_some() {
            return Ok(());
        }

        let markers = ["/", "feat", "ft", "w/", "with", "featuring"];
        let lowered = raw_name.to_lowercase();
        let confidence = if markers.iter().any(|m| lowered.contains(m)) {
            CONFIDENCE_HIGH
        } else {
            CONFIDENCE_MEDIUM
        };

        let split = ProposedSplit {
            id: Uuid::new_v4(),
            raw_artist: raw_name.to_string(),
            proposed_artists: parts.to_vec(),
            status: SplitStatus::Pending,
            confidence,
        };
        self.identity.insert_split(&self.pool, &split).await?;
        log::info!("Registered heuristic split for '{}': {:?}", raw_name, parts);

        Ok(())
    }
}

/// Detects multi-artist strings. Known single entities with slashes or
/// bangs ("AC/DC") never split.
pub fn detect_split(name: &str) -> Option<Vec<String>> {
    if KNOWN_EXCEPTIONS.iter().any(|e| e.eq_ignore_ascii_case(name.trim())) {
        return None;
    }

    for pattern in SPLIT_PATTERNS.iter() {
        let parts: Vec<&str> = pattern.split(name).filter(|p| !p.trim().is_empty()).collect();
        if parts.len() > 1 {
            let cleaned: Vec<String> = parts.iter().map(|p| clean_artist_name(p)).collect();

            let mut distinct = cleaned.clone();
            distinct.sort();
            distinct.dedup();
            if distinct.len() > 1 {
                return Some(cleaned);
            }
        }
    }

    None
}

/// Display-grade cleanup: accents stripped, feature debris removed from the
/// edges, Title Case with short all-caps acronyms preserved.
pub fn clean_artist_name(name: &str) -> String {
    let name = strip_accents(name);
    let name = DEBRIS_PATTERN.replace_all(&name, "");
    let name = name.trim();

    if name.is_empty() {
        return String::new();
    }

    name.split_whitespace()
        .map(|word| {
            let keep_upper = word.chars().all(|c| !c.is_lowercase())
                && word.len() <= 4
                && !matches!(word.to_lowercase().as_str(), "and" | "the" | "with" | "feat");
            if keep_upper {
                word.to_string()
            } else {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

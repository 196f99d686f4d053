use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dimensionality of the fixed embedding model. Changing the model (or its
/// dimensionality) invalidates every stored vector; the index refuses to load
/// a file written under a different model tag.
pub const EMBEDDING_DIM: usize = 384;

// Bind-variable style chunking for batch queries, mirrored from the SQL side.
const SEARCH_CHUNK: usize = 500;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, thiserror::Error)]
pub enum VectorIndexError {
    #[error("I/O error on vector index storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vector index file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Vector index was built with model '{found}' but this binary embeds with '{expected}'. Rebuild the index.")]
    ModelMismatch { found: String, expected: String },
}

/// The embedding model seam. The matcher only ever sees cosine distances, so
/// any deterministic text → unit-vector function slots in here; swapping it
/// is a rebuild event, never a silent change.
pub trait Embedder: Send + Sync {
    fn model_tag(&self) -> &'static str;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Character-trigram feature hashing into a fixed 384-dim space, L2
/// normalized. Deterministic across processes and platforms.
pub struct HashingEmbedder;

impl HashingEmbedder {
    pub fn new() -> Self {
        Self {}
    }

    fn fnv1a(bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in bytes {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

impl Embedder for HashingEmbedder {
    fn model_tag(&self) -> &'static str {
        "char-trigram-hash-384-v1"
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; EMBEDDING_DIM];

        let padded: Vec<char> = format!(" {} ", text.to_lowercase()).chars().collect();
        if padded.len() >= 3 {
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                let hash = Self::fnv1a(trigram.as_bytes());
                let bucket = (hash % EMBEDDING_DIM as u64) as usize;
                // Sign bit decorrelates colliding trigrams.
                let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign;
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }

        vector
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    model_tag: String,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    id: Uuid,
    vector: Vec<f32>,
}

/// Persistent cosine-distance index over "artist - title" strings.
///
/// Writes go through the RwLock's writer side, so concurrent adds serialize;
/// searches share the read side. The catalog scale this system targets keeps
/// brute-force scans comfortably fast, and the contract (upsert, batched
/// search, cosine distance) leaves room to swap the internals later.
pub struct VectorIndex {
    dir: PathBuf,
    embedder: Box<dyn Embedder>,
    entries: RwLock<HashMap<Uuid, Vec<f32>>>,
    queries: AtomicU64,
    writes: AtomicU64,
}

impl VectorIndex {
    /// Opens (or initializes) the index directory, loading any persisted
    /// vectors written under the same model tag.
    pub fn open<P: AsRef<Path>>(dir: P, embedder: Box<dyn Embedder>) -> Result<Self, VectorIndexError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        let mut entries = HashMap::new();

        if index_path.exists() {
            let raw = fs::read_to_string(&index_path)?;
            let persisted: PersistedIndex = serde_json::from_str(&raw)?;

            if persisted.model_tag != embedder.model_tag() {
                return Err(VectorIndexError::ModelMismatch {
                    found: persisted.model_tag,
                    expected: embedder.model_tag().to_string(),
                });
            }

            for entry in persisted.entries {
                entries.insert(entry.id, entry.vector);
            }
            log::info!("Loaded vector index: {} entries from {:?}", entries.len(), index_path);
        }

        Ok(Self {
            dir,
            embedder,
            entries: RwLock::new(entries),
            queries: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    fn document(artist: &str, title: &str) -> String {
        format!("{} - {}", artist, title)
    }

    /// Upserts a batch of (recording_id, clean_artist, clean_title). When a
    /// batch repeats an id the last occurrence wins.
    pub fn add(&self, tracks: &[(Uuid, String, String)]) {
        if tracks.is_empty() {
            return;
        }

        let mut deduped: HashMap<Uuid, &(Uuid, String, String)> = HashMap::new();
        for track in tracks {
            deduped.insert(track.0, track);
        }

        let mut embedded = Vec::with_capacity(deduped.len());
        for (id, (_, artist, title)) in deduped {
            embedded.push((id, self.embedder.embed(&Self::document(artist, title))));
        }

        let mut entries = self.entries.write().expect("vector index lock poisoned");
        for (id, vector) in embedded {
            entries.insert(id, vector);
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_one(&self, recording_id: Uuid, artist: &str, title: &str) {
        self.add(&[(recording_id, artist.to_string(), title.to_string())]);
    }

    /// Batched nearest-neighbor search. Output preserves input order; an
    /// empty inner vec means no results for that query. Distance is cosine
    /// distance (0.0 identical, 2.0 opposite).
    pub fn search_batch(&self, queries: &[(String, String)], limit: usize) -> Vec<Vec<(Uuid, f64)>> {
        if queries.is_empty() {
            return Vec::new();
        }

        let mut all_matches = Vec::with_capacity(queries.len());

        for chunk in queries.chunks(SEARCH_CHUNK) {
            let entries = self.entries.read().expect("vector index lock poisoned");

            for (artist, title) in chunk {
                self.queries.fetch_add(1, Ordering::Relaxed);
                let query_vector = self.embedder.embed(&Self::document(artist, title));

                let mut scored: Vec<(Uuid, f64)> = entries.iter()
                    .map(|(id, vector)| {
                        let dot: f32 = query_vector.iter().zip(vector.iter()).map(|(a, b)| a * b).sum();
                        (*id, (1.0 - dot as f64).max(0.0))
                    })
                    .collect();

                scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(limit);
                all_matches.push(scored);
            }
        }

        all_matches
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("vector index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total single-query searches served; the matcher tests lean on this to
    /// prove the bridge short-circuit never touches the index.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Writes the index file atomically (tmp file + rename).
    pub fn persist(&self) -> Result<(), VectorIndexError> {
        let entries = self.entries.read().expect("vector index lock poisoned");

        let persisted = PersistedIndex {
            model_tag: self.embedder.model_tag().to_string(),
            entries: entries.iter()
                .map(|(id, vector)| PersistedEntry { id: *id, vector: vector.clone() })
                .collect(),
        };

        let tmp_path = self.dir.join(format!("{}.tmp", INDEX_FILE));
        fs::write(&tmp_path, serde_json::to_string(&persisted)?)?;
        fs::rename(&tmp_path, self.dir.join(INDEX_FILE))?;

        log::debug!("Persisted vector index: {} entries", persisted.entries.len());
        Ok(())
    }

    /// Drops every vector, for a full reindex.
    pub fn clear(&self) {
        self.entries.write().expect("vector index lock poisoned").clear();
    }
}

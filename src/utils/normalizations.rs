use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use md5::{Digest, Md5};
use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::domain::recording::VersionType;

// Every matching decision in the system pivots on the functions in this module.
// Changing clean()/clean_artist() changes generate_signature() and therefore
// orphans every stored bridge and queue entry, so treat any edit here as a
// re-signing event.

static REMASTER_PAREN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\(\[][^\)\]]*remaster[^\)\]]*[\)\]]").unwrap()
});

static REMASTER_DASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*-\s*remaster(?:ed)?\s?\d*").unwrap()
});

static YEAR_BRACKETS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\(\[]\s*\d{4}(?:\s+\w+)?\s*[\)\]]").unwrap()
});

static TRUNCATION_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\(\[]\s*\.{3}\s*[\)\]]|\u{2026}|\.{3,}$").unwrap()
});

// Discrete-word feature markers followed by actual content. "Little Feat" and
// "Feature Artist" must survive, "Song ft.Someone" must not.
static FEATURE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:featuring|feat|ft)\b\.?\s*\S.*$").unwrap()
});

static TRAILING_COLLAB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+duet\b.*$|\s+(?:vs|versus)\.?\s+\S.*$|\s+with\s+\S.*$").unwrap()
});

static LEADING_ARTICLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:the|a|an)\s+").unwrap()
});

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static ARTIST_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+feat\.?\s+|\s+ft\.?\s+|\s+featuring\s+|\s+with\s+|\s+&\s+|\s+/\s+|,\s+|\s+and\s+|\s+duet\s+|\s+vs\.?\s+").unwrap()
});

// Artist strings that contain separator characters but are single entities.
const SPLIT_EXCEPTIONS: &[&str] = &["ac/dc", "p!nk", "panic! at the disco"];

/// NFKD-decompose and drop combining marks, so "Beyoncé" compares as "Beyonce".
pub fn strip_accents(text: &str) -> String {
    text.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

pub fn remove_remaster_tags(text: &str) -> String {
    let text = REMASTER_PAREN.replace_all(text, "");
    REMASTER_DASH.replace_all(&text, "").into_owned()
}

/// Drops "(2018)" / "[1999 Remaster]" style brackets. "(Live)" stays.
pub fn remove_year_brackets(text: &str) -> String {
    YEAR_BRACKETS.replace_all(text, "").trim_end().to_string()
}

pub fn remove_truncation_markers(text: &str) -> String {
    TRUNCATION_MARKERS.replace_all(text, "").trim_end().to_string()
}

/// Basic cleaning for titles and general text.
///
/// Lowercases, strips accents, drops remaster/year/truncation debris, strips
/// a trailing "feat./ft./featuring X" suffix (discrete-word markers only),
/// folds `&`/`+` into "and" and `/` into a space, then removes the remaining
/// punctuation and collapses whitespace.
pub fn clean(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }

    let text = strip_accents(text).to_lowercase();
    let text = remove_remaster_tags(text.trim());
    let text = remove_year_brackets(&text);
    let text = remove_truncation_markers(&text);
    let text = FEATURE_SUFFIX.replace(&text, "");

    let text = text.replace('&', "and").replace('+', "and").replace('/', " ");
    let text = NON_WORD.replace_all(&text, "");

    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Aggressive artist-name normalization for matching.
///
/// Everything clean() does, plus leading English articles ("The Beatles" →
/// "beatles") and trailing collaboration markers ("2pac duet" → "2pac",
/// "Artist vs Other" → "artist"). Commas inside numerals survive as digits:
/// "10,000 Maniacs" → "10000 maniacs".
pub fn clean_artist(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }

    let text = strip_accents(text).to_lowercase();
    let text = remove_remaster_tags(text.trim());
    let text = remove_year_brackets(&text);
    let text = remove_truncation_markers(&text);
    let text = LEADING_ARTICLE.replace(text.trim(), "");
    let text = FEATURE_SUFFIX.replace(&text, "");
    let text = TRAILING_COLLAB.replace(&text, "");

    let text = text.replace('&', "and").replace('+', "and").replace('/', " ");
    let text = NON_WORD.replace_all(&text, "");

    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Splits a collaboration string into individual normalized artist names,
/// deduplicated in order. Known single entities (AC/DC, P!nk, ...) are
/// returned unsplit.
pub fn split_artists(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    if SPLIT_EXCEPTIONS.contains(&text.trim().to_lowercase().as_str()) {
        let cleaned = clean_artist(text);
        return if cleaned.is_empty() { Vec::new() } else { vec![cleaned] };
    }

    let lowered = text.to_lowercase();
    let piped = ARTIST_SEPARATORS.replace_all(&lowered, "|");

    let mut seen = Vec::new();
    for part in piped.split('|') {
        let cleaned = clean_artist(part);
        if !cleaned.is_empty() && !seen.contains(&cleaned) {
            seen.push(cleaned);
        }
    }

    seen
}

static VERSION_BRACKETS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\(\[]([^\)\]]+)[\)\]]").unwrap()
});

static VERSION_DASH_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+-\s+(\w[\w\s]*?)\s*(?:version|edit|mix)?\s*$").unwrap()
});

static PART_IN_BRACKETS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:part|pt)\.?\s*\d+$").unwrap()
});

static EMPTY_BRACKETS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*[\(\[]\s*[\)\]]").unwrap()
});

fn classify_version_text(text: &str) -> Option<VersionType> {
    let lower = text.to_lowercase();

    // Bare year brackets carry the year as the tag.
    if let Ok(year) = lower.trim().parse::<u16>() {
        if (1000..=2999).contains(&year) {
            return Some(VersionType::Year(year));
        }
    }

    let keyword_map: &[(&str, VersionType)] = &[
        ("remaster", VersionType::Remastered),
        ("instrumental", VersionType::Instrumental),
        ("unplugged", VersionType::Unplugged),
        ("acoustic", VersionType::Acoustic),
        ("radio", VersionType::Radio),
        ("video", VersionType::Video),
        ("live", VersionType::Live),
        ("deluxe", VersionType::Deluxe),
        ("bonus", VersionType::Bonus),
        ("demo", VersionType::Demo),
        ("cover", VersionType::Cover),
        ("clean", VersionType::Clean),
        ("explicit", VersionType::Explicit),
        ("remix", VersionType::Remix),
        ("dub", VersionType::Remix),
        ("mix", VersionType::Remix),
        ("edit", VersionType::Remix),
        ("original", VersionType::Original),
        ("alt", VersionType::Original),
    ];

    for (keyword, version) in keyword_map {
        if lower.split_whitespace().any(|w| w == *keyword || w.starts_with(keyword)) {
            return Some(version.clone());
        }
    }

    None
}

/// Parses a title for a version descriptor.
///
/// Returns the title with the matched span removed and the canonical tag;
/// `Original` when nothing matched. Part numbers ("(Pt. 2)") and "The ..."
/// subtitles are never treated as versions, they distinguish Works.
pub fn extract_version_type(title: &str) -> (String, VersionType) {
    if title.trim().is_empty() {
        return (String::new(), VersionType::Original);
    }

    let mut detected: Option<VersionType> = None;
    let mut stripped = title.to_string();

    for caps in VERSION_BRACKETS.captures_iter(title) {
        let inner = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let inner_lower = inner.to_lowercase();

        if PART_IN_BRACKETS.is_match(inner) {
            continue;
        }
        // "The Ballad" style subtitles stay, unless the phrase is itself a
        // mix descriptor ("the video mix").
        if inner_lower.starts_with("the ")
            && !inner_lower.ends_with("mix")
            && !inner_lower.ends_with("edit")
            && !inner_lower.ends_with("version")
        {
            continue;
        }

        let Some(version) = classify_version_text(inner) else {
            continue;
        };

        if detected.is_none() {
            detected = Some(version);
        }
        stripped = stripped.replace(caps.get(0).unwrap().as_str(), "");
    }

    // Dash-separated suffix form: "Song - Live Version", "Song - Radio Edit".
    if detected.is_none() {
        let current = stripped.clone();
        if let Some(caps) = VERSION_DASH_SUFFIX.captures(&current) {
            if let Some(version) = classify_version_text(caps.get(0).unwrap().as_str()) {
                detected = Some(version);
                stripped = current.replace(caps.get(0).unwrap().as_str(), "");
            }
        }
    }

    match detected {
        Some(version) => {
            let cleaned = EMPTY_BRACKETS.replace_all(&stripped, "");
            let cleaned = WHITESPACE.replace_all(cleaned.trim(), " ");
            (cleaned.into_owned(), version)
        }
        None => (title.trim().to_string(), VersionType::Original),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartKind {
    Part,
    Movement,
    Number,
    Roman,
}

impl PartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartKind::Part => "part",
            PartKind::Movement => "movement",
            PartKind::Number => "number",
            PartKind::Roman => "roman",
        }
    }
}

static PART_ARABIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:part|pt)\.?\s*(\d+)\b").unwrap()
});

static MOVEMENT_ARABIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:movement|mvt|mov)\.?\s*(\d+)\b").unwrap()
});

static NUMBER_ARABIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:no|number)\.?\s*(\d+)\b").unwrap()
});

static ROMAN_MULTI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ii|iii|iv|v|vi|vii|viii|ix|x)\b").unwrap()
});

static ROMAN_SINGLE_I: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s\b(i)\s*$").unwrap()
});

fn roman_value(token: &str) -> Option<u32> {
    match token.to_lowercase().as_str() {
        "i" => Some(1),
        "ii" => Some(2),
        "iii" => Some(3),
        "iv" => Some(4),
        "v" => Some(5),
        "vi" => Some(6),
        "vii" => Some(7),
        "viii" => Some(8),
        "ix" => Some(9),
        "x" => Some(10),
        _ => None,
    }
}

/// Recognizes multi-part work markers: "Part N", "Pt. N", "Movement N",
/// "No. N", roman numerals II-X anywhere, and a lone "I" only as the last
/// word of a multi-word title (so "I Want to Hold Your Hand" never matches).
pub fn extract_part_number(title: &str) -> Option<(PartKind, u32)> {
    if let Some(caps) = PART_ARABIC.captures(title) {
        return caps[1].parse().ok().map(|n| (PartKind::Part, n));
    }
    if let Some(caps) = MOVEMENT_ARABIC.captures(title) {
        return caps[1].parse().ok().map(|n| (PartKind::Movement, n));
    }
    if let Some(caps) = NUMBER_ARABIC.captures(title) {
        return caps[1].parse().ok().map(|n| (PartKind::Number, n));
    }
    if let Some(caps) = ROMAN_MULTI.captures(title) {
        return roman_value(&caps[1]).map(|n| (PartKind::Roman, n));
    }
    if ROMAN_SINGLE_I.is_match(title) {
        return Some((PartKind::Roman, 1));
    }

    None
}

/// Asymmetric part comparison: one title carrying a part marker the other
/// lacks means two distinct Works, as do differing kinds or numbers.
pub fn parts_differ(title_a: &str, title_b: &str) -> bool {
    match (extract_part_number(title_a), extract_part_number(title_b)) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    }
}

/// The stable identity of a raw log line: MD5 hex over
/// `clean_artist(artist) | clean(title)`.
pub fn generate_signature(raw_artist: &str, raw_title: &str) -> String {
    let payload = format!("{}|{}", clean_artist(raw_artist), clean(raw_title));
    let digest = Md5::digest(payload.as_bytes());
    format!("{:x}", digest)
}

/// Content PID used only for move detection. With real metadata it is
/// `md5(artist|title)` over the already-normalized pair; placeholder metadata
/// falls back to the file name (returned as both primary and fallback).
pub fn content_pid(clean_artist_name: &str, clean_title: &str, file_name: &str) -> (String, Option<String>) {
    let no_metadata = clean_artist_name.eq_ignore_ascii_case("unknown artist")
        && (clean_title.eq_ignore_ascii_case("untitled")
            || clean_title.eq_ignore_ascii_case("unknown title"));

    if no_metadata {
        return (file_name.to_string(), Some(file_name.to_string()));
    }

    let payload = format!("{}|{}", clean_artist_name.trim(), clean_title.trim());
    let digest = Md5::digest(payload.as_bytes());
    (format!("{:x}", digest), None)
}

/// Library paths are stored with forward slashes regardless of platform.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.to_string_lossy().replace('\\', "/").into()
}

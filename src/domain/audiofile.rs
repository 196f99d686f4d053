use std::ffi::OsStr;

use lofty::{file::{AudioFile, TaggedFile, TaggedFileExt}, tag::{Accessor, ItemKey}};

use super::{Serialize, Deserialize};

#[derive(Clone, Debug, PartialEq, Hash, Serialize, Deserialize)]
pub enum AudioFileType {
    Flac,
    Mp3,
    M4a,
    Wav,
    Ogg,
    Unknown
}

impl AudioFileType {

    pub fn from_extension_str(extension: &str) -> Self {
        match extension {
            "flac" => AudioFileType::Flac,
            "mp3" => AudioFileType::Mp3,
            "m4a" => AudioFileType::M4a,
            "wav" => AudioFileType::Wav,
            "ogg" => AudioFileType::Ogg,
            _other => AudioFileType::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFileType::Flac => "flac",
            AudioFileType::Mp3 => "mp3",
            AudioFileType::M4a => "m4a",
            AudioFileType::Wav => "wav",
            AudioFileType::Ogg => "ogg",
            AudioFileType::Unknown => "unknown"
        }
    }

    pub fn is_supported_extension(extension: &OsStr) -> bool {
        let ext_str = extension.to_string_lossy().to_lowercase();

        matches!(ext_str.as_str(), "flac" | "mp3" | "m4a" | "wav" | "ogg")
    }
}

/// Raw tag values straight out of the file. Empty strings mean the tag was
/// missing; the scanner applies the filename fallback afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AudioFileMetadata {
    pub artist_name: String,
    pub album_artist: String,
    pub track_name: String,
    pub album_title: String,
    pub isrc: Option<String>,
    pub release_year: Option<u32>,
    pub duration_secs: Option<f64>,
    pub bitrate: Option<u32>
}

impl AudioFileMetadata {
    pub fn extract_or_default(tagged_result: Result<TaggedFile, lofty::error::LoftyError>) -> Self {
        match tagged_result {
            Ok(tagged) => Self::from_tagged(&tagged),
            Err(err) => {
                log::warn!("Could not read tags, using default metadata. Reason: {}", err);
                Self::default()
            }
        }
    }

    pub fn from_tagged(tagged_file: &TaggedFile) -> Self {
        let properties = tagged_file.properties();
        let duration_secs = Some(properties.duration().as_secs_f64()).filter(|d| *d > 0.0);
        let bitrate = properties.audio_bitrate();

        let Some(lofty_tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            return Self {
                duration_secs,
                bitrate,
                ..Self::default()
            };
        };

        Self {
            artist_name: lofty_tag.artist().map(|s| s.to_string()).unwrap_or_default(),
            album_artist: lofty_tag
                .get_string(&ItemKey::AlbumArtist)
                .map(|s| s.to_string())
                .unwrap_or_default(),
            track_name: lofty_tag.title().map(|s| s.to_string()).unwrap_or_default(),
            album_title: lofty_tag.album().map(|s| s.to_string()).unwrap_or_default(),
            isrc: lofty_tag.get_string(&ItemKey::Isrc).map(|s| s.to_string()),
            release_year: lofty_tag.year(),
            duration_secs,
            bitrate,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.artist_name.trim().is_empty() && self.track_name.trim().is_empty()
    }
}

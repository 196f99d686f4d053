use std::fmt;

use super::{Serialize, Deserialize, Uuid, ValidationError};

/// Canonical version descriptor extracted from a title. Stored as text; the
/// parse side is total so unknown stored values fall back to Original.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum VersionType {
    Original,
    Live,
    Remix,
    Acoustic,
    Radio,
    Remastered,
    Deluxe,
    Bonus,
    Demo,
    Instrumental,
    Unplugged,
    Cover,
    Clean,
    Explicit,
    Video,
    Virtual,
    Year(u16),
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionType::Original => write!(f, "Original"),
            VersionType::Live => write!(f, "Live"),
            VersionType::Remix => write!(f, "Remix"),
            VersionType::Acoustic => write!(f, "Acoustic"),
            VersionType::Radio => write!(f, "Radio"),
            VersionType::Remastered => write!(f, "Remastered"),
            VersionType::Deluxe => write!(f, "Deluxe"),
            VersionType::Bonus => write!(f, "Bonus"),
            VersionType::Demo => write!(f, "Demo"),
            VersionType::Instrumental => write!(f, "Instrumental"),
            VersionType::Unplugged => write!(f, "Unplugged"),
            VersionType::Cover => write!(f, "Cover"),
            VersionType::Clean => write!(f, "Clean"),
            VersionType::Explicit => write!(f, "Explicit"),
            VersionType::Video => write!(f, "Video"),
            VersionType::Virtual => write!(f, "Virtual"),
            VersionType::Year(year) => write!(f, "{}", year),
        }
    }
}

impl VersionType {
    pub fn parse(value: &str) -> Self {
        if let Ok(year) = value.parse::<u16>() {
            if (1000..=2999).contains(&year) {
                return VersionType::Year(year);
            }
        }

        match value {
            "Live" => VersionType::Live,
            "Remix" => VersionType::Remix,
            "Acoustic" => VersionType::Acoustic,
            "Radio" => VersionType::Radio,
            "Remastered" => VersionType::Remastered,
            "Deluxe" => VersionType::Deluxe,
            "Bonus" => VersionType::Bonus,
            "Demo" => VersionType::Demo,
            "Instrumental" => VersionType::Instrumental,
            "Unplugged" => VersionType::Unplugged,
            "Cover" => VersionType::Cover,
            "Clean" => VersionType::Clean,
            "Explicit" => VersionType::Explicit,
            "Video" => VersionType::Video,
            "Virtual" => VersionType::Virtual,
            _ => VersionType::Original,
        }
    }
}

/// A concrete rendition of a Work. `is_verified` means an operator promoted
/// it through the verification surface.
#[derive(Clone, Debug)]
pub struct Recording {
    id: Uuid,
    work_id: Uuid,
    title: String,
    version_type: VersionType,
    duration: Option<f64>,
    isrc: Option<String>,
    is_verified: bool
}

impl AsRef<Recording> for Recording {
    fn as_ref(&self) -> &Recording {
        self
    }
}

impl Recording {

    pub fn new<S>(id: Uuid, work_id: Uuid, title: S, version_type: VersionType) -> Result<Self, ValidationError>
    where S: Into<String>
    {
        let title = title.into().trim().to_string();
        if title.is_empty() { return Err(ValidationError::TitleIsEmptyString); }

        Ok(
            Self {
                id,
                work_id,
                title,
                version_type,
                duration: None,
                isrc: None,
                is_verified: false
            }
        )
    }

    pub fn from_stored(
        id: Uuid,
        work_id: Uuid,
        title: String,
        version_type: VersionType,
        duration: Option<f64>,
        isrc: Option<String>,
        is_verified: bool,
    ) -> Self {
        Self { id, work_id, title, version_type, duration, isrc, is_verified }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn work_id(&self) -> &Uuid {
        &self.work_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn version_type(&self) -> &VersionType {
        &self.version_type
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn isrc(&self) -> Option<&str> {
        self.isrc.as_deref()
    }

    pub fn is_verified(&self) -> bool {
        self.is_verified
    }

    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_isrc(mut self, isrc: Option<String>) -> Self {
        self.isrc = isrc;
        self
    }

    pub fn mark_verified(&mut self) {
        self.is_verified = true;
    }
}

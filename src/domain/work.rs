use super::{Uuid, ValidationError};
use crate::utils::normalizations::clean;

/// The abstract composition ("Wonderwall"), the unit everything resolves to.
/// Uniqueness is per primary artist: the same title under two artists is two
/// distinct Works. Part markers ("Symphony Part 1") stay in the title.
#[derive(Clone, Debug)]
pub struct Work {
    id: Uuid,
    title: String,
    primary_artist_id: Option<Uuid>,
    is_instrumental: bool
}

impl AsRef<Work> for Work {
    fn as_ref(&self) -> &Work {
        self
    }
}

impl PartialEq for Work {
    fn eq(&self, other: &Self) -> bool {
        self.title() == other.title() && self.primary_artist_id() == other.primary_artist_id()
    }
}

impl Eq for Work {}

impl Work {

    pub fn new<S>(id: Uuid, title: S, primary_artist_id: Option<Uuid>) -> Result<Self, ValidationError>
    where S: Into<String>
    {
        let norm_title = clean(&title.into());
        if norm_title.is_empty() { return Err(ValidationError::TitleIsEmptyString); }

        Ok(
            Self {
                id,
                title: norm_title,
                primary_artist_id,
                is_instrumental: false
            }
        )
    }

    pub fn from_stored(id: Uuid, title: String, primary_artist_id: Option<Uuid>, is_instrumental: bool) -> Self {
        Self { id, title, primary_artist_id, is_instrumental }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn primary_artist_id(&self) -> Option<&Uuid> {
        self.primary_artist_id.as_ref()
    }

    pub fn is_instrumental(&self) -> bool {
        self.is_instrumental
    }
}

/// Role of an artist on a work. Works with collaborators carry one Primary
/// row and any number of Featured rows in the bridge table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtistRole {
    Primary,
    Featured,
}

impl ArtistRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtistRole::Primary => "Primary",
            ArtistRole::Featured => "Featured",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "Primary" => ArtistRole::Primary,
            _ => ArtistRole::Featured,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkArtist {
    pub work_id: Uuid,
    pub artist_id: Uuid,
    pub role: ArtistRole,
}

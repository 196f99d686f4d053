use super::{Uuid, ValidationError};
use crate::utils::normalizations::clean_artist;

/// A musical creator. The stored name is always the normalized form, so
/// equality on name is equality of identity.
#[derive(Clone, Debug)]
pub struct Artist {
    id: Uuid,
    name: String,
    musicbrainz_id: Option<String>
}

impl AsRef<Artist> for Artist {
    fn as_ref(&self) -> &Artist {
        self
    }
}

impl PartialEq for Artist {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Artist {}

impl Artist {

    pub fn new<S>(id: Uuid, name: S) -> Result<Self, ValidationError>
    where S: Into<String>
    {
        let norm_name = clean_artist(&name.into());
        if norm_name.is_empty() { return Err(ValidationError::NameIsEmptyString); }

        Ok(
            Self { id, name: norm_name, musicbrainz_id: None }
        )
    }

    /// Rehydration from storage: the name is trusted to be normalized already.
    pub fn from_stored(id: Uuid, name: String, musicbrainz_id: Option<String>) -> Self {
        Self { id, name, musicbrainz_id }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn musicbrainz_id(&self) -> Option<&str> {
        self.musicbrainz_id.as_deref()
    }

    pub fn set_musicbrainz_id(&mut self, mbid: Option<String>) {
        self.musicbrainz_id = mbid;
    }
}

use super::{Uuid, ValidationError};

/// A broadcasting station. Callsigns are uppercased so log ingestion is
/// case-insensitive; `format_code` feeds the recording resolver's
/// format-preference rung.
#[derive(Clone, Debug)]
pub struct Station {
    id: Uuid,
    callsign: String,
    format_code: Option<String>
}

impl AsRef<Station> for Station {
    fn as_ref(&self) -> &Station {
        self
    }
}

impl PartialEq for Station {
    fn eq(&self, other: &Self) -> bool {
        self.callsign() == other.callsign()
    }
}

impl Eq for Station {}

impl Station {

    pub fn new<S>(id: Uuid, callsign: S) -> Result<Self, ValidationError>
    where S: Into<String>
    {
        let callsign = callsign.into().trim().to_uppercase();
        if callsign.is_empty() { return Err(ValidationError::CallsignIsEmptyString); }

        Ok(
            Self { id, callsign, format_code: None }
        )
    }

    pub fn from_stored(id: Uuid, callsign: String, format_code: Option<String>) -> Self {
        Self { id, callsign, format_code }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn format_code(&self) -> Option<&str> {
        self.format_code.as_deref()
    }

    pub fn set_format_code(&mut self, code: Option<String>) {
        self.format_code = code;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callsign_is_uppercased() {
        let station = Station::new(Uuid::new_v4(), " kexp ").unwrap();
        assert_eq!(station.callsign(), "KEXP");
    }

    #[test]
    fn empty_callsign_rejected() {
        assert!(Station::new(Uuid::new_v4(), "  ").is_err());
    }
}

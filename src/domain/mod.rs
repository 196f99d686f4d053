pub mod artist;
pub mod work;
pub mod recording;
pub mod library_file;
pub mod station;
pub mod broadcast_log;
pub mod identity;
pub mod policy;
pub mod audiofile;

use serde::{Serialize, Deserialize};
use thiserror;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Name field cannot be an empty string.")]
    NameIsEmptyString,

    #[error("Title field cannot be an empty string.")]
    TitleIsEmptyString,

    #[error("Callsign cannot be an empty string.")]
    CallsignIsEmptyString,

    #[error("Path cannot be an empty string.")]
    PathIsEmptyString,

    #[error("Signature must be a 32 character hex string, got '{0}'.")]
    MalformedSignature(String),

    #[error("Confidence must be within [0, 1], got {0}.")]
    ConfidenceOutOfRange(f64),
}

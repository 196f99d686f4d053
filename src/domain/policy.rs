use super::Uuid;

/// Station-scoped choice of which Recording plays for a Work. Lowest
/// priority value wins among available candidates.
#[derive(Clone, Debug)]
pub struct StationPreference {
    pub id: Uuid,
    pub station_id: Uuid,
    pub work_id: Uuid,
    pub preferred_recording_id: Uuid,
    pub priority: i64,
}

/// Format-scoped choice ("AC", "CHR", ...) used when no station preference
/// resolves. `exclude_tags` lists version tags the format never plays.
#[derive(Clone, Debug)]
pub struct FormatPreference {
    pub id: Uuid,
    pub format_code: String,
    pub work_id: Uuid,
    pub preferred_recording_id: Uuid,
    pub priority: i64,
    pub exclude_tags: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct WorkDefaultRecording {
    pub work_id: Uuid,
    pub default_recording_id: Uuid,
}

/// Shot identifiers come from the storyboard and are unique within it.
pub type ShotId = u32;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

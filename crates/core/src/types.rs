/// UTC timestamp used across all entities.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

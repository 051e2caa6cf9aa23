/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Job and job-run identifiers are opaque strings (UUIDv7 in practice).
pub type JobId = String;

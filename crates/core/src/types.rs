/// All relational primary keys (projects, flows, versions, files) are BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Flow runs are addressed by opaque UUIDs so workers never guess neighbours.
pub type RunId = uuid::Uuid;

/// Queue entries are addressed by opaque UUIDs, independent from run ids.
pub type JobId = uuid::Uuid;

/// Identifier issued by the external queue when a request is accepted.
pub type RequestId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

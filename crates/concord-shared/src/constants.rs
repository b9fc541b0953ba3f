/// Sort-index increment used when a system message is appended without a
/// server timestamp ("10 milliseconds").
pub const DEFAULT_SYSTEM_MESSAGE_SPACING: f64 = 0.01;

/// Default retention for deferred remote requests, in days.
pub const DEFAULT_DEFERRED_RETENTION_DAYS: i64 = 30;

/// Application name
pub const APP_NAME: &str = "Concord";

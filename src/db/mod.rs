//! Database module - SQLite with sqlx

mod pool;
mod dispatches;
mod trips;
mod repository;

pub use pool::*;
pub use dispatches::*;
pub use trips::*;
pub use repository::*;

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

/// Plant-local timestamps are stored without offset
const LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn format_local(at: &NaiveDateTime) -> String {
    at.format(LOCAL_FORMAT).to_string()
}

fn parse_local(s: &str) -> Result<NaiveDateTime, RepositoryError> {
    NaiveDateTime::parse_from_str(s, LOCAL_FORMAT)
        .or_else(|_| s.parse::<NaiveDateTime>())
        .map_err(|e| RepositoryError::Corrupt(format!("bad local timestamp {:?}: {}", s, e)))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Corrupt(format!("bad timestamp {:?}: {}", s, e)))
}

fn parse_optional_timestamp(s: &Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.as_deref().map(parse_timestamp).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Corrupt(format!("bad id {:?}: {}", s, e)))
}

fn parse_optional_uuid(s: &Option<String>) -> Result<Option<Uuid>, RepositoryError> {
    s.as_deref().map(parse_uuid).transpose()
}

fn parse_field<T>(s: &str) -> Result<T, RepositoryError>
where
    T: std::str::FromStr<Err = String>,
{
    s.parse().map_err(RepositoryError::Corrupt)
}

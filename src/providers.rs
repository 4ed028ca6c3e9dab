//! Trait seams consumed from the outside: database drivers, the key-value
//! cache, and the metadata/role sources. The engine never talks to a wire
//! protocol itself; everything physical arrives through these objects.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::model::{MetadataConfig, Role};

/// A result row as reported by a driver: column key to unconstrained value.
/// Decimal columns may arrive numeric or string; timestamps as ISO strings,
/// epoch numbers, or anything else the driver emits.
pub type Row = Map<String, Value>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by an executor. Drivers that can classify timeouts
/// natively should set `timeout` (and `timeout_ms` when known); otherwise
/// the engine falls back to sniffing the message text.
#[derive(Debug)]
pub struct ExecuteFailure {
    pub message: String,
    pub timeout: bool,
    pub timeout_ms: Option<u64>,
    pub cause: Option<BoxError>,
}

impl ExecuteFailure {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
            timeout_ms: None,
            cause: None,
        }
    }

    pub fn with_cause(message: impl Into<String>, cause: BoxError) -> Self {
        Self {
            message: message.into(),
            timeout: false,
            timeout_ms: None,
            cause: Some(cause),
        }
    }

    pub fn timeout(message: impl Into<String>, timeout_ms: Option<u64>) -> Self {
        Self {
            message: message.into(),
            timeout: true,
            timeout_ms,
            cause: None,
        }
    }

    /// Structured classification first; message sniffing as the fallback for
    /// drivers that only surface text (`timeout`, `statement_timeout`,
    /// `max_execution_time` cover the row-store, columnar, and federation
    /// engines' phrasing).
    pub fn is_timeout(&self) -> bool {
        if self.timeout || self.timeout_ms.is_some() {
            return true;
        }
        let msg = self.message.to_lowercase();
        msg.contains("timeout")
            || msg.contains("statement_timeout")
            || msg.contains("max_execution_time")
    }
}

impl fmt::Display for ExecuteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExecuteFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as _)
    }
}

/// A physical database driver: submit parameterized SQL, get rows back.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Identifier of the database this executor serves.
    fn id(&self) -> &str;

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ExecuteFailure>;

    async fn ping(&self) -> Result<(), BoxError>;

    async fn close(&self) -> Result<(), BoxError>;
}

/// A key-value cache holding pre-materialized rows in logical-name form.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Batch lookup. Every requested key must be present in the returned
    /// map; a `None` value marks a miss.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Option<Row>>, BoxError>;

    async fn ping(&self) -> Result<(), BoxError>;

    async fn close(&self) -> Result<(), BoxError>;
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn load(&self) -> Result<MetadataConfig, BoxError>;
}

#[async_trait]
pub trait RoleProvider: Send + Sync {
    async fn load(&self) -> Result<Vec<Role>, BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_timeout_wins_over_message() {
        let f = ExecuteFailure::timeout("canceled", Some(30_000));
        assert!(f.is_timeout());
        let f = ExecuteFailure::timeout("canceled", None);
        assert!(f.is_timeout());
    }

    #[test]
    fn message_sniff_fallback() {
        assert!(ExecuteFailure::error("ERROR: canceling statement due to statement_timeout")
            .is_timeout());
        assert!(ExecuteFailure::error(
            "Code: 159. DB::Exception: Timeout exceeded: max_execution_time"
        )
        .is_timeout());
        assert!(ExecuteFailure::error("query exceeded maximum Timeout").is_timeout());
        assert!(!ExecuteFailure::error("relation \"users\" does not exist").is_timeout());
    }

    #[test]
    fn failure_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let f = ExecuteFailure::with_cause("driver failed", Box::new(io));
        let src = std::error::Error::source(&f).unwrap();
        assert_eq!(src.to_string(), "pipe closed");
    }
}

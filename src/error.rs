//! Closed error taxonomy for the query engine.
//!
//! Every error kind carries a machine-readable code, a human message, and a
//! JSON-serializable detail payload. Config and validation errors aggregate
//! every detected problem before raising; the others are single-shot.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::model::Dialect;

/// Top-level error type returned by the engine surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl EngineError {
    /// Serialize the full error, nested causes included, to a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            EngineError::Config(e) => e.to_value(),
            EngineError::Validation(e) => e.to_value(),
            EngineError::Planner(e) => e.to_value(),
            EngineError::Execution(e) => e.to_value(),
            EngineError::Connection(e) => e.to_value(),
            EngineError::Provider(e) => e.to_value(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config errors (metadata load/validate)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigErrorCode {
    InvalidApiName,
    DuplicateApiName,
    InvalidReference,
    InvalidRelation,
    InvalidSync,
    InvalidCache,
}

/// One problem found while validating metadata. All problems in a load are
/// collected into a single [`ConfigError`].
#[derive(Debug, Clone, Serialize)]
pub struct ConfigIssue {
    pub code: ConfigErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl ConfigIssue {
    pub fn new(code: ConfigErrorCode, message: impl Into<String>, detail: Value) -> Self {
        Self {
            code,
            message: message.into(),
            detail,
        }
    }
}

#[derive(Debug, Error)]
#[error("config failed: {} error(s)", .issues.len())]
pub struct ConfigError {
    pub issues: Vec<ConfigIssue>,
}

impl ConfigError {
    pub fn new(issues: Vec<ConfigIssue>) -> Self {
        Self { issues }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "kind": "ConfigError",
            "message": self.to_string(),
            "errors": self.issues,
        })
    }
}

// ---------------------------------------------------------------------------
// Validation errors (query definition)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationErrorCode {
    UnknownTable,
    UnknownColumn,
    UnknownRole,
    AccessDenied,
    InvalidFilter,
    InvalidValue,
    InvalidJoin,
    InvalidGroupBy,
    InvalidHaving,
    InvalidOrderBy,
    InvalidByIds,
    InvalidLimit,
    InvalidExists,
    InvalidAggregation,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub code: ValidationErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl ValidationIssue {
    pub fn new(code: ValidationErrorCode, message: impl Into<String>, detail: Value) -> Self {
        Self {
            code,
            message: message.into(),
            detail,
        }
    }
}

#[derive(Debug, Error)]
#[error("validation failed: {} error(s)", .issues.len())]
pub struct ValidationError {
    /// The `from` table of the offending definition, as submitted.
    pub from_table: String,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(from_table: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Self {
            from_table: from_table.into(),
            issues,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "kind": "ValidationError",
            "message": self.to_string(),
            "fromTable": self.from_table,
            "errors": self.issues,
        })
    }
}

// ---------------------------------------------------------------------------
// Planner errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlannerErrorCode {
    UnreachableTables,
    FederationDisabled,
    NoCatalog,
    FreshnessUnmet,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct PlannerError {
    pub code: PlannerErrorCode,
    pub message: String,
    pub detail: Value,
}

impl PlannerError {
    pub fn new(code: PlannerErrorCode, message: impl Into<String>, detail: Value) -> Self {
        Self {
            code,
            message: message.into(),
            detail,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "kind": "PlannerError",
            "code": self.code,
            "message": self.message,
            "detail": self.detail,
        })
    }
}

// ---------------------------------------------------------------------------
// Execution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionErrorCode {
    ExecutorMissing,
    CacheProviderMissing,
    QueryFailed,
    QueryTimeout,
}

/// The statement the engine was running when a backend failed. Attached to
/// `QUERY_FAILED` / `QUERY_TIMEOUT` so callers can reproduce the failure.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAttempt {
    pub sql: String,
    pub params: Vec<Value>,
    pub database: String,
    pub dialect: Dialect,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub code: ExecutionErrorCode,
    pub message: String,
    pub attempt: Option<QueryAttempt>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ExecutionError {
    pub fn executor_missing(database: &str) -> Self {
        Self {
            code: ExecutionErrorCode::ExecutorMissing,
            message: format!("no executor registered for database '{database}'"),
            attempt: None,
            cause: None,
        }
    }

    /// Queries after `close()` fail deterministically.
    pub fn engine_closed() -> Self {
        Self {
            code: ExecutionErrorCode::ExecutorMissing,
            message: "engine is closed".to_string(),
            attempt: None,
            cause: None,
        }
    }

    pub fn cache_provider_missing(cache: &str) -> Self {
        Self {
            code: ExecutionErrorCode::CacheProviderMissing,
            message: format!("no cache provider registered for cache '{cache}'"),
            attempt: None,
            cause: None,
        }
    }

    /// A broken cache provider is fatal; there is no degraded mode.
    pub fn cache_failed(cache: &str, cause: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self {
            code: ExecutionErrorCode::QueryFailed,
            message: format!("cache '{cache}' lookup failed: {cause}"),
            attempt: None,
            cause: Some(cause),
        }
    }

    pub fn query_failed(
        attempt: QueryAttempt,
        cause: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            code: ExecutionErrorCode::QueryFailed,
            message: format!("query failed on database '{}': {cause}", attempt.database),
            attempt: Some(attempt),
            cause: Some(cause),
        }
    }

    pub fn query_timeout(
        attempt: QueryAttempt,
        cause: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            code: ExecutionErrorCode::QueryTimeout,
            message: format!("query timed out on database '{}'", attempt.database),
            attempt: Some(attempt),
            cause: Some(cause),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "kind": "ExecutionError",
            "code": self.code,
            "message": self.message,
            "attempt": self.attempt,
            "cause": self.cause.as_ref().map(serialize_cause),
        })
    }
}

// ---------------------------------------------------------------------------
// Connection errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionErrorCode {
    ConnectionFailed,
    RequestTimeout,
    NetworkError,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConnectionError {
    pub code: ConnectionErrorCode,
    pub message: String,
    /// Provider ids that could not be reached (or closed cleanly).
    pub unreachable: Vec<String>,
}

impl ConnectionError {
    pub fn new(
        code: ConnectionErrorCode,
        message: impl Into<String>,
        unreachable: Vec<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            unreachable,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "kind": "ConnectionError",
            "code": self.code,
            "message": self.message,
            "unreachable": self.unreachable,
        })
    }
}

// ---------------------------------------------------------------------------
// Provider errors (metadata / role sources)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderErrorCode {
    MetadataLoadFailed,
    RoleLoadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Metadata,
    Role,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub provider: ProviderKind,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn metadata(cause: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self {
            code: ProviderErrorCode::MetadataLoadFailed,
            provider: ProviderKind::Metadata,
            message: format!("metadata load failed: {cause}"),
            cause: Some(cause),
        }
    }

    pub fn role(cause: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self {
            code: ProviderErrorCode::RoleLoadFailed,
            provider: ProviderKind::Role,
            message: format!("role load failed: {cause}"),
            cause: Some(cause),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "kind": "ProviderError",
            "code": self.code,
            "provider": self.provider,
            "message": self.message,
            "cause": self.cause.as_ref().map(serialize_cause),
        })
    }
}

/// Walk the source chain of a boxed cause into nested JSON objects.
fn serialize_cause(err: &Box<dyn std::error::Error + Send + Sync>) -> Value {
    fn walk(err: &(dyn std::error::Error + 'static)) -> Value {
        match err.source() {
            Some(src) => json!({ "message": err.to_string(), "cause": walk(src) }),
            None => json!({ "message": err.to_string() }),
        }
    }
    walk(err.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_counts_issues() {
        let err = ConfigError::new(vec![
            ConfigIssue::new(ConfigErrorCode::InvalidApiName, "bad name", Value::Null),
            ConfigIssue::new(ConfigErrorCode::InvalidSync, "bad sync", Value::Null),
        ]);
        assert_eq!(err.to_string(), "config failed: 2 error(s)");
    }

    #[test]
    fn validation_error_serializes_from_table() {
        let err = ValidationError::new(
            "orders",
            vec![ValidationIssue::new(
                ValidationErrorCode::UnknownColumn,
                "column 'nope' does not exist on 'orders'",
                json!({ "table": "orders", "column": "nope" }),
            )],
        );
        let v = err.to_value();
        assert_eq!(v["fromTable"], "orders");
        assert_eq!(v["errors"][0]["code"], "UNKNOWN_COLUMN");
        assert_eq!(v["errors"][0]["detail"]["column"], "nope");
    }

    #[test]
    fn codes_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_value(PlannerErrorCode::FreshnessUnmet).unwrap(),
            "FRESHNESS_UNMET"
        );
        assert_eq!(
            serde_json::to_value(ExecutionErrorCode::ExecutorMissing).unwrap(),
            "EXECUTOR_MISSING"
        );
        assert_eq!(
            serde_json::to_value(ConfigErrorCode::DuplicateApiName).unwrap(),
            "DUPLICATE_API_NAME"
        );
    }

    #[test]
    fn execution_error_cause_chain_serializes_recursively() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket reset");
        let attempt = QueryAttempt {
            sql: "SELECT 1".into(),
            params: vec![],
            database: "warehouse".into(),
            dialect: Dialect::RowStore,
        };
        let err = ExecutionError::query_failed(attempt, Box::new(io));
        let v = err.to_value();
        assert_eq!(v["code"], "QUERY_FAILED");
        assert_eq!(v["attempt"]["database"], "warehouse");
        assert_eq!(v["cause"]["message"], "socket reset");
    }

    #[test]
    fn provider_error_names_provider() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "s3 object missing");
        let err = ProviderError::metadata(Box::new(inner));
        assert_eq!(err.code, ProviderErrorCode::MetadataLoadFailed);
        let v = err.to_value();
        assert_eq!(v["provider"], "metadata");
    }
}

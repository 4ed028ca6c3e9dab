//! Lifecycle, failure classification, and health-check behavior.

mod common;

use std::sync::Arc;

use common::*;
use crossdb::error::{ConnectionErrorCode, EngineError, ExecutionErrorCode};
use crossdb::model::QueryDefinition;
use crossdb::{Engine, EngineConfig, EngineOptions};
use serde_json::{json, Value};

fn def(v: Value) -> QueryDefinition {
    serde_json::from_value(v).unwrap()
}

fn orders_query() -> QueryDefinition {
    def(json!({ "from": "orders", "columns": ["id"] }))
}

#[tokio::test]
async fn backend_timeout_is_classified() {
    let setup = engine_with(
        MockExecutor::new(
            "main",
            vec![Scripted::Fail {
                message: "canceling statement due to statement_timeout".into(),
                timeout: false,
            }],
        ),
        MockExecutor::new("analytics", vec![]),
        MockExecutor::new("fed", vec![]),
        MockCache::new("kv", vec![]),
        EngineOptions::default(),
    )
    .await;

    let err = setup.engine.query(&orders_query(), &admin()).await.unwrap_err();
    match err {
        EngineError::Execution(e) => {
            assert_eq!(e.code, ExecutionErrorCode::QueryTimeout);
            let attempt = e.attempt.expect("attempt attached");
            assert_eq!(attempt.database, "main");
            assert!(attempt.sql.starts_with("SELECT"), "sql was: {}", attempt.sql);
        }
        other => panic!("expected execution error, got {other:?}"),
    }
}

#[tokio::test]
async fn backend_failure_attaches_sql_and_params() {
    let setup = engine_with(
        MockExecutor::new(
            "main",
            vec![Scripted::Fail {
                message: "relation \"public.orders\" does not exist".into(),
                timeout: false,
            }],
        ),
        MockExecutor::new("analytics", vec![]),
        MockExecutor::new("fed", vec![]),
        MockCache::new("kv", vec![]),
        EngineOptions::default(),
    )
    .await;

    let err = setup
        .engine
        .query(
            &def(json!({
                "from": "orders", "columns": ["id"],
                "filters": [{ "column": "status", "operator": "=", "value": "x" }]
            })),
            &admin(),
        )
        .await
        .unwrap_err();

    match err {
        EngineError::Execution(e) => {
            assert_eq!(e.code, ExecutionErrorCode::QueryFailed);
            let serialized = e.to_value();
            let attempt = e.attempt.expect("attempt attached");
            assert_eq!(attempt.params, vec![json!("x")]);
            assert_eq!(serialized["code"], "QUERY_FAILED");
            assert!(serialized["cause"]["message"]
                .as_str()
                .unwrap()
                .contains("does not exist"));
        }
        other => panic!("expected execution error, got {other:?}"),
    }
}

#[tokio::test]
async fn broken_cache_is_fatal() {
    let setup = engine_with(
        MockExecutor::new("main", vec![]),
        MockExecutor::new("analytics", vec![]),
        MockExecutor::new("fed", vec![]),
        MockCache::broken("kv"),
        EngineOptions::default(),
    )
    .await;

    let err = setup
        .engine
        .query(
            &def(json!({
                "from": "users", "columns": ["id", "name"], "byIds": [USER_1]
            })),
            &admin(),
        )
        .await
        .unwrap_err();

    match err {
        EngineError::Execution(e) => {
            assert_eq!(e.code, ExecutionErrorCode::QueryFailed);
            assert!(e.message.contains("kv"), "error was: {e}");
        }
        other => panic!("expected execution error, got {other:?}"),
    }
    // The fallback never ran; the cache itself is broken.
    assert_eq!(setup.main.call_count(), 0);
}

#[tokio::test]
async fn missing_executor_is_deterministic() {
    let engine = Engine::new(EngineConfig {
        metadata_provider: Arc::new(StaticMetadata(fixture_metadata())),
        role_provider: Arc::new(StaticRoles(fixture_roles())),
        executors: vec![MockExecutor::new("main", vec![])],
        cache_providers: vec![],
        options: EngineOptions::default(),
    })
    .await
    .unwrap();

    let err = engine
        .query(&def(json!({ "from": "events", "columns": ["id"] })), &admin())
        .await
        .unwrap_err();
    match err {
        EngineError::Execution(e) => {
            assert_eq!(e.code, ExecutionErrorCode::ExecutorMissing);
            assert!(e.message.contains("analytics"), "error was: {e}");
        }
        other => panic!("expected execution error, got {other:?}"),
    }
}

#[tokio::test]
async fn close_is_idempotent_and_blocks_queries() {
    let setup = default_engine(vec![]).await;

    setup.engine.close().await.unwrap();
    assert_eq!(*setup.main.closed.lock().unwrap(), 1);

    let err = setup.engine.query(&orders_query(), &admin()).await.unwrap_err();
    match err {
        EngineError::Execution(e) => {
            assert_eq!(e.code, ExecutionErrorCode::ExecutorMissing);
        }
        other => panic!("expected execution error, got {other:?}"),
    }

    // Second close is a no-op and does not re-close providers.
    setup.engine.close().await.unwrap();
    assert_eq!(*setup.main.closed.lock().unwrap(), 1);
}

#[tokio::test]
async fn close_attempts_every_provider_and_collects_failures() {
    let failing = MockExecutor::failing_close("main");
    let analytics = MockExecutor::new("analytics", vec![]);
    let setup = engine_with(
        failing.clone(),
        analytics.clone(),
        MockExecutor::new("fed", vec![]),
        MockCache::new("kv", vec![]),
        EngineOptions::default(),
    )
    .await;

    let err = setup.engine.close().await.unwrap_err();
    match err {
        EngineError::Connection(c) => {
            assert_eq!(c.code, ConnectionErrorCode::ConnectionFailed);
            assert_eq!(c.unreachable, vec!["main".to_string()]);
        }
        other => panic!("expected connection error, got {other:?}"),
    }
    // Every provider was still closed.
    assert_eq!(*analytics.closed.lock().unwrap(), 1);
    assert_eq!(*setup.fed.closed.lock().unwrap(), 1);
}

#[tokio::test]
async fn startup_ping_failure_aborts_when_validation_enabled() {
    let result = Engine::new(EngineConfig {
        metadata_provider: Arc::new(StaticMetadata(fixture_metadata())),
        role_provider: Arc::new(StaticRoles(fixture_roles())),
        executors: vec![MockExecutor::unreachable("main")],
        cache_providers: vec![],
        options: EngineOptions::default(),
    })
    .await;

    match result {
        Err(EngineError::Connection(c)) => {
            assert_eq!(c.code, ConnectionErrorCode::ConnectionFailed);
            assert_eq!(c.unreachable, vec!["main".to_string()]);
        }
        Ok(_) => panic!("expected startup failure"),
        Err(other) => panic!("expected connection error, got {other:?}"),
    }

    // Lazy mode defers the failure to first use.
    let engine = Engine::new(EngineConfig {
        metadata_provider: Arc::new(StaticMetadata(fixture_metadata())),
        role_provider: Arc::new(StaticRoles(fixture_roles())),
        executors: vec![MockExecutor::unreachable("main")],
        cache_providers: vec![],
        options: EngineOptions {
            federation_enabled: true,
            validate_connections: false,
        },
    })
    .await;
    assert!(engine.is_ok());
}

#[tokio::test]
async fn health_check_reports_per_provider() {
    let setup = engine_with(
        MockExecutor::new("main", vec![]),
        MockExecutor::unreachable("analytics"),
        MockExecutor::new("fed", vec![]),
        MockCache::new("kv", vec![]),
        EngineOptions {
            federation_enabled: true,
            validate_connections: false,
        },
    )
    .await;

    let report = setup.engine.health_check().await;
    assert!(!report.healthy);
    assert!(report.executors["main"].healthy);
    assert!(!report.executors["analytics"].healthy);
    assert!(report.executors["analytics"]
        .error
        .as_deref()
        .unwrap()
        .contains("connection refused"));
    assert!(report.cache_providers["kv"].healthy);
}

#[tokio::test]
async fn reload_keeps_serving() {
    let setup = default_engine(vec![]).await;
    setup.engine.reload_metadata().await.unwrap();
    setup.engine.reload_roles().await.unwrap();
    assert!(setup.engine.query(&orders_query(), &admin()).await.is_ok());
}

#[tokio::test]
async fn concurrent_queries_share_nothing() {
    let setup = default_engine(vec![row(&[("t0__id", json!(USER_1))])]).await;
    let engine = &setup.engine;

    let results = futures::future::join_all((0..8).map(|_| async {
        engine.query(&orders_query(), &admin()).await
    }))
    .await;

    for result in results {
        assert!(result.is_ok());
    }
    assert_eq!(setup.main.call_count(), 8);
}

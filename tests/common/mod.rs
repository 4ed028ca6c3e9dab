//! Shared fixtures: a catalog spanning all four engine kinds, plus mock
//! executors and cache providers that script responses and record calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crossdb::model::{ExecutionContext, MetadataConfig, Role};
use crossdb::providers::{
    BoxError, CacheProvider, ExecuteFailure, Executor, MetadataProvider, Row, RoleProvider,
};
use crossdb::{Engine, EngineConfig, EngineOptions};

pub const USER_1: &str = "11111111-1111-4111-8111-111111111111";
pub const USER_2: &str = "22222222-2222-4222-8222-222222222222";
pub const USER_3: &str = "33333333-3333-4333-8333-333333333333";

pub fn fixture_metadata() -> MetadataConfig {
    serde_json::from_value(json!({
        "databases": [
            { "id": "main", "engine": "row", "federationCatalog": "pg" },
            { "id": "analytics", "engine": "columnar", "federationCatalog": "ch" },
            { "id": "lake", "engine": "lakehouse", "federationCatalog": "iceberg" },
            { "id": "fed", "engine": "federated-engine" }
        ],
        "tables": [
            {
                "id": "tbl_users", "logicalName": "users", "databaseId": "main",
                "physicalName": "public.users",
                "columns": [
                    { "logicalName": "id", "physicalName": "id", "type": "uuid" },
                    { "logicalName": "email", "physicalName": "email_addr", "type": "string",
                      "maskingFn": "email" },
                    { "logicalName": "name", "physicalName": "full_name", "type": "string" },
                    { "logicalName": "age", "physicalName": "age", "type": "int",
                      "nullable": true }
                ],
                "primaryKey": ["id"]
            },
            {
                "id": "tbl_orders", "logicalName": "orders", "databaseId": "main",
                "physicalName": "public.orders",
                "columns": [
                    { "logicalName": "id", "physicalName": "id", "type": "uuid" },
                    { "logicalName": "userId", "physicalName": "user_id", "type": "uuid" },
                    { "logicalName": "status", "physicalName": "status", "type": "string" },
                    { "logicalName": "total", "physicalName": "total_amount",
                      "type": "decimal" }
                ],
                "primaryKey": ["id"],
                "relations": [{
                    "fromColumn": "userId", "referencesTable": "tbl_users",
                    "referencesColumn": "id", "kind": "many-to-one"
                }]
            },
            {
                "id": "tbl_events", "logicalName": "events", "databaseId": "analytics",
                "physicalName": "app_events",
                "columns": [
                    { "logicalName": "id", "physicalName": "id", "type": "uuid" },
                    { "logicalName": "userId", "physicalName": "user_id", "type": "uuid" },
                    { "logicalName": "kind", "physicalName": "kind", "type": "string" }
                ],
                "primaryKey": ["id"],
                "relations": [{
                    "fromColumn": "userId", "referencesTable": "tbl_users",
                    "referencesColumn": "id", "kind": "many-to-one"
                }]
            }
        ],
        "externalSyncs": [{
            "sourceTableId": "tbl_users",
            "targetDatabaseId": "analytics",
            "targetPhysicalName": "users_replica",
            "method": "cdc",
            "estimatedLag": "minutes"
        }],
        "caches": [{
            "id": "kv", "engine": "redis",
            "entries": [{
                "tableId": "tbl_users",
                "keyPattern": "user:{id}",
                "columns": ["id", "email", "name"]
            }]
        }]
    }))
    .unwrap()
}

pub fn fixture_roles() -> Vec<Role> {
    serde_json::from_value(json!([
        { "id": "admin", "tables": "*" },
        { "id": "support", "tables": [
            { "tableId": "tbl_users", "allowedColumns": "*", "maskedColumns": ["email"] },
            { "tableId": "tbl_orders", "allowedColumns": "*" }
        ]}
    ]))
    .unwrap()
}

pub fn admin() -> ExecutionContext {
    ExecutionContext::with_scope("user", vec!["admin".into()])
}

pub fn support() -> ExecutionContext {
    ExecutionContext::with_scope("user", vec!["support".into()])
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect::<Map<String, Value>>()
}

// ---------------------------------------------------------------------------
// Mock providers
// ---------------------------------------------------------------------------

pub struct StaticMetadata(pub MetadataConfig);

#[async_trait]
impl MetadataProvider for StaticMetadata {
    async fn load(&self) -> Result<MetadataConfig, BoxError> {
        Ok(self.0.clone())
    }
}

pub struct StaticRoles(pub Vec<Role>);

#[async_trait]
impl RoleProvider for StaticRoles {
    async fn load(&self) -> Result<Vec<Role>, BoxError> {
        Ok(self.0.clone())
    }
}

pub enum Scripted {
    Rows(Vec<Row>),
    Fail { message: String, timeout: bool },
}

/// Executor returning scripted responses in order (the last one repeats),
/// recording every call.
pub struct MockExecutor {
    id: String,
    responses: Mutex<VecDeque<Scripted>>,
    pub calls: Mutex<Vec<(String, Vec<Value>)>>,
    pub closed: Mutex<u32>,
    pub fail_close: bool,
    pub fail_ping: bool,
}

impl MockExecutor {
    pub fn new(id: &str, responses: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
            closed: Mutex::new(0),
            fail_close: false,
            fail_ping: false,
        })
    }

    pub fn failing_close(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            closed: Mutex::new(0),
            fail_close: true,
            fail_ping: false,
        })
    }

    pub fn unreachable(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            closed: Mutex::new(0),
            fail_close: false,
            fail_ping: true,
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> (String, Vec<Value>) {
        self.calls
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("executor was never called")
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ExecuteFailure> {
        self.calls
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        let mut responses = self.responses.lock().unwrap();
        let scripted = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().map(|r| match r {
                Scripted::Rows(rows) => Scripted::Rows(rows.clone()),
                Scripted::Fail { message, timeout } => Scripted::Fail {
                    message: message.clone(),
                    timeout: *timeout,
                },
            })
        };
        match scripted {
            None => Ok(Vec::new()),
            Some(Scripted::Rows(rows)) => Ok(rows),
            Some(Scripted::Fail { message, timeout }) => {
                if timeout {
                    Err(ExecuteFailure::timeout(message, Some(30_000)))
                } else {
                    Err(ExecuteFailure::error(message))
                }
            }
        }
    }

    async fn ping(&self) -> Result<(), BoxError> {
        if self.fail_ping {
            Err("connection refused".into())
        } else {
            Ok(())
        }
    }

    async fn close(&self) -> Result<(), BoxError> {
        *self.closed.lock().unwrap() += 1;
        if self.fail_close {
            Err("close failed".into())
        } else {
            Ok(())
        }
    }
}

/// Cache provider backed by a fixed key -> row map.
pub struct MockCache {
    id: String,
    store: HashMap<String, Row>,
    pub calls: Mutex<Vec<Vec<String>>>,
    pub fail: bool,
}

impl MockCache {
    pub fn new(id: &str, entries: Vec<(String, Row)>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            store: entries.into_iter().collect(),
            calls: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn broken(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            store: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            fail: true,
        })
    }
}

#[async_trait]
impl CacheProvider for MockCache {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Option<Row>>, BoxError> {
        self.calls.lock().unwrap().push(keys.to_vec());
        if self.fail {
            return Err("cache cluster down".into());
        }
        Ok(keys
            .iter()
            .map(|k| (k.clone(), self.store.get(k).cloned()))
            .collect())
    }

    async fn ping(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

pub struct EngineSetup {
    pub engine: Engine,
    pub main: Arc<MockExecutor>,
    pub analytics: Arc<MockExecutor>,
    pub fed: Arc<MockExecutor>,
    pub cache: Arc<MockCache>,
}

/// Build an engine over the fixture catalog with scripted executors.
pub async fn engine_with(
    main: Arc<MockExecutor>,
    analytics: Arc<MockExecutor>,
    fed: Arc<MockExecutor>,
    cache: Arc<MockCache>,
    options: EngineOptions,
) -> EngineSetup {
    let engine = Engine::new(EngineConfig {
        metadata_provider: Arc::new(StaticMetadata(fixture_metadata())),
        role_provider: Arc::new(StaticRoles(fixture_roles())),
        executors: vec![main.clone(), analytics.clone(), fed.clone()],
        cache_providers: vec![cache.clone()],
        options,
    })
    .await
    .expect("engine must start");

    EngineSetup {
        engine,
        main,
        analytics,
        fed,
        cache,
    }
}

pub async fn default_engine(main_rows: Vec<Row>) -> EngineSetup {
    engine_with(
        MockExecutor::new("main", vec![Scripted::Rows(main_rows)]),
        MockExecutor::new("analytics", vec![]),
        MockExecutor::new("fed", vec![]),
        MockCache::new("kv", vec![]),
        EngineOptions::default(),
    )
    .await
}

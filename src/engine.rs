//! The engine facade: wires the registry, executors, and cache providers
//! into the validate → plan → resolve → generate → execute pipeline.
//!
//! The engine is concurrently callable. Each query captures the registry
//! snapshot once at entry and uses it to completion; a concurrent reload
//! swaps the shared pointer without touching in-flight work. Backend calls
//! are plain futures, so dropping a query future aborts its in-flight I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::dialects::generate;
use crate::error::{ConnectionError, ConnectionErrorCode, EngineError, ExecutionError};
use crate::exec::{self, DebugEntry, QueryResult};
use crate::model::{ExecutionContext, QueryDefinition};
use crate::planner::{plan, PlannerOptions};
use crate::providers::{CacheProvider, Executor, MetadataProvider, RoleProvider};
use crate::registry::MetadataRegistry;
use crate::resolver::resolve;
use crate::validator::validate;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
    /// Allow the federated strategy (P3).
    #[serde(default = "default_true")]
    pub federation_enabled: bool,
    /// Ping every executor and cache provider at startup. When disabled,
    /// providers are assumed lazy and failures surface at first query.
    #[serde(default = "default_true")]
    pub validate_connections: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            federation_enabled: true,
            validate_connections: true,
        }
    }
}

pub struct EngineConfig {
    pub metadata_provider: Arc<dyn MetadataProvider>,
    pub role_provider: Arc<dyn RoleProvider>,
    pub executors: Vec<Arc<dyn Executor>>,
    pub cache_providers: Vec<Arc<dyn CacheProvider>>,
    pub options: EngineOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub executors: HashMap<String, ProviderHealth>,
    pub cache_providers: HashMap<String, ProviderHealth>,
}

pub struct Engine {
    registry: MetadataRegistry,
    executors: HashMap<String, Arc<dyn Executor>>,
    caches: HashMap<String, Arc<dyn CacheProvider>>,
    options: EngineOptions,
    closed: AtomicBool,
}

impl Engine {
    /// Load metadata and roles, index them, and optionally verify every
    /// backend connection before accepting queries.
    pub async fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let registry =
            MetadataRegistry::load(config.metadata_provider, config.role_provider).await?;

        let executors: HashMap<String, Arc<dyn Executor>> = config
            .executors
            .into_iter()
            .map(|e| (e.id().to_string(), e))
            .collect();
        let caches: HashMap<String, Arc<dyn CacheProvider>> = config
            .cache_providers
            .into_iter()
            .map(|c| (c.id().to_string(), c))
            .collect();

        let engine = Self {
            registry,
            executors,
            caches,
            options: config.options,
            closed: AtomicBool::new(false),
        };

        if engine.options.validate_connections {
            let report = engine.health_check().await;
            if !report.healthy {
                let unreachable: Vec<String> = report
                    .executors
                    .iter()
                    .chain(report.cache_providers.iter())
                    .filter(|(_, h)| !h.healthy)
                    .map(|(id, _)| id.clone())
                    .collect();
                return Err(ConnectionError::new(
                    ConnectionErrorCode::ConnectionFailed,
                    format!("{} provider(s) unreachable at startup", unreachable.len()),
                    unreachable,
                )
                .into());
            }
        }

        Ok(engine)
    }

    /// Run one query end to end. Phases run strictly in order: validate,
    /// plan, resolve, generate, then the strategy execution.
    pub async fn query(
        &self,
        def: &QueryDefinition,
        context: &ExecutionContext,
    ) -> Result<QueryResult, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecutionError::engine_closed().into());
        }

        let snapshot = self.registry.snapshot();
        let mut log: Vec<DebugEntry> = Vec::new();

        let started = Instant::now();
        validate(def, context, &snapshot)?;
        let plan = plan(
            def,
            &snapshot,
            &PlannerOptions {
                federation_enabled: self.options.federation_enabled,
            },
        )?;
        let planning_ms = started.elapsed().as_millis() as u64;
        log.push(DebugEntry {
            phase: "plan".to_string(),
            elapsed_ms: planning_ms,
        });
        log::debug!("planned '{}' via {} strategy", def.from, plan.strategy());

        let started = Instant::now();
        let resolved = resolve(def, context, &snapshot, &plan);
        let generated = generate(&resolved.parts, &resolved.params, plan.dialect());
        let generation_ms = started.elapsed().as_millis() as u64;
        log.push(DebugEntry {
            phase: "generate".to_string(),
            elapsed_ms: generation_ms,
        });

        exec::run(exec::RunInput {
            snapshot: &snapshot,
            executors: &self.executors,
            caches: &self.caches,
            def,
            context,
            plan: &plan,
            resolved,
            generated,
            planning_ms,
            generation_ms,
            log,
        })
        .await
    }

    /// Ping every executor and cache provider concurrently.
    pub async fn health_check(&self) -> HealthReport {
        let executor_checks = self.executors.iter().map(|(id, executor)| {
            let id = id.clone();
            let executor = executor.clone();
            async move {
                let started = Instant::now();
                let result = executor.ping().await;
                (id, health_entry(started, result))
            }
        });
        let cache_checks = self.caches.iter().map(|(id, cache)| {
            let id = id.clone();
            let cache = cache.clone();
            async move {
                let started = Instant::now();
                let result = cache.ping().await;
                (id, health_entry(started, result))
            }
        });

        let (executors, cache_providers) = futures::join!(
            futures::future::join_all(executor_checks),
            futures::future::join_all(cache_checks),
        );

        let executors: HashMap<String, ProviderHealth> = executors.into_iter().collect();
        let cache_providers: HashMap<String, ProviderHealth> =
            cache_providers.into_iter().collect();
        let healthy = executors.values().all(|h| h.healthy)
            && cache_providers.values().all(|h| h.healthy);

        HealthReport {
            healthy,
            executors,
            cache_providers,
        }
    }

    pub async fn reload_metadata(&self) -> Result<(), EngineError> {
        self.registry.reload_metadata().await
    }

    pub async fn reload_roles(&self) -> Result<(), EngineError> {
        self.registry.reload_roles().await
    }

    /// Close every executor and cache provider. Every close is attempted;
    /// failures are collected into one connection error. A second call is a
    /// no-op.
    pub async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut unreachable: Vec<String> = Vec::new();
        for (id, executor) in &self.executors {
            if let Err(e) = executor.close().await {
                log::warn!("executor '{id}' failed to close: {e}");
                unreachable.push(id.clone());
            }
        }
        for (id, cache) in &self.caches {
            if let Err(e) = cache.close().await {
                log::warn!("cache provider '{id}' failed to close: {e}");
                unreachable.push(id.clone());
            }
        }

        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(ConnectionError::new(
                ConnectionErrorCode::ConnectionFailed,
                format!("{} provider(s) failed to close", unreachable.len()),
                unreachable,
            )
            .into())
        }
    }
}

fn health_entry(started: Instant, result: Result<(), crate::providers::BoxError>) -> ProviderHealth {
    let latency_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(()) => ProviderHealth {
            healthy: true,
            latency_ms,
            error: None,
        },
        Err(e) => ProviderHealth {
            healthy: false,
            latency_ms,
            error: Some(e.to_string()),
        },
    }
}

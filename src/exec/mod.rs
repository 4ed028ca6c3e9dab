//! Executor orchestration: strategy execution, cache hit/miss merging,
//! row-key remapping, post-projection masking, and result packaging.

pub mod masking;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::dialects::{generate, GeneratedSql};
use crate::error::{EngineError, ExecutionError, QueryAttempt};
use crate::model::{
    ColumnType, DbEngine, Dialect, ExecuteMode, ExecutionContext, QueryDefinition,
};
use crate::planner::{CachePlan, Plan};
use crate::providers::{CacheProvider, ExecuteFailure, Executor, Row};
use crate::registry::Snapshot;
use crate::resolver::ir::{ColumnMapping, ResolveMode, ResolvedQuery, TableSource};
use crate::resolver::resolve;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEntry {
    pub phase: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub planning_ms: u64,
    pub generation_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableUsed {
    pub table_id: String,
    /// `original`, `materialized`, or `cache`.
    pub source: &'static str,
    pub database: String,
    pub physical_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    pub logical_name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub nullable: bool,
    pub from_table: String,
    pub masked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMeta {
    pub strategy: &'static str,
    pub target_database: String,
    pub dialect: Dialect,
    pub tables_used: Vec<TableUsed>,
    pub columns: Vec<ColumnMeta>,
    pub timing: Timing,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum QueryResult {
    #[serde(rename = "data")]
    Data {
        data: Vec<Row>,
        meta: ResultMeta,
        #[serde(skip_serializing_if = "Option::is_none")]
        debug_log: Option<Vec<DebugEntry>>,
    },
    #[serde(rename = "count")]
    Count {
        count: i64,
        meta: ResultMeta,
        #[serde(skip_serializing_if = "Option::is_none")]
        debug_log: Option<Vec<DebugEntry>>,
    },
    #[serde(rename = "sql")]
    Sql {
        sql: String,
        params: Vec<Value>,
        meta: ResultMeta,
        #[serde(skip_serializing_if = "Option::is_none")]
        debug_log: Option<Vec<DebugEntry>>,
    },
}

impl QueryResult {
    pub fn meta(&self) -> &ResultMeta {
        match self {
            QueryResult::Data { meta, .. }
            | QueryResult::Count { meta, .. }
            | QueryResult::Sql { meta, .. } => meta,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

pub struct RunInput<'a> {
    pub snapshot: &'a Snapshot,
    pub executors: &'a HashMap<String, Arc<dyn Executor>>,
    pub caches: &'a HashMap<String, Arc<dyn CacheProvider>>,
    pub def: &'a QueryDefinition,
    pub context: &'a ExecutionContext,
    pub plan: &'a Plan,
    pub resolved: ResolvedQuery,
    pub generated: GeneratedSql,
    pub planning_ms: u64,
    pub generation_ms: u64,
    pub log: Vec<DebugEntry>,
}

pub async fn run(mut input: RunInput<'_>) -> Result<QueryResult, EngineError> {
    if input.def.execute_mode == ExecuteMode::SqlOnly {
        let meta = build_meta(&input, None);
        let debug_log = take_log(&mut input);
        return Ok(QueryResult::Sql {
            sql: input.generated.sql,
            params: input.generated.params,
            meta,
            debug_log,
        });
    }

    match input.plan {
        Plan::Cache(cache_plan) => {
            let cache_plan = cache_plan.clone();
            run_cache(input, &cache_plan).await
        }
        _ => run_database(input).await,
    }
}

async fn run_database(mut input: RunInput<'_>) -> Result<QueryResult, EngineError> {
    let dialect = input.plan.dialect();
    let (executor, database) = executor_for(input.plan, input.snapshot, input.executors)?;

    let started = Instant::now();
    let rows = executor
        .execute(&input.generated.sql, &input.generated.params)
        .await
        .map_err(|failure| {
            classify(
                failure,
                attempt(&input.generated, &database, dialect),
            )
        })?;
    let execution_ms = started.elapsed().as_millis() as u64;
    push_log(&mut input.log, "execute", execution_ms);
    log::debug!(
        "executed on '{database}' ({} row(s)) via {dialect}",
        rows.len()
    );

    if input.resolved.mode == ResolveMode::Count {
        let count = extract_count(&rows);
        let meta = build_meta(&input, Some(execution_ms));
        let debug_log = take_log(&mut input);
        return Ok(QueryResult::Count {
            count,
            meta,
            debug_log,
        });
    }

    let remap = build_remap(&input.resolved.column_mappings, dialect);
    let mut data: Vec<Row> = rows.into_iter().map(|row| remap_row(row, &remap)).collect();
    for row in &mut data {
        mask_row(row, &input.resolved.column_mappings);
    }

    let meta = build_meta(&input, Some(execution_ms));
    let debug_log = take_log(&mut input);
    Ok(QueryResult::Data {
        data,
        meta,
        debug_log,
    })
}

async fn run_cache(mut input: RunInput<'_>, plan: &CachePlan) -> Result<QueryResult, EngineError> {
    let provider = input
        .caches
        .get(&plan.cache_id)
        .ok_or_else(|| ExecutionError::cache_provider_missing(&plan.cache_id))?;

    let ids = input
        .def
        .by_ids
        .as_ref()
        .expect("cache plans require byIds");
    let keys: Vec<String> = ids
        .iter()
        .map(|id| substitute_key(&plan.key_pattern, id))
        .collect();

    let started = Instant::now();
    let found = provider
        .get_many(&keys)
        .await
        .map_err(|cause| ExecutionError::cache_failed(&plan.cache_id, cause))?;
    push_log(&mut input.log, "cacheLookup", started.elapsed().as_millis() as u64);

    let mut hits: Vec<Row> = Vec::new();
    let mut missing: Vec<Value> = Vec::new();
    for (id, key) in ids.iter().zip(&keys) {
        match found.get(key).and_then(|v| v.clone()) {
            Some(row) => hits.push(row),
            None => missing.push(id.clone()),
        }
    }
    log::debug!(
        "cache '{}': {} hit(s), {} miss(es)",
        plan.cache_id,
        hits.len(),
        missing.len()
    );

    let dialect = plan.fallback_dialect;
    let mut execution_ms: Option<u64> = None;

    // Cached entries are already keyed logically; only fetched rows remap.
    let mut data: Vec<Row> = hits;
    if !missing.is_empty() {
        let generated = if data.is_empty() {
            // Full miss: the original statement already targets every id.
            input.generated.clone()
        } else {
            let mut reduced = input.def.clone();
            reduced.by_ids = Some(missing);
            let resolved = resolve(&reduced, input.context, input.snapshot, input.plan);
            generate(&resolved.parts, &resolved.params, dialect)
        };

        let (executor, database) = executor_for(input.plan, input.snapshot, input.executors)?;
        let started = Instant::now();
        let rows = executor
            .execute(&generated.sql, &generated.params)
            .await
            .map_err(|failure| classify(failure, attempt(&generated, &database, dialect)))?;
        let elapsed = started.elapsed().as_millis() as u64;
        execution_ms = Some(elapsed);
        push_log(&mut input.log, "execute", elapsed);

        let remap = build_remap(&input.resolved.column_mappings, dialect);
        data.extend(rows.into_iter().map(|row| remap_row(row, &remap)));
    }

    for row in &mut data {
        mask_row(row, &input.resolved.column_mappings);
    }

    let meta = build_meta(&input, execution_ms);
    let debug_log = take_log(&mut input);
    Ok(QueryResult::Data {
        data,
        meta,
        debug_log,
    })
}

/// The executor serving a plan. Lakehouse databases and federated plans are
/// always routed to the federation engine's executor.
fn executor_for(
    plan: &Plan,
    snapshot: &Snapshot,
    executors: &HashMap<String, Arc<dyn Executor>>,
) -> Result<(Arc<dyn Executor>, String), ExecutionError> {
    let database = match plan {
        Plan::Direct(p) => execution_database(&p.database, snapshot)?,
        Plan::Materialized(p) => execution_database(&p.database, snapshot)?,
        Plan::Cache(p) => execution_database(&p.fallback_database, snapshot)?,
        Plan::Federated(_) => federation_database(snapshot)?,
    };
    let executor = executors
        .get(&database)
        .ok_or_else(|| ExecutionError::executor_missing(&database))?;
    Ok((executor.clone(), database))
}

fn execution_database(database_id: &str, snapshot: &Snapshot) -> Result<String, ExecutionError> {
    match snapshot.database(database_id) {
        Some(db) if db.engine == DbEngine::Lakehouse => federation_database(snapshot),
        _ => Ok(database_id.to_string()),
    }
}

fn federation_database(snapshot: &Snapshot) -> Result<String, ExecutionError> {
    snapshot
        .federation_database()
        .map(|db| db.id.clone())
        .ok_or_else(|| ExecutionError::executor_missing("federated-engine"))
}

fn attempt(generated: &GeneratedSql, database: &str, dialect: Dialect) -> QueryAttempt {
    QueryAttempt {
        sql: generated.sql.clone(),
        params: generated.params.clone(),
        database: database.to_string(),
        dialect,
    }
}

fn classify(failure: ExecuteFailure, attempt: QueryAttempt) -> ExecutionError {
    if failure.is_timeout() {
        ExecutionError::query_timeout(attempt, Box::new(failure))
    } else {
        ExecutionError::query_failed(attempt, Box::new(failure))
    }
}

fn push_log(log: &mut Vec<DebugEntry>, phase: &str, elapsed_ms: u64) {
    log.push(DebugEntry {
        phase: phase.to_string(),
        elapsed_ms,
    });
}

fn take_log(input: &mut RunInput<'_>) -> Option<Vec<DebugEntry>> {
    input.def.debug.then(|| std::mem::take(&mut input.log))
}

fn build_meta(input: &RunInput<'_>, execution_ms: Option<u64>) -> ResultMeta {
    let plan = input.plan;
    let target_database = match plan {
        Plan::Cache(p) => p.fallback_database.clone(),
        Plan::Direct(p) => p.database.clone(),
        Plan::Materialized(p) => p.database.clone(),
        Plan::Federated(_) => federation_database(input.snapshot)
            .unwrap_or_else(|_| "federated-engine".to_string()),
    };

    let cached_table = match plan {
        Plan::Cache(p) => Some(p.table_id.as_str()),
        _ => None,
    };

    let tables_used = input
        .resolved
        .tables
        .iter()
        .map(|table| {
            let (source, database) = if cached_table == Some(table.table_id.as_str()) {
                ("cache", target_database.clone())
            } else {
                match table.source {
                    TableSource::Materialized => ("materialized", target_database.clone()),
                    TableSource::Original => (
                        "original",
                        input
                            .snapshot
                            .table_by_id(&table.table_id)
                            .map(|t| t.database_id.clone())
                            .unwrap_or_default(),
                    ),
                }
            };
            TableUsed {
                table_id: table.table_id.clone(),
                source,
                database,
                physical_name: table.physical_name.clone(),
            }
        })
        .collect();

    let columns = input
        .resolved
        .column_mappings
        .iter()
        .map(|m| ColumnMeta {
            logical_name: m.logical_name.clone(),
            column_type: m.column_type,
            nullable: m.nullable,
            from_table: m.table_logical_name.clone(),
            masked: m.masked,
        })
        .collect();

    ResultMeta {
        strategy: plan.strategy(),
        target_database,
        dialect: plan.dialect(),
        tables_used,
        columns,
        timing: Timing {
            planning_ms: input.planning_ms,
            generation_ms: input.generation_ms,
            execution_ms,
        },
    }
}

// ---------------------------------------------------------------------------
// Row transforms
// ---------------------------------------------------------------------------

/// The driver-reported key for one selected column.
fn driver_key(dialect: Dialect, mapping: &ColumnMapping) -> String {
    match dialect {
        Dialect::Columnar => format!("{}.{}", mapping.table_alias, mapping.physical_name),
        Dialect::RowStore | Dialect::Federation => {
            format!("{}__{}", mapping.table_alias, mapping.physical_name)
        }
    }
}

/// Built once per query, applied to every row.
fn build_remap(mappings: &[ColumnMapping], dialect: Dialect) -> HashMap<String, String> {
    mappings
        .iter()
        .map(|m| (driver_key(dialect, m), m.logical_name.clone()))
        .collect()
}

/// Rename driver keys to logical names; unmapped keys pass through as-is.
fn remap_row(row: Row, remap: &HashMap<String, String>) -> Row {
    row.into_iter()
        .map(|(key, value)| match remap.get(&key) {
            Some(logical) => (logical.clone(), value),
            None => (key, value),
        })
        .collect()
}

fn mask_row(row: &mut Row, mappings: &[ColumnMapping]) {
    for mapping in mappings {
        if !mapping.masked {
            continue;
        }
        if let Some(value) = row.get(&mapping.logical_name) {
            let mask = mapping.masking_fn.unwrap_or(crate::model::MaskingFn::Full);
            let masked = masking::apply_mask(mask, value);
            row.insert(mapping.logical_name.clone(), masked);
        }
    }
}

/// First numeric of the first row: integers, big-integer strings, and
/// numeric strings all count.
fn extract_count(rows: &[Row]) -> i64 {
    let Some(row) = rows.first() else {
        return 0;
    };
    for value in row.values() {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return i;
                }
                if let Some(f) = n.as_f64() {
                    return f as i64;
                }
            }
            Value::String(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    return i;
                }
                if let Ok(f) = s.parse::<f64>() {
                    return f as i64;
                }
            }
            _ => {}
        }
    }
    0
}

/// Substitute `{placeholder}` segments of a cache key pattern with the id.
fn substitute_key(pattern: &str, id: &Value) -> String {
    let rendered = match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut out = String::new();
    let mut rest = pattern;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push_str(&rendered);
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

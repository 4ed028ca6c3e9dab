//! Route planning: choose exactly one of four execution strategies for a
//! validated definition, in strict preference order — cache lookup, direct
//! single-database query, materialized replica, cross-database federation.

use std::collections::{BTreeMap, HashMap};

use serde_json::json;

use crate::error::{PlannerError, PlannerErrorCode};
use crate::model::{DbEngine, Dialect, ExecuteMode, Freshness, QueryDefinition, TableDef};
use crate::registry::Snapshot;

#[derive(Debug, Clone, Copy)]
pub struct PlannerOptions {
    pub federation_enabled: bool,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            federation_enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Plan {
    Cache(CachePlan),
    Direct(DirectPlan),
    Materialized(MaterializedPlan),
    Federated(FederatedPlan),
}

impl Plan {
    pub fn strategy(&self) -> &'static str {
        match self {
            Plan::Cache(_) => "cache",
            Plan::Direct(_) => "direct",
            Plan::Materialized(_) => "materialized",
            Plan::Federated(_) => "federated-cross-db",
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Plan::Cache(p) => p.fallback_dialect,
            Plan::Direct(p) => p.dialect,
            Plan::Materialized(p) => p.dialect,
            Plan::Federated(_) => Dialect::Federation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachePlan {
    pub cache_id: String,
    pub table_id: String,
    pub key_pattern: String,
    /// Database answering misses, with its dialect and catalog.
    pub fallback_database: String,
    pub fallback_dialect: Dialect,
    pub fallback_catalog: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DirectPlan {
    pub database: String,
    pub dialect: Dialect,
    /// Set when the database is served through the federation engine
    /// (lakehouse); attached to every table reference.
    pub federation_catalog: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MaterializedPlan {
    pub database: String,
    pub dialect: Dialect,
    pub federation_catalog: Option<String>,
    /// table id -> replicated physical name at the chosen database.
    pub table_overrides: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct FederatedPlan {
    /// database id -> federation catalog.
    pub catalogs_by_database: HashMap<String, String>,
}

/// Effective freshness bound: an unspecified freshness tolerates any
/// declared lag.
fn requested_freshness(def: &QueryDefinition) -> Freshness {
    def.freshness.unwrap_or(Freshness::Hours)
}

pub fn plan(
    def: &QueryDefinition,
    snapshot: &Snapshot,
    options: &PlannerOptions,
) -> Result<Plan, PlannerError> {
    let mut tables: Vec<&TableDef> = Vec::new();
    let mut unresolved: Vec<&str> = Vec::new();
    for name in def.referenced_tables() {
        match snapshot.table_by_logical(name) {
            Some(t) if snapshot.database(&t.database_id).is_some() => tables.push(t),
            _ => unresolved.push(name),
        }
    }
    if !unresolved.is_empty() {
        return Err(PlannerError::new(
            PlannerErrorCode::UnreachableTables,
            format!("tables cannot be resolved to a database: {}", unresolved.join(", ")),
            json!({ "tables": unresolved }),
        ));
    }

    // P0: cache lookup.
    if let Some(cache) = try_cache_plan(def, snapshot)? {
        return Ok(Plan::Cache(cache));
    }

    // P1: everything lives in one database.
    let mut databases: BTreeMap<&str, usize> = BTreeMap::new();
    for table in &tables {
        *databases.entry(table.database_id.as_str()).or_default() += 1;
    }
    if databases.len() == 1 {
        let id = *databases.keys().next().expect("non-empty");
        let database = snapshot.database(id).expect("resolved above");
        let (dialect, catalog) = direct_dialect(database, snapshot)?;
        return Ok(Plan::Direct(DirectPlan {
            database: id.to_string(),
            dialect,
            federation_catalog: catalog,
        }));
    }

    // P2: one database holds every table natively or as a fresh-enough
    // replica.
    let freshness = requested_freshness(def);
    if let Some(plan) = try_materialized_plan(&tables, freshness, snapshot)? {
        return Ok(Plan::Materialized(plan));
    }

    // P3: federation across everything that remains.
    if !options.federation_enabled {
        // Distinguish "a replica site exists but is too stale" from "nothing
        // would ever work without federation".
        if try_materialized_plan(&tables, Freshness::Hours, snapshot)?.is_some() {
            return Err(PlannerError::new(
                PlannerErrorCode::FreshnessUnmet,
                format!(
                    "a replica site exists, but its lag exceeds the requested freshness ({})",
                    freshness_name(freshness)
                ),
                json!({ "freshness": freshness_name(freshness) }),
            ));
        }
        return Err(PlannerError::new(
            PlannerErrorCode::FederationDisabled,
            "query spans multiple databases and federation is disabled",
            json!({ "databases": databases.keys().collect::<Vec<_>>() }),
        ));
    }

    let mut catalogs: HashMap<String, String> = HashMap::new();
    let mut missing: Vec<&str> = Vec::new();
    for &db_id in databases.keys() {
        let database = snapshot.database(db_id).expect("resolved above");
        match &database.federation_catalog {
            Some(catalog) => {
                catalogs.insert(db_id.to_string(), catalog.clone());
            }
            None => missing.push(db_id),
        }
    }
    if !missing.is_empty() {
        return Err(PlannerError::new(
            PlannerErrorCode::NoCatalog,
            format!("databases lack a federation catalog: {}", missing.join(", ")),
            json!({ "databases": missing }),
        ));
    }

    Ok(Plan::Federated(FederatedPlan {
        catalogs_by_database: catalogs,
    }))
}

/// Cache preconditions: a primary-key lookup with no filters against a
/// cached table whose cached column subset covers the selection. Anything
/// short of that falls through to the next strategy.
fn try_cache_plan(
    def: &QueryDefinition,
    snapshot: &Snapshot,
) -> Result<Option<CachePlan>, PlannerError> {
    if def.by_ids.is_none()
        || !def.filters.is_empty()
        || !def.joins.is_empty()
        || def.execute_mode != ExecuteMode::Data
    {
        return Ok(None);
    }
    let Some(table) = snapshot.table_by_logical(&def.from) else {
        return Ok(None);
    };
    let Some((cache, entry)) = snapshot.cache_entries_for(&table.id).next() else {
        return Ok(None);
    };

    if let (Some(selected), Some(cached)) = (&def.columns, &entry.columns) {
        if !selected.iter().all(|c| cached.contains(c)) {
            return Ok(None);
        }
    }

    let database = snapshot
        .database(&table.database_id)
        .expect("validated config");
    let (dialect, catalog) = direct_dialect(database, snapshot)?;

    Ok(Some(CachePlan {
        cache_id: cache.id.clone(),
        table_id: table.id.clone(),
        key_pattern: entry.key_pattern.clone(),
        fallback_database: database.id.clone(),
        fallback_dialect: dialect,
        fallback_catalog: catalog,
    }))
}

fn try_materialized_plan(
    tables: &[&TableDef],
    freshness: Freshness,
    snapshot: &Snapshot,
) -> Result<Option<MaterializedPlan>, PlannerError> {
    let mut best: Option<(usize, usize)> = None; // (native count, database index)

    for (index, candidate) in snapshot.databases().iter().enumerate() {
        let mut native = 0usize;
        let mut overrides: HashMap<String, String> = HashMap::new();
        let mut ok = true;

        for table in tables {
            if table.database_id == candidate.id {
                native += 1;
                continue;
            }
            let replica = snapshot.syncs_for(&table.id).find(|sync| {
                sync.target_database_id == candidate.id && sync.estimated_lag.satisfies(freshness)
            });
            match replica {
                Some(sync) => {
                    overrides.insert(table.id.clone(), sync.target_physical_name.clone());
                }
                None => {
                    ok = false;
                    break;
                }
            }
        }

        if !ok {
            continue;
        }
        // Prefer the site with the most native tables; ties go to configured
        // order, which the index scan already guarantees.
        match best {
            Some((best_native, _)) if best_native >= native => {}
            _ => best = Some((native, index)),
        }
    }

    let Some((_, index)) = best else {
        return Ok(None);
    };
    let database = &snapshot.databases()[index];

    // Rebuild the winning override set.
    let mut overrides = HashMap::new();
    for table in tables {
        if table.database_id != database.id {
            let sync = snapshot
                .syncs_for(&table.id)
                .find(|s| s.target_database_id == database.id && s.estimated_lag.satisfies(freshness))
                .expect("candidate verified above");
            overrides.insert(table.id.clone(), sync.target_physical_name.clone());
        }
    }

    let (dialect, catalog) = direct_dialect(database, snapshot)?;
    Ok(Some(MaterializedPlan {
        database: database.id.clone(),
        dialect,
        federation_catalog: catalog,
        table_overrides: overrides,
    }))
}

/// Dialect and catalog for serving a single database. Lakehouse databases go
/// through the federation dialect and require a catalog.
fn direct_dialect(
    database: &crate::model::DatabaseDef,
    _snapshot: &Snapshot,
) -> Result<(Dialect, Option<String>), PlannerError> {
    match database.engine {
        DbEngine::Lakehouse => match &database.federation_catalog {
            Some(catalog) => Ok((Dialect::Federation, Some(catalog.clone()))),
            None => Err(PlannerError::new(
                PlannerErrorCode::NoCatalog,
                format!(
                    "lakehouse database '{}' requires a federation catalog",
                    database.id
                ),
                json!({ "database": database.id }),
            )),
        },
        engine => Ok((engine.native_dialect(), None)),
    }
}

fn freshness_name(freshness: Freshness) -> &'static str {
    match freshness {
        Freshness::Realtime => "realtime",
        Freshness::Seconds => "seconds",
        Freshness::Minutes => "minutes",
        Freshness::Hours => "hours",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetadataConfig;
    use crate::registry::Snapshot;
    use crate::testutil::{fixture_roles, fixture_snapshot};
    use serde_json::json;

    fn def(v: serde_json::Value) -> QueryDefinition {
        serde_json::from_value(v).unwrap()
    }

    fn plan_with(v: serde_json::Value, federation: bool) -> Result<Plan, PlannerError> {
        let snap = fixture_snapshot();
        plan(
            &def(v),
            &snap,
            &PlannerOptions {
                federation_enabled: federation,
            },
        )
    }

    const ID: &str = "0d3ee1a6-5b7a-41b2-bceb-8b8d8b4e8a77";

    // Decision table row 1: byIds with a fitting cache entry.
    #[test]
    fn cache_plan_preferred() {
        let plan = plan_with(
            json!({ "from": "users", "byIds": [ID], "columns": ["id", "name"] }),
            true,
        )
        .unwrap();
        match plan {
            Plan::Cache(p) => {
                assert_eq!(p.cache_id, "kv");
                assert_eq!(p.key_pattern, "user:{id}");
                assert_eq!(p.fallback_database, "main");
                assert_eq!(p.fallback_dialect, Dialect::RowStore);
            }
            other => panic!("expected cache plan, got {}", other.strategy()),
        }
    }

    #[test]
    fn cache_skipped_when_selection_not_covered() {
        // `age` is not in the cached column subset.
        let plan = plan_with(
            json!({ "from": "users", "byIds": [ID], "columns": ["id", "age"] }),
            true,
        )
        .unwrap();
        assert_eq!(plan.strategy(), "direct");
    }

    #[test]
    fn cache_skipped_when_filters_present() {
        let plan = plan_with(
            json!({
                "from": "users", "byIds": [ID],
                "filters": [{ "column": "name", "operator": "=", "value": "Ada" }]
            }),
            true,
        )
        .unwrap();
        assert_eq!(plan.strategy(), "direct");
    }

    // Decision table row 2: one database.
    #[test]
    fn direct_plan_single_database() {
        let plan = plan_with(
            json!({ "from": "orders", "joins": [{ "table": "users" }] }),
            true,
        )
        .unwrap();
        match plan {
            Plan::Direct(p) => {
                assert_eq!(p.database, "main");
                assert_eq!(p.dialect, Dialect::RowStore);
                assert!(p.federation_catalog.is_none());
            }
            other => panic!("expected direct plan, got {}", other.strategy()),
        }
    }

    #[test]
    fn direct_lakehouse_served_through_federation_dialect() {
        let plan = plan_with(json!({ "from": "files" }), true).unwrap();
        match plan {
            Plan::Direct(p) => {
                assert_eq!(p.database, "lake");
                assert_eq!(p.dialect, Dialect::Federation);
                assert_eq!(p.federation_catalog.as_deref(), Some("iceberg"));
            }
            other => panic!("expected direct plan, got {}", other.strategy()),
        }
    }

    // Decision table row 3: replica satisfies an `hours` request.
    #[test]
    fn materialized_plan_uses_replica() {
        let plan = plan_with(
            json!({
                "from": "events", "joins": [{ "table": "users" }],
                "freshness": "hours"
            }),
            true,
        )
        .unwrap();
        match plan {
            Plan::Materialized(p) => {
                assert_eq!(p.database, "analytics");
                assert_eq!(p.dialect, Dialect::Columnar);
                assert_eq!(p.table_overrides["tbl_users"], "users_replica");
            }
            other => panic!("expected materialized plan, got {}", other.strategy()),
        }
    }

    #[test]
    fn materialized_satisfied_at_equal_lag() {
        // Sync lag is minutes; a minutes request is exactly satisfied.
        let plan = plan_with(
            json!({
                "from": "events", "joins": [{ "table": "users" }],
                "freshness": "minutes"
            }),
            false,
        )
        .unwrap();
        assert_eq!(plan.strategy(), "materialized");
    }

    // Decision table rows 4 and 5: freshness rules out the replica, so a
    // capable federation takes over.
    #[test]
    fn federated_when_replica_too_stale() {
        for freshness in ["realtime", "seconds"] {
            let plan = plan_with(
                json!({
                    "from": "events", "joins": [{ "table": "users" }],
                    "freshness": freshness
                }),
                true,
            )
            .unwrap();
            match plan {
                Plan::Federated(p) => {
                    assert_eq!(p.catalogs_by_database["main"], "pg");
                    assert_eq!(p.catalogs_by_database["analytics"], "ch");
                }
                other => panic!("expected federated plan, got {}", other.strategy()),
            }
        }
    }

    // Decision table row 6: nothing replicates orders; federation is off.
    #[test]
    fn federation_disabled_error() {
        let err = plan_with(
            json!({ "from": "orders", "joins": [{ "table": "users" }],
                    "filters": [{ "exists": true, "table": "events" }] }),
            false,
        )
        .unwrap_err();
        assert_eq!(err.code, PlannerErrorCode::FederationDisabled);
    }

    // Decision table row 7: catalogs missing.
    #[test]
    fn no_catalog_error() {
        let mut config: MetadataConfig = crate::testutil::fixture_config();
        for db in &mut config.databases {
            db.federation_catalog = None;
        }
        let snap = Snapshot::build(config, fixture_roles());
        let err = plan(
            &def(json!({ "from": "orders",
                         "filters": [{ "exists": true, "table": "events" }] })),
            &snap,
            &PlannerOptions {
                federation_enabled: true,
            },
        )
        .unwrap_err();
        assert_eq!(err.code, PlannerErrorCode::NoCatalog);
    }

    // Decision table row 8: replica exists but lag exceeds the request and
    // federation cannot step in.
    #[test]
    fn freshness_unmet_error() {
        let err = plan_with(
            json!({
                "from": "events", "joins": [{ "table": "users" }],
                "freshness": "seconds"
            }),
            false,
        )
        .unwrap_err();
        assert_eq!(err.code, PlannerErrorCode::FreshnessUnmet);
    }

    #[test]
    fn exists_targets_count_as_referenced_tables() {
        // orders + events via exists spans two databases.
        let plan = plan_with(
            json!({ "from": "users",
                    "joins": [{ "table": "orders" }],
                    "filters": [{ "exists": true, "table": "events" }],
                    "freshness": "hours" }),
            true,
        )
        .unwrap();
        // users can replicate into analytics, but orders cannot; federation.
        assert_eq!(plan.strategy(), "federated-cross-db");
    }

    #[test]
    fn materialized_tie_breaks_on_native_count() {
        // users (main) + events (analytics), hours: analytics hosts events
        // natively and users via replica; main hosts only users. Analytics
        // wins with one native table... and main never qualifies because
        // events has no sync to main.
        let plan = plan_with(
            json!({ "from": "users", "joins": [{ "table": "events" }], "freshness": "hours" }),
            false,
        )
        .unwrap();
        match plan {
            Plan::Materialized(p) => assert_eq!(p.database, "analytics"),
            other => panic!("expected materialized plan, got {}", other.strategy()),
        }
    }
}

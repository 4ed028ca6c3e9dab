//! Name resolution: walk a validated definition and produce the
//! dialect-agnostic IR, the positional parameter ledger, and the
//! logical/physical column mapping used to remap result rows.

pub mod ir;

use std::collections::HashMap;

use serde_json::Value;

use crate::access::{resolve_access, EffectiveAccess};
use crate::model::{
    relation_between, AggFunc, ColumnDef, CountedOp, ExecuteMode, ExecutionContext, ExistsFilter,
    FilterCondition, FilterGroup, FilterNode, FilterOp, HavingSpec, JoinKind, QueryDefinition,
    ScalarType, SortDirection, TableDef,
};
use crate::planner::Plan;
use crate::registry::Snapshot;

pub use ir::{
    AggregationExpr, ArrayOpKind, ColumnMapping, ColumnRef, CompareOp, CorrelatedSubquery,
    GroupLogic, HavingClause, JoinClause, OrderExpr, OrderTarget, PatternKind, ResolveMode,
    ResolvedQuery, ResolvedTable, SqlParts, TableRef, TableSource, WhereNode,
};

/// A table registered in the current resolution scope under an alias.
#[derive(Clone, Copy)]
struct Scoped<'a> {
    alias: &'a str,
    table: &'a TableDef,
}

/// Resolve a validated definition into IR. Precondition: [`crate::validator::validate`]
/// accepted the definition under the same snapshot and context.
pub fn resolve(
    def: &QueryDefinition,
    context: &ExecutionContext,
    snapshot: &Snapshot,
    plan: &Plan,
) -> ResolvedQuery {
    let from = snapshot
        .table_by_logical(&def.from)
        .expect("definition was validated");

    let mut r = Resolver {
        snapshot,
        context,
        plan,
        params: Vec::new(),
        sub_counter: 0,
        access_cache: HashMap::new(),
        tables: Vec::new(),
    };

    // Main-scope aliases are positional: from, then joins in declaration
    // order.
    let mut aliases: Vec<String> = vec!["t0".to_string()];
    let mut scope_tables: Vec<&TableDef> = vec![from];
    let mut join_specs: Vec<&crate::model::JoinSpec> = Vec::new();
    for (i, spec) in def.joins.iter().enumerate() {
        let table = snapshot
            .table_by_logical(&spec.table)
            .expect("definition was validated");
        aliases.push(format!("t{}", i + 1));
        scope_tables.push(table);
        join_specs.push(spec);
    }
    let scope: Vec<Scoped> = aliases
        .iter()
        .zip(scope_tables.iter())
        .map(|(alias, table)| Scoped { alias, table })
        .collect();

    for entry in &scope {
        r.register_table(entry);
    }

    // Joins resolve through declared relations, direct first, then through
    // any table joined earlier.
    let mut joins: Vec<JoinClause> = Vec::new();
    for (i, spec) in join_specs.iter().enumerate() {
        let target = scope[i + 1];
        let anchor = std::iter::once(&scope[0])
            .chain(scope[1..=i].iter())
            .find(|s| relation_between(s.table, target.table).is_some())
            .expect("definition was validated");
        let (owner, rel, other) =
            relation_between(anchor.table, target.table).expect("checked above");

        let (owner_alias, other_alias) = if owner.id == anchor.table.id {
            (anchor.alias, target.alias)
        } else {
            (target.alias, anchor.alias)
        };
        let left = ColumnRef::new(
            owner_alias,
            physical_column(owner, &rel.from_column),
        );
        let right = ColumnRef::new(
            other_alias,
            physical_column(other, &rel.references_column),
        );

        let kind = spec
            .join_type
            .as_deref()
            .and_then(JoinKind::parse)
            .unwrap_or(JoinKind::Left);

        joins.push(JoinClause {
            kind,
            table: r.table_ref(target.table, target.alias),
            left,
            right,
        });
    }

    let count_mode = def.execute_mode == ExecuteMode::Count;

    let (select, column_mappings) = if count_mode {
        (Vec::new(), Vec::new())
    } else {
        r.build_select(def, &scope, join_specs.as_slice())
    };

    // WHERE: byIds, then top-level filters, then join-scoped filters, as one
    // conjunction.
    let mut conjuncts: Vec<WhereNode> = Vec::new();
    if let Some(ids) = &def.by_ids {
        let pk_name = &from.primary_key[0];
        let pk = from.column(pk_name).expect("validated config");
        let param = r.push_param(Value::Array(ids.clone()));
        conjuncts.push(WhereNode::InList {
            column: ColumnRef::new("t0", pk.physical_name.clone()),
            param,
            element_type: pk.column_type.element(),
            negated: false,
        });
    }
    for node in &def.filters {
        conjuncts.push(r.resolve_node(node, &scope[0], &scope));
    }
    for (i, spec) in join_specs.iter().enumerate() {
        for node in &spec.filters {
            conjuncts.push(r.resolve_node(node, &scope[i + 1], &scope));
        }
    }
    let where_clause = conjoin(conjuncts);

    let (group_by, having, aggregations, order_by, limit, offset, distinct) = if count_mode {
        (Vec::new(), Vec::new(), Vec::new(), Vec::new(), None, None, false)
    } else {
        let group_by = def
            .group_by
            .iter()
            .map(|name| r.resolve_bare_column(name, &scope))
            .collect();
        let aggregations = r.build_aggregations(def, &scope);
        let having = def
            .having
            .iter()
            .map(|spec| r.resolve_having(spec, def, &scope))
            .collect();
        let order_by = def
            .order_by
            .iter()
            .map(|spec| {
                let target = if def.aggregations.iter().any(|a| a.alias == spec.column) {
                    OrderTarget::Alias(spec.column.clone())
                } else {
                    OrderTarget::Column(r.resolve_bare_column(&spec.column, &scope))
                };
                OrderExpr {
                    target,
                    direction: spec
                        .direction
                        .as_deref()
                        .and_then(SortDirection::parse)
                        .unwrap_or(SortDirection::Asc),
                }
            })
            .collect();
        (
            group_by,
            having,
            aggregations,
            order_by,
            def.limit,
            def.offset,
            def.distinct,
        )
    };

    let parts = SqlParts {
        select,
        distinct,
        from: r.table_ref(from, "t0"),
        joins,
        where_clause,
        group_by,
        having,
        aggregations,
        order_by,
        limit,
        offset,
        count_mode,
    };

    ResolvedQuery {
        parts,
        params: r.params,
        column_mappings,
        tables: r.tables,
        mode: if count_mode {
            ResolveMode::Count
        } else {
            ResolveMode::Data
        },
    }
}

fn physical_column(table: &TableDef, logical: &str) -> String {
    table
        .column(logical)
        .map(|c| c.physical_name.clone())
        .expect("validated config")
}

fn conjoin(mut nodes: Vec<WhereNode>) -> Option<WhereNode> {
    match nodes.len() {
        0 => None,
        1 => nodes.pop(),
        _ => Some(WhereNode::Group {
            logic: GroupLogic::And,
            negated: false,
            children: nodes,
        }),
    }
}

fn compare_op(op: FilterOp) -> CompareOp {
    match op {
        FilterOp::Eq => CompareOp::Eq,
        FilterOp::Neq => CompareOp::Neq,
        FilterOp::Lt => CompareOp::Lt,
        FilterOp::Gt => CompareOp::Gt,
        FilterOp::Lte => CompareOp::Lte,
        FilterOp::Gte => CompareOp::Gte,
        other => unreachable!("{other:?} is not a comparison"),
    }
}

struct Resolver<'a> {
    snapshot: &'a Snapshot,
    context: &'a ExecutionContext,
    plan: &'a Plan,
    params: Vec<Value>,
    sub_counter: usize,
    access_cache: HashMap<String, EffectiveAccess>,
    tables: Vec<ResolvedTable>,
}

impl<'a> Resolver<'a> {
    fn push_param(&mut self, value: Value) -> usize {
        self.params.push(value);
        self.params.len() - 1
    }

    fn access(&mut self, table: &TableDef) -> EffectiveAccess {
        if let Some(access) = self.access_cache.get(&table.id) {
            return access.clone();
        }
        let access = resolve_access(table, self.context, self.snapshot);
        self.access_cache.insert(table.id.clone(), access.clone());
        access
    }

    /// Physical name at the planned site, plus whether it is a replica.
    fn physical_for(&self, table: &TableDef) -> (String, TableSource) {
        if let Plan::Materialized(p) = self.plan {
            if let Some(replica) = p.table_overrides.get(&table.id) {
                return (replica.clone(), TableSource::Materialized);
            }
        }
        (table.physical_name.clone(), TableSource::Original)
    }

    fn catalog_for(&self, table: &TableDef) -> Option<String> {
        match self.plan {
            Plan::Direct(p) => p.federation_catalog.clone(),
            Plan::Materialized(p) => p.federation_catalog.clone(),
            Plan::Federated(p) => p.catalogs_by_database.get(&table.database_id).cloned(),
            Plan::Cache(p) => p.fallback_catalog.clone(),
        }
    }

    fn table_ref(&self, table: &TableDef, alias: &str) -> TableRef {
        let (physical_name, _) = self.physical_for(table);
        TableRef {
            physical_name,
            alias: alias.to_string(),
            catalog: self.catalog_for(table),
        }
    }

    fn register_table(&mut self, scoped: &Scoped<'_>) {
        let (physical_name, source) = self.physical_for(scoped.table);
        self.tables.push(ResolvedTable {
            table_id: scoped.table.id.clone(),
            logical_name: scoped.table.logical_name.clone(),
            alias: scoped.alias.to_string(),
            physical_name,
            source,
        });
    }

    /// SELECT candidates: explicit columns where listed, otherwise every
    /// allowed column; an explicit empty list on a join contributes nothing.
    /// Logical names contributed by more than one table come out qualified.
    fn build_select<'s>(
        &mut self,
        def: &QueryDefinition,
        scope: &[Scoped<'s>],
        join_specs: &[&crate::model::JoinSpec],
    ) -> (Vec<ColumnRef>, Vec<ColumnMapping>) {
        let mut candidates: Vec<(Scoped<'s>, &'s ColumnDef)> = Vec::new();

        let from = scope[0];
        let from_access = self.access(from.table);
        match &def.columns {
            Some(columns) => {
                for name in columns {
                    let column = from.table.column(name).expect("definition was validated");
                    candidates.push((from, column));
                }
            }
            None => {
                for column in &from.table.columns {
                    if from_access.column_allowed(&column.logical_name) {
                        candidates.push((from, column));
                    }
                }
            }
        }

        for (i, spec) in join_specs.iter().enumerate() {
            let scoped = scope[i + 1];
            let access = self.access(scoped.table);
            match &spec.columns {
                Some(columns) => {
                    for name in columns {
                        let column = scoped.table.column(name).expect("definition was validated");
                        candidates.push((scoped, column));
                    }
                }
                None => {
                    for column in &scoped.table.columns {
                        if access.column_allowed(&column.logical_name) {
                            candidates.push((scoped, column));
                        }
                    }
                }
            }
        }

        let mut contributors: HashMap<&str, usize> = HashMap::new();
        for (_, column) in &candidates {
            *contributors.entry(column.logical_name.as_str()).or_default() += 1;
        }

        let mut select = Vec::with_capacity(candidates.len());
        let mut mappings = Vec::with_capacity(candidates.len());
        for (scoped, column) in candidates {
            let access = self.access(scoped.table);
            let collides = contributors[column.logical_name.as_str()] > 1;
            let logical_name = if collides {
                format!("{}.{}", scoped.table.logical_name, column.logical_name)
            } else {
                column.logical_name.clone()
            };
            let masked = access.masked_columns.contains(&column.logical_name);

            select.push(ColumnRef::new(scoped.alias, column.physical_name.clone()));
            mappings.push(ColumnMapping {
                physical_name: column.physical_name.clone(),
                logical_name,
                table_alias: scoped.alias.to_string(),
                table_logical_name: scoped.table.logical_name.clone(),
                column_type: column.column_type,
                nullable: column.nullable,
                masked,
                masking_fn: access.masking_by_column.get(&column.logical_name).copied(),
            });
        }
        (select, mappings)
    }

    fn build_aggregations(
        &mut self,
        def: &QueryDefinition,
        scope: &[Scoped<'_>],
    ) -> Vec<AggregationExpr> {
        def.aggregations
            .iter()
            .map(|agg| {
                let func = AggFunc::parse(&agg.function).expect("definition was validated");
                let column = agg.column.as_ref().map(|name| {
                    let scoped = match &agg.table {
                        None => scope[0],
                        Some(table_name) => *scope
                            .iter()
                            .find(|s| s.table.logical_name == *table_name)
                            .expect("definition was validated"),
                    };
                    ColumnRef::new(scoped.alias, physical_column(scoped.table, name))
                });
                AggregationExpr {
                    func,
                    column,
                    alias: agg.alias.clone(),
                }
            })
            .collect()
    }

    /// A bare (unqualified) column name used by groupBy/orderBy: the first
    /// scope table carrying it wins.
    fn resolve_bare_column(&self, name: &str, scope: &[Scoped<'_>]) -> ColumnRef {
        let scoped = scope
            .iter()
            .find(|s| s.table.column(name).is_some())
            .expect("definition was validated");
        ColumnRef::new(scoped.alias, physical_column(scoped.table, name))
    }

    fn resolve_node<'s>(
        &mut self,
        node: &FilterNode,
        default: &Scoped<'s>,
        scope: &[Scoped<'s>],
    ) -> WhereNode {
        match node {
            FilterNode::Group(group) => self.resolve_group(group, default, scope),
            FilterNode::Exists(exists) => self.resolve_exists(exists, scope),
            FilterNode::Condition(cond) => self.resolve_condition(cond, default, scope),
        }
    }

    fn resolve_group<'s>(
        &mut self,
        group: &FilterGroup,
        default: &Scoped<'s>,
        scope: &[Scoped<'s>],
    ) -> WhereNode {
        let logic = if group.logic == "or" {
            GroupLogic::Or
        } else {
            GroupLogic::And
        };
        let children = group
            .filters
            .iter()
            .map(|child| self.resolve_node(child, default, scope))
            .collect();
        WhereNode::Group {
            logic,
            negated: group.not,
            children,
        }
    }

    fn resolve_exists(&mut self, exists: &ExistsFilter, parents: &[Scoped<'_>]) -> WhereNode {
        let target = self
            .snapshot
            .table_by_logical(&exists.table)
            .expect("definition was validated");

        let anchor = parents
            .iter()
            .find(|p| relation_between(p.table, target).is_some())
            .expect("definition was validated");
        let (owner, rel, _) = relation_between(anchor.table, target).expect("checked above");

        let alias = format!("s{}", self.sub_counter);
        self.sub_counter += 1;

        let (outer, inner) = if owner.id == anchor.table.id {
            (
                ColumnRef::new(anchor.alias, physical_column(anchor.table, &rel.from_column)),
                ColumnRef::new(alias.as_str(), physical_column(target, &rel.references_column)),
            )
        } else {
            (
                ColumnRef::new(
                    anchor.alias,
                    physical_column(anchor.table, &rel.references_column),
                ),
                ColumnRef::new(alias.as_str(), physical_column(target, &rel.from_column)),
            )
        };

        let (physical_name, source) = self.physical_for(target);
        self.tables.push(ResolvedTable {
            table_id: target.id.clone(),
            logical_name: target.logical_name.clone(),
            alias: alias.clone(),
            physical_name,
            source,
        });

        let sub_scope = [Scoped {
            alias: &alias,
            table: target,
        }];
        let nested: Vec<WhereNode> = exists
            .filters
            .iter()
            .map(|node| self.resolve_node(node, &sub_scope[0], &sub_scope))
            .collect();

        let subquery = CorrelatedSubquery {
            from: self.table_ref(target, &alias),
            outer,
            inner,
            where_clause: conjoin(nested).map(Box::new),
        };

        match &exists.count {
            Some(count) => {
                let op = CountedOp::parse(&count.operator).expect("definition was validated");
                let param = self.push_param(count.value.clone());
                WhereNode::CountedExists {
                    subquery,
                    op,
                    param,
                }
            }
            None => WhereNode::Exists {
                negated: !exists.exists,
                subquery,
            },
        }
    }

    fn resolve_condition<'s>(
        &mut self,
        cond: &FilterCondition,
        default: &Scoped<'s>,
        scope: &[Scoped<'s>],
    ) -> WhereNode {
        let scoped = match cond.table.as_deref() {
            None => *default,
            Some(name) => *scope
                .iter()
                .find(|s| s.table.logical_name == name)
                .expect("definition was validated"),
        };
        let column_def = scoped
            .table
            .column(&cond.column)
            .expect("definition was validated");
        let column = ColumnRef::new(scoped.alias, column_def.physical_name.clone());
        let scalar = column_def.column_type.element();
        let op = FilterOp::parse(&cond.operator).expect("definition was validated");

        if let Some(target) = &cond.compare_column {
            let target_scoped = match target.table.as_deref() {
                None => *default,
                Some(name) => *scope
                    .iter()
                    .find(|s| s.table.logical_name == name)
                    .expect("definition was validated"),
            };
            let right = ColumnRef::new(
                target_scoped.alias,
                physical_column(target_scoped.table, &target.column),
            );
            return WhereNode::ColumnCompare {
                left: column,
                op: compare_op(op),
                right,
            };
        }

        let value = || cond.value.clone().expect("definition was validated");

        match op {
            FilterOp::Eq | FilterOp::Neq | FilterOp::Lt | FilterOp::Gt | FilterOp::Lte
            | FilterOp::Gte => {
                let param = self.push_param(value());
                WhereNode::Compare {
                    column,
                    op: compare_op(op),
                    param,
                    value_type: scalar,
                }
            }
            FilterOp::In | FilterOp::NotIn => {
                let param = self.push_param(value());
                WhereNode::InList {
                    column,
                    param,
                    element_type: scalar,
                    negated: op == FilterOp::NotIn,
                }
            }
            FilterOp::Between | FilterOp::NotBetween => {
                let bounds = value();
                let low = self.push_param(bounds["from"].clone());
                let high = self.push_param(bounds["to"].clone());
                WhereNode::Between {
                    column,
                    low,
                    high,
                    value_type: scalar,
                    negated: op == FilterOp::NotBetween,
                }
            }
            FilterOp::IsNull | FilterOp::IsNotNull => WhereNode::NullCheck {
                column,
                negated: op == FilterOp::IsNotNull,
            },
            FilterOp::StartsWith | FilterOp::StartsWithIgnoreCase => {
                let param = self.push_param(value());
                WhereNode::Pattern {
                    column,
                    kind: PatternKind::StartsWith,
                    param,
                    case_insensitive: op.is_case_insensitive_pattern(),
                }
            }
            FilterOp::EndsWith | FilterOp::EndsWithIgnoreCase => {
                let param = self.push_param(value());
                WhereNode::Pattern {
                    column,
                    kind: PatternKind::EndsWith,
                    param,
                    case_insensitive: op.is_case_insensitive_pattern(),
                }
            }
            FilterOp::Contains | FilterOp::ContainsIgnoreCase => {
                let param = self.push_param(value());
                WhereNode::Pattern {
                    column,
                    kind: PatternKind::Contains,
                    param,
                    case_insensitive: op.is_case_insensitive_pattern(),
                }
            }
            FilterOp::LevenshteinLte => {
                let spec = value();
                let text_param = self.push_param(spec["text"].clone());
                let distance_param = self.push_param(spec["maxDistance"].clone());
                WhereNode::Levenshtein {
                    column,
                    text_param,
                    distance_param,
                }
            }
            FilterOp::ArrayContains => {
                let param = self.push_param(value());
                WhereNode::ArrayOp {
                    column,
                    op: ArrayOpKind::Contains,
                    param: Some(param),
                    element_type: scalar,
                }
            }
            FilterOp::ArrayContainsAll | FilterOp::ArrayContainsAny => {
                let param = self.push_param(value());
                WhereNode::ArrayOp {
                    column,
                    op: if op == FilterOp::ArrayContainsAll {
                        ArrayOpKind::ContainsAll
                    } else {
                        ArrayOpKind::ContainsAny
                    },
                    param: Some(param),
                    element_type: scalar,
                }
            }
            FilterOp::ArrayIsEmpty | FilterOp::ArrayIsNotEmpty => WhereNode::ArrayOp {
                column,
                op: if op == FilterOp::ArrayIsEmpty {
                    ArrayOpKind::IsEmpty
                } else {
                    ArrayOpKind::IsNotEmpty
                },
                param: None,
                element_type: scalar,
            },
        }
    }

    fn resolve_having(
        &mut self,
        spec: &HavingSpec,
        def: &QueryDefinition,
        scope: &[Scoped<'_>],
    ) -> HavingClause {
        let op = FilterOp::parse(&spec.operator).expect("definition was validated");
        let agg = def
            .aggregations
            .iter()
            .find(|a| a.alias == spec.column)
            .expect("definition was validated");
        let value_type = having_value_type(agg, scope);

        match op {
            FilterOp::IsNull | FilterOp::IsNotNull => HavingClause::NullCheck {
                alias: spec.column.clone(),
                negated: op == FilterOp::IsNotNull,
            },
            FilterOp::In | FilterOp::NotIn => {
                let param =
                    self.push_param(spec.value.clone().expect("definition was validated"));
                HavingClause::InList {
                    alias: spec.column.clone(),
                    param,
                    element_type: value_type,
                    negated: op == FilterOp::NotIn,
                }
            }
            FilterOp::Between | FilterOp::NotBetween => {
                let bounds = spec.value.clone().expect("definition was validated");
                let low = self.push_param(bounds["from"].clone());
                let high = self.push_param(bounds["to"].clone());
                HavingClause::Between {
                    alias: spec.column.clone(),
                    low,
                    high,
                    value_type,
                    negated: op == FilterOp::NotBetween,
                }
            }
            _ => {
                let param =
                    self.push_param(spec.value.clone().expect("definition was validated"));
                HavingClause::Compare {
                    alias: spec.column.clone(),
                    op: compare_op(op),
                    param,
                    value_type,
                }
            }
        }
    }
}

/// COUNT compares as int, SUM/AVG as decimal, MIN/MAX as the column type.
fn having_value_type(agg: &crate::model::AggregationSpec, scope: &[Scoped<'_>]) -> ScalarType {
    match AggFunc::parse(&agg.function).expect("definition was validated") {
        AggFunc::Count => ScalarType::Int,
        AggFunc::Sum | AggFunc::Avg => ScalarType::Decimal,
        AggFunc::Min | AggFunc::Max => {
            let scoped = match &agg.table {
                None => &scope[0],
                Some(name) => scope
                    .iter()
                    .find(|s| s.table.logical_name == *name)
                    .expect("definition was validated"),
            };
            agg.column
                .as_deref()
                .and_then(|c| scoped.table.column(c))
                .map(|c| c.column_type.element())
                .unwrap_or(ScalarType::Decimal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{plan, PlannerOptions};
    use crate::testutil::{admin_ctx, fixture_snapshot, support_ctx};
    use serde_json::json;

    fn resolved(v: serde_json::Value) -> ResolvedQuery {
        let snap = fixture_snapshot();
        let ctx = admin_ctx();
        let def: QueryDefinition = serde_json::from_value(v).unwrap();
        crate::validator::validate(&def, &ctx, &snap).expect("fixture query must validate");
        let plan = plan(&def, &snap, &PlannerOptions::default()).unwrap();
        resolve(&def, &ctx, &snap, &plan)
    }

    #[test]
    fn aliases_are_positional() {
        let r = resolved(json!({
            "from": "orders",
            "columns": ["id"],
            "joins": [{ "table": "users", "columns": [] },
                      { "table": "items", "columns": [] }]
        }));
        assert_eq!(r.parts.from.alias, "t0");
        assert_eq!(r.parts.joins[0].table.alias, "t1");
        assert_eq!(r.parts.joins[1].table.alias, "t2");
        assert_eq!(r.parts.from.physical_name, "public.orders");
    }

    #[test]
    fn join_columns_follow_relation_ownership() {
        let r = resolved(json!({
            "from": "orders", "columns": ["id"],
            "joins": [{ "table": "users", "columns": [] }]
        }));
        let join = &r.parts.joins[0];
        // orders owns the relation: left is orders.user_id, right users.id.
        assert_eq!(join.left, ColumnRef::new("t0", "user_id"));
        assert_eq!(join.right, ColumnRef::new("t1", "id"));
        assert_eq!(join.kind, JoinKind::Left);
    }

    #[test]
    fn select_all_respects_access() {
        let snap = fixture_snapshot();
        let ctx = support_ctx(); // users: all columns, email masked
        let def: QueryDefinition = serde_json::from_value(json!({ "from": "users" })).unwrap();
        crate::validator::validate(&def, &ctx, &snap).unwrap();
        let p = plan(&def, &snap, &PlannerOptions::default()).unwrap();
        let r = resolve(&def, &ctx, &snap, &p);

        let logical: Vec<&str> = r.column_mappings.iter().map(|m| m.logical_name.as_str()).collect();
        assert_eq!(logical, vec!["id", "email", "name", "age", "tags"]);
        let email = &r.column_mappings[1];
        assert!(email.masked);
        assert_eq!(email.physical_name, "email_addr");
    }

    #[test]
    fn collision_qualifies_both_sides() {
        let r = resolved(json!({
            "from": "orders", "joins": [{ "table": "users" }]
        }));
        let names: Vec<&str> = r.column_mappings.iter().map(|m| m.logical_name.as_str()).collect();
        assert!(names.contains(&"orders.id"));
        assert!(names.contains(&"users.id"));
        assert!(!names.contains(&"id"));
        // Non-colliding names stay bare.
        assert!(names.contains(&"status"));
        assert!(names.contains(&"name"));
    }

    #[test]
    fn by_ids_becomes_in_predicate_on_primary_key() {
        let id = "0d3ee1a6-5b7a-41b2-bceb-8b8d8b4e8a77";
        let r = resolved(json!({ "from": "orders", "columns": ["id"], "byIds": [id],
                                  "filters": [{ "column": "status", "operator": "=",
                                                "value": "active" }] }));
        match r.parts.where_clause.as_ref().unwrap() {
            WhereNode::Group { logic: GroupLogic::And, children, .. } => {
                match &children[0] {
                    WhereNode::InList { column, param, negated: false, .. } => {
                        assert_eq!(column, &ColumnRef::new("t0", "id"));
                        assert_eq!(r.params[*param], json!([id]));
                    }
                    other => panic!("expected in-list first, got {other:?}"),
                }
            }
            other => panic!("expected conjunction, got {other:?}"),
        }
    }

    #[test]
    fn literals_only_reach_the_ledger() {
        let r = resolved(json!({
            "from": "orders", "columns": ["id"],
            "filters": [
                { "column": "status", "operator": "in", "value": ["a", "b"] },
                { "column": "total", "operator": "between",
                  "value": { "from": 5, "to": 10 } },
                { "column": "status", "operator": "startsWith", "value": "pre" }
            ]
        }));
        assert_eq!(
            r.params,
            vec![json!(["a", "b"]), json!(5), json!(10), json!("pre")]
        );
    }

    #[test]
    fn exists_builds_correlated_subquery() {
        let r = resolved(json!({
            "from": "orders", "columns": ["id"],
            "filters": [{ "exists": true, "table": "items",
                          "filters": [{ "column": "sku", "operator": "=", "value": "A1" }] }]
        }));
        match r.parts.where_clause.as_ref().unwrap() {
            WhereNode::Exists { negated: false, subquery } => {
                assert_eq!(subquery.from.alias, "s0");
                assert_eq!(subquery.from.physical_name, "public.order_items");
                // items owns the fk: inner is s0.order_id, outer t0.id.
                assert_eq!(subquery.inner, ColumnRef::new("s0", "order_id"));
                assert_eq!(subquery.outer, ColumnRef::new("t0", "id"));
                assert!(subquery.where_clause.is_some());
            }
            other => panic!("expected exists, got {other:?}"),
        }
        assert_eq!(r.params, vec![json!("A1")]);
    }

    #[test]
    fn counted_exists_keeps_count_in_ledger() {
        let r = resolved(json!({
            "from": "orders", "columns": ["id"],
            "filters": [{ "exists": true, "table": "items",
                          "count": { "operator": ">=", "value": 3 } }]
        }));
        match r.parts.where_clause.as_ref().unwrap() {
            WhereNode::CountedExists { op, param, .. } => {
                assert_eq!(*op, CountedOp::Gte);
                assert_eq!(r.params[*param], json!(3));
            }
            other => panic!("expected counted exists, got {other:?}"),
        }
    }

    #[test]
    fn count_mode_clears_projection() {
        let r = resolved(json!({
            "from": "orders",
            "columns": ["id", "status"],
            "filters": [{ "column": "status", "operator": "=", "value": "x" }],
            "orderBy": [{ "column": "status" }],
            "limit": 10,
            "distinct": true,
            "executeMode": "count"
        }));
        assert_eq!(r.mode, ResolveMode::Count);
        assert!(r.parts.count_mode);
        assert!(r.parts.select.is_empty());
        assert!(r.parts.order_by.is_empty());
        assert!(r.parts.limit.is_none());
        assert!(!r.parts.distinct);
        // The filter still applies.
        assert!(r.parts.where_clause.is_some());
        assert_eq!(r.params, vec![json!("x")]);
    }

    #[test]
    fn order_by_alias_is_preserved() {
        let r = resolved(json!({
            "from": "orders", "columns": ["status"], "groupBy": ["status"],
            "aggregations": [{ "function": "count", "alias": "n" }],
            "orderBy": [{ "column": "n", "direction": "desc" }]
        }));
        match &r.parts.order_by[0].target {
            OrderTarget::Alias(alias) => assert_eq!(alias, "n"),
            other => panic!("expected alias target, got {other:?}"),
        }
        assert_eq!(r.parts.order_by[0].direction, SortDirection::Desc);
    }

    #[test]
    fn materialized_plan_overrides_physical_names() {
        let snap = fixture_snapshot();
        let ctx = admin_ctx();
        let def: QueryDefinition = serde_json::from_value(json!({
            "from": "events", "columns": ["id"],
            "joins": [{ "table": "users", "columns": ["name"] }],
            "freshness": "hours"
        }))
        .unwrap();
        crate::validator::validate(&def, &ctx, &snap).unwrap();
        let p = plan(&def, &snap, &PlannerOptions::default()).unwrap();
        let r = resolve(&def, &ctx, &snap, &p);

        assert_eq!(r.parts.from.physical_name, "app_events");
        assert_eq!(r.parts.joins[0].table.physical_name, "users_replica");
        let users = r.tables.iter().find(|t| t.table_id == "tbl_users").unwrap();
        assert_eq!(users.source, TableSource::Materialized);
    }

    #[test]
    fn federated_plan_attaches_catalogs() {
        let snap = fixture_snapshot();
        let ctx = admin_ctx();
        let def: QueryDefinition = serde_json::from_value(json!({
            "from": "events", "columns": ["id"],
            "joins": [{ "table": "users", "columns": ["name"] }],
            "freshness": "seconds"
        }))
        .unwrap();
        crate::validator::validate(&def, &ctx, &snap).unwrap();
        let p = plan(&def, &snap, &PlannerOptions::default()).unwrap();
        let r = resolve(&def, &ctx, &snap, &p);

        assert_eq!(r.parts.from.catalog.as_deref(), Some("ch"));
        assert_eq!(r.parts.joins[0].table.catalog.as_deref(), Some("pg"));
    }

    #[test]
    fn resolution_is_idempotent() {
        let build = || {
            resolved(json!({
                "from": "orders", "columns": ["id", "status"],
                "filters": [
                    { "column": "status", "operator": "in", "value": ["a", "b"] },
                    { "exists": true, "table": "items" }
                ],
                "orderBy": [{ "column": "id" }]
            }))
        };
        let a = build();
        let b = build();
        assert_eq!(a.params, b.params);
        assert_eq!(format!("{:?}", a.parts), format!("{:?}", b.parts));
    }
}

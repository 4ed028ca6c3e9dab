//! Query validation: every semantic rule runs and every violation is
//! collected before returning. The single exception is the unknown-`from`
//! check, which short-circuits because nothing downstream can resolve
//! without the root table.

mod filters;

use std::collections::HashMap;

use serde_json::json;

use crate::access::{resolve_access, EffectiveAccess};
use crate::error::{ValidationError, ValidationErrorCode, ValidationIssue};
use crate::model::{
    relation_between, AggFunc, AggregationSpec, ExecutionContext, FilterOp, JoinKind,
    QueryDefinition, ScalarType, SortDirection, TableDef,
};
use crate::registry::Snapshot;

pub(crate) use filters::{value_matches_scalar, FilterScope};

/// Validate a definition against a snapshot and caller context.
pub fn validate(
    def: &QueryDefinition,
    context: &ExecutionContext,
    snapshot: &Snapshot,
) -> Result<(), ValidationError> {
    // Rule 1: the root table must resolve; nothing else can be checked
    // against an unknown table, so this is the one short-circuit.
    let Some(from) = snapshot.table_by_logical(&def.from) else {
        return Err(ValidationError::new(
            &def.from,
            vec![ValidationIssue::new(
                ValidationErrorCode::UnknownTable,
                format!("unknown table '{}'", def.from),
                json!({ "table": def.from }),
            )],
        ));
    };

    let mut v = Validator {
        snapshot,
        context,
        issues: Vec::new(),
        access_cache: HashMap::new(),
    };

    v.check_roles(context);
    v.check_table_access(from);

    let joined = v.check_joins(def, from);
    v.check_selected_columns(def, from, &joined);

    let mut scope_tables = vec![from];
    scope_tables.extend(joined.iter().map(|(_, t)| *t));
    let scope = FilterScope {
        default_table: from,
        tables: scope_tables.clone(),
        exists_parents: scope_tables.clone(),
    };
    v.check_filters(&def.filters, &scope);

    // Join-scoped filters default their qualifier to the joined table.
    for &(spec, table) in &joined {
        let join_scope = FilterScope {
            default_table: table,
            tables: scope_tables.clone(),
            exists_parents: vec![table],
        };
        v.check_filters(&spec.filters, &join_scope);
    }

    v.check_group_by(def, from, &joined);
    v.check_aggregations(def, from, &joined);
    v.check_having(def, from, &joined);
    v.check_order_by(def, from, &joined);
    v.check_by_ids(def, from);
    v.check_limit(def);

    if v.issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(&def.from, v.issues))
    }
}

pub(crate) struct Validator<'a> {
    pub(crate) snapshot: &'a Snapshot,
    pub(crate) context: &'a ExecutionContext,
    pub(crate) issues: Vec<ValidationIssue>,
    access_cache: HashMap<String, EffectiveAccess>,
}

impl<'a> Validator<'a> {
    pub(crate) fn push(
        &mut self,
        code: ValidationErrorCode,
        message: impl Into<String>,
        detail: serde_json::Value,
    ) {
        self.issues.push(ValidationIssue::new(code, message, detail));
    }

    pub(crate) fn access(&mut self, table: &TableDef) -> EffectiveAccess {
        if let Some(cached) = self.access_cache.get(&table.id) {
            return cached.clone();
        }
        let access = resolve_access(table, self.context, self.snapshot);
        self.access_cache.insert(table.id.clone(), access.clone());
        access
    }

    // Rule 13: every role id on the context must exist in the catalog.
    fn check_roles(&mut self, context: &ExecutionContext) {
        let unknown: Vec<String> = context
            .role_ids()
            .filter(|id| self.snapshot.role(id).is_none())
            .map(str::to_string)
            .collect();
        for role in unknown {
            self.push(
                ValidationErrorCode::UnknownRole,
                format!("unknown role '{role}'"),
                json!({ "role": role }),
            );
        }
    }

    // Rule 3 for a single table.
    pub(crate) fn check_table_access(&mut self, table: &TableDef) -> bool {
        let access = self.access(table);
        if !access.allowed {
            let name = table.logical_name.clone();
            self.push(
                ValidationErrorCode::AccessDenied,
                format!("access to table '{name}' is denied"),
                json!({ "table": name }),
            );
            return false;
        }
        true
    }

    // Rules 2 and 4 for a column reference on a known table.
    pub(crate) fn check_column(&mut self, table: &TableDef, column: &str) -> bool {
        if table.column(column).is_none() {
            self.push(
                ValidationErrorCode::UnknownColumn,
                format!(
                    "column '{column}' does not exist on table '{}'",
                    table.logical_name
                ),
                json!({ "table": table.logical_name, "column": column }),
            );
            return false;
        }
        let access = self.access(table);
        if !access.column_allowed(column) {
            self.push(
                ValidationErrorCode::AccessDenied,
                format!(
                    "access to column '{column}' of table '{}' is denied",
                    table.logical_name
                ),
                json!({ "table": table.logical_name, "column": column }),
            );
            return false;
        }
        true
    }

    // Rule 6: join resolution and reachability.
    fn check_joins(
        &mut self,
        def: &'a QueryDefinition,
        from: &'a TableDef,
    ) -> Vec<(&'a crate::model::JoinSpec, &'a TableDef)> {
        let mut joined: Vec<(&crate::model::JoinSpec, &TableDef)> = Vec::new();

        for spec in &def.joins {
            if let Some(kind) = &spec.join_type {
                if JoinKind::parse(kind).is_none() {
                    self.push(
                        ValidationErrorCode::InvalidJoin,
                        format!("unknown join type '{kind}'"),
                        json!({ "table": spec.table, "type": kind }),
                    );
                }
            }

            let Some(table) = self.snapshot.table_by_logical(&spec.table) else {
                self.push(
                    ValidationErrorCode::UnknownTable,
                    format!("unknown join table '{}'", spec.table),
                    json!({ "table": spec.table }),
                );
                continue;
            };

            self.check_table_access(table);

            // Reachable from `from` or any table joined before this one.
            let reachable = relation_between(from, table).is_some()
                || joined
                    .iter()
                    .any(|(_, prev)| relation_between(prev, table).is_some());
            if !reachable {
                self.push(
                    ValidationErrorCode::InvalidJoin,
                    format!(
                        "no relation connects '{}' to '{}'",
                        table.logical_name, from.logical_name
                    ),
                    json!({ "table": table.logical_name, "from": from.logical_name }),
                );
            }

            if let Some(columns) = &spec.columns {
                for column in columns {
                    self.check_column(table, column);
                }
            }

            joined.push((spec, table));
        }

        joined
    }

    // Rules 2/4 for the explicit select list of the root table.
    fn check_selected_columns(
        &mut self,
        def: &QueryDefinition,
        from: &TableDef,
        _joined: &[(&crate::model::JoinSpec, &TableDef)],
    ) {
        if let Some(columns) = &def.columns {
            for column in columns {
                self.check_column(from, column);
            }
        }
    }

    /// The columns a data query would project: explicit lists where given,
    /// otherwise every allowed column. Mirrors the resolver's SELECT
    /// construction; rule 7 is checked against this set.
    fn select_candidates(
        &mut self,
        def: &QueryDefinition,
        from: &'a TableDef,
        joined: &[(&'a crate::model::JoinSpec, &'a TableDef)],
    ) -> Vec<(&'a TableDef, String)> {
        let mut out = Vec::new();
        let from_access = self.access(from);
        match &def.columns {
            Some(columns) => {
                out.extend(columns.iter().map(|c| (from, c.clone())));
            }
            None => out.extend(
                from.columns
                    .iter()
                    .filter(|c| from_access.column_allowed(&c.logical_name))
                    .map(|c| (from, c.logical_name.clone())),
            ),
        }
        for (spec, table) in joined {
            let access = self.access(table);
            match &spec.columns {
                Some(columns) => out.extend(columns.iter().map(|c| (*table, c.clone()))),
                None => out.extend(
                    table
                        .columns
                        .iter()
                        .filter(|c| access.column_allowed(&c.logical_name))
                        .map(|c| (*table, c.logical_name.clone())),
                ),
            }
        }
        out
    }

    // Rule 7: group-by shape.
    fn check_group_by(
        &mut self,
        def: &QueryDefinition,
        from: &'a TableDef,
        joined: &[(&'a crate::model::JoinSpec, &'a TableDef)],
    ) {
        if def.group_by.is_empty() {
            return;
        }

        for name in &def.group_by {
            let table = std::iter::once(from)
                .chain(joined.iter().map(|(_, t)| *t))
                .find(|t| t.column(name).is_some());
            match table {
                None => self.push(
                    ValidationErrorCode::UnknownColumn,
                    format!("group-by column '{name}' does not exist"),
                    json!({ "column": name }),
                ),
                Some(table) => {
                    let column = table.column(name).expect("resolved above");
                    if column.column_type.is_array() {
                        self.push(
                            ValidationErrorCode::InvalidGroupBy,
                            format!("cannot group by array column '{name}'"),
                            json!({ "column": name }),
                        );
                    }
                }
            }
        }

        let aliases: Vec<&str> = def.aggregations.iter().map(|a| a.alias.as_str()).collect();
        for (_, candidate) in self.select_candidates(def, from, joined) {
            if !def.group_by.contains(&candidate) && !aliases.contains(&candidate.as_str()) {
                self.push(
                    ValidationErrorCode::InvalidGroupBy,
                    format!("selected column '{candidate}' must appear in groupBy"),
                    json!({ "column": candidate }),
                );
            }
        }
    }

    // Rule 14: aggregation shape.
    fn check_aggregations(
        &mut self,
        def: &QueryDefinition,
        from: &'a TableDef,
        joined: &[(&'a crate::model::JoinSpec, &'a TableDef)],
    ) {
        if def.columns.as_ref().is_some_and(|c| c.is_empty()) && def.aggregations.is_empty() {
            self.push(
                ValidationErrorCode::InvalidAggregation,
                "empty column list requires aggregations",
                serde_json::Value::Null,
            );
        }

        let mut seen_aliases: Vec<&str> = Vec::new();
        for agg in &def.aggregations {
            let func = AggFunc::parse(&agg.function);
            if func.is_none() {
                self.push(
                    ValidationErrorCode::InvalidAggregation,
                    format!("unknown aggregation function '{}'", agg.function),
                    json!({ "function": agg.function }),
                );
            }

            if !crate::registry::validate::is_valid_alias(&agg.alias) {
                self.push(
                    ValidationErrorCode::InvalidAggregation,
                    format!("invalid aggregation alias '{}'", agg.alias),
                    json!({ "alias": agg.alias }),
                );
            } else if seen_aliases.contains(&agg.alias.as_str()) {
                self.push(
                    ValidationErrorCode::InvalidAggregation,
                    format!("duplicate aggregation alias '{}'", agg.alias),
                    json!({ "alias": agg.alias }),
                );
            }
            seen_aliases.push(agg.alias.as_str());

            // An alias shadowing a selected base column would make row keys
            // ambiguous.
            let selected = self.select_candidates(def, from, joined);
            if selected.iter().any(|(_, c)| *c == agg.alias) {
                self.push(
                    ValidationErrorCode::InvalidAggregation,
                    format!("aggregation alias '{}' collides with a selected column", agg.alias),
                    json!({ "alias": agg.alias }),
                );
            }

            let target = match &agg.table {
                None => Some(from),
                Some(name) => {
                    let t = std::iter::once(from)
                        .chain(joined.iter().map(|(_, t)| *t))
                        .find(|t| t.logical_name == *name);
                    if t.is_none() {
                        self.push(
                            ValidationErrorCode::InvalidAggregation,
                            format!("aggregation table '{name}' is not part of the query"),
                            json!({ "table": name }),
                        );
                    }
                    t
                }
            };

            match (&agg.column, target) {
                (Some(column), Some(table)) => {
                    if self.check_column(table, column) {
                        let is_array = table
                            .column(column)
                            .map(|c| c.column_type.is_array())
                            .unwrap_or(false);
                        if is_array && func.is_some_and(|f| f != AggFunc::Count) {
                            self.push(
                                ValidationErrorCode::InvalidAggregation,
                                format!(
                                    "'{}' cannot aggregate array column '{column}'",
                                    agg.function
                                ),
                                json!({ "function": agg.function, "column": column }),
                            );
                        }
                    }
                }
                (None, _) => {
                    if func.is_some_and(|f| f != AggFunc::Count) {
                        self.push(
                            ValidationErrorCode::InvalidAggregation,
                            format!("aggregation '{}' requires a column", agg.function),
                            json!({ "function": agg.function }),
                        );
                    }
                }
                _ => {}
            }
        }
    }

    // Rule 8: HAVING references aggregation aliases only, restricted subset.
    fn check_having(
        &mut self,
        def: &QueryDefinition,
        from: &'a TableDef,
        joined: &[(&'a crate::model::JoinSpec, &'a TableDef)],
    ) {
        for having in &def.having {
            if having.column.contains('.') {
                self.push(
                    ValidationErrorCode::InvalidHaving,
                    format!("having reference '{}' cannot be table-qualified", having.column),
                    json!({ "column": having.column }),
                );
                continue;
            }

            let Some(agg) = def.aggregations.iter().find(|a| a.alias == having.column) else {
                self.push(
                    ValidationErrorCode::InvalidHaving,
                    format!("having references '{}', which is not an aggregation alias", having.column),
                    json!({ "column": having.column }),
                );
                continue;
            };

            let Some(op) = FilterOp::parse(&having.operator) else {
                self.push(
                    ValidationErrorCode::InvalidHaving,
                    format!("unknown having operator '{}'", having.operator),
                    json!({ "operator": having.operator }),
                );
                continue;
            };
            if !op.allowed_in_having() {
                self.push(
                    ValidationErrorCode::InvalidHaving,
                    format!("operator '{}' is not allowed in having", having.operator),
                    json!({ "operator": having.operator }),
                );
                continue;
            }

            let result_type = agg_result_scalar(agg, from, joined);
            filters::check_having_value(self, having, op, result_type);
        }
    }

    // Rule 9: order-by targets and direction.
    fn check_order_by(
        &mut self,
        def: &QueryDefinition,
        from: &'a TableDef,
        joined: &[(&'a crate::model::JoinSpec, &'a TableDef)],
    ) {
        for order in &def.order_by {
            if let Some(direction) = &order.direction {
                if SortDirection::parse(direction).is_none() {
                    self.push(
                        ValidationErrorCode::InvalidOrderBy,
                        format!("unknown sort direction '{direction}'"),
                        json!({ "column": order.column, "direction": direction }),
                    );
                }
            }

            if def.aggregations.iter().any(|a| a.alias == order.column) {
                continue;
            }

            let table = std::iter::once(from)
                .chain(joined.iter().map(|(_, t)| *t))
                .find(|t| t.column(&order.column).is_some());
            match table {
                None => self.push(
                    ValidationErrorCode::UnknownColumn,
                    format!("order-by column '{}' does not exist", order.column),
                    json!({ "column": order.column }),
                ),
                Some(table) => {
                    let column = table.column(&order.column).expect("resolved above");
                    if column.column_type.is_array() {
                        self.push(
                            ValidationErrorCode::InvalidOrderBy,
                            format!("cannot order by array column '{}'", order.column),
                            json!({ "column": order.column }),
                        );
                    }
                }
            }
        }
    }

    // Rule 10: primary-key lookups.
    fn check_by_ids(&mut self, def: &QueryDefinition, from: &TableDef) {
        let Some(ids) = &def.by_ids else {
            return;
        };

        if ids.is_empty() {
            self.push(
                ValidationErrorCode::InvalidByIds,
                "byIds must not be empty",
                serde_json::Value::Null,
            );
        }
        if from.primary_key.len() != 1 {
            self.push(
                ValidationErrorCode::InvalidByIds,
                format!(
                    "byIds requires a single-column primary key; '{}' has {}",
                    from.logical_name,
                    from.primary_key.len()
                ),
                json!({ "table": from.logical_name, "primaryKey": from.primary_key }),
            );
            return;
        }
        if !def.group_by.is_empty() || !def.aggregations.is_empty() {
            self.push(
                ValidationErrorCode::InvalidByIds,
                "byIds cannot be combined with groupBy or aggregations",
                serde_json::Value::Null,
            );
        }

        if let Some(pk) = from.column(&from.primary_key[0]) {
            for id in ids {
                if !value_matches_scalar(id, pk.column_type.element()) {
                    self.push(
                        ValidationErrorCode::InvalidByIds,
                        format!("id {id} does not match the primary-key type {}", pk.column_type),
                        json!({ "id": id, "type": pk.column_type.to_string() }),
                    );
                }
            }
        }
    }

    // Rule 11: paging.
    fn check_limit(&mut self, def: &QueryDefinition) {
        if let Some(limit) = def.limit {
            if limit < 0 {
                self.push(
                    ValidationErrorCode::InvalidLimit,
                    format!("limit must be non-negative, got {limit}"),
                    json!({ "limit": limit }),
                );
            }
        }
        if let Some(offset) = def.offset {
            if offset < 0 {
                self.push(
                    ValidationErrorCode::InvalidLimit,
                    format!("offset must be non-negative, got {offset}"),
                    json!({ "offset": offset }),
                );
            }
            if def.limit.is_none() {
                self.push(
                    ValidationErrorCode::InvalidLimit,
                    "offset requires limit",
                    serde_json::Value::Null,
                );
            }
        }
    }
}

/// Result type of an aggregation: COUNT yields int, SUM/AVG decimal,
/// MIN/MAX the column's own scalar.
fn agg_result_scalar(
    agg: &AggregationSpec,
    from: &TableDef,
    joined: &[(&crate::model::JoinSpec, &TableDef)],
) -> Option<ScalarType> {
    match AggFunc::parse(&agg.function)? {
        AggFunc::Count => Some(ScalarType::Int),
        AggFunc::Sum | AggFunc::Avg => Some(ScalarType::Decimal),
        AggFunc::Min | AggFunc::Max => {
            let table = match &agg.table {
                None => from,
                Some(name) => std::iter::once(from)
                    .chain(joined.iter().map(|(_, t)| *t))
                    .find(|t| t.logical_name == *name)?,
            };
            table
                .column(agg.column.as_deref()?)
                .and_then(|c| c.column_type.scalar())
        }
    }
}

//! Filter-tree validation: operator/type compatibility, value shapes,
//! column-vs-column comparisons, and exists filters (rules 5 and 12).

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{json, Value};

use super::Validator;
use crate::error::ValidationErrorCode;
use crate::model::{
    relation_between, ColumnDef, CountedOp, ExistsFilter, FilterCondition, FilterGroup, FilterNode,
    FilterOp, HavingSpec, ScalarType, TableDef,
};

/// Name-resolution scope for one level of the filter tree.
pub(crate) struct FilterScope<'a> {
    /// Table an unqualified column refers to.
    pub default_table: &'a TableDef,
    /// Tables an explicit qualifier may name.
    pub tables: Vec<&'a TableDef>,
    /// Candidate parents an exists filter may correlate with.
    pub exists_parents: Vec<&'a TableDef>,
}

impl<'a> Validator<'a> {
    pub(crate) fn check_filters(&mut self, filters: &[FilterNode], scope: &FilterScope<'a>) {
        for node in filters {
            match node {
                FilterNode::Group(group) => self.check_group(group, scope),
                FilterNode::Exists(exists) => self.check_exists(exists, scope),
                FilterNode::Condition(cond) => self.check_condition(cond, scope),
            }
        }
    }

    fn check_group(&mut self, group: &FilterGroup, scope: &FilterScope<'a>) {
        if group.logic != "and" && group.logic != "or" {
            self.push(
                ValidationErrorCode::InvalidFilter,
                format!("unknown group logic '{}'", group.logic),
                json!({ "logic": group.logic }),
            );
        }
        if group.filters.is_empty() {
            self.push(
                ValidationErrorCode::InvalidFilter,
                "filter group must not be empty",
                Value::Null,
            );
        }
        self.check_filters(&group.filters, scope);
    }

    // Rule 12.
    fn check_exists(&mut self, exists: &ExistsFilter, scope: &FilterScope<'a>) {
        let Some(target) = self.snapshot.table_by_logical(&exists.table) else {
            self.push(
                ValidationErrorCode::UnknownTable,
                format!("unknown exists table '{}'", exists.table),
                json!({ "table": exists.table }),
            );
            return;
        };

        self.check_table_access(target);

        let related = scope
            .exists_parents
            .iter()
            .any(|parent| relation_between(parent, target).is_some());
        if !related {
            self.push(
                ValidationErrorCode::InvalidExists,
                format!(
                    "no relation connects '{}' to the enclosing query",
                    target.logical_name
                ),
                json!({ "table": target.logical_name }),
            );
        }

        if let Some(count) = &exists.count {
            if CountedOp::parse(&count.operator).is_none() {
                self.push(
                    ValidationErrorCode::InvalidExists,
                    format!("unknown count operator '{}'", count.operator),
                    json!({ "operator": count.operator }),
                );
            }
            let non_negative = count.value.as_u64().is_some();
            if !non_negative {
                self.push(
                    ValidationErrorCode::InvalidExists,
                    format!("count value must be a non-negative integer, got {}", count.value),
                    json!({ "value": count.value }),
                );
            }
        }

        // Nested filters re-validate with the target as the new parent.
        let nested = FilterScope {
            default_table: target,
            tables: vec![target],
            exists_parents: vec![target],
        };
        self.check_filters(&exists.filters, &nested);
    }

    fn resolve_qualifier(
        &mut self,
        scope: &FilterScope<'a>,
        qualifier: Option<&str>,
    ) -> Option<&'a TableDef> {
        match qualifier {
            None => Some(scope.default_table),
            Some(name) => {
                if let Some(table) = scope.tables.iter().find(|t| t.logical_name == name).copied()
                {
                    Some(table)
                } else if self.snapshot.table_by_logical(name).is_some() {
                    self.push(
                        ValidationErrorCode::InvalidFilter,
                        format!("filter references table '{name}', which is not part of the query"),
                        json!({ "table": name }),
                    );
                    None
                } else {
                    self.push(
                        ValidationErrorCode::UnknownTable,
                        format!("unknown table '{name}' in filter"),
                        json!({ "table": name }),
                    );
                    None
                }
            }
        }
    }

    // Rule 5.
    fn check_condition(&mut self, cond: &FilterCondition, scope: &FilterScope<'a>) {
        let Some(table) = self.resolve_qualifier(scope, cond.table.as_deref()) else {
            return;
        };
        if !self.check_column(table, &cond.column) {
            return;
        }
        let column = table.column(&cond.column).expect("checked above").clone();

        let Some(op) = FilterOp::parse(&cond.operator) else {
            self.push(
                ValidationErrorCode::InvalidFilter,
                format!("unknown operator '{}'", cond.operator),
                json!({ "operator": cond.operator, "column": cond.column }),
            );
            return;
        };

        if let Some(target) = &cond.compare_column {
            if cond.value.is_some() {
                self.push(
                    ValidationErrorCode::InvalidFilter,
                    "value and compareColumn are mutually exclusive",
                    json!({ "column": cond.column }),
                );
            }
            self.check_column_compare(cond, op, &column, target, scope);
            return;
        }

        self.check_operator_against_type(op, &cond.column, &column);
        self.check_value_shape(op, cond, &column);
    }

    fn check_column_compare(
        &mut self,
        cond: &FilterCondition,
        op: FilterOp,
        left: &ColumnDef,
        target: &crate::model::CompareTarget,
        scope: &FilterScope<'a>,
    ) {
        if !op.allowed_in_column_compare() {
            self.push(
                ValidationErrorCode::InvalidFilter,
                format!("operator '{}' cannot compare two columns", cond.operator),
                json!({ "operator": cond.operator }),
            );
        }

        let Some(table) = self.resolve_qualifier(scope, target.table.as_deref()) else {
            return;
        };
        if !self.check_column(table, &target.column) {
            return;
        }
        let right = table.column(&target.column).expect("checked above");

        if left.column_type.is_array() || right.column_type.is_array() {
            self.push(
                ValidationErrorCode::InvalidFilter,
                "array columns cannot be compared to other columns",
                json!({ "left": cond.column, "right": target.column }),
            );
            return;
        }
        if !left.column_type.comparable_with(&right.column_type) {
            self.push(
                ValidationErrorCode::InvalidFilter,
                format!(
                    "cannot compare {} column '{}' with {} column '{}'",
                    left.column_type, cond.column, right.column_type, target.column
                ),
                json!({
                    "left": cond.column,
                    "leftType": left.column_type.to_string(),
                    "right": target.column,
                    "rightType": right.column_type.to_string(),
                }),
            );
        }
    }

    /// Operator/type compatibility (the column side of rule 5).
    fn check_operator_against_type(&mut self, op: FilterOp, name: &str, column: &ColumnDef) {
        let mismatch = |what: &str| {
            format!(
                "operator '{}' requires {what}, but '{}' is {}",
                op.as_str(),
                name,
                column.column_type
            )
        };

        if op.is_array_op() {
            if !column.column_type.is_array() {
                self.push(
                    ValidationErrorCode::InvalidFilter,
                    mismatch("an array column"),
                    json!({ "operator": op.as_str(), "column": name }),
                );
            }
            return;
        }

        if column.column_type.is_array() {
            self.push(
                ValidationErrorCode::InvalidFilter,
                mismatch("a scalar column"),
                json!({ "operator": op.as_str(), "column": name }),
            );
            return;
        }

        let scalar = column.column_type.element();
        if (op.is_ordering() || matches!(op, FilterOp::Between | FilterOp::NotBetween))
            && !scalar.is_orderable()
        {
            self.push(
                ValidationErrorCode::InvalidFilter,
                mismatch("an orderable column"),
                json!({ "operator": op.as_str(), "column": name }),
            );
        }
        if (op.is_pattern() || op == FilterOp::LevenshteinLte) && scalar != ScalarType::String {
            self.push(
                ValidationErrorCode::InvalidFilter,
                mismatch("a string column"),
                json!({ "operator": op.as_str(), "column": name }),
            );
        }
        if op.is_null_check() && !column.nullable {
            self.push(
                ValidationErrorCode::InvalidFilter,
                format!("'{}' is not nullable", name),
                json!({ "operator": op.as_str(), "column": name }),
            );
        }
    }

    /// Value-shape checks (the value side of rule 5).
    fn check_value_shape(&mut self, op: FilterOp, cond: &FilterCondition, column: &ColumnDef) {
        let scalar = column.column_type.element();
        let value = cond.value.as_ref();

        let bad_value = |v: &mut Self, message: String| {
            v.push(
                ValidationErrorCode::InvalidValue,
                message,
                json!({ "operator": op.as_str(), "column": cond.column, "value": cond.value }),
            );
        };

        if op.takes_no_value() {
            if value.is_some_and(|v| !v.is_null()) {
                bad_value(self, format!("operator '{}' takes no value", op.as_str()));
            }
            return;
        }

        let Some(value) = value.filter(|v| !v.is_null()) else {
            bad_value(self, format!("operator '{}' requires a value", op.as_str()));
            return;
        };

        match op {
            FilterOp::Eq | FilterOp::Neq | FilterOp::Lt | FilterOp::Gt | FilterOp::Lte
            | FilterOp::Gte => {
                if !value_matches_scalar(value, scalar) {
                    bad_value(self, format!("value {value} does not match type {}", scalar.name()));
                }
            }
            FilterOp::In | FilterOp::NotIn => match value.as_array().map(Vec::as_slice) {
                None | Some([]) => {
                    bad_value(self, format!("'{}' requires a non-empty array", op.as_str()));
                }
                Some(items) => {
                    if items.iter().any(Value::is_null) {
                        bad_value(self, format!("'{}' array must not contain null", op.as_str()));
                    } else if let Some(bad) =
                        items.iter().find(|v| !value_matches_scalar(v, scalar))
                    {
                        bad_value(
                            self,
                            format!("element {bad} does not match type {}", scalar.name()),
                        );
                    }
                }
            },
            FilterOp::Between | FilterOp::NotBetween => {
                let bounds = value
                    .as_object()
                    .map(|o| (o.get("from"), o.get("to")))
                    .unwrap_or((None, None));
                match bounds {
                    (Some(from), Some(to)) if !from.is_null() && !to.is_null() => {
                        if !value_matches_scalar(from, scalar) || !value_matches_scalar(to, scalar)
                        {
                            bad_value(
                                self,
                                format!("between bounds must both be {}", scalar.name()),
                            );
                        }
                    }
                    _ => bad_value(
                        self,
                        "between requires { from, to } with both bounds set".to_string(),
                    ),
                }
            }
            FilterOp::StartsWith
            | FilterOp::EndsWith
            | FilterOp::Contains
            | FilterOp::StartsWithIgnoreCase
            | FilterOp::EndsWithIgnoreCase
            | FilterOp::ContainsIgnoreCase => {
                if !value.is_string() {
                    bad_value(self, format!("'{}' requires a string value", op.as_str()));
                }
            }
            FilterOp::LevenshteinLte => {
                let text = value.get("text").and_then(Value::as_str);
                let distance = value.get("maxDistance").and_then(Value::as_u64);
                match (text, distance) {
                    (Some(t), Some(_)) if !t.is_empty() => {}
                    _ => bad_value(
                        self,
                        "levenshteinLte requires { text: non-empty string, maxDistance: \
                         non-negative integer }"
                            .to_string(),
                    ),
                }
            }
            FilterOp::ArrayContains => {
                if !value_matches_scalar(value, scalar) {
                    bad_value(
                        self,
                        format!("value {value} does not match element type {}", scalar.name()),
                    );
                }
            }
            FilterOp::ArrayContainsAll | FilterOp::ArrayContainsAny => {
                match value.as_array().map(Vec::as_slice) {
                    None | Some([]) => {
                        bad_value(self, format!("'{}' requires a non-empty array", op.as_str()));
                    }
                    Some(items) => {
                        if let Some(bad) = items
                            .iter()
                            .find(|v| v.is_null() || !value_matches_scalar(v, scalar))
                        {
                            bad_value(
                                self,
                                format!(
                                    "element {bad} does not match element type {}",
                                    scalar.name()
                                ),
                            );
                        }
                    }
                }
            }
            FilterOp::IsNull
            | FilterOp::IsNotNull
            | FilterOp::ArrayIsEmpty
            | FilterOp::ArrayIsNotEmpty => unreachable!("handled by takes_no_value"),
        }
    }
}

/// Having values compare against aggregation results (rule 8's value side).
pub(crate) fn check_having_value(
    v: &mut Validator<'_>,
    having: &HavingSpec,
    op: FilterOp,
    result_type: Option<ScalarType>,
) {
    let value = having.value.as_ref().filter(|x| !x.is_null());
    let matches = |val: &Value| result_type.map_or(true, |t| value_matches_scalar(val, t));

    if op.is_null_check() {
        if value.is_some() {
            v.push(
                ValidationErrorCode::InvalidValue,
                format!("operator '{}' takes no value", op.as_str()),
                json!({ "column": having.column }),
            );
        }
        return;
    }

    let Some(value) = value else {
        v.push(
            ValidationErrorCode::InvalidValue,
            format!("having operator '{}' requires a value", op.as_str()),
            json!({ "column": having.column }),
        );
        return;
    };

    let ok = match op {
        FilterOp::In | FilterOp::NotIn => value
            .as_array()
            .is_some_and(|items| !items.is_empty() && items.iter().all(matches)),
        FilterOp::Between | FilterOp::NotBetween => value
            .as_object()
            .and_then(|o| Some((o.get("from")?, o.get("to")?)))
            .is_some_and(|(from, to)| matches(from) && matches(to)),
        _ => matches(value),
    };
    if !ok {
        v.push(
            ValidationErrorCode::InvalidValue,
            format!("having value {value} does not fit '{}'", having.column),
            json!({ "column": having.column, "value": value }),
        );
    }
}

/// Does a JSON literal fit the given scalar type?
pub(crate) fn value_matches_scalar(value: &Value, scalar: ScalarType) -> bool {
    match scalar {
        ScalarType::String => value.is_string(),
        ScalarType::Int => value.as_i64().is_some() || value.as_u64().is_some(),
        ScalarType::Decimal => {
            value.is_number()
                || value
                    .as_str()
                    .is_some_and(|s| !s.is_empty() && s.parse::<f64>().is_ok())
        }
        ScalarType::Boolean => value.is_boolean(),
        ScalarType::Date => value
            .as_str()
            .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
        ScalarType::Timestamp => match value {
            Value::Number(_) => true, // epoch millis/seconds
            Value::String(s) => {
                DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
            }
            _ => false,
        },
        ScalarType::Uuid => value
            .as_str()
            .is_some_and(|s| uuid::Uuid::parse_str(s).is_ok()),
    }
}

//! The external query definition: a structured, dialect-agnostic description
//! of a read. Operator, join-type, and direction strings are kept verbatim
//! here and resolved against closed catalogs during validation, so unknown
//! or malformed identifiers never reach SQL generation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::Freshness;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    /// Logical name of the root table.
    pub from: String,
    /// Selected columns of `from`; `None` selects every allowed column.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[serde(default)]
    pub filters: Vec<FilterNode>,
    /// Primary-key lookup; mutually exclusive with grouping/aggregations.
    #[serde(default)]
    pub by_ids: Option<Vec<Value>>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub having: Vec<HavingSpec>,
    #[serde(default)]
    pub aggregations: Vec<AggregationSpec>,
    #[serde(default)]
    pub order_by: Vec<OrderSpec>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub execute_mode: ExecuteMode,
    #[serde(default)]
    pub freshness: Option<Freshness>,
    #[serde(default)]
    pub debug: bool,
}

impl QueryDefinition {
    /// Logical names of every table the definition touches: `from`, joins,
    /// and exists-filter targets at any depth.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut out = vec![self.from.as_str()];
        for join in &self.joins {
            if !out.contains(&join.table.as_str()) {
                out.push(&join.table);
            }
            collect_exists_targets(&join.filters, &mut out);
        }
        collect_exists_targets(&self.filters, &mut out);
        out
    }
}

fn collect_exists_targets<'a>(filters: &'a [FilterNode], out: &mut Vec<&'a str>) {
    for node in filters {
        match node {
            FilterNode::Group(g) => collect_exists_targets(&g.filters, out),
            FilterNode::Exists(e) => {
                if !out.contains(&e.table.as_str()) {
                    out.push(&e.table);
                }
                collect_exists_targets(&e.filters, out);
            }
            FilterNode::Condition(_) => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSpec {
    /// Logical name of the joined table.
    pub table: String,
    /// `left` (default), `inner`, `right`, `full`.
    #[serde(rename = "type", default)]
    pub join_type: Option<String>,
    /// Selected columns of the joined table; `None` selects every allowed
    /// column, an empty list selects none.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Filters whose unqualified columns default to the joined table.
    #[serde(default)]
    pub filters: Vec<FilterNode>,
}

/// One node of the filter tree. Groups carry `logic` + `filters`; exists
/// filters carry the `exists` flag; everything else is a leaf condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group(FilterGroup),
    Exists(ExistsFilter),
    Condition(FilterCondition),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterGroup {
    /// `and` or `or`.
    pub logic: String,
    #[serde(default)]
    pub not: bool,
    pub filters: Vec<FilterNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistsFilter {
    /// `true` for EXISTS, `false` for NOT EXISTS.
    pub exists: bool,
    /// Logical name of the correlated table.
    pub table: String,
    #[serde(default)]
    pub filters: Vec<FilterNode>,
    /// When set, asserts the related-row count instead of bare existence.
    #[serde(default)]
    pub count: Option<CountSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountSpec {
    /// `>=`, `>`, `<`, `<=`.
    pub operator: String,
    /// Non-negative integer, validated as such.
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    /// Qualifying table (logical name); defaults to the enclosing context.
    #[serde(default)]
    pub table: Option<String>,
    pub column: String,
    pub operator: String,
    #[serde(default)]
    pub value: Option<Value>,
    /// Column-vs-column comparison target; mutually exclusive with `value`.
    #[serde(default)]
    pub compare_column: Option<CompareTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareTarget {
    #[serde(default)]
    pub table: Option<String>,
    pub column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HavingSpec {
    /// An aggregation alias; base columns and qualifiers are rejected.
    pub column: String,
    pub operator: String,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationSpec {
    /// `count`, `sum`, `avg`, `min`, `max`.
    pub function: String,
    /// Aggregated column; `None` is only valid for `count` (`COUNT(*)`).
    #[serde(default)]
    pub column: Option<String>,
    pub alias: String,
    /// Qualifying table; must be `from` or a joined table when set.
    #[serde(default)]
    pub table: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSpec {
    /// A column logical name or an aggregation alias.
    pub column: String,
    /// `asc` (default) or `desc`.
    #[serde(default)]
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecuteMode {
    #[default]
    #[serde(rename = "data")]
    Data,
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "sql-only")]
    SqlOnly,
}

// ---------------------------------------------------------------------------
// Operator catalog
// ---------------------------------------------------------------------------

/// The closed operator catalog. Input operators are strings; anything not
/// parsing into this enum is an `INVALID_FILTER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    In,
    NotIn,
    Between,
    NotBetween,
    IsNull,
    IsNotNull,
    StartsWith,
    EndsWith,
    Contains,
    StartsWithIgnoreCase,
    EndsWithIgnoreCase,
    ContainsIgnoreCase,
    LevenshteinLte,
    ArrayContains,
    ArrayContainsAll,
    ArrayContainsAny,
    ArrayIsEmpty,
    ArrayIsNotEmpty,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<FilterOp> {
        match s {
            "=" => Some(FilterOp::Eq),
            "!=" => Some(FilterOp::Neq),
            "<" => Some(FilterOp::Lt),
            ">" => Some(FilterOp::Gt),
            "<=" => Some(FilterOp::Lte),
            ">=" => Some(FilterOp::Gte),
            "in" => Some(FilterOp::In),
            "notIn" => Some(FilterOp::NotIn),
            "between" => Some(FilterOp::Between),
            "notBetween" => Some(FilterOp::NotBetween),
            "isNull" => Some(FilterOp::IsNull),
            "isNotNull" => Some(FilterOp::IsNotNull),
            "startsWith" => Some(FilterOp::StartsWith),
            "endsWith" => Some(FilterOp::EndsWith),
            "contains" => Some(FilterOp::Contains),
            "startsWithIgnoreCase" => Some(FilterOp::StartsWithIgnoreCase),
            "endsWithIgnoreCase" => Some(FilterOp::EndsWithIgnoreCase),
            "containsIgnoreCase" => Some(FilterOp::ContainsIgnoreCase),
            "levenshteinLte" => Some(FilterOp::LevenshteinLte),
            "arrayContains" => Some(FilterOp::ArrayContains),
            "arrayContainsAll" => Some(FilterOp::ArrayContainsAll),
            "arrayContainsAny" => Some(FilterOp::ArrayContainsAny),
            "arrayIsEmpty" => Some(FilterOp::ArrayIsEmpty),
            "arrayIsNotEmpty" => Some(FilterOp::ArrayIsNotEmpty),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Neq => "!=",
            FilterOp::Lt => "<",
            FilterOp::Gt => ">",
            FilterOp::Lte => "<=",
            FilterOp::Gte => ">=",
            FilterOp::In => "in",
            FilterOp::NotIn => "notIn",
            FilterOp::Between => "between",
            FilterOp::NotBetween => "notBetween",
            FilterOp::IsNull => "isNull",
            FilterOp::IsNotNull => "isNotNull",
            FilterOp::StartsWith => "startsWith",
            FilterOp::EndsWith => "endsWith",
            FilterOp::Contains => "contains",
            FilterOp::StartsWithIgnoreCase => "startsWithIgnoreCase",
            FilterOp::EndsWithIgnoreCase => "endsWithIgnoreCase",
            FilterOp::ContainsIgnoreCase => "containsIgnoreCase",
            FilterOp::LevenshteinLte => "levenshteinLte",
            FilterOp::ArrayContains => "arrayContains",
            FilterOp::ArrayContainsAll => "arrayContainsAll",
            FilterOp::ArrayContainsAny => "arrayContainsAny",
            FilterOp::ArrayIsEmpty => "arrayIsEmpty",
            FilterOp::ArrayIsNotEmpty => "arrayIsNotEmpty",
        }
    }

    /// `=` / `!=` — equality on any scalar type.
    pub fn is_equality(&self) -> bool {
        matches!(self, FilterOp::Eq | FilterOp::Neq)
    }

    /// `<` `>` `<=` `>=` — require an orderable scalar.
    pub fn is_ordering(&self) -> bool {
        matches!(self, FilterOp::Lt | FilterOp::Gt | FilterOp::Lte | FilterOp::Gte)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            FilterOp::StartsWith
                | FilterOp::EndsWith
                | FilterOp::Contains
                | FilterOp::StartsWithIgnoreCase
                | FilterOp::EndsWithIgnoreCase
                | FilterOp::ContainsIgnoreCase
        )
    }

    pub fn is_case_insensitive_pattern(&self) -> bool {
        matches!(
            self,
            FilterOp::StartsWithIgnoreCase
                | FilterOp::EndsWithIgnoreCase
                | FilterOp::ContainsIgnoreCase
        )
    }

    pub fn is_array_op(&self) -> bool {
        matches!(
            self,
            FilterOp::ArrayContains
                | FilterOp::ArrayContainsAll
                | FilterOp::ArrayContainsAny
                | FilterOp::ArrayIsEmpty
                | FilterOp::ArrayIsNotEmpty
        )
    }

    pub fn is_null_check(&self) -> bool {
        matches!(self, FilterOp::IsNull | FilterOp::IsNotNull)
    }

    /// Operators that take no right-hand value at all.
    pub fn takes_no_value(&self) -> bool {
        self.is_null_check() || matches!(self, FilterOp::ArrayIsEmpty | FilterOp::ArrayIsNotEmpty)
    }

    /// Operator subset permitted in HAVING clauses.
    pub fn allowed_in_having(&self) -> bool {
        self.is_equality()
            || self.is_ordering()
            || self.is_null_check()
            || matches!(
                self,
                FilterOp::In | FilterOp::NotIn | FilterOp::Between | FilterOp::NotBetween
            )
    }

    /// Operator subset permitted in column-vs-column comparisons.
    pub fn allowed_in_column_compare(&self) -> bool {
        self.is_equality() || self.is_ordering()
    }

    /// SQL comparison token for the six comparison operators.
    pub fn comparison_sql(&self) -> Option<&'static str> {
        match self {
            FilterOp::Eq => Some("="),
            FilterOp::Neq => Some("!="),
            FilterOp::Lt => Some("<"),
            FilterOp::Gt => Some(">"),
            FilterOp::Lte => Some("<="),
            FilterOp::Gte => Some(">="),
            _ => None,
        }
    }
}

/// Comparison operators permitted on a counted-exists filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountedOp {
    Gte,
    Gt,
    Lt,
    Lte,
}

impl CountedOp {
    pub fn parse(s: &str) -> Option<CountedOp> {
        match s {
            ">=" => Some(CountedOp::Gte),
            ">" => Some(CountedOp::Gt),
            "<" => Some(CountedOp::Lt),
            "<=" => Some(CountedOp::Lte),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            CountedOp::Gte => ">=",
            CountedOp::Gt => ">",
            CountedOp::Lt => "<",
            CountedOp::Lte => "<=",
        }
    }

    /// The grouped-HAVING form tests membership for `>=`/`>` and
    /// non-membership against the complementary predicate for `<`/`<=`.
    pub fn negated(&self) -> bool {
        matches!(self, CountedOp::Lt | CountedOp::Lte)
    }

    /// Complementary operator used when `negated()` flips IN to NOT IN.
    pub fn complement(&self) -> CountedOp {
        match self {
            CountedOp::Gte => CountedOp::Lt,
            CountedOp::Gt => CountedOp::Lte,
            CountedOp::Lt => CountedOp::Gte,
            CountedOp::Lte => CountedOp::Gt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn definition_parses_nested_filter_tree() {
        let def: QueryDefinition = serde_json::from_value(json!({
            "from": "orders",
            "columns": ["id", "status"],
            "filters": [
                { "column": "status", "operator": "=", "value": "active" },
                {
                    "logic": "or",
                    "not": true,
                    "filters": [
                        { "column": "total", "operator": ">", "value": 100 },
                        { "column": "createdAt", "operator": "isNull" }
                    ]
                },
                { "exists": true, "table": "items",
                  "filters": [{ "column": "sku", "operator": "startsWith", "value": "A" }] }
            ],
            "orderBy": [{ "column": "id", "direction": "desc" }],
            "limit": 10
        }))
        .unwrap();

        assert_eq!(def.from, "orders");
        assert!(matches!(def.filters[0], FilterNode::Condition(_)));
        match &def.filters[1] {
            FilterNode::Group(g) => {
                assert_eq!(g.logic, "or");
                assert!(g.not);
                assert_eq!(g.filters.len(), 2);
            }
            other => panic!("expected group, got {other:?}"),
        }
        match &def.filters[2] {
            FilterNode::Exists(e) => {
                assert!(e.exists);
                assert_eq!(e.table, "items");
            }
            other => panic!("expected exists, got {other:?}"),
        }
        assert_eq!(def.execute_mode, ExecuteMode::Data);
    }

    #[test]
    fn execute_mode_forms() {
        let def: QueryDefinition =
            serde_json::from_value(json!({ "from": "t", "executeMode": "sql-only" })).unwrap();
        assert_eq!(def.execute_mode, ExecuteMode::SqlOnly);
    }

    #[test]
    fn referenced_tables_includes_joins_and_exists_targets() {
        let def: QueryDefinition = serde_json::from_value(json!({
            "from": "orders",
            "joins": [{ "table": "users" }],
            "filters": [
                { "logic": "and", "filters": [
                    { "exists": true, "table": "items",
                      "filters": [{ "exists": false, "table": "refunds" }] }
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(def.referenced_tables(), vec!["orders", "users", "items", "refunds"]);
    }

    #[test]
    fn operator_catalog_round_trips() {
        for op in [
            "=", "!=", "<", ">", "<=", ">=", "in", "notIn", "between", "notBetween", "isNull",
            "isNotNull", "startsWith", "endsWith", "contains", "startsWithIgnoreCase",
            "endsWithIgnoreCase", "containsIgnoreCase", "levenshteinLte", "arrayContains",
            "arrayContainsAll", "arrayContainsAny", "arrayIsEmpty", "arrayIsNotEmpty",
        ] {
            let parsed = FilterOp::parse(op).unwrap_or_else(|| panic!("should parse {op}"));
            assert_eq!(parsed.as_str(), op);
        }
        assert!(FilterOp::parse("like").is_none());
        assert!(FilterOp::parse("=; DROP TABLE x").is_none());
    }

    #[test]
    fn having_subset_excludes_patterns_and_arrays() {
        assert!(FilterOp::Eq.allowed_in_having());
        assert!(FilterOp::Between.allowed_in_having());
        assert!(FilterOp::IsNull.allowed_in_having());
        assert!(!FilterOp::Contains.allowed_in_having());
        assert!(!FilterOp::ArrayContains.allowed_in_having());
        assert!(!FilterOp::LevenshteinLte.allowed_in_having());
    }

    #[test]
    fn counted_op_complement() {
        assert!(!CountedOp::Gte.negated());
        assert!(CountedOp::Lte.negated());
        assert_eq!(CountedOp::Lt.complement(), CountedOp::Gte);
        assert_eq!(CountedOp::Lte.complement(), CountedOp::Gt);
    }
}

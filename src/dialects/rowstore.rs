//! PostgreSQL-family emitter: `$N` placeholders, double-quoted identifiers,
//! `tN__column` select aliases, `= ANY(...)` array membership, native
//! `ILIKE`.

use serde_json::Value;

use super::{escape_like, wrap_pattern, PlaceholderType, SqlEmitter};
use crate::model::{Dialect, ScalarType};
use crate::resolver::ir::{ArrayOpKind, ColumnRef, PatternKind};

pub struct RowStoreEmitter;

/// SQL type used in `::type[]` casts for array parameters.
fn pg_type(scalar: ScalarType) -> &'static str {
    match scalar {
        ScalarType::String => "text",
        ScalarType::Int => "integer",
        ScalarType::Decimal => "numeric",
        ScalarType::Boolean => "bool",
        ScalarType::Date => "date",
        ScalarType::Timestamp => "timestamp",
        ScalarType::Uuid => "uuid",
    }
}

impl SqlEmitter for RowStoreEmitter {
    fn dialect(&self) -> Dialect {
        Dialect::RowStore
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, out: &mut Vec<Value>, value: Value, _ty: PlaceholderType) -> String {
        out.push(value);
        format!("${}", out.len())
    }

    /// Aliased `"tN"."col" AS "tN__col"` so row keys remap unambiguously.
    fn select_item(&self, column: &ColumnRef) -> String {
        format!(
            "{}.{} AS {}",
            self.quote(&column.table_alias),
            self.quote(&column.column_name),
            self.quote(&format!("{}__{}", column.table_alias, column.column_name))
        )
    }

    fn emit_in(
        &self,
        out: &mut Vec<Value>,
        column_sql: &str,
        values: Value,
        element: ScalarType,
        negated: bool,
    ) -> String {
        let ph = self.placeholder(out, values, PlaceholderType::Array(element));
        let cast = pg_type(element);
        if negated {
            format!("{column_sql} <> ALL({ph}::{cast}[])")
        } else {
            format!("{column_sql} = ANY({ph}::{cast}[])")
        }
    }

    fn emit_pattern(
        &self,
        out: &mut Vec<Value>,
        column_sql: &str,
        kind: PatternKind,
        value: &str,
        case_insensitive: bool,
    ) -> String {
        let wrapped = wrap_pattern(kind, &escape_like(value));
        let ph = self.placeholder(
            out,
            Value::String(wrapped),
            PlaceholderType::Scalar(ScalarType::String),
        );
        let operator = if case_insensitive { "ILIKE" } else { "LIKE" };
        format!("{column_sql} {operator} {ph}")
    }

    fn emit_levenshtein(
        &self,
        out: &mut Vec<Value>,
        column_sql: &str,
        text: Value,
        distance: Value,
    ) -> String {
        let text_ph = self.placeholder(out, text, PlaceholderType::Scalar(ScalarType::String));
        let dist_ph = self.placeholder(out, distance, PlaceholderType::UInt32);
        format!("levenshtein({column_sql}, {text_ph}) <= {dist_ph}")
    }

    fn emit_array_op(
        &self,
        out: &mut Vec<Value>,
        column_sql: &str,
        op: ArrayOpKind,
        value: Option<Value>,
        element: ScalarType,
    ) -> String {
        let cast = pg_type(element);
        match op {
            ArrayOpKind::Contains => {
                let ph = self.placeholder(
                    out,
                    value.expect("contains carries a value"),
                    PlaceholderType::Scalar(element),
                );
                format!("{ph}::{cast} = ANY({column_sql})")
            }
            ArrayOpKind::ContainsAll => {
                let ph = self.placeholder(
                    out,
                    value.expect("containsAll carries a value"),
                    PlaceholderType::Array(element),
                );
                format!("{column_sql} @> {ph}::{cast}[]")
            }
            ArrayOpKind::ContainsAny => {
                let ph = self.placeholder(
                    out,
                    value.expect("containsAny carries a value"),
                    PlaceholderType::Array(element),
                );
                format!("{column_sql} && {ph}::{cast}[]")
            }
            ArrayOpKind::IsEmpty => format!("cardinality({column_sql}) = 0"),
            ArrayOpKind::IsNotEmpty => format!("cardinality({column_sql}) > 0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::generate_for;
    use crate::model::Dialect;
    use serde_json::json;

    #[test]
    fn simple_filter_matches_wire_format() {
        let (out, dialect) = generate_for(
            json!({
                "from": "orders", "columns": ["id"],
                "filters": [{ "column": "status", "operator": "=", "value": "active" }]
            }),
            None,
        );
        assert_eq!(dialect, Dialect::RowStore);
        assert_eq!(
            out.sql,
            "SELECT \"t0\".\"id\" AS \"t0__id\" FROM \"public\".\"orders\" AS \"t0\" \
             WHERE \"t0\".\"status\" = $1"
        );
        assert_eq!(out.params, vec![json!("active")]);
    }

    #[test]
    fn in_uses_any_with_typed_cast() {
        let (out, _) = generate_for(
            json!({
                "from": "orders", "columns": ["id"],
                "filters": [{ "column": "status", "operator": "in", "value": ["a", "b"] }]
            }),
            None,
        );
        assert!(
            out.sql.ends_with("WHERE \"t0\".\"status\" = ANY($1::text[])"),
            "sql was: {}",
            out.sql
        );
        assert_eq!(out.params, vec![json!(["a", "b"])]);

        let (not_in, _) = generate_for(
            json!({
                "from": "orders", "columns": ["id"],
                "filters": [{ "column": "id", "operator": "notIn",
                              "value": ["0d3ee1a6-5b7a-41b2-bceb-8b8d8b4e8a77"] }]
            }),
            None,
        );
        assert!(
            not_in.sql.ends_with("WHERE \"t0\".\"id\" <> ALL($1::uuid[])"),
            "sql was: {}",
            not_in.sql
        );
    }

    #[test]
    fn pattern_escapes_wildcards_into_param() {
        let (out, _) = generate_for(
            json!({
                "from": "users", "columns": ["id"],
                "filters": [{ "column": "name", "operator": "contains", "value": "50%_a" }]
            }),
            None,
        );
        assert!(
            out.sql.ends_with("WHERE \"t0\".\"full_name\" LIKE $1"),
            "sql was: {}",
            out.sql
        );
        assert_eq!(out.params, vec![json!("%50\\%\\_a%")]);
    }

    #[test]
    fn case_insensitive_uses_ilike() {
        let (out, _) = generate_for(
            json!({
                "from": "users", "columns": ["id"],
                "filters": [{ "column": "name", "operator": "startsWithIgnoreCase",
                              "value": "ada" }]
            }),
            None,
        );
        assert!(
            out.sql.ends_with("WHERE \"t0\".\"full_name\" ILIKE $1"),
            "sql was: {}",
            out.sql
        );
        assert_eq!(out.params, vec![json!("ada%")]);
    }

    #[test]
    fn array_operators() {
        let cases = [
            (
                json!({ "column": "tags", "operator": "arrayContains", "value": "vip" }),
                "WHERE $1::text = ANY(\"t0\".\"tags\")",
            ),
            (
                json!({ "column": "tags", "operator": "arrayContainsAll",
                        "value": ["a", "b"] }),
                "WHERE \"t0\".\"tags\" @> $1::text[]",
            ),
            (
                json!({ "column": "tags", "operator": "arrayContainsAny",
                        "value": ["a", "b"] }),
                "WHERE \"t0\".\"tags\" && $1::text[]",
            ),
            (
                json!({ "column": "tags", "operator": "arrayIsEmpty" }),
                "WHERE cardinality(\"t0\".\"tags\") = 0",
            ),
            (
                json!({ "column": "tags", "operator": "arrayIsNotEmpty" }),
                "WHERE cardinality(\"t0\".\"tags\") > 0",
            ),
        ];
        for (filter, expected) in cases {
            let (out, _) = generate_for(
                json!({ "from": "users", "columns": ["id"], "filters": [filter] }),
                None,
            );
            assert!(out.sql.ends_with(expected), "sql was: {}", out.sql);
        }
    }

    #[test]
    fn levenshtein_form() {
        let (out, _) = generate_for(
            json!({
                "from": "users", "columns": ["id"],
                "filters": [{ "column": "name", "operator": "levenshteinLte",
                              "value": { "text": "smith", "maxDistance": 2 } }]
            }),
            None,
        );
        assert!(
            out.sql
                .ends_with("WHERE levenshtein(\"t0\".\"full_name\", $1) <= $2"),
            "sql was: {}",
            out.sql
        );
        assert_eq!(out.params, vec![json!("smith"), json!(2)]);
    }

    #[test]
    fn between_and_not_between() {
        let (out, _) = generate_for(
            json!({
                "from": "orders", "columns": ["id"],
                "filters": [{ "column": "total", "operator": "notBetween",
                              "value": { "from": 5, "to": 10 } }]
            }),
            None,
        );
        assert!(
            out.sql
                .ends_with("WHERE \"t0\".\"total_amount\" NOT BETWEEN $1 AND $2"),
            "sql was: {}",
            out.sql
        );
    }

    #[test]
    fn embedded_quote_in_identifier_is_doubled() {
        use super::super::SqlEmitter;
        let emitter = super::RowStoreEmitter;
        assert_eq!(emitter.quote("we\"ird"), "\"we\"\"ird\"");
    }
}

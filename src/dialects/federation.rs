//! Federation-engine emitter: positional `?` placeholders with IN-array
//! expansion, double-quoted identifiers, catalog-qualified table names,
//! explicit `ESCAPE` clauses, `lower()` case folding.

use serde_json::Value;

use super::{escape_like, wrap_pattern, PlaceholderType, SqlEmitter};
use crate::model::{Dialect, ScalarType};
use crate::resolver::ir::{ArrayOpKind, ColumnRef, PatternKind};

pub struct FederationEmitter;

impl FederationEmitter {
    /// Expand an array value into `?, ?, …`, one positional parameter per
    /// element, preserving order.
    fn expand(&self, out: &mut Vec<Value>, values: Value) -> String {
        let items = match values {
            Value::Array(items) => items,
            other => vec![other],
        };
        let marks: Vec<&str> = items.iter().map(|_| "?").collect();
        out.extend(items);
        marks.join(", ")
    }
}

impl SqlEmitter for FederationEmitter {
    fn dialect(&self) -> Dialect {
        Dialect::Federation
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, out: &mut Vec<Value>, value: Value, _ty: PlaceholderType) -> String {
        out.push(value);
        "?".to_string()
    }

    /// Aliased like the row-store generator for unambiguous row keys.
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
        _element: ScalarType,
        negated: bool,
    ) -> String {
        let expanded = self.expand(out, values);
        if negated {
            format!("{column_sql} NOT IN ({expanded})")
        } else {
            format!("{column_sql} IN ({expanded})")
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
        if case_insensitive {
            format!("lower({column_sql}) LIKE lower({ph}) ESCAPE '\\'")
        } else {
            format!("{column_sql} LIKE {ph} ESCAPE '\\'")
        }
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
        format!("levenshtein_distance({column_sql}, {text_ph}) <= {dist_ph}")
    }

    fn emit_array_op(
        &self,
        out: &mut Vec<Value>,
        column_sql: &str,
        op: ArrayOpKind,
        value: Option<Value>,
        element: ScalarType,
    ) -> String {
        match op {
            ArrayOpKind::Contains => {
                let ph = self.placeholder(
                    out,
                    value.expect("contains carries a value"),
                    PlaceholderType::Scalar(element),
                );
                format!("contains({column_sql}, {ph})")
            }
            ArrayOpKind::ContainsAll => {
                let expanded = self.expand(out, value.expect("containsAll carries a value"));
                format!("cardinality(array_except(ARRAY[{expanded}], {column_sql})) = 0")
            }
            ArrayOpKind::ContainsAny => {
                let expanded = self.expand(out, value.expect("containsAny carries a value"));
                format!("arrays_overlap({column_sql}, ARRAY[{expanded}])")
            }
            ArrayOpKind::IsEmpty => format!("cardinality({column_sql}) = 0"),
            ArrayOpKind::IsNotEmpty => format!("cardinality({column_sql}) > 0"),
        }
    }
}

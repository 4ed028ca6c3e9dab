//! ClickHouse-family emitter: named typed placeholders `{pN:Type}`,
//! backtick identifiers, bare `tN.column` select items, function-form
//! pattern matching and array operators.

use serde_json::Value;

use super::{escape_like, wrap_pattern, PlaceholderType, SqlEmitter};
use crate::model::{Dialect, ScalarType};
use crate::resolver::ir::{ArrayOpKind, ColumnRef, PatternKind};

pub struct ColumnarEmitter;

fn ch_scalar(scalar: ScalarType) -> &'static str {
    match scalar {
        ScalarType::String => "String",
        ScalarType::Int => "Int32",
        ScalarType::Decimal => "Float64",
        ScalarType::Boolean => "UInt8",
        ScalarType::Date => "Date",
        ScalarType::Timestamp => "DateTime",
        ScalarType::Uuid => "UUID",
    }
}

fn ch_type(ty: PlaceholderType) -> String {
    match ty {
        PlaceholderType::Scalar(s) => ch_scalar(s).to_string(),
        PlaceholderType::Array(s) => format!("Array({})", ch_scalar(s)),
        PlaceholderType::UInt32 => "UInt32".to_string(),
    }
}

impl SqlEmitter for ColumnarEmitter {
    fn dialect(&self) -> Dialect {
        Dialect::Columnar
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn placeholder(&self, out: &mut Vec<Value>, value: Value, ty: PlaceholderType) -> String {
        out.push(value);
        format!("{{p{}:{}}}", out.len(), ch_type(ty))
    }

    /// No output aliasing; the driver reports keys as `tN.column`.
    fn select_item(&self, column: &ColumnRef) -> String {
        format!(
            "{}.{}",
            self.quote(&column.table_alias),
            self.quote(&column.column_name)
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
        if negated {
            format!("{column_sql} NOT IN ({ph})")
        } else {
            format!("{column_sql} IN ({ph})")
        }
    }

    /// Case-sensitive prefix/suffix matching maps to the dedicated functions
    /// with the raw needle; everything else goes through (i)like with the
    /// wildcard expansion moved into the parameter value.
    fn emit_pattern(
        &self,
        out: &mut Vec<Value>,
        column_sql: &str,
        kind: PatternKind,
        value: &str,
        case_insensitive: bool,
    ) -> String {
        if case_insensitive {
            let wrapped = wrap_pattern(kind, &escape_like(value));
            let ph = self.placeholder(
                out,
                Value::String(wrapped),
                PlaceholderType::Scalar(ScalarType::String),
            );
            return format!("ilike({column_sql}, {ph})");
        }
        match kind {
            PatternKind::StartsWith => {
                let ph = self.placeholder(
                    out,
                    Value::String(value.to_string()),
                    PlaceholderType::Scalar(ScalarType::String),
                );
                format!("startsWith({column_sql}, {ph})")
            }
            PatternKind::EndsWith => {
                let ph = self.placeholder(
                    out,
                    Value::String(value.to_string()),
                    PlaceholderType::Scalar(ScalarType::String),
                );
                format!("endsWith({column_sql}, {ph})")
            }
            PatternKind::Contains => {
                let wrapped = wrap_pattern(kind, &escape_like(value));
                let ph = self.placeholder(
                    out,
                    Value::String(wrapped),
                    PlaceholderType::Scalar(ScalarType::String),
                );
                format!("{column_sql} LIKE {ph}")
            }
        }
    }

    fn emit_between(
        &self,
        out: &mut Vec<Value>,
        column_sql: &str,
        low: Value,
        high: Value,
        ty: ScalarType,
        negated: bool,
    ) -> String {
        let a = self.placeholder(out, low, PlaceholderType::Scalar(ty));
        let b = self.placeholder(out, high, PlaceholderType::Scalar(ty));
        if negated {
            format!("NOT ({column_sql} BETWEEN {a} AND {b})")
        } else {
            format!("{column_sql} BETWEEN {a} AND {b}")
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
        format!("editDistance({column_sql}, {text_ph}) <= {dist_ph}")
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
                format!("has({column_sql}, {ph})")
            }
            ArrayOpKind::ContainsAll => {
                let ph = self.placeholder(
                    out,
                    value.expect("containsAll carries a value"),
                    PlaceholderType::Array(element),
                );
                format!("hasAll({column_sql}, {ph})")
            }
            ArrayOpKind::ContainsAny => {
                let ph = self.placeholder(
                    out,
                    value.expect("containsAny carries a value"),
                    PlaceholderType::Array(element),
                );
                format!("hasAny({column_sql}, {ph})")
            }
            ArrayOpKind::IsEmpty => format!("empty({column_sql})"),
            ArrayOpKind::IsNotEmpty => format!("notEmpty({column_sql})"),
        }
    }
}

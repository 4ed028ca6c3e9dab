//! SQL generation: one shared tree walker drives a per-dialect emitter.
//! The walker owns statement shape (SELECT/FROM/JOIN/WHERE/GROUP/HAVING/
//! ORDER/LIMIT and the subquery patterns); emitters own quoting,
//! placeholder syntax, and the leaf forms that differ per backend.
//!
//! Emitters read raw literals from the resolver's ledger and push the
//! final (possibly transformed or expanded) values onto the output list as
//! they mint placeholders, so placeholder numbering always matches the
//! returned parameter order.

pub mod columnar;
pub mod federation;
pub mod rowstore;

use serde_json::Value;

use crate::model::{Dialect, ScalarType, SortDirection};
use crate::resolver::ir::{
    AggregationExpr, ArrayOpKind, ColumnRef, CorrelatedSubquery, HavingClause, OrderTarget,
    PatternKind, SqlParts, TableRef, WhereNode,
};

pub use columnar::ColumnarEmitter;
pub use federation::FederationEmitter;
pub use rowstore::RowStoreEmitter;

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Declared type of a placeholder, for dialects with typed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderType {
    Scalar(ScalarType),
    Array(ScalarType),
    /// Non-negative counters (counted subqueries, edit distances).
    UInt32,
}

/// The per-dialect surface the shared walker drives.
pub trait SqlEmitter: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Quote a single identifier segment.
    fn quote(&self, ident: &str) -> String;

    /// Mint a placeholder for `value`, appending it to `out`.
    fn placeholder(&self, out: &mut Vec<Value>, value: Value, ty: PlaceholderType) -> String;

    /// One select-list entry (aliased or bare, per dialect convention).
    fn select_item(&self, column: &ColumnRef) -> String;

    fn emit_in(
        &self,
        out: &mut Vec<Value>,
        column_sql: &str,
        values: Value,
        element: ScalarType,
        negated: bool,
    ) -> String;

    fn emit_pattern(
        &self,
        out: &mut Vec<Value>,
        column_sql: &str,
        kind: PatternKind,
        value: &str,
        case_insensitive: bool,
    ) -> String;

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
            format!("{column_sql} NOT BETWEEN {a} AND {b}")
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
    ) -> String;

    fn emit_array_op(
        &self,
        out: &mut Vec<Value>,
        column_sql: &str,
        op: ArrayOpKind,
        value: Option<Value>,
        element: ScalarType,
    ) -> String;
}

pub fn emitter_for(dialect: Dialect) -> Box<dyn SqlEmitter> {
    match dialect {
        Dialect::RowStore => Box::new(RowStoreEmitter),
        Dialect::Columnar => Box::new(ColumnarEmitter),
        Dialect::Federation => Box::new(FederationEmitter),
    }
}

/// Generate SQL and the final parameter list for one dialect.
pub fn generate(parts: &SqlParts, ledger: &[Value], dialect: Dialect) -> GeneratedSql {
    let emitter = emitter_for(dialect);
    Walker {
        emitter: emitter.as_ref(),
        ledger,
        out: Vec::new(),
    }
    .write(parts)
}

/// Escape LIKE wildcards (`%`, `_`) and the escape character itself.
pub(crate) fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Wrap an escaped pattern fragment with `%` per pattern kind.
pub(crate) fn wrap_pattern(kind: PatternKind, escaped: &str) -> String {
    match kind {
        PatternKind::StartsWith => format!("{escaped}%"),
        PatternKind::EndsWith => format!("%{escaped}"),
        PatternKind::Contains => format!("%{escaped}%"),
    }
}

struct Walker<'a> {
    emitter: &'a dyn SqlEmitter,
    ledger: &'a [Value],
    out: Vec<Value>,
}

impl<'a> Walker<'a> {
    fn write(mut self, parts: &SqlParts) -> GeneratedSql {
        let mut sql = String::new();

        if parts.count_mode {
            sql.push_str("SELECT COUNT(*)");
        } else {
            let mut items: Vec<String> = parts
                .select
                .iter()
                .map(|c| self.emitter.select_item(c))
                .collect();
            for agg in &parts.aggregations {
                items.push(self.aggregation_sql(agg));
            }
            if items.is_empty() {
                sql.push_str("SELECT *");
            } else if parts.distinct {
                sql.push_str("SELECT DISTINCT ");
                sql.push_str(&items.join(", "));
            } else {
                sql.push_str("SELECT ");
                sql.push_str(&items.join(", "));
            }
        }

        sql.push_str(" FROM ");
        sql.push_str(&self.table_sql(&parts.from));

        for join in &parts.joins {
            sql.push(' ');
            sql.push_str(join.kind.sql());
            sql.push(' ');
            sql.push_str(&self.table_sql(&join.table));
            sql.push_str(" ON ");
            sql.push_str(&self.column_sql(&join.left));
            sql.push_str(" = ");
            sql.push_str(&self.column_sql(&join.right));
        }

        if let Some(node) = &parts.where_clause {
            sql.push_str(" WHERE ");
            let clause = self.where_sql(node);
            sql.push_str(&clause);
        }

        if parts.count_mode {
            return GeneratedSql {
                sql,
                params: self.out,
            };
        }

        if !parts.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            let cols: Vec<String> = parts.group_by.iter().map(|c| self.column_sql(c)).collect();
            sql.push_str(&cols.join(", "));
        }

        if !parts.having.is_empty() {
            sql.push_str(" HAVING ");
            let clauses: Vec<String> = parts
                .having
                .iter()
                .map(|h| self.having_sql(h))
                .collect();
            sql.push_str(&clauses.join(" AND "));
        }

        if !parts.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let orders: Vec<String> = parts
                .order_by
                .iter()
                .map(|o| {
                    let target = match &o.target {
                        OrderTarget::Column(c) => self.column_sql(c),
                        OrderTarget::Alias(a) => self.emitter.quote(a),
                    };
                    match o.direction {
                        SortDirection::Asc => format!("{target} ASC"),
                        SortDirection::Desc => format!("{target} DESC"),
                    }
                })
                .collect();
            sql.push_str(&orders.join(", "));
        }

        if let Some(limit) = parts.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = parts.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        GeneratedSql {
            sql,
            params: self.out,
        }
    }

    fn column_sql(&self, column: &ColumnRef) -> String {
        format!(
            "{}.{}",
            self.emitter.quote(&column.table_alias),
            self.emitter.quote(&column.column_name)
        )
    }

    /// `[catalog.]schema.table AS alias`, every segment quoted.
    fn table_sql(&self, table: &TableRef) -> String {
        let mut segments: Vec<String> = Vec::new();
        if let Some(catalog) = &table.catalog {
            segments.push(self.emitter.quote(catalog));
        }
        segments.extend(table.physical_name.split('.').map(|s| self.emitter.quote(s)));
        format!("{} AS {}", segments.join("."), self.emitter.quote(&table.alias))
    }

    fn aggregation_sql(&self, agg: &AggregationExpr) -> String {
        let arg = agg
            .column
            .as_ref()
            .map(|c| self.column_sql(c))
            .unwrap_or_else(|| "*".to_string());
        format!(
            "{}({}) AS {}",
            agg.func.sql(),
            arg,
            self.emitter.quote(&agg.alias)
        )
    }

    fn literal(&self, index: usize) -> Value {
        self.ledger[index].clone()
    }

    fn where_sql(&mut self, node: &WhereNode) -> String {
        match node {
            WhereNode::Compare {
                column,
                op,
                param,
                value_type,
            } => {
                let col = self.column_sql(column);
                let ph = self.emitter.placeholder(
                    &mut self.out,
                    self.ledger[*param].clone(),
                    PlaceholderType::Scalar(*value_type),
                );
                format!("{col} {} {ph}", op.sql())
            }
            WhereNode::ColumnCompare { left, op, right } => {
                format!(
                    "{} {} {}",
                    self.column_sql(left),
                    op.sql(),
                    self.column_sql(right)
                )
            }
            WhereNode::Between {
                column,
                low,
                high,
                value_type,
                negated,
            } => {
                let col = self.column_sql(column);
                let low = self.literal(*low);
                let high = self.literal(*high);
                self.emitter
                    .emit_between(&mut self.out, &col, low, high, *value_type, *negated)
            }
            WhereNode::InList {
                column,
                param,
                element_type,
                negated,
            } => {
                let col = self.column_sql(column);
                let values = self.literal(*param);
                self.emitter
                    .emit_in(&mut self.out, &col, values, *element_type, *negated)
            }
            WhereNode::NullCheck { column, negated } => {
                let col = self.column_sql(column);
                if *negated {
                    format!("{col} IS NOT NULL")
                } else {
                    format!("{col} IS NULL")
                }
            }
            WhereNode::Pattern {
                column,
                kind,
                param,
                case_insensitive,
            } => {
                let col = self.column_sql(column);
                let value = self.literal(*param);
                let text = value.as_str().unwrap_or_default().to_string();
                self.emitter
                    .emit_pattern(&mut self.out, &col, *kind, &text, *case_insensitive)
            }
            WhereNode::Levenshtein {
                column,
                text_param,
                distance_param,
            } => {
                let col = self.column_sql(column);
                let text = self.literal(*text_param);
                let distance = self.literal(*distance_param);
                self.emitter
                    .emit_levenshtein(&mut self.out, &col, text, distance)
            }
            WhereNode::ArrayOp {
                column,
                op,
                param,
                element_type,
            } => {
                let col = self.column_sql(column);
                let value = param.map(|p| self.literal(p));
                self.emitter
                    .emit_array_op(&mut self.out, &col, *op, value, *element_type)
            }
            WhereNode::Group {
                logic,
                negated,
                children,
            } => {
                let rendered: Vec<String> =
                    children.iter().map(|c| self.where_sql(c)).collect();
                let joined = rendered.join(&format!(" {} ", logic.sql()));
                let body = if rendered.len() > 1 {
                    format!("({joined})")
                } else {
                    joined
                };
                if *negated {
                    format!("NOT {body}")
                } else {
                    body
                }
            }
            WhereNode::Exists { negated, subquery } => {
                let keyword = if *negated { "NOT EXISTS" } else { "EXISTS" };
                let body = self.exists_body(subquery);
                format!("{keyword} ({body})")
            }
            WhereNode::CountedExists {
                subquery,
                op,
                param,
            } => {
                let outer = self.column_sql(&subquery.outer);
                let inner = self.column_sql(&subquery.inner);
                let table = self.table_sql(&subquery.from);
                let sub_where = subquery
                    .where_clause
                    .as_ref()
                    .map(|w| format!(" WHERE {}", self.where_sql(w)))
                    .unwrap_or_default();
                let (membership, having_op) = if op.negated() {
                    ("NOT IN", op.complement())
                } else {
                    ("IN", *op)
                };
                let ph = self.emitter.placeholder(
                    &mut self.out,
                    self.ledger[*param].clone(),
                    PlaceholderType::UInt32,
                );
                format!(
                    "{outer} {membership} (SELECT {inner} FROM {table}{sub_where} \
                     GROUP BY {inner} HAVING COUNT(*) {} {ph})",
                    having_op.sql()
                )
            }
        }
    }

    fn exists_body(&mut self, subquery: &CorrelatedSubquery) -> String {
        let table = self.table_sql(&subquery.from);
        let join = format!(
            "{} = {}",
            self.column_sql(&subquery.inner),
            self.column_sql(&subquery.outer)
        );
        match &subquery.where_clause {
            Some(w) => {
                let nested = self.where_sql(w);
                format!("SELECT 1 FROM {table} WHERE {join} AND {nested}")
            }
            None => format!("SELECT 1 FROM {table} WHERE {join}"),
        }
    }

    fn having_sql(&mut self, clause: &HavingClause) -> String {
        match clause {
            HavingClause::Compare {
                alias,
                op,
                param,
                value_type,
            } => {
                let ph = self.emitter.placeholder(
                    &mut self.out,
                    self.ledger[*param].clone(),
                    PlaceholderType::Scalar(*value_type),
                );
                format!("{} {} {ph}", self.emitter.quote(alias), op.sql())
            }
            HavingClause::InList {
                alias,
                param,
                element_type,
                negated,
            } => {
                let target = self.emitter.quote(alias);
                let values = self.literal(*param);
                self.emitter
                    .emit_in(&mut self.out, &target, values, *element_type, *negated)
            }
            HavingClause::Between {
                alias,
                low,
                high,
                value_type,
                negated,
            } => {
                let target = self.emitter.quote(alias);
                let low = self.literal(*low);
                let high = self.literal(*high);
                self.emitter
                    .emit_between(&mut self.out, &target, low, high, *value_type, *negated)
            }
            HavingClause::NullCheck { alias, negated } => {
                if *negated {
                    format!("{} IS NOT NULL", self.emitter.quote(alias))
                } else {
                    format!("{} IS NULL", self.emitter.quote(alias))
                }
            }
        }
    }
}

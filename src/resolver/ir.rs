//! The dialect-agnostic intermediate representation. Every literal lives in
//! the positional parameter ledger; IR nodes carry only indexes into it, so
//! no value can leak into generated SQL text.

use serde_json::Value;

use crate::model::{AggFunc, ColumnType, CountedOp, JoinKind, MaskingFn, ScalarType, SortDirection};

/// A physical column reference, `alias.column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table_alias: String,
    pub column_name: String,
}

impl ColumnRef {
    pub fn new(table_alias: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            table_alias: table_alias.into(),
            column_name: column_name.into(),
        }
    }
}

/// A physical table reference with its assigned alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub physical_name: String,
    pub alias: String,
    /// Federation catalog qualifier, when the table is read through the
    /// federation engine.
    pub catalog: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SqlParts {
    pub select: Vec<ColumnRef>,
    pub distinct: bool,
    pub from: TableRef,
    pub joins: Vec<JoinClause>,
    pub where_clause: Option<WhereNode>,
    pub group_by: Vec<ColumnRef>,
    pub having: Vec<HavingClause>,
    pub aggregations: Vec<AggregationExpr>,
    pub order_by: Vec<OrderExpr>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub count_mode: bool,
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: TableRef,
    /// Column owned by the table declaring the relation.
    pub left: ColumnRef,
    pub right: ColumnRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Lte => "<=",
            CompareOp::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    StartsWith,
    EndsWith,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOpKind {
    Contains,
    ContainsAll,
    ContainsAny,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLogic {
    And,
    Or,
}

impl GroupLogic {
    pub fn sql(&self) -> &'static str {
        match self {
            GroupLogic::And => "AND",
            GroupLogic::Or => "OR",
        }
    }
}

/// One node of the WHERE tree. `param` fields are indexes into the
/// resolver's parameter ledger.
#[derive(Debug, Clone)]
pub enum WhereNode {
    Compare {
        column: ColumnRef,
        op: CompareOp,
        param: usize,
        value_type: ScalarType,
    },
    ColumnCompare {
        left: ColumnRef,
        op: CompareOp,
        right: ColumnRef,
    },
    Between {
        column: ColumnRef,
        low: usize,
        high: usize,
        value_type: ScalarType,
        negated: bool,
    },
    InList {
        column: ColumnRef,
        param: usize,
        element_type: ScalarType,
        negated: bool,
    },
    NullCheck {
        column: ColumnRef,
        negated: bool,
    },
    Pattern {
        column: ColumnRef,
        kind: PatternKind,
        param: usize,
        case_insensitive: bool,
    },
    Levenshtein {
        column: ColumnRef,
        text_param: usize,
        distance_param: usize,
    },
    ArrayOp {
        column: ColumnRef,
        op: ArrayOpKind,
        param: Option<usize>,
        element_type: ScalarType,
    },
    Group {
        logic: GroupLogic,
        negated: bool,
        children: Vec<WhereNode>,
    },
    Exists {
        negated: bool,
        subquery: CorrelatedSubquery,
    },
    CountedExists {
        subquery: CorrelatedSubquery,
        op: CountedOp,
        param: usize,
    },
}

/// A SELECT inside WHERE, correlated to the outer query through a declared
/// relation: `outer` is the parent-scope column, `inner` the subquery-scope
/// column.
#[derive(Debug, Clone)]
pub struct CorrelatedSubquery {
    pub from: TableRef,
    pub outer: ColumnRef,
    pub inner: ColumnRef,
    pub where_clause: Option<Box<WhereNode>>,
}

/// HAVING predicates only ever reference aggregation aliases.
#[derive(Debug, Clone)]
pub enum HavingClause {
    Compare {
        alias: String,
        op: CompareOp,
        param: usize,
        value_type: ScalarType,
    },
    InList {
        alias: String,
        param: usize,
        element_type: ScalarType,
        negated: bool,
    },
    Between {
        alias: String,
        low: usize,
        high: usize,
        value_type: ScalarType,
        negated: bool,
    },
    NullCheck {
        alias: String,
        negated: bool,
    },
}

#[derive(Debug, Clone)]
pub struct AggregationExpr {
    pub func: AggFunc,
    /// `None` renders `COUNT(*)`.
    pub column: Option<ColumnRef>,
    pub alias: String,
}

#[derive(Debug, Clone)]
pub enum OrderTarget {
    Column(ColumnRef),
    /// An aggregation alias, preserved as-is.
    Alias(String),
}

#[derive(Debug, Clone)]
pub struct OrderExpr {
    pub target: OrderTarget,
    pub direction: SortDirection,
}

/// How a result row's key maps back to its logical shape; built once at
/// resolution time and applied to every row.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub physical_name: String,
    /// Logical output name; qualified `<table>.<column>` on collision.
    pub logical_name: String,
    pub table_alias: String,
    pub table_logical_name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub masked: bool,
    pub masking_fn: Option<MaskingFn>,
}

/// Whether a resolved table reads its original site or a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSource {
    Original,
    Materialized,
}

#[derive(Debug, Clone)]
pub struct ResolvedTable {
    pub table_id: String,
    pub logical_name: String,
    pub alias: String,
    pub physical_name: String,
    pub source: TableSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    Data,
    Count,
}

/// Output of name resolution: the IR, the raw literal ledger, the row-key
/// mapping, and the tables the query touches.
#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    pub parts: SqlParts,
    pub params: Vec<Value>,
    pub column_mappings: Vec<ColumnMapping>,
    pub tables: Vec<ResolvedTable>,
    pub mode: ResolveMode,
}

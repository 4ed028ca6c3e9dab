//! Shared vocabulary: column types, engines, dialects, freshness, masking.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Column types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    String,
    Int,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Uuid,
}

impl ScalarType {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Int => "int",
            ScalarType::Decimal => "decimal",
            ScalarType::Boolean => "boolean",
            ScalarType::Date => "date",
            ScalarType::Timestamp => "timestamp",
            ScalarType::Uuid => "uuid",
        }
    }

    fn parse(s: &str) -> Option<ScalarType> {
        match s {
            "string" => Some(ScalarType::String),
            "int" => Some(ScalarType::Int),
            "decimal" => Some(ScalarType::Decimal),
            "boolean" => Some(ScalarType::Boolean),
            "date" => Some(ScalarType::Date),
            "timestamp" => Some(ScalarType::Timestamp),
            "uuid" => Some(ScalarType::Uuid),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarType::Int | ScalarType::Decimal)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ScalarType::Date | ScalarType::Timestamp)
    }

    /// Types with a total order usable by `<`, `>`, `between`.
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            ScalarType::String
                | ScalarType::Int
                | ScalarType::Decimal
                | ScalarType::Date
                | ScalarType::Timestamp
        )
    }
}

/// A column type: a scalar or an array of scalars. Rendered as `"int"` /
/// `"int[]"` in metadata JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Scalar(ScalarType),
    Array(ScalarType),
}

impl ColumnType {
    pub fn is_array(&self) -> bool {
        matches!(self, ColumnType::Array(_))
    }

    /// The scalar itself, or the element type of an array.
    pub fn element(&self) -> ScalarType {
        match self {
            ColumnType::Scalar(s) | ColumnType::Array(s) => *s,
        }
    }

    pub fn scalar(&self) -> Option<ScalarType> {
        match self {
            ColumnType::Scalar(s) => Some(*s),
            ColumnType::Array(_) => None,
        }
    }

    /// Column-vs-column compatibility: numeric↔numeric and temporal↔temporal
    /// are compatible, otherwise the scalars must match exactly. Arrays are
    /// never comparable.
    pub fn comparable_with(&self, other: &ColumnType) -> bool {
        match (self, other) {
            (ColumnType::Scalar(a), ColumnType::Scalar(b)) => {
                a == b || (a.is_numeric() && b.is_numeric()) || (a.is_temporal() && b.is_temporal())
            }
            _ => false,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Scalar(s) => write!(f, "{}", s.name()),
            ColumnType::Array(s) => write!(f, "{}[]", s.name()),
        }
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(elem) = s.strip_suffix("[]") {
            ScalarType::parse(elem)
                .map(ColumnType::Array)
                .ok_or_else(|| format!("unknown column type '{s}'"))
        } else {
            ScalarType::parse(s)
                .map(ColumnType::Scalar)
                .ok_or_else(|| format!("unknown column type '{s}'"))
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Engines & dialects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbEngine {
    #[serde(rename = "row")]
    Row,
    #[serde(rename = "columnar")]
    Columnar,
    #[serde(rename = "federated-engine")]
    FederatedEngine,
    #[serde(rename = "lakehouse")]
    Lakehouse,
}

impl DbEngine {
    /// The dialect used when querying this engine directly. Lakehouse tables
    /// are always reached through the federation engine.
    pub fn native_dialect(&self) -> Dialect {
        match self {
            DbEngine::Row => Dialect::RowStore,
            DbEngine::Columnar => Dialect::Columnar,
            DbEngine::FederatedEngine | DbEngine::Lakehouse => Dialect::Federation,
        }
    }
}

/// Supported SQL generation dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// PostgreSQL-family row store
    RowStore,
    /// ClickHouse-family columnar store
    Columnar,
    /// Cross-database federation engine
    Federation,
}

impl Dialect {
    /// Get all supported dialects
    pub fn all() -> &'static [Dialect] {
        &[Dialect::RowStore, Dialect::Columnar, Dialect::Federation]
    }

    /// Get the name of the dialect
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::RowStore => "row-store",
            Dialect::Columnar => "columnar",
            Dialect::Federation => "federation",
        }
    }

    /// Parse dialect from string (case-insensitive)
    pub fn parse(s: &str) -> Result<Dialect, String> {
        match s.to_lowercase().as_str() {
            "row-store" | "row_store" | "rowstore" => Ok(Dialect::RowStore),
            "columnar" => Ok(Dialect::Columnar),
            "federation" | "federated" => Ok(Dialect::Federation),
            _ => Err(format!(
                "Unsupported dialect: {}. Supported dialects: {}",
                s,
                Dialect::all()
                    .iter()
                    .map(|d| d.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for Dialect {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Dialect {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Dialect::parse(&s).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Freshness & replication lag
// ---------------------------------------------------------------------------

/// Caller-declared upper bound on tolerated replication lag.
/// Ordered: `realtime < seconds < minutes < hours`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Realtime,
    Seconds,
    Minutes,
    Hours,
}

/// Declared replication lag of an external sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncLag {
    Seconds,
    Minutes,
    Hours,
}

impl SyncLag {
    fn as_freshness(&self) -> Freshness {
        match self {
            SyncLag::Seconds => Freshness::Seconds,
            SyncLag::Minutes => Freshness::Minutes,
            SyncLag::Hours => Freshness::Hours,
        }
    }

    /// A sync with lag `L` satisfies a request `R` iff `L <= R`. A `realtime`
    /// request is never satisfied by a replica.
    pub fn satisfies(&self, requested: Freshness) -> bool {
        self.as_freshness() <= requested
    }
}

// ---------------------------------------------------------------------------
// Masking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskingFn {
    Email,
    Phone,
    Name,
    Uuid,
    Number,
    Date,
    Full,
}

// ---------------------------------------------------------------------------
// Joins, aggregation, ordering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Inner,
    Right,
    Full,
}

impl JoinKind {
    pub fn parse(s: &str) -> Option<JoinKind> {
        match s.to_lowercase().as_str() {
            "left" => Some(JoinKind::Left),
            "inner" => Some(JoinKind::Inner),
            "right" => Some(JoinKind::Right),
            "full" => Some(JoinKind::Full),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn parse(s: &str) -> Option<AggFunc> {
        match s.to_lowercase().as_str() {
            "count" => Some(AggFunc::Count),
            "sum" => Some(AggFunc::Sum),
            "avg" => Some(AggFunc::Avg),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<SortDirection> {
        match s.to_lowercase().as_str() {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

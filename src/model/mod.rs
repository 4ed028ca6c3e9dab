//! Data model: metadata entities, role catalog, query definitions, and the
//! shared scalar/dialect vocabulary.

pub mod context;
pub mod metadata;
pub mod query;
pub mod types;

pub use context::{ExecutionContext, RoleScope};
pub use metadata::{
    relation_between, CacheDef, CacheEntry, ColumnDef, DatabaseDef, ExternalSync, MetadataConfig,
    RelationDef, RelationKind, Role, StarOr, TableDef, TableGrant,
};
pub use query::{
    AggregationSpec, CompareTarget, CountSpec, CountedOp, ExecuteMode, ExistsFilter,
    FilterCondition, FilterGroup, FilterNode, FilterOp, HavingSpec, JoinSpec, OrderSpec,
    QueryDefinition,
};
pub use types::{
    AggFunc, ColumnType, DbEngine, Dialect, Freshness, JoinKind, MaskingFn, ScalarType,
    SortDirection, SyncLag,
};

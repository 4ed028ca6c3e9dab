//! Metadata configuration and the role catalog as loaded from providers.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::types::{ColumnType, DbEngine, MaskingFn, SyncLag};

/// The complete metadata document published by the metadata provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataConfig {
    #[serde(default)]
    pub databases: Vec<DatabaseDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub external_syncs: Vec<ExternalSync>,
    #[serde(default)]
    pub caches: Vec<CacheDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDef {
    pub id: String,
    pub engine: DbEngine,
    /// Catalog name under which the federation engine sees this database.
    #[serde(default)]
    pub federation_catalog: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDef {
    pub id: String,
    /// Externally exposed name ("apiName"); globally unique.
    pub logical_name: String,
    pub database_id: String,
    pub physical_name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl TableDef {
    pub fn column(&self, logical_name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.logical_name == logical_name)
    }
}

/// The declared relation connecting two tables, in either direction.
/// Returns `(owner, relation, other)`; the owner is the table declaring the
/// foreign key, so `owner.{from_column}` joins `other.{references_column}`.
pub fn relation_between<'a>(
    a: &'a TableDef,
    b: &'a TableDef,
) -> Option<(&'a TableDef, &'a RelationDef, &'a TableDef)> {
    if let Some(rel) = a.relations.iter().find(|r| r.references_table == b.id) {
        return Some((a, rel, b));
    }
    if let Some(rel) = b.relations.iter().find(|r| r.references_table == a.id) {
        return Some((b, rel, a));
    }
    None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    pub logical_name: String,
    pub physical_name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    /// Default masking applied unless a role overrides it.
    #[serde(default)]
    pub masking_fn: Option<MaskingFn>,
}

/// A directed foreign-key declaration on the owning table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDef {
    pub from_column: String,
    pub references_table: String,
    pub references_column: String,
    pub kind: RelationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    #[serde(rename = "one-to-one")]
    OneToOne,
    #[serde(rename = "one-to-many")]
    OneToMany,
    #[serde(rename = "many-to-one")]
    ManyToOne,
}

/// Asserts that a source table is replicated into another database with a
/// bounded lag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSync {
    pub source_table_id: String,
    pub target_database_id: String,
    pub target_physical_name: String,
    pub method: String,
    pub estimated_lag: SyncLag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDef {
    pub id: String,
    pub engine: String,
    #[serde(default)]
    pub entries: Vec<CacheEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub table_id: String,
    /// Key template over primary-key columns, e.g. `user:{id}`.
    pub key_pattern: String,
    /// Cached column subset; `None` means every column is cached.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl CacheEntry {
    /// Placeholder names appearing in `key_pattern` (`{name}` segments).
    pub fn key_placeholders(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut rest = self.key_pattern.as_str();
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start + 1..].find('}') else {
                break;
            };
            out.push(&rest[start + 1..start + 1 + len]);
            rest = &rest[start + 1 + len + 1..];
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub tables: StarOr<TableGrant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableGrant {
    pub table_id: String,
    pub allowed_columns: StarOr<String>,
    #[serde(default)]
    pub masked_columns: Vec<String>,
}

/// Either the literal `"*"` wildcard or an explicit list. `'*'` is the
/// identity for the union and intersection used by access resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum StarOr<T> {
    Star,
    Items(Vec<T>),
}

impl<T> StarOr<T> {
    pub fn is_star(&self) -> bool {
        matches!(self, StarOr::Star)
    }

    pub fn items(&self) -> Option<&[T]> {
        match self {
            StarOr::Star => None,
            StarOr::Items(v) => Some(v),
        }
    }
}

impl<T: Serialize> Serialize for StarOr<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StarOr::Star => serializer.serialize_str("*"),
            StarOr::Items(v) => v.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for StarOr<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StarOrVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for StarOrVisitor<T> {
            type Value = StarOr<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("\"*\" or an array")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == "*" {
                    Ok(StarOr::Star)
                } else {
                    Err(E::custom(format!("expected \"*\", got \"{v}\"")))
                }
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(StarOr::Items(items))
            }
        }

        deserializer.deserialize_any(StarOrVisitor(PhantomData))
    }
}

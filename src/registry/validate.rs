//! Metadata validation: the invariants every published snapshot upholds.
//! Every violation is collected; a load either yields a fully valid config
//! or a [`ConfigError`] listing each problem.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use crate::error::{ConfigError, ConfigErrorCode, ConfigIssue};
use crate::model::MetadataConfig;

const MAX_API_NAME_LEN: usize = 64;

/// Words that cannot be used as logical names regardless of the target
/// dialect; the union of what the supported engines reserve.
static RESERVED_WORDS: &[&str] = &[
    "all", "and", "any", "array", "as", "asc", "between", "by", "case", "cast", "count",
    "create", "cross", "delete", "desc", "distinct", "drop", "else", "end", "exists", "false",
    "from", "full", "group", "having", "in", "inner", "insert", "into", "is", "join", "left",
    "like", "limit", "not", "null", "offset", "on", "or", "order", "outer", "right", "select",
    "table", "then", "true", "union", "update", "user", "using", "values", "when", "where",
    "with",
];

fn api_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[a-z][a-zA-Z0-9]*$").expect("static regex"))
}

fn is_reserved(name: &str) -> bool {
    let lower = name.to_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}

/// Aggregation aliases follow the same shape as logical names.
pub fn is_valid_alias(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_API_NAME_LEN && api_name_regex().is_match(name)
}

fn check_api_name(name: &str, owner: &str, issues: &mut Vec<ConfigIssue>) {
    if name.is_empty() || name.len() > MAX_API_NAME_LEN || !api_name_regex().is_match(name) {
        issues.push(ConfigIssue::new(
            ConfigErrorCode::InvalidApiName,
            format!("{owner}: '{name}' is not a valid logical name"),
            json!({ "name": name, "owner": owner }),
        ));
    } else if is_reserved(name) {
        issues.push(ConfigIssue::new(
            ConfigErrorCode::InvalidApiName,
            format!("{owner}: '{name}' is a reserved word"),
            json!({ "name": name, "owner": owner, "reserved": true }),
        ));
    }
}

/// Validate a metadata document, collecting every violation.
pub fn validate_config(config: &MetadataConfig) -> Result<(), ConfigError> {
    let mut issues = Vec::new();

    let database_ids: HashSet<&str> = config.databases.iter().map(|d| d.id.as_str()).collect();
    let table_ids: HashSet<&str> = config.tables.iter().map(|t| t.id.as_str()).collect();

    // Table logical names: shape, reservation, global uniqueness.
    let mut seen_logical: HashSet<&str> = HashSet::new();
    for table in &config.tables {
        check_api_name(&table.logical_name, &format!("table '{}'", table.id), &mut issues);
        if !seen_logical.insert(table.logical_name.as_str()) {
            issues.push(ConfigIssue::new(
                ConfigErrorCode::DuplicateApiName,
                format!(
                    "table '{}': logical name '{}' is already used by another table",
                    table.id, table.logical_name
                ),
                json!({ "table": table.id, "name": table.logical_name }),
            ));
        }

        if !database_ids.contains(table.database_id.as_str()) {
            issues.push(ConfigIssue::new(
                ConfigErrorCode::InvalidReference,
                format!(
                    "table '{}': database '{}' does not exist",
                    table.id, table.database_id
                ),
                json!({ "table": table.id, "database": table.database_id }),
            ));
        }

        // Column logical names: shape plus per-table uniqueness.
        let mut seen_columns: HashSet<&str> = HashSet::new();
        for column in &table.columns {
            check_api_name(
                &column.logical_name,
                &format!("table '{}', column '{}'", table.id, column.physical_name),
                &mut issues,
            );
            if !seen_columns.insert(column.logical_name.as_str()) {
                issues.push(ConfigIssue::new(
                    ConfigErrorCode::DuplicateApiName,
                    format!(
                        "table '{}': column logical name '{}' appears more than once",
                        table.id, column.logical_name
                    ),
                    json!({ "table": table.id, "column": column.logical_name }),
                ));
            }
        }

        for relation in &table.relations {
            if table.column(&relation.from_column).is_none() {
                issues.push(ConfigIssue::new(
                    ConfigErrorCode::InvalidRelation,
                    format!(
                        "table '{}': relation from-column '{}' does not exist",
                        table.id, relation.from_column
                    ),
                    json!({ "table": table.id, "fromColumn": relation.from_column }),
                ));
            }
            match config.tables.iter().find(|t| t.id == relation.references_table) {
                None => {
                    issues.push(ConfigIssue::new(
                        ConfigErrorCode::InvalidRelation,
                        format!(
                            "table '{}': relation references unknown table '{}'",
                            table.id, relation.references_table
                        ),
                        json!({ "table": table.id, "referencesTable": relation.references_table }),
                    ));
                }
                Some(target) => {
                    if target.column(&relation.references_column).is_none() {
                        issues.push(ConfigIssue::new(
                            ConfigErrorCode::InvalidRelation,
                            format!(
                                "table '{}': relation references unknown column '{}' on '{}'",
                                table.id, relation.references_column, relation.references_table
                            ),
                            json!({
                                "table": table.id,
                                "referencesTable": relation.references_table,
                                "referencesColumn": relation.references_column,
                            }),
                        ));
                    }
                }
            }
        }
    }

    for sync in &config.external_syncs {
        if !table_ids.contains(sync.source_table_id.as_str()) {
            issues.push(ConfigIssue::new(
                ConfigErrorCode::InvalidSync,
                format!("sync source table '{}' does not exist", sync.source_table_id),
                json!({ "sourceTableId": sync.source_table_id }),
            ));
        }
        if !database_ids.contains(sync.target_database_id.as_str()) {
            issues.push(ConfigIssue::new(
                ConfigErrorCode::InvalidSync,
                format!("sync target database '{}' does not exist", sync.target_database_id),
                json!({ "targetDatabaseId": sync.target_database_id }),
            ));
        }
    }

    for cache in &config.caches {
        for entry in &cache.entries {
            let Some(table) = config.tables.iter().find(|t| t.id == entry.table_id) else {
                issues.push(ConfigIssue::new(
                    ConfigErrorCode::InvalidCache,
                    format!(
                        "cache '{}': entry references unknown table '{}'",
                        cache.id, entry.table_id
                    ),
                    json!({ "cache": cache.id, "tableId": entry.table_id }),
                ));
                continue;
            };

            for placeholder in entry.key_placeholders() {
                if !table.primary_key.iter().any(|pk| pk == placeholder) {
                    issues.push(ConfigIssue::new(
                        ConfigErrorCode::InvalidCache,
                        format!(
                            "cache '{}': key pattern '{}' references '{}', which is not a \
                             primary-key column of '{}'",
                            cache.id, entry.key_pattern, placeholder, table.id
                        ),
                        json!({
                            "cache": cache.id,
                            "keyPattern": entry.key_pattern,
                            "placeholder": placeholder,
                        }),
                    ));
                }
            }

            if let Some(columns) = &entry.columns {
                for column in columns {
                    if table.column(column).is_none() {
                        issues.push(ConfigIssue::new(
                            ConfigErrorCode::InvalidCache,
                            format!(
                                "cache '{}': cached column '{}' does not exist on '{}'",
                                cache.id, column, table.id
                            ),
                            json!({ "cache": cache.id, "column": column, "tableId": table.id }),
                        ));
                    }
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::new(issues))
    }
}

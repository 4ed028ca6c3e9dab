//! Shared in-crate test fixtures: a small but complete metadata catalog
//! spanning a row store, a columnar store, a lakehouse, and a federation
//! engine, plus a role catalog exercising grants and masking.

use serde_json::json;

use crate::model::{ExecutionContext, MetadataConfig, Role};
use crate::registry::Snapshot;

pub fn fixture_config() -> MetadataConfig {
    serde_json::from_value(json!({
        "databases": [
            { "id": "main", "engine": "row", "federationCatalog": "pg" },
            { "id": "analytics", "engine": "columnar", "federationCatalog": "ch" },
            { "id": "lake", "engine": "lakehouse", "federationCatalog": "iceberg" },
            { "id": "fed", "engine": "federated-engine" }
        ],
        "tables": [
            {
                "id": "tbl_users", "logicalName": "users", "databaseId": "main",
                "physicalName": "public.users",
                "columns": [
                    { "logicalName": "id", "physicalName": "id", "type": "uuid" },
                    { "logicalName": "email", "physicalName": "email_addr", "type": "string",
                      "maskingFn": "email" },
                    { "logicalName": "name", "physicalName": "full_name", "type": "string" },
                    { "logicalName": "age", "physicalName": "age", "type": "int",
                      "nullable": true },
                    { "logicalName": "tags", "physicalName": "tags", "type": "string[]" }
                ],
                "primaryKey": ["id"]
            },
            {
                "id": "tbl_orders", "logicalName": "orders", "databaseId": "main",
                "physicalName": "public.orders",
                "columns": [
                    { "logicalName": "id", "physicalName": "id", "type": "uuid" },
                    { "logicalName": "userId", "physicalName": "user_id", "type": "uuid" },
                    { "logicalName": "status", "physicalName": "status", "type": "string" },
                    { "logicalName": "total", "physicalName": "total_amount",
                      "type": "decimal" },
                    { "logicalName": "createdAt", "physicalName": "created_at",
                      "type": "timestamp", "nullable": true }
                ],
                "primaryKey": ["id"],
                "relations": [{
                    "fromColumn": "userId", "referencesTable": "tbl_users",
                    "referencesColumn": "id", "kind": "many-to-one"
                }]
            },
            {
                "id": "tbl_items", "logicalName": "items", "databaseId": "main",
                "physicalName": "public.order_items",
                "columns": [
                    { "logicalName": "id", "physicalName": "id", "type": "uuid" },
                    { "logicalName": "orderId", "physicalName": "order_id", "type": "uuid" },
                    { "logicalName": "sku", "physicalName": "sku", "type": "string" },
                    { "logicalName": "qty", "physicalName": "quantity", "type": "int" }
                ],
                "primaryKey": ["id"],
                "relations": [{
                    "fromColumn": "orderId", "referencesTable": "tbl_orders",
                    "referencesColumn": "id", "kind": "many-to-one"
                }]
            },
            {
                "id": "tbl_events", "logicalName": "events", "databaseId": "analytics",
                "physicalName": "app_events",
                "columns": [
                    { "logicalName": "id", "physicalName": "id", "type": "uuid" },
                    { "logicalName": "userId", "physicalName": "user_id", "type": "uuid" },
                    { "logicalName": "kind", "physicalName": "kind", "type": "string" },
                    { "logicalName": "ts", "physicalName": "event_time", "type": "timestamp" },
                    { "logicalName": "labels", "physicalName": "labels", "type": "string[]" }
                ],
                "primaryKey": ["id"],
                "relations": [{
                    "fromColumn": "userId", "referencesTable": "tbl_users",
                    "referencesColumn": "id", "kind": "many-to-one"
                }]
            },
            {
                "id": "tbl_files", "logicalName": "files", "databaseId": "lake",
                "physicalName": "warehouse.files",
                "columns": [
                    { "logicalName": "id", "physicalName": "id", "type": "uuid" },
                    { "logicalName": "path", "physicalName": "path", "type": "string" }
                ],
                "primaryKey": ["id"]
            },
            {
                "id": "tbl_links", "logicalName": "links", "databaseId": "main",
                "physicalName": "public.links",
                "columns": [
                    { "logicalName": "a", "physicalName": "a", "type": "uuid" },
                    { "logicalName": "b", "physicalName": "b", "type": "uuid" }
                ],
                "primaryKey": ["a", "b"]
            }
        ],
        "externalSyncs": [{
            "sourceTableId": "tbl_users",
            "targetDatabaseId": "analytics",
            "targetPhysicalName": "users_replica",
            "method": "cdc",
            "estimatedLag": "minutes"
        }],
        "caches": [{
            "id": "kv", "engine": "redis",
            "entries": [{
                "tableId": "tbl_users",
                "keyPattern": "user:{id}",
                "columns": ["id", "email", "name"]
            }]
        }]
    }))
    .unwrap()
}

pub fn fixture_roles() -> Vec<Role> {
    serde_json::from_value(json!([
        { "id": "admin", "tables": "*" },
        { "id": "analyst", "tables": [
            { "tableId": "tbl_orders", "allowedColumns": ["id", "status", "total"] },
            { "tableId": "tbl_events", "allowedColumns": "*" }
        ]},
        { "id": "support", "tables": [
            { "tableId": "tbl_users", "allowedColumns": "*", "maskedColumns": ["email"] },
            { "tableId": "tbl_orders", "allowedColumns": "*" }
        ]}
    ]))
    .unwrap()
}

pub fn fixture_snapshot() -> Snapshot {
    Snapshot::build(fixture_config(), fixture_roles())
}

pub fn admin_ctx() -> ExecutionContext {
    ExecutionContext::with_scope("user", vec!["admin".into()])
}

pub fn analyst_ctx() -> ExecutionContext {
    ExecutionContext::with_scope("user", vec!["analyst".into()])
}

pub fn support_ctx() -> ExecutionContext {
    ExecutionContext::with_scope("user", vec!["support".into()])
}

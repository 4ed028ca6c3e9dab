//! Immutable, indexed view of the metadata and role catalog. A snapshot is
//! built once per (re)load and shared behind an `Arc`; queries capture it at
//! start and keep it for their whole execution.

use std::collections::{HashMap, HashSet};

use crate::model::{
    CacheDef, CacheEntry, DatabaseDef, DbEngine, ExternalSync, MetadataConfig, Role, TableDef,
};

#[derive(Debug)]
pub struct Snapshot {
    config: MetadataConfig,
    roles: Vec<Role>,
    tables_by_logical: HashMap<String, usize>,
    tables_by_id: HashMap<String, usize>,
    databases_by_id: HashMap<String, usize>,
    roles_by_id: HashMap<String, usize>,
    syncs_by_table: HashMap<String, Vec<usize>>,
    /// table id -> (cache index, entry index)
    caches_by_table: HashMap<String, Vec<(usize, usize)>>,
    /// database id -> database ids it syncs into
    connectivity: HashMap<String, HashSet<String>>,
}

impl Snapshot {
    /// Index a validated config + role catalog. Assumes `validate_config`
    /// passed; unresolved references would have been rejected there.
    pub fn build(config: MetadataConfig, roles: Vec<Role>) -> Self {
        let tables_by_logical = config
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.logical_name.clone(), i))
            .collect();
        let tables_by_id: HashMap<String, usize> = config
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        let databases_by_id = config
            .databases
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        let roles_by_id = roles
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();

        let mut syncs_by_table: HashMap<String, Vec<usize>> = HashMap::new();
        let mut connectivity: HashMap<String, HashSet<String>> = HashMap::new();
        for (i, sync) in config.external_syncs.iter().enumerate() {
            syncs_by_table
                .entry(sync.source_table_id.clone())
                .or_default()
                .push(i);
            if let Some(&t) = tables_by_id.get(&sync.source_table_id) {
                connectivity
                    .entry(config.tables[t].database_id.clone())
                    .or_default()
                    .insert(sync.target_database_id.clone());
            }
        }

        let mut caches_by_table: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (ci, cache) in config.caches.iter().enumerate() {
            for (ei, entry) in cache.entries.iter().enumerate() {
                caches_by_table
                    .entry(entry.table_id.clone())
                    .or_default()
                    .push((ci, ei));
            }
        }

        Self {
            config,
            roles,
            tables_by_logical,
            tables_by_id,
            databases_by_id,
            roles_by_id,
            syncs_by_table,
            caches_by_table,
            connectivity,
        }
    }

    pub fn empty() -> Self {
        Self::build(MetadataConfig::default(), Vec::new())
    }

    pub fn config(&self) -> &MetadataConfig {
        &self.config
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn table_by_logical(&self, logical_name: &str) -> Option<&TableDef> {
        self.tables_by_logical
            .get(logical_name)
            .map(|&i| &self.config.tables[i])
    }

    pub fn table_by_id(&self, id: &str) -> Option<&TableDef> {
        self.tables_by_id.get(id).map(|&i| &self.config.tables[i])
    }

    pub fn database(&self, id: &str) -> Option<&DatabaseDef> {
        self.databases_by_id
            .get(id)
            .map(|&i| &self.config.databases[i])
    }

    /// Databases in configured order; the materialized-plan tie-break uses it.
    pub fn databases(&self) -> &[DatabaseDef] {
        &self.config.databases
    }

    /// The configured federation engine, if any.
    pub fn federation_database(&self) -> Option<&DatabaseDef> {
        self.config
            .databases
            .iter()
            .find(|d| d.engine == DbEngine::FederatedEngine)
    }

    pub fn role(&self, id: &str) -> Option<&Role> {
        self.roles_by_id.get(id).map(|&i| &self.roles[i])
    }

    pub fn syncs_for(&self, table_id: &str) -> impl Iterator<Item = &ExternalSync> {
        self.syncs_by_table
            .get(table_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.config.external_syncs[i])
    }

    pub fn cache_entries_for(
        &self,
        table_id: &str,
    ) -> impl Iterator<Item = (&CacheDef, &CacheEntry)> {
        self.caches_by_table
            .get(table_id)
            .into_iter()
            .flatten()
            .map(|&(ci, ei)| {
                let cache = &self.config.caches[ci];
                (cache, &cache.entries[ei])
            })
    }

    /// Database ids reachable from `database_id` via declared syncs.
    pub fn sync_targets(&self, database_id: &str) -> Option<&HashSet<String>> {
        self.connectivity.get(database_id)
    }
}

//! Effective per-table access: which columns a caller may read and which
//! must be masked, given the role scopes on the execution context.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::model::{ExecutionContext, MaskingFn, StarOr, TableDef, TableGrant};
use crate::registry::Snapshot;

/// `'*'` or an explicit column set. `All` is the identity for both the
/// within-scope union and the across-scope intersection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSet {
    All,
    Named(BTreeSet<String>),
}

impl ColumnSet {
    pub fn contains(&self, column: &str) -> bool {
        match self {
            ColumnSet::All => true,
            ColumnSet::Named(set) => set.contains(column),
        }
    }

    fn union(self, other: ColumnSet) -> ColumnSet {
        match (self, other) {
            (ColumnSet::All, _) | (_, ColumnSet::All) => ColumnSet::All,
            (ColumnSet::Named(mut a), ColumnSet::Named(b)) => {
                a.extend(b);
                ColumnSet::Named(a)
            }
        }
    }

    fn intersect(self, other: ColumnSet) -> ColumnSet {
        match (self, other) {
            (ColumnSet::All, o) => o,
            (s, ColumnSet::All) => s,
            (ColumnSet::Named(a), ColumnSet::Named(b)) => {
                ColumnSet::Named(a.intersection(&b).cloned().collect())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct EffectiveAccess {
    pub allowed: bool,
    pub allowed_columns: ColumnSet,
    pub masked_columns: HashSet<String>,
    pub masking_by_column: HashMap<String, MaskingFn>,
}

impl EffectiveAccess {
    fn denied() -> Self {
        Self {
            allowed: false,
            allowed_columns: ColumnSet::Named(BTreeSet::new()),
            masked_columns: HashSet::new(),
            masking_by_column: HashMap::new(),
        }
    }

    pub fn column_allowed(&self, column: &str) -> bool {
        self.allowed && self.allowed_columns.contains(column)
    }
}

/// What a single role grants on a single table, if anything.
fn role_grant<'a>(
    role_tables: &'a StarOr<TableGrant>,
    table_id: &str,
) -> Option<(ColumnSet, &'a [String])> {
    match role_tables {
        StarOr::Star => Some((ColumnSet::All, &[])),
        StarOr::Items(grants) => grants.iter().find(|g| g.table_id == table_id).map(|g| {
            let columns = match &g.allowed_columns {
                StarOr::Star => ColumnSet::All,
                StarOr::Items(cols) => ColumnSet::Named(cols.iter().cloned().collect()),
            };
            (columns, g.masked_columns.as_slice())
        }),
    }
}

/// Compute effective access for `table` under `context`.
///
/// Per scope, role grants are unioned; across scopes, allowed-column sets
/// are intersected (most restrictive wins). A scope with no roles, or whose
/// roles grant nothing on the table, denies. No scopes at all means the
/// caller is unrestricted. Unknown role ids grant nothing (the validator
/// reports them separately).
pub fn resolve_access(
    table: &TableDef,
    context: &ExecutionContext,
    snapshot: &Snapshot,
) -> EffectiveAccess {
    let mut masked_columns: HashSet<String> = HashSet::new();
    let mut masking_by_column: HashMap<String, MaskingFn> = HashMap::new();

    // Metadata-declared default masking applies to every caller.
    for column in &table.columns {
        if let Some(mask) = column.masking_fn {
            masked_columns.insert(column.logical_name.clone());
            masking_by_column.insert(column.logical_name.clone(), mask);
        }
    }

    let mut allowed_columns = ColumnSet::All;

    for scope in &context.scopes {
        let mut scope_columns: Option<ColumnSet> = None;
        for role_id in &scope.roles {
            let Some(role) = snapshot.role(role_id) else {
                continue;
            };
            let Some((columns, masked)) = role_grant(&role.tables, &table.id) else {
                continue;
            };
            for column in masked {
                masked_columns.insert(column.clone());
                // Role-declared masking overrides the metadata default choice;
                // without a declared function the full mask applies.
                let mask = table
                    .column(column)
                    .and_then(|c| c.masking_fn)
                    .unwrap_or(MaskingFn::Full);
                masking_by_column.insert(column.clone(), mask);
            }
            scope_columns = Some(match scope_columns.take() {
                None => columns,
                Some(existing) => existing.union(columns),
            });
        }

        match scope_columns {
            // No role in this scope grants the table (or the scope is empty).
            None => return EffectiveAccess::denied(),
            Some(columns) => allowed_columns = allowed_columns.intersect(columns),
        }
    }

    EffectiveAccess {
        allowed: true,
        allowed_columns,
        masked_columns,
        masking_by_column,
    }
}

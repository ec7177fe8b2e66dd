//! Session-scoped cache of relation metadata.
//!
//! Postgres sends a `Relation` message once per table per replication
//! session, before the first tuple touching it. The cache resolves the
//! relation id carried by every subsequent `Insert` back to column names
//! and type OIDs. A reconnect starts a fresh session, so no eviction is
//! needed.

use std::collections::HashMap;

use super::error::{WalError, WalResult};
use super::pgoutput::{RelationBody, RelationColumn};

#[derive(Debug, Default)]
pub(crate) struct RelationCache {
    relations: HashMap<u32, RelationBody>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, relation: RelationBody) {
        self.relations.insert(relation.id, relation);
    }

    /// Resolve a column by relation id and tuple position.
    pub fn column(&self, relation_id: u32, index: usize) -> WalResult<&RelationColumn> {
        let relation = self
            .relations
            .get(&relation_id)
            .ok_or(WalError::UnknownRelation(relation_id))?;

        relation
            .columns
            .get(index)
            .ok_or_else(|| WalError::InvalidColumn {
                column: format!("#{index}"),
                message: format!(
                    "index out of range for relation '{}' with {} columns",
                    relation.name,
                    relation.columns.len()
                ),
            })
    }
}

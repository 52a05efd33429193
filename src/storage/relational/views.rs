//! Materialized views over synced tables.
//!
//! A view is a `SELECT` over one or more SQL tables, materialized into a table
//! named after the view. After every applied block each view whose dependencies
//! changed is refreshed: a view keyed 1:1 on a single dependency (its rows
//! carry that table's `__key`) only recomputes the rows of the changed keys,
//! every other view is recomputed in full.

use super::quote_ident;
use crate::schema::TableId;
use crate::storage::StorageError;
use rusqlite::{Connection, params};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDefinition {
    pub name: String,
    /// A `SELECT` statement over the dependency tables
    pub query: String,
    pub depends_on: Vec<TableId>,
    /// Dependency whose `__key` the view's rows carry one to one
    pub keyed_on: Option<TableId>,
}

impl ViewDefinition {
    pub fn new(name: impl Into<String>, query: impl Into<String>, depends_on: Vec<TableId>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            depends_on,
            keyed_on: None,
        }
    }

    pub fn keyed_on(mut self, table: TableId) -> Self {
        self.keyed_on = Some(table);
        self
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.name.is_empty() || self.name.starts_with("__") {
            return Err(StorageError::InvalidView(format!(
                "view name {:?} is empty or reserved",
                self.name
            )));
        }
        let query = self.query.trim_start().to_ascii_lowercase();
        if !(query.starts_with("select") || query.starts_with("with")) {
            return Err(StorageError::InvalidView(format!(
                "view {} must be defined by a SELECT",
                self.name
            )));
        }
        if self.depends_on.is_empty() {
            return Err(StorageError::InvalidView(format!(
                "view {} has no dependencies",
                self.name
            )));
        }
        if let Some(keyed_on) = &self.keyed_on {
            if !self.depends_on.contains(keyed_on) {
                return Err(StorageError::InvalidView(format!(
                    "view {} is keyed on {}, which is not a dependency",
                    self.name, keyed_on
                )));
            }
        }
        Ok(())
    }
}

/// Entity keys touched per table within one block
pub type AffectedKeys = HashMap<TableId, BTreeSet<Vec<u8>>>;

/// Recompute a view from scratch.
pub fn materialize(conn: &Connection, view: &ViewDefinition) -> Result<(), StorageError> {
    let name = quote_ident(&view.name);
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {name}; CREATE TABLE {name} AS {};",
        view.query
    ))?;
    debug!("Materialized view {}", view.name);
    Ok(())
}

/// Refresh `view` for the changes of one block.
///
/// Returns `false` when none of its dependencies changed.
pub fn refresh(
    conn: &Connection,
    view: &ViewDefinition,
    affected: &AffectedKeys,
) -> Result<bool, StorageError> {
    let changed = view
        .depends_on
        .iter()
        .filter(|table| affected.contains_key(table))
        .collect::<Vec<_>>();
    if changed.is_empty() {
        return Ok(false);
    }

    match (view.keyed_on, changed.as_slice()) {
        (Some(keyed_on), [only]) if **only == keyed_on => {
            let name = quote_ident(&view.name);
            let keys = &affected[&keyed_on];
            let mut delete = conn.prepare(&format!("DELETE FROM {name} WHERE __key = ?1"))?;
            let mut insert = conn.prepare(&format!(
                "INSERT INTO {name} SELECT * FROM ({}) WHERE __key = ?1",
                view.query
            ))?;
            for key in keys {
                delete.execute(params![key])?;
                insert.execute(params![key])?;
            }
            debug!("Refreshed {} row key(s) of view {}", keys.len(), view.name);
        }
        _ => materialize(conn, view)?,
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_definitions() {
        let table = TableId::new("", "Inventory").unwrap();
        let other = TableId::new("", "Profile").unwrap();

        assert!(ViewDefinition::new("totals", "SELECT 1", vec![table]).validate().is_ok());
        assert!(ViewDefinition::new("", "SELECT 1", vec![table]).validate().is_err());
        assert!(ViewDefinition::new("__x", "SELECT 1", vec![table]).validate().is_err());
        assert!(ViewDefinition::new("v", "DELETE FROM t", vec![table]).validate().is_err());
        assert!(ViewDefinition::new("v", "SELECT 1", vec![]).validate().is_err());
        assert!(
            ViewDefinition::new("v", "SELECT 1", vec![table])
                .keyed_on(other)
                .validate()
                .is_err()
        );
    }
}

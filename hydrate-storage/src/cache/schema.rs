//! Table schema registry.
//!
//! Static description of every logical table the cache knows: its primary
//! key field, the foreign keys it carries, and the fetcher that bulk-loads
//! it. Built once and immutable afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hydrate_core::{HydrateResult, SchemaError};

use super::traits::BulkFetcher;

/// A field in one table holding the primary key of a record in another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Field carrying the reference.
    pub field: String,
    /// Table whose primary key the field holds.
    pub target_table: String,
}

/// Schema of one logical table.
#[derive(Clone)]
pub struct TableSchema {
    name: String,
    primary_key: String,
    foreign_keys: Vec<ForeignKey>,
    fetcher: Arc<dyn BulkFetcher>,
}

impl TableSchema {
    pub fn new(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        fetcher: Arc<dyn BulkFetcher>,
    ) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            foreign_keys: Vec::new(),
            fetcher,
        }
    }

    /// Declare that `field` references the primary key of `target_table`.
    pub fn with_foreign_key(
        mut self,
        field: impl Into<String>,
        target_table: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            field: field.into(),
            target_table: target_table.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Foreign keys in declaration order.
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn fetcher(&self) -> &Arc<dyn BulkFetcher> {
        &self.fetcher
    }
}

impl fmt::Debug for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSchema")
            .field("name", &self.name)
            .field("primary_key", &self.primary_key)
            .field("foreign_keys", &self.foreign_keys)
            .finish_non_exhaustive()
    }
}

/// Read-only mapping from table name to schema.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableSchema>,
    /// Registration order, for deterministic iteration.
    order: Vec<String>,
}

impl SchemaRegistry {
    /// Build a registry, rejecting duplicate tables, empty primary keys and
    /// foreign keys that point at tables not in the set.
    pub fn new(schemas: Vec<TableSchema>) -> HydrateResult<Self> {
        let mut tables = HashMap::with_capacity(schemas.len());
        let mut order = Vec::with_capacity(schemas.len());

        for schema in schemas {
            if schema.primary_key.is_empty() {
                return Err(SchemaError::EmptyPrimaryKey {
                    table: schema.name.clone(),
                }
                .into());
            }
            if tables.contains_key(&schema.name) {
                return Err(SchemaError::DuplicateTable {
                    table: schema.name.clone(),
                }
                .into());
            }
            order.push(schema.name.clone());
            tables.insert(schema.name.clone(), schema);
        }

        for schema in tables.values() {
            for fk in &schema.foreign_keys {
                if !tables.contains_key(&fk.target_table) {
                    return Err(SchemaError::UnknownForeignTable {
                        table: schema.name.clone(),
                        field: fk.field.clone(),
                        target: fk.target_table.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(Self { tables, order })
    }

    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    /// Table names in registration order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::traits::{fetcher_fn, FetchContext};
    use hydrate_core::{FetchError, HydrateError, Record};

    fn noop() -> Arc<dyn BulkFetcher> {
        fetcher_fn(|_ctx: FetchContext, _ids: Vec<String>| async {
            Ok::<Vec<Record>, FetchError>(Vec::new())
        })
    }

    #[test]
    fn test_registry_lookup() {
        let registry = SchemaRegistry::new(vec![
            TableSchema::new("Account", "Id", noop()),
            TableSchema::new("Opportunity", "Id", noop()).with_foreign_key("AccountId", "Account"),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        let opportunity = registry.get("Opportunity").unwrap();
        assert_eq!(opportunity.primary_key(), "Id");
        assert_eq!(
            opportunity.foreign_keys(),
            &[ForeignKey {
                field: "AccountId".to_string(),
                target_table: "Account".to_string(),
            }]
        );
        assert!(registry.get("Lead").is_none());
        assert_eq!(
            registry.table_names().collect::<Vec<_>>(),
            vec!["Account", "Opportunity"]
        );
    }

    #[test]
    fn test_rejects_duplicate_table() {
        let err = SchemaRegistry::new(vec![
            TableSchema::new("Account", "Id", noop()),
            TableSchema::new("Account", "Id", noop()),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            HydrateError::Schema(SchemaError::DuplicateTable { .. })
        ));
    }

    #[test]
    fn test_rejects_dangling_foreign_key() {
        let err = SchemaRegistry::new(vec![
            TableSchema::new("Case", "Id", noop()).with_foreign_key("AccountId", "Account"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            HydrateError::Schema(SchemaError::UnknownForeignTable { ref target, .. }) if target == "Account"
        ));
    }

    #[test]
    fn test_rejects_empty_primary_key() {
        let err = SchemaRegistry::new(vec![TableSchema::new("Account", "", noop())]).unwrap_err();
        assert!(matches!(
            err,
            HydrateError::Schema(SchemaError::EmptyPrimaryKey { .. })
        ));
    }

    #[test]
    fn test_self_reference_is_allowed() {
        let registry = SchemaRegistry::new(vec![
            TableSchema::new("Account", "Id", noop()).with_foreign_key("ParentId", "Account"),
        ])
        .unwrap();
        assert_eq!(registry.get("Account").unwrap().foreign_keys().len(), 1);
    }
}

//! In-memory persistence for tenant-scoped records.
//!
//! [`MemoryStore`] is a small [`FilterCatalog`] implementation: it keeps a
//! default filter per entity type, applies it to every scoped finder, and runs
//! the registered materialization hooks on every record it loads or builds.
//! It is enough to exercise a [`TenantEngine`](crate::TenantEngine) end to end
//! without a database.
//!
//! ```rust
//! use rowfence_core::{Filter, MemoryStore, Record};
//!
//! let store = MemoryStore::new();
//! store.insert(Record::new("User").with("name", "bob").with("active", true))?;
//! store.insert(Record::new("User").with("name", "tim").with("active", false))?;
//!
//! store.set_default_filter("User", Filter::eq("active", true));
//! assert_eq!(store.find_all(&"User".into())?.len(), 1);
//! assert_eq!(store.find_all_unscoped(&"User".into())?.len(), 2);
//! # Ok::<(), rowfence_core::TenantError>(())
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{TenantError, TenantResult};
use crate::filter::{FieldAccess, Filter, FilterValue};
use crate::tenant::{EntityType, FilterCatalog, MaterializeHook};

/// A stored row: an entity type, an id once persisted, and named fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The entity type this row belongs to.
    pub entity: EntityType,
    /// Primary key, assigned by [`MemoryStore::insert`].
    pub id: Option<u64>,
    /// Field values in insertion order.
    pub fields: IndexMap<SmolStr, FilterValue>,
}

impl Record {
    /// Create an empty, unsaved record.
    pub fn new(entity: impl Into<EntityType>) -> Self {
        Self {
            entity: entity.into(),
            id: None,
            fields: IndexMap::new(),
        }
    }

    /// Set a field, builder style.
    pub fn with(mut self, field: impl Into<SmolStr>, value: impl Into<FilterValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Set a field.
    pub fn set(&mut self, field: impl Into<SmolStr>, value: impl Into<FilterValue>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Get a field.
    pub fn get(&self, field: &str) -> Option<&FilterValue> {
        self.fields.get(field)
    }

    /// Whether the record has been persisted.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    fn is_unset(&self, field: &str) -> bool {
        self.get(field).is_none_or(FilterValue::is_null)
    }
}

impl FieldAccess for Record {
    fn field_value(&self, field: &str) -> Option<FilterValue> {
        match field {
            "id" => self.id.map(|id| FilterValue::Int(id as i64)),
            _ => self.fields.get(field).cloned(),
        }
    }
}

#[derive(Default)]
struct Tables {
    filters: HashMap<EntityType, Filter>,
    rows: HashMap<EntityType, IndexMap<u64, Record>>,
    hooks: HashMap<EntityType, Vec<MaterializeHook>>,
    protected: HashMap<EntityType, Vec<SmolStr>>,
    next_id: u64,
}

impl Tables {
    fn filter(&self, entity: &EntityType) -> Filter {
        self.filters.get(entity).cloned().unwrap_or_default()
    }

    fn hooks(&self, entity: &EntityType) -> Vec<MaterializeHook> {
        self.hooks.get(entity).cloned().unwrap_or_default()
    }

    fn rows(&self, entity: &EntityType) -> Vec<Record> {
        self.rows
            .get(entity)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// An in-memory [`FilterCatalog`] with scoped and unscoped finders.
///
/// Hooks never run while the store's lock is held, so a hook may call back
/// into the store or into the engine.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an entity type's default filter (the "default scope").
    pub fn set_default_filter(&self, entity: impl Into<EntityType>, filter: Filter) {
        self.tables.write().filters.insert(entity.into(), filter);
    }

    /// Construct a record in memory without saving it.
    ///
    /// Unset fields named by the default filter's equality terms are filled
    /// in, so a record built inside a tenant context belongs to that tenant.
    /// Materialization hooks run on the result.
    pub fn build(&self, mut record: Record) -> TenantResult<Record> {
        let (scope, hooks) = {
            let tables = self.tables.read();
            (tables.filter(&record.entity), tables.hooks(&record.entity))
        };
        for (field, value) in scope.equality_terms() {
            if record.is_unset(&field) {
                record.set(field, value);
            }
        }
        run_hooks(&hooks, &record)?;
        Ok(record)
    }

    /// Build and save a record, assigning it a fresh id.
    pub fn insert(&self, record: Record) -> TenantResult<Record> {
        let mut record = self.build(record)?;

        let mut tables = self.tables.write();
        tables.next_id += 1;
        let id = tables.next_id;
        record.id = Some(id);
        tables
            .rows
            .entry(record.entity.clone())
            .or_default()
            .insert(id, record.clone());
        drop(tables);

        crate::rowfence_trace!(entity = %record.entity, id, "Inserted record");
        Ok(record)
    }

    /// All rows of `entity` that pass its default filter.
    pub fn find_all(&self, entity: &EntityType) -> TenantResult<Vec<Record>> {
        self.load(entity, true, None)
    }

    /// A row of `entity` by id, if it passes the default filter.
    pub fn find(&self, entity: &EntityType, id: u64) -> TenantResult<Option<Record>> {
        Ok(self.load(entity, true, Some(id))?.pop())
    }

    /// All rows of `entity`, ignoring the default filter.
    ///
    /// Hooks still run, so tenant enforcement still applies.
    pub fn find_all_unscoped(&self, entity: &EntityType) -> TenantResult<Vec<Record>> {
        self.load(entity, false, None)
    }

    /// A row of `entity` by id, ignoring the default filter.
    pub fn find_unscoped(&self, entity: &EntityType, id: u64) -> TenantResult<Option<Record>> {
        Ok(self.load(entity, false, Some(id))?.pop())
    }

    fn load(&self, entity: &EntityType, scoped: bool, id: Option<u64>) -> TenantResult<Vec<Record>> {
        let (filter, hooks, rows) = {
            let tables = self.tables.read();
            let rows: Vec<Record> = match id {
                Some(id) => tables
                    .rows
                    .get(entity)
                    .and_then(|rows| rows.get(&id))
                    .cloned()
                    .into_iter()
                    .collect(),
                None => tables.rows(entity),
            };
            (tables.filter(entity), tables.hooks(entity), rows)
        };

        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            if scoped && !filter.matches(&row) {
                continue;
            }
            run_hooks(&hooks, &row)?;
            loaded.push(row);
        }

        crate::rowfence_trace!(entity = %entity, scoped, rows = loaded.len(), "Loaded records");
        Ok(loaded)
    }

    /// Save field changes of a persisted record.
    ///
    /// The stored row is loaded through the default filter first, so a row
    /// the active scope hides cannot be updated. Hooks run on the stored row
    /// and again on the merged result before anything is written.
    ///
    /// Protected fields that already hold a non-null value keep it; the
    /// returned record shows what was actually stored.
    pub fn update(&self, record: Record) -> TenantResult<Record> {
        let entity = record.entity.clone();
        let id = record.id.ok_or_else(|| {
            TenantError::catalog(entity.as_str(), "cannot update a record that was never saved")
        })?;
        let missing = || TenantError::catalog(entity.as_str(), format!("no record with id {}", id));

        let (filter, hooks, protected, stored) = {
            let tables = self.tables.read();
            let stored = tables.rows.get(&entity).and_then(|rows| rows.get(&id)).cloned();
            (
                tables.filter(&entity),
                tables.hooks(&entity),
                tables.protected.get(&entity).cloned().unwrap_or_default(),
                stored,
            )
        };
        let mut merged = stored.filter(|row| filter.matches(row)).ok_or_else(missing)?;
        run_hooks(&hooks, &merged)?;

        for (field, value) in record.fields {
            if protected.contains(&field) && !merged.is_unset(&field) {
                if merged.get(&field) != Some(&value) {
                    tracing::debug!(
                        entity = %entity,
                        id,
                        field = %field,
                        "Ignored change to readonly field"
                    );
                }
                continue;
            }
            merged.set(field, value);
        }
        run_hooks(&hooks, &merged)?;

        let mut tables = self.tables.write();
        let slot = tables
            .rows
            .get_mut(&entity)
            .and_then(|rows| rows.get_mut(&id))
            .ok_or_else(missing)?;
        *slot = merged.clone();
        drop(tables);

        crate::rowfence_trace!(entity = %entity, id, "Updated record");
        Ok(merged)
    }

    /// Delete every row of `entity` that passes its default filter.
    ///
    /// Returns the number of rows deleted.
    pub fn delete_all(&self, entity: &EntityType) -> usize {
        let mut tables = self.tables.write();
        let filter = tables.filter(entity);
        let Some(rows) = tables.rows.get_mut(entity) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|_, row| !filter.matches(&*row));
        before - rows.len()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemoryStore")
            .field("filters", &tables.filters)
            .field("rows", &tables.rows.values().map(IndexMap::len).sum::<usize>())
            .field("hooks", &tables.hooks.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl FilterCatalog for MemoryStore {
    fn get_filter(&self, entity: &EntityType) -> Filter {
        self.tables.read().filter(entity)
    }

    fn set_filter(&self, entity: &EntityType, filter: Filter) -> TenantResult<()> {
        let mut tables = self.tables.write();
        if filter.is_none() {
            tables.filters.remove(entity);
        } else {
            tables.filters.insert(entity.clone(), filter);
        }
        Ok(())
    }

    fn register_post_materialization_hook(&self, entity: &EntityType, hook: MaterializeHook) {
        self.tables
            .write()
            .hooks
            .entry(entity.clone())
            .or_default()
            .push(hook);
    }

    fn protect_field(&self, entity: &EntityType, field: &str) {
        let mut tables = self.tables.write();
        let fields = tables.protected.entry(entity.clone()).or_default();
        if !fields.iter().any(|f| f == field) {
            fields.push(field.into());
        }
    }

    fn unprotect_field(&self, entity: &EntityType, field: &str) {
        if let Some(fields) = self.tables.write().protected.get_mut(entity) {
            fields.retain(|f| f != field);
        }
    }
}

fn run_hooks(hooks: &[MaterializeHook], record: &Record) -> TenantResult<()> {
    for hook in hooks {
        hook(record as &dyn Any)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn user(name: &str, company: i64) -> Record {
        Record::new("User").with("name", name).with("company_id", company)
    }

    fn names(records: &[Record]) -> Vec<&str> {
        records
            .iter()
            .filter_map(|r| match r.get("name") {
                Some(FilterValue::String(s)) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_insert_assigns_ids() {
        let store = MemoryStore::new();
        let a = store.insert(user("bob", 1)).unwrap();
        let b = store.insert(user("tim", 2)).unwrap();

        assert_eq!(a.id, Some(1));
        assert_eq!(b.id, Some(2));
        assert!(a.is_persisted());
        assert_eq!(a.field_value("id"), Some(FilterValue::Int(1)));
    }

    #[test]
    fn test_default_filter_scopes_finders() {
        let store = MemoryStore::new();
        let bob = store.insert(user("bob", 1)).unwrap();
        let tim = store.insert(user("tim", 2)).unwrap();
        let entity = EntityType::new("User");

        store.set_default_filter("User", Filter::eq("company_id", 1));

        assert_eq!(names(&store.find_all(&entity).unwrap()), vec!["bob"]);
        assert_eq!(store.find(&entity, bob.id.unwrap()).unwrap(), Some(bob));
        assert_eq!(store.find(&entity, tim.id.unwrap()).unwrap(), None);
        assert_eq!(names(&store.find_all_unscoped(&entity).unwrap()), vec!["bob", "tim"]);
        assert!(store.find_unscoped(&entity, tim.id.unwrap()).unwrap().is_some());
    }

    #[test]
    fn test_build_stamps_scope_attributes() {
        let store = MemoryStore::new();
        store.set_default_filter(
            "User",
            Filter::and([Filter::eq("active", true), Filter::eq("company_id", 7)]),
        );

        let built = store.build(Record::new("User").with("name", "ann")).unwrap();
        assert_eq!(built.get("company_id"), Some(&FilterValue::Int(7)));
        assert_eq!(built.get("active"), Some(&FilterValue::Bool(true)));
        assert!(!built.is_persisted());

        let explicit = store.build(user("joe", 3)).unwrap();
        assert_eq!(explicit.get("company_id"), Some(&FilterValue::Int(3)));
    }

    #[test]
    fn test_hooks_run_on_build_and_load() {
        let store = MemoryStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.register_post_materialization_hook(
            &"User".into(),
            Arc::new(move |instance: &dyn Any| {
                assert!(instance.downcast_ref::<Record>().is_some());
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        store.insert(user("bob", 1)).unwrap();
        store.insert(user("tim", 2)).unwrap();
        store.find_all(&"User".into()).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_failing_hook_aborts_insert() {
        let store = MemoryStore::new();
        store.register_post_materialization_hook(
            &"User".into(),
            Arc::new(|_: &dyn Any| Err(TenantError::internal("rejected"))),
        );

        assert!(store.insert(user("bob", 1)).is_err());
        assert!(store.find_all_unscoped(&"User".into()).unwrap().is_empty());
    }

    #[test]
    fn test_update_keeps_protected_fields() {
        let store = MemoryStore::new();
        let entity = EntityType::new("User");
        store.protect_field(&entity, "company_id");

        let mut bob = store.insert(user("bob", 1)).unwrap();
        bob.set("company_id", 2);
        bob.set("name", "robert");
        let stored = store.update(bob).unwrap();

        assert_eq!(stored.get("company_id"), Some(&FilterValue::Int(1)));
        assert_eq!(stored.get("name"), Some(&FilterValue::from("robert")));
    }

    #[test]
    fn test_update_sets_protected_field_while_null() {
        let store = MemoryStore::new();
        let entity = EntityType::new("User");
        store.protect_field(&entity, "company_id");

        let mut orphan = store.insert(Record::new("User").with("name", "ann")).unwrap();
        orphan.set("company_id", 5);
        let stored = store.update(orphan).unwrap();

        assert_eq!(stored.get("company_id"), Some(&FilterValue::Int(5)));
    }

    #[test]
    fn test_update_hidden_by_default_filter_fails() {
        let store = MemoryStore::new();
        let entity = EntityType::new("User");
        let mut tim = store.insert(user("tim", 2)).unwrap();

        store.set_default_filter("User", Filter::eq("company_id", 1));
        tim.set("name", "timothy");
        let err = store.update(tim.clone()).unwrap_err();

        assert_eq!(err.code, crate::ErrorCode::CatalogFailure);
        assert_eq!(
            store.find_unscoped(&entity, tim.id.unwrap()).unwrap().unwrap().get("name"),
            Some(&FilterValue::from("tim"))
        );
    }

    #[test]
    fn test_update_runs_hooks_before_writing() {
        let store = MemoryStore::new();
        let entity = EntityType::new("User");
        let mut bob = store.insert(user("bob", 1)).unwrap();
        store.register_post_materialization_hook(
            &entity,
            Arc::new(|instance: &dyn Any| match instance.downcast_ref::<Record>() {
                Some(r) if r.get("name") == Some(&FilterValue::from("mallory")) => {
                    Err(TenantError::internal("rejected"))
                }
                _ => Ok(()),
            }),
        );

        bob.set("name", "mallory");
        assert!(store.update(bob.clone()).is_err());
        assert_eq!(
            store.find(&entity, bob.id.unwrap()).unwrap().unwrap().get("name"),
            Some(&FilterValue::from("bob"))
        );
    }

    #[test]
    fn test_unprotect_field() {
        let store = MemoryStore::new();
        let entity = EntityType::new("User");
        store.protect_field(&entity, "company_id");
        store.unprotect_field(&entity, "company_id");

        let mut bob = store.insert(user("bob", 1)).unwrap();
        bob.set("company_id", 2);
        let stored = store.update(bob).unwrap();

        assert_eq!(stored.get("company_id"), Some(&FilterValue::Int(2)));
    }

    #[test]
    fn test_update_unsaved_record_fails() {
        let store = MemoryStore::new();
        let err = store.update(user("bob", 1)).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::CatalogFailure);
    }

    #[test]
    fn test_delete_all_respects_default_filter() {
        let store = MemoryStore::new();
        let entity = EntityType::new("User");
        store.insert(user("bob", 1)).unwrap();
        store.insert(user("tim", 2)).unwrap();

        store.set_default_filter("User", Filter::eq("company_id", 2));
        assert_eq!(store.delete_all(&entity), 1);

        store.set_filter(&entity, Filter::none()).unwrap();
        assert_eq!(names(&store.find_all(&entity).unwrap()), vec!["bob"]);
        assert_eq!(store.get_filter(&entity), Filter::None);
    }

    #[test]
    fn test_record_serializes_fields_in_order() {
        let record = user("bob", 1);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "entity": "User",
                "id": null,
                "fields": { "name": "bob", "company_id": 1 }
            })
        );
    }
}

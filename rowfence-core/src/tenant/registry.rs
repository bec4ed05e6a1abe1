//! Registry of tenant-scoped entity types.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::config::EngineConfig;
use crate::filter::{FieldAccess, Filter, FilterValue};

/// Identity of a persistent entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(SmolStr);

impl EntityType {
    /// Create a new entity type identity.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self(name.into())
    }

    /// Get the entity type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&EntityType> for EntityType {
    fn from(e: &EntityType) -> Self {
        e.clone()
    }
}

/// Result of reading a tenant key off an instance.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum KeyRead {
    /// The key holds a value.
    Value(FilterValue),
    /// The key is missing or null.
    Unset,
    /// The instance is not of the registered type.
    WrongType,
}

type KeyAccessor = Arc<dyn Fn(&dyn Any) -> KeyRead + Send + Sync>;

/// The tenant key of an entity type: field name plus a typed accessor.
///
/// The accessor is built once, at registration, and enforcement calls it
/// directly.
#[derive(Clone)]
pub struct TenantKey {
    field: SmolStr,
    instance_type: &'static str,
    accessor: KeyAccessor,
}

impl TenantKey {
    /// Key read by a typed accessor function.
    ///
    /// ```rust
    /// use rowfence_core::{FilterValue, TenantKey};
    ///
    /// struct User {
    ///     company_id: Option<i64>,
    /// }
    ///
    /// let key = TenantKey::typed("company_id", |u: &User| u.company_id.map(FilterValue::Int));
    /// assert_eq!(key.field(), "company_id");
    /// ```
    pub fn typed<M, F>(field: impl Into<SmolStr>, accessor: F) -> Self
    where
        M: Any,
        F: Fn(&M) -> Option<FilterValue> + Send + Sync + 'static,
    {
        Self {
            field: field.into(),
            instance_type: std::any::type_name::<M>(),
            accessor: Arc::new(move |instance: &dyn Any| match instance.downcast_ref::<M>() {
                Some(instance) => match accessor(instance) {
                    Some(value) if !value.is_null() => KeyRead::Value(value),
                    _ => KeyRead::Unset,
                },
                None => KeyRead::WrongType,
            }),
        }
    }

    /// Key read through [`FieldAccess`] on the named field.
    pub fn column<M>(field: impl Into<SmolStr>) -> Self
    where
        M: FieldAccess + Any,
    {
        let field = field.into();
        let name = field.clone();
        Self::typed(field, move |instance: &M| instance.field_value(&name))
    }

    /// The name of the tenant key field.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The Rust type the accessor reads.
    pub fn instance_type(&self) -> &'static str {
        self.instance_type
    }

    pub(crate) fn read(&self, instance: &dyn Any) -> KeyRead {
        (self.accessor)(instance)
    }
}

impl fmt::Debug for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantKey")
            .field("field", &self.field)
            .field("instance_type", &self.instance_type)
            .finish_non_exhaustive()
    }
}

/// Per-registration switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Install the enforcement hook with the collaborator.
    pub enforce_on_materialize: bool,
    /// Ask the collaborator to keep the tenant key readonly once set.
    pub protect_tenant_key: bool,
}

impl RegisterOptions {
    /// Disable enforcement on materialization.
    pub fn without_enforcement(mut self) -> Self {
        self.enforce_on_materialize = false;
        self
    }

    /// Allow the tenant key to change after it is set.
    pub fn mutable_tenant_key(mut self) -> Self {
        self.protect_tenant_key = false;
        self
    }
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RegisterOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            enforce_on_materialize: config.enforce_on_materialize,
            protect_tenant_key: config.protect_tenant_key,
        }
    }
}

/// One registered entity type.
#[derive(Debug, Clone)]
pub struct RegistrationRecord {
    pub(crate) entity_type: EntityType,
    pub(crate) key: TenantKey,
    pub(crate) options: RegisterOptions,
    /// Filter captured when the overlay was installed; `None` while no
    /// overlay is installed for this type.
    pub(crate) saved_filter: Option<Filter>,
    /// Whether the collaborator already holds a materialization hook.
    pub(crate) hook_installed: bool,
}

impl RegistrationRecord {
    pub(crate) fn new(entity_type: EntityType, key: TenantKey, options: RegisterOptions) -> Self {
        Self {
            entity_type,
            key,
            options,
            saved_filter: None,
            hook_installed: false,
        }
    }

    /// The registered entity type.
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// The tenant key field name.
    pub fn tenant_key_field(&self) -> &str {
        self.key.field()
    }

    /// The registration options in effect.
    pub fn options(&self) -> RegisterOptions {
        self.options
    }

    /// The filter that will be restored when the current overlay is removed.
    pub fn saved_filter(&self) -> Option<&Filter> {
        self.saved_filter.as_ref()
    }

    /// Whether a tenant overlay is currently installed for this type.
    pub fn is_overlaid(&self) -> bool {
        self.saved_filter.is_some()
    }
}

/// Registration records keyed by entity type, in registration order.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    records: IndexMap<EntityType, RegistrationRecord>,
}

impl Registry {
    pub(crate) fn get(&self, entity: &EntityType) -> Option<&RegistrationRecord> {
        self.records.get(entity)
    }

    /// Insert a record, returning the one it replaced.
    pub(crate) fn insert(&mut self, record: RegistrationRecord) -> Option<RegistrationRecord> {
        self.records.insert(record.entity_type.clone(), record)
    }

    pub(crate) fn contains(&self, entity: &EntityType) -> bool {
        self.records.contains_key(entity)
    }

    pub(crate) fn entity_types(&self) -> Vec<EntityType> {
        self.records.keys().cloned().collect()
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &RegistrationRecord> {
        self.records.values()
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut RegistrationRecord> {
        self.records.values_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

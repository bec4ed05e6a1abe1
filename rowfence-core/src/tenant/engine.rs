//! The tenant-context engine.
//!
//! While a context is active every registered entity type carries an overlay
//! filter `F AND key = tenant` in the collaborator, where `F` is whatever
//! default filter the type had before. Leaving the context puts `F` back.
//!
//! The overlay lives in the collaborator's shared default filter, so only one
//! context can be active per engine. Contexts on other threads wait for the
//! active one to finish; a nested context on the owning thread is rejected.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use super::catalog::{FilterCatalog, MaterializeHook};
use super::config::{DuplicateRegistration, EngineConfig};
use super::context::TenantHandle;
use super::registry::{EntityType, RegisterOptions, RegistrationRecord, Registry, TenantKey};
use crate::error::{TenantError, TenantResult};
use crate::filter::FilterValue;

/// Process-wide engine state.
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub(crate) current_tenant: Option<Arc<dyn TenantHandle>>,
    pub(crate) in_context: bool,
    owner: Option<ThreadId>,
    pub(crate) registry: Registry,
}

/// State shared between the engine and the hooks it hands out.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<EngineState>,
    idle: Condvar,
}

/// Row-level tenant isolation over a [`FilterCatalog`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use rowfence_core::{MemoryStore, Record, TenantEngine, TenantId, TenantKey};
///
/// let store = Arc::new(MemoryStore::new());
/// let engine = TenantEngine::new(Arc::clone(&store));
/// engine.register("User", TenantKey::column::<Record>("company_id"))?;
///
/// store.insert(Record::new("User").with("name", "bob").with("company_id", 1))?;
/// store.insert(Record::new("User").with("name", "tim").with("company_id", 2))?;
///
/// let visible = engine.try_with_tenant(TenantId::new(1), || store.find_all(&"User".into()))?;
/// assert_eq!(visible.len(), 1);
/// assert_eq!(store.find_all(&"User".into())?.len(), 2);
/// # Ok::<(), rowfence_core::TenantError>(())
/// ```
pub struct TenantEngine<C: FilterCatalog> {
    catalog: Arc<C>,
    config: EngineConfig,
    shared: Arc<Shared>,
}

impl<C: FilterCatalog> TenantEngine<C> {
    /// Create an engine with the default configuration.
    pub fn new(catalog: Arc<C>) -> Self {
        Self::with_config(catalog, EngineConfig::default())
    }

    /// Create an engine with the given configuration.
    pub fn with_config(catalog: Arc<C>, config: EngineConfig) -> Self {
        Self {
            catalog,
            config,
            shared: Arc::new(Shared::default()),
        }
    }

    /// The collaborator this engine installs filters into.
    pub fn catalog(&self) -> &Arc<C> {
        &self.catalog
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ============== Registration ==============

    /// Register an entity type as tenant-scoped, using the configured defaults.
    pub fn register(
        &self,
        entity: impl Into<EntityType>,
        key: TenantKey,
    ) -> TenantResult<RegistrationRecord> {
        self.register_with(entity, key, RegisterOptions::from(&self.config))
    }

    /// Register an entity type as tenant-scoped.
    ///
    /// If a context is active, the overlay for the new type is installed
    /// immediately so it is filtered for the rest of that context.
    pub fn register_with(
        &self,
        entity: impl Into<EntityType>,
        key: TenantKey,
        options: RegisterOptions,
    ) -> TenantResult<RegistrationRecord> {
        let entity = entity.into();
        let mut state = self.shared.state.lock();

        let mut record = RegistrationRecord::new(entity.clone(), key, options);
        let mut stale_protection = None;
        if let Some(previous) = state.registry.get(&entity) {
            if previous.tenant_key_field() != record.tenant_key_field() {
                match self.config.duplicate_registration {
                    DuplicateRegistration::Reject => {
                        return Err(TenantError::duplicate_registration(
                            entity.as_str(),
                            previous.tenant_key_field(),
                            record.tenant_key_field(),
                        ));
                    }
                    DuplicateRegistration::Overwrite => {
                        tracing::warn!(
                            entity = %entity,
                            previous_key = previous.tenant_key_field(),
                            key = record.tenant_key_field(),
                            "Overwriting tenant registration with a different key field"
                        );
                    }
                }
            }
            // The old overlay's baseline is the only copy of the pre-context filter.
            record.saved_filter = previous.saved_filter.clone();
            record.hook_installed = previous.hook_installed;
            if previous.options.protect_tenant_key
                && (!options.protect_tenant_key
                    || previous.tenant_key_field() != record.tenant_key_field())
            {
                stale_protection = Some(previous.tenant_key_field().to_owned());
            }
        }

        if state.in_context {
            let tenant_id = active_tenant_id(&state)?;
            install_overlay(&*self.catalog, &mut record, &tenant_id)?;
            tracing::debug!(
                entity = %entity,
                key = record.tenant_key_field(),
                tenant = %tenant_id,
                "Installed tenant overlay for entity registered mid-context"
            );
        }

        if let Some(field) = stale_protection {
            self.catalog.unprotect_field(&entity, &field);
        }
        if options.protect_tenant_key {
            self.catalog.protect_field(&entity, record.tenant_key_field());
        }
        if options.enforce_on_materialize && !record.hook_installed {
            self.catalog
                .register_post_materialization_hook(&entity, self.materialize_hook(&entity));
            record.hook_installed = true;
        }

        tracing::debug!(
            entity = %entity,
            key = record.tenant_key_field(),
            enforce = options.enforce_on_materialize,
            "Registered tenant-scoped entity"
        );
        state.registry.insert(record.clone());
        Ok(record)
    }

    fn materialize_hook(&self, entity: &EntityType) -> MaterializeHook {
        let shared = Arc::downgrade(&self.shared);
        let entity = entity.clone();
        Arc::new(move |instance: &dyn Any| match shared.upgrade() {
            Some(shared) => shared.check_materialized(&entity, instance),
            None => Ok(()),
        })
    }

    // ============== Context ==============

    /// Run `work` with `tenant` as the current tenant.
    ///
    /// Every registered entity type is filtered to `tenant` while `work`
    /// runs. When `work` returns or panics, each type's filter is restored
    /// to exactly what it was before and the current tenant is cleared.
    ///
    /// Fails without running `work` if called from inside another context on
    /// the same thread, or if the collaborator refuses an overlay. A context
    /// active on another thread is waited for.
    ///
    /// Re-entry is detected per thread only. A thread spawned by `work` that
    /// calls `with_tenant` waits for this context to exit, so `work` must not
    /// join such a thread (scoped threads and parallel iterators included) or
    /// the two block each other forever.
    pub fn with_tenant<T, F, R>(&self, tenant: T, work: F) -> TenantResult<R>
    where
        T: TenantHandle + 'static,
        F: FnOnce() -> R,
    {
        let guard = self.enter(Arc::new(tenant))?;
        let result = work();
        drop(guard);
        Ok(result)
    }

    /// Like [`with_tenant`](Self::with_tenant) for fallible work.
    ///
    /// Engine failures are converted into `E`; errors returned by `work` are
    /// passed through untouched after the context has been exited.
    pub fn try_with_tenant<T, F, R, E>(&self, tenant: T, work: F) -> Result<R, E>
    where
        T: TenantHandle + 'static,
        F: FnOnce() -> Result<R, E>,
        E: From<TenantError>,
    {
        self.with_tenant(tenant, work)?
    }

    fn enter(&self, tenant: Arc<dyn TenantHandle>) -> TenantResult<ContextGuard<'_, C>> {
        let tenant_id = tenant.tenant_id();
        let me = thread::current().id();
        let mut state = self.shared.state.lock();

        while state.in_context {
            if state.owner == Some(me) {
                let active = active_tenant_id(&state)?;
                return Err(TenantError::reentrant_context(&active, &tenant_id));
            }
            self.shared.idle.wait(&mut state);
        }

        let mut failure = None;
        for record in state.registry.records_mut() {
            if let Err(err) = install_overlay(&*self.catalog, record, &tenant_id) {
                failure = Some(err);
                break;
            }
        }
        if let Some(err) = failure {
            restore_overlays(&*self.catalog, &mut state.registry);
            drop(state);
            self.shared.idle.notify_one();
            return Err(err.with_context(format!("Entering tenant context {}", tenant_id)));
        }

        if self.config.log_tenant_context {
            tracing::debug!(
                tenant = %tenant_id,
                entity_types = state.registry.len(),
                "Entered tenant context"
            );
        }
        state.current_tenant = Some(tenant);
        state.in_context = true;
        state.owner = Some(me);

        Ok(ContextGuard { engine: self })
    }

    fn exit(&self) {
        let mut state = self.shared.state.lock();
        restore_overlays(&*self.catalog, &mut state.registry);

        if self.config.log_tenant_context {
            if let Some(tenant) = state.current_tenant.as_ref() {
                tracing::debug!(tenant = %tenant.tenant_id(), "Exited tenant context");
            }
        }
        state.current_tenant = None;
        state.in_context = false;
        state.owner = None;
        drop(state);
        self.shared.idle.notify_one();
    }

    // ============== Observers ==============

    /// The tenant of the active context, if any.
    pub fn current_tenant(&self) -> Option<Arc<dyn TenantHandle>> {
        self.shared.state.lock().current_tenant.clone()
    }

    /// The identity of the active tenant, if any.
    pub fn current_tenant_id(&self) -> Option<FilterValue> {
        self.shared
            .state
            .lock()
            .current_tenant
            .as_ref()
            .map(|t| t.tenant_id())
    }

    /// Whether a tenant context is active.
    pub fn in_context(&self) -> bool {
        self.shared.state.lock().in_context
    }

    /// Whether an entity type is registered.
    pub fn is_registered(&self, entity: impl Into<EntityType>) -> bool {
        self.shared.state.lock().registry.contains(&entity.into())
    }

    /// Snapshot of an entity type's registration.
    pub fn registration(&self, entity: impl Into<EntityType>) -> Option<RegistrationRecord> {
        self.shared.state.lock().registry.get(&entity.into()).cloned()
    }

    /// Registered entity types, in registration order.
    pub fn registered_types(&self) -> Vec<EntityType> {
        self.shared.state.lock().registry.entity_types()
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}

impl<C: FilterCatalog> fmt::Debug for TenantEngine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TenantEngine")
            .field("config", &self.config)
            .field("in_context", &state.in_context)
            .field("entity_types", &state.registry.len())
            .field(
                "overlaid",
                &state.registry.records().filter(|r| r.is_overlaid()).count(),
            )
            .finish()
    }
}

/// Exits the context when dropped, on every path out of the caller's work.
struct ContextGuard<'a, C: FilterCatalog> {
    engine: &'a TenantEngine<C>,
}

impl<C: FilterCatalog> Drop for ContextGuard<'_, C> {
    fn drop(&mut self) {
        self.engine.exit();
    }
}

fn active_tenant_id(state: &EngineState) -> TenantResult<FilterValue> {
    state
        .current_tenant
        .as_ref()
        .map(|t| t.tenant_id())
        .ok_or_else(|| TenantError::internal("context is active without a current tenant"))
}

/// Install `baseline AND key = tenant` for one record.
///
/// A record that still holds a saved filter (its last restoration failed,
/// or it replaced an overlaid registration) keeps that filter as baseline
/// rather than capturing the overlaid one.
fn install_overlay<C: FilterCatalog + ?Sized>(
    catalog: &C,
    record: &mut RegistrationRecord,
    tenant_id: &FilterValue,
) -> TenantResult<()> {
    let carried = record.saved_filter.is_some();
    let baseline = match record.saved_filter.take() {
        Some(saved) => saved,
        None => catalog.get_filter(&record.entity_type),
    };
    let overlay = baseline
        .clone()
        .and_then(catalog.equality_predicate(record.key.field(), tenant_id.clone()));

    let installed = catalog.set_filter(&record.entity_type, overlay);
    if installed.is_ok() || carried {
        record.saved_filter = Some(baseline);
    }
    installed
}

/// Put every overlaid record's baseline back.
///
/// Never stops early: a failure for one type is logged and the record keeps
/// its baseline so the next context starts from it.
fn restore_overlays<C: FilterCatalog + ?Sized>(catalog: &C, registry: &mut Registry) {
    for record in registry.records_mut() {
        let Some(saved) = record.saved_filter.take() else {
            continue;
        };
        if let Err(err) = catalog.set_filter(&record.entity_type, saved.clone()) {
            tracing::error!(
                entity = %record.entity_type,
                error = %err,
                "Failed to restore filter after tenant context; keeping baseline for next entry"
            );
            record.saved_filter = Some(saved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::store::{MemoryStore, Record};
    use crate::tenant::TenantId;
    use pretty_assertions::assert_eq;
    use std::panic::{self, AssertUnwindSafe};

    /// Wraps a store and refuses `set_filter` for one entity type on demand.
    #[derive(Default)]
    struct FlakyCatalog {
        store: MemoryStore,
        fail_for: Mutex<Option<EntityType>>,
    }

    impl FlakyCatalog {
        fn fail_for(&self, entity: Option<&str>) {
            *self.fail_for.lock() = entity.map(EntityType::new);
        }
    }

    impl FilterCatalog for FlakyCatalog {
        fn get_filter(&self, entity: &EntityType) -> Filter {
            self.store.get_filter(entity)
        }

        fn set_filter(&self, entity: &EntityType, filter: Filter) -> TenantResult<()> {
            if self.fail_for.lock().as_ref() == Some(entity) {
                return Err(TenantError::catalog(entity.as_str(), "filter store unavailable"));
            }
            self.store.set_filter(entity, filter)
        }

        fn register_post_materialization_hook(&self, entity: &EntityType, hook: MaterializeHook) {
            self.store.register_post_materialization_hook(entity, hook);
        }
    }

    fn key(field: &str) -> TenantKey {
        TenantKey::column::<Record>(field)
    }

    fn engine() -> TenantEngine<MemoryStore> {
        TenantEngine::new(Arc::new(MemoryStore::new()))
    }

    fn filter_of<C: FilterCatalog>(engine: &TenantEngine<C>, entity: &str) -> Filter {
        engine.catalog().get_filter(&EntityType::new(entity))
    }

    #[test]
    fn test_empty_registry_runs_work() {
        let engine = engine();
        let seen = engine
            .with_tenant(TenantId::new(1), || engine.current_tenant_id())
            .unwrap();

        assert_eq!(seen, Some(FilterValue::Int(1)));
        assert!(!engine.in_context());
        assert!(engine.current_tenant().is_none());
    }

    #[test]
    fn test_overlay_composes_with_existing_filter() {
        let engine = engine();
        engine.catalog().set_default_filter("User", Filter::eq("dummy", 1));
        engine.register("User", key("company_id")).unwrap();

        let inside = engine
            .with_tenant(TenantId::new(7), || filter_of(&engine, "User"))
            .unwrap();

        assert_eq!(
            inside,
            Filter::And(vec![Filter::eq("dummy", 1), Filter::eq("company_id", 7)])
        );
        assert_eq!(filter_of(&engine, "User"), Filter::eq("dummy", 1));
        assert!(!engine.registration("User").unwrap().is_overlaid());
    }

    #[test]
    fn test_saved_filter_tracks_overlay() {
        let engine = engine();
        engine.register("User", key("company_id")).unwrap();

        engine
            .with_tenant(TenantId::new(1), || {
                let record = engine.registration("User").unwrap();
                assert_eq!(record.saved_filter(), Some(&Filter::None));
            })
            .unwrap();
        assert_eq!(engine.registration("User").unwrap().saved_filter(), None);
    }

    #[test]
    fn test_restores_after_panic() {
        let engine = engine();
        engine.catalog().set_default_filter("User", Filter::eq("active", true));
        engine.register("User", key("company_id")).unwrap();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.with_tenant(TenantId::new(1), || -> i32 { panic!("work failed") })
        }));

        assert!(outcome.is_err());
        assert!(!engine.in_context());
        assert_eq!(filter_of(&engine, "User"), Filter::eq("active", true));
    }

    #[test]
    fn test_try_with_tenant_passes_work_error_through() {
        #[derive(Debug, PartialEq)]
        enum AppError {
            Tenant(String),
            NotFound,
        }

        impl From<TenantError> for AppError {
            fn from(err: TenantError) -> Self {
                AppError::Tenant(err.to_string())
            }
        }

        let engine = engine();
        engine.register("User", key("company_id")).unwrap();

        let result: Result<(), AppError> =
            engine.try_with_tenant(TenantId::new(1), || Err(AppError::NotFound));

        assert_eq!(result, Err(AppError::NotFound));
        assert_eq!(filter_of(&engine, "User"), Filter::None);
    }

    #[test]
    fn test_reentrant_context_fails_fast() {
        let engine = engine();
        engine.register("User", key("company_id")).unwrap();

        let mut inner_ran = false;
        let inner = engine
            .with_tenant(TenantId::new(1), || {
                let result = engine.with_tenant(TenantId::new(2), || inner_ran = true);
                // The outer context is untouched.
                assert_eq!(engine.current_tenant_id(), Some(FilterValue::Int(1)));
                assert_eq!(
                    filter_of(&engine, "User"),
                    Filter::eq("company_id", 1)
                );
                result
            })
            .unwrap();

        let err = inner.unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::ReentrantContext);
        assert!(err.is_configuration_error());
        assert!(!inner_ran);
        assert_eq!(filter_of(&engine, "User"), Filter::None);
    }

    #[test]
    fn test_switching_tenants() {
        let engine = engine();
        engine.register("User", key("company_id")).unwrap();

        for tenant in [1, 2, 1] {
            let inside = engine
                .with_tenant(TenantId::new(tenant), || filter_of(&engine, "User"))
                .unwrap();
            assert_eq!(inside, Filter::eq("company_id", tenant));
        }
        assert_eq!(filter_of(&engine, "User"), Filter::None);
    }

    #[test]
    fn test_late_registration_is_overlaid_and_restored() {
        let engine = engine();
        engine.catalog().set_default_filter("Post", Filter::eq("published", true));

        engine
            .with_tenant(TenantId::new(3), || {
                let record = engine.register("Post", key("account_id")).unwrap();
                assert!(record.is_overlaid());
                assert_eq!(
                    filter_of(&engine, "Post"),
                    Filter::And(vec![Filter::eq("published", true), Filter::eq("account_id", 3)])
                );
            })
            .unwrap();

        assert_eq!(filter_of(&engine, "Post"), Filter::eq("published", true));
        assert!(!engine.registration("Post").unwrap().is_overlaid());
    }

    #[test]
    fn test_overwrite_keeps_baseline_while_overlaid() {
        let engine = engine();
        engine.catalog().set_default_filter("User", Filter::eq("dummy", 1));
        engine.register("User", key("company_id")).unwrap();

        engine
            .with_tenant(TenantId::new(4), || {
                engine.register("User", key("account_id")).unwrap();
                assert_eq!(
                    filter_of(&engine, "User"),
                    Filter::And(vec![Filter::eq("dummy", 1), Filter::eq("account_id", 4)])
                );
            })
            .unwrap();

        assert_eq!(filter_of(&engine, "User"), Filter::eq("dummy", 1));
        assert_eq!(engine.registration("User").unwrap().tenant_key_field(), "account_id");
        assert_eq!(engine.registered_types(), vec![EntityType::new("User")]);
    }

    #[test]
    fn test_overwrite_moves_key_protection() {
        let engine = engine();
        engine.register("User", key("company_id")).unwrap();
        engine.register("User", key("account_id")).unwrap();

        let mut row = engine
            .catalog()
            .insert(Record::new("User").with("company_id", 1).with("account_id", 1))
            .unwrap();
        row.set("company_id", 9);
        row.set("account_id", 2);
        let stored = engine.catalog().update(row).unwrap();

        assert_eq!(stored.get("company_id"), Some(&FilterValue::Int(9)));
        assert_eq!(stored.get("account_id"), Some(&FilterValue::Int(1)));
    }

    #[test]
    fn test_reject_policy() {
        let engine = TenantEngine::with_config(
            Arc::new(MemoryStore::new()),
            EngineConfig::default().strict(),
        );
        engine.register("User", key("company_id")).unwrap();

        // Same key field is accepted.
        engine.register("User", key("company_id")).unwrap();

        let err = engine.register("User", key("account_id")).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::DuplicateRegistration);
        assert!(err.is_configuration_error());
        assert_eq!(engine.registration("User").unwrap().tenant_key_field(), "company_id");
    }

    #[test]
    fn test_enter_failure_rolls_back() {
        let catalog = Arc::new(FlakyCatalog::default());
        let engine = TenantEngine::new(Arc::clone(&catalog));
        catalog.store.set_default_filter("User", Filter::eq("dummy", 1));
        engine.register("User", key("company_id")).unwrap();
        engine.register("Post", key("company_id")).unwrap();
        catalog.fail_for(Some("Post"));

        let mut ran = false;
        let err = engine
            .with_tenant(TenantId::new(1), || ran = true)
            .unwrap_err();

        assert_eq!(err.code, crate::ErrorCode::CatalogFailure);
        assert!(!ran);
        assert!(!engine.in_context());
        assert_eq!(filter_of(&engine, "User"), Filter::eq("dummy", 1));
        assert!(engine.registration("User").unwrap().saved_filter().is_none());
        assert!(engine.registration("Post").unwrap().saved_filter().is_none());
    }

    #[test]
    fn test_failed_restore_keeps_baseline_for_next_context() {
        let catalog = Arc::new(FlakyCatalog::default());
        let engine = TenantEngine::new(Arc::clone(&catalog));
        catalog.store.set_default_filter("User", Filter::eq("dummy", 1));
        engine.register("User", key("company_id")).unwrap();
        engine.register("Post", key("company_id")).unwrap();

        engine
            .with_tenant(TenantId::new(1), || catalog.fail_for(Some("User")))
            .unwrap();

        // Post was still restored; User keeps its baseline.
        assert!(!engine.in_context());
        assert_eq!(filter_of(&engine, "Post"), Filter::None);
        assert_eq!(
            engine.registration("User").unwrap().saved_filter(),
            Some(&Filter::eq("dummy", 1))
        );

        catalog.fail_for(None);
        let inside = engine
            .with_tenant(TenantId::new(2), || filter_of(&engine, "User"))
            .unwrap();
        assert_eq!(
            inside,
            Filter::And(vec![Filter::eq("dummy", 1), Filter::eq("company_id", 2)])
        );
        assert_eq!(filter_of(&engine, "User"), Filter::eq("dummy", 1));
    }

    #[test]
    fn test_registration_without_enforcement_installs_no_hook() {
        let engine = engine();
        engine
            .register_with(
                "User",
                key("company_id"),
                RegisterOptions::default().without_enforcement(),
            )
            .unwrap();
        engine
            .catalog()
            .insert(Record::new("User").with("company_id", 2))
            .unwrap();

        let rows = engine
            .with_tenant(TenantId::new(1), || {
                engine.catalog().find_all_unscoped(&"User".into())
            })
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!engine.registration("User").unwrap().hook_installed);
    }

    #[test]
    fn test_debug_output() {
        let engine = engine();
        engine.register("User", key("company_id")).unwrap();
        let debug = format!("{:?}", engine);
        assert!(debug.contains("TenantEngine"));
        assert!(debug.contains("entity_types: 1"));
    }
}

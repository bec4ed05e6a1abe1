//! Tenant handles supplied by callers when entering a context.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::filter::FilterValue;

/// The value a caller hands to [`TenantEngine::with_tenant`](super::TenantEngine::with_tenant).
///
/// The engine only ever reads the identity: it becomes the right-hand side
/// of the overlay predicate and the value instances are checked against.
/// How the tenant was authenticated is not the engine's concern.
pub trait TenantHandle: fmt::Debug + Send + Sync {
    /// The identity compared against each instance's tenant key.
    fn tenant_id(&self) -> FilterValue;
}

/// A unique identifier for a tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantId(FilterValue);

impl TenantId {
    /// Create a new tenant ID.
    pub fn new(id: impl Into<FilterValue>) -> Self {
        Self(id.into())
    }

    /// Get the identity as a filter value.
    pub fn as_value(&self) -> &FilterValue {
        &self.0
    }

    /// Convert to the inner value.
    pub fn into_inner(self) -> FilterValue {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            FilterValue::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<uuid::Uuid> for TenantId {
    fn from(u: uuid::Uuid) -> Self {
        Self::new(u)
    }
}

impl From<i64> for TenantId {
    fn from(i: i64) -> Self {
        Self::new(i)
    }
}

impl From<i32> for TenantId {
    fn from(i: i32) -> Self {
        Self::new(i)
    }
}

impl TenantHandle for TenantId {
    fn tenant_id(&self) -> FilterValue {
        self.0.clone()
    }
}

/// Additional information about a tenant.
#[derive(Clone, Default)]
pub struct TenantInfo {
    /// Display name for the tenant.
    pub name: Option<String>,
    /// Custom metadata.
    metadata: HashMap<String, Arc<dyn std::any::Any + Send + Sync>>,
}

impl fmt::Debug for TenantInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantInfo")
            .field("name", &self.name)
            .field("metadata_keys", &self.metadata.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TenantInfo {
    /// Create a new tenant info.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tenant name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add custom metadata.
    pub fn with_metadata<T: std::any::Any + Send + Sync>(
        mut self,
        key: impl Into<String>,
        value: T,
    ) -> Self {
        self.metadata.insert(key.into(), Arc::new(value));
        self
    }

    /// Get custom metadata.
    pub fn get_metadata<T: std::any::Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.metadata.get(key).and_then(|v| v.downcast_ref())
    }
}

/// A tenant identity with optional descriptive information.
#[derive(Debug, Clone)]
pub struct TenantContext {
    /// The tenant identifier.
    pub id: TenantId,
    /// Additional tenant information.
    pub info: TenantInfo,
}

impl TenantContext {
    /// Create a new tenant context with just an ID.
    pub fn new(id: impl Into<TenantId>) -> Self {
        Self {
            id: id.into(),
            info: TenantInfo::default(),
        }
    }

    /// Create a tenant context with additional info.
    pub fn with_info(id: impl Into<TenantId>, info: TenantInfo) -> Self {
        Self {
            id: id.into(),
            info,
        }
    }

    /// Get the display name, if any.
    pub fn name(&self) -> Option<&str> {
        self.info.name.as_deref()
    }
}

impl TenantHandle for TenantContext {
    fn tenant_id(&self) -> FilterValue {
        self.id.tenant_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_creation() {
        let id1 = TenantId::new("tenant-123");
        assert_eq!(id1.as_value(), &FilterValue::String("tenant-123".into()));
        assert_eq!(id1.to_string(), "tenant-123");

        let id2: TenantId = 42_i64.into();
        assert_eq!(id2.tenant_id(), FilterValue::Int(42));
        assert_eq!(id2.to_string(), "42");
    }

    #[test]
    fn test_tenant_id_from_uuid() {
        let uuid = uuid::Uuid::new_v4();
        let id: TenantId = uuid.into();
        assert_eq!(id.tenant_id(), FilterValue::String(uuid.to_string()));
    }

    #[test]
    fn test_tenant_context() {
        let ctx = TenantContext::with_info(7, TenantInfo::new().with_name("Acme Corp"));
        assert_eq!(ctx.tenant_id(), FilterValue::Int(7));
        assert_eq!(ctx.name(), Some("Acme Corp"));
    }

    #[test]
    fn test_tenant_info_metadata() {
        let info = TenantInfo::new().with_metadata("plan", "enterprise".to_string());

        assert_eq!(
            info.get_metadata::<String>("plan"),
            Some(&"enterprise".to_string())
        );
        assert!(info.get_metadata::<i32>("plan").is_none());
    }
}

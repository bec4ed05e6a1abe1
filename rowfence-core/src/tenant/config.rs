//! Tenant engine configuration.
//!
//! Configuration can be built in code or loaded from a TOML file:
//!
//! ```toml
//! duplicate_registration = "reject"
//! enforce_on_materialize = true
//! protect_tenant_key = true
//! log_tenant_context = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TenantResult;

/// Default config file name.
pub const CONFIG_FILE_NAME: &str = "rowfence.toml";

/// What to do when an entity type is registered a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRegistration {
    /// Replace the existing registration, warning when the key field changes.
    #[default]
    Overwrite,
    /// Fail with a configuration error when the key field changes.
    Reject,
}

/// Configuration for a [`TenantEngine`](super::TenantEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Policy for re-registering an entity type.
    pub duplicate_registration: DuplicateRegistration,
    /// Default for installing the enforcement hook on registration.
    pub enforce_on_materialize: bool,
    /// Default for asking the collaborator to keep the tenant key readonly.
    pub protect_tenant_key: bool,
    /// Whether to emit debug events for every context entry and exit.
    pub log_tenant_context: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            duplicate_registration: DuplicateRegistration::Overwrite,
            enforce_on_materialize: true,
            protect_tenant_key: true,
            log_tenant_context: false,
        }
    }
}

impl EngineConfig {
    /// Create a builder for advanced configuration.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> TenantResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> TenantResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject conflicting re-registrations.
    pub fn strict(mut self) -> Self {
        self.duplicate_registration = DuplicateRegistration::Reject;
        self
    }

    /// Enable tenant context logging.
    pub fn with_logging(mut self) -> Self {
        self.log_tenant_context = true;
        self
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Set the duplicate registration policy.
    pub fn duplicate_registration(mut self, policy: DuplicateRegistration) -> Self {
        self.config.duplicate_registration = policy;
        self
    }

    /// Install enforcement hooks by default.
    pub fn enforce_on_materialize(mut self, enforce: bool) -> Self {
        self.config.enforce_on_materialize = enforce;
        self
    }

    /// Protect tenant keys by default.
    pub fn protect_tenant_key(mut self, protect: bool) -> Self {
        self.config.protect_tenant_key = protect;
        self
    }

    /// Enable tenant context logging.
    pub fn log_context(mut self, log: bool) -> Self {
        self.config.log_tenant_context = log;
        self
    }

    /// Build the config.
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Error types for tenant-context operations with actionable messages.
//!
//! Every error carries an [`ErrorCode`] for programmatic handling and an
//! [`ErrorContext`] describing which entity type and field were involved.
//!
//! # Error Codes
//!
//! Error codes follow a pattern: R{category}{number}
//! - 5xxx: Collaborator errors (the persistence layer refused a filter swap)
//! - 7xxx: Configuration errors (duplicate registration, re-entrant context)
//! - 9xxx: Tenant errors (access violations, internal failures)
//!
//! ```rust
//! use rowfence_core::{ErrorCode, FilterValue, TenantError};
//!
//! let err = TenantError::access_violation("User", "company_id", FilterValue::Int(1), FilterValue::Int(2));
//! assert_eq!(err.code, ErrorCode::AccessViolation);
//! assert!(err.is_access_violation());
//! assert_eq!(err.context.expected, Some(FilterValue::Int(1)));
//! ```

use std::fmt;
use thiserror::Error;

use crate::filter::FilterValue;

/// Result type for tenant operations.
pub type TenantResult<T> = Result<T, TenantError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Collaborator errors (5xxx)
    /// The persistence collaborator failed to install a filter (R5005).
    CatalogFailure = 5005,

    // Configuration errors (7xxx)
    /// Invalid configuration (R7001).
    InvalidConfiguration = 7001,
    /// Missing configuration (R7002).
    MissingConfiguration = 7002,
    /// Entity type registered twice with conflicting key fields (R7004).
    DuplicateRegistration = 7004,
    /// Tenant context entered while one is already active on this thread (R7005).
    ReentrantContext = 7005,
    /// Instance does not match the type registered for an entity (R7006).
    InstanceMismatch = 7006,

    // Tenant errors (9xxx)
    /// Internal error (R9001).
    Internal = 9001,
    /// Instance belongs to a different tenant than the active one (R9101).
    AccessViolation = 9101,
}

impl ErrorCode {
    /// Get the error code string (e.g., "R9101").
    pub fn code(&self) -> String {
        format!("R{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::CatalogFailure => "Filter catalog failure",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::MissingConfiguration => "Missing configuration",
            Self::DuplicateRegistration => "Conflicting entity registration",
            Self::ReentrantContext => "Re-entrant tenant context",
            Self::InstanceMismatch => "Instance type mismatch",
            Self::Internal => "Internal error",
            Self::AccessViolation => "Tenant access violation",
        }
    }

    /// Get the documentation URL for this error.
    pub fn docs_url(&self) -> String {
        format!(
            "{}/blob/main/docs/errors.md#{}",
            env!("CARGO_PKG_REPOSITORY"),
            self.code().to_lowercase()
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Suggestion for fixing an error.
#[derive(Debug, Clone)]
pub struct Suggestion {
    /// The suggestion text.
    pub text: String,
    /// Optional code example.
    pub code: Option<String>,
}

impl Suggestion {
    /// Create a new suggestion.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: None,
        }
    }

    /// Add a code example.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed.
    pub operation: Option<String>,
    /// The entity type involved.
    pub entity: Option<String>,
    /// The field involved (usually the tenant key field).
    pub field: Option<String>,
    /// The tenant key value the active context expected.
    pub expected: Option<FilterValue>,
    /// The tenant key value found on the instance.
    pub actual: Option<FilterValue>,
    /// Suggestions for fixing the error.
    pub suggestions: Vec<Suggestion>,
    /// Help text.
    pub help: Option<String>,
}

/// Errors raised by the tenant engine.
#[derive(Error, Debug)]
pub struct TenantError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for TenantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl TenantError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Add a suggestion for fixing the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context.suggestions.push(Suggestion::new(suggestion));
        self
    }

    /// Add a code suggestion.
    pub fn with_code_suggestion(mut self, text: impl Into<String>, code: impl Into<String>) -> Self {
        self.context
            .suggestions
            .push(Suggestion::new(text).with_code(code));
        self
    }

    /// Add help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.context.help = Some(help.into());
        self
    }

    /// Set the entity type.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.context.entity = Some(entity.into());
        self
    }

    /// Set the field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.context.field = Some(field.into());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// An instance was materialized for a tenant other than the active one.
    pub fn access_violation(
        entity: impl Into<String>,
        field: impl Into<String>,
        expected: FilterValue,
        actual: FilterValue,
    ) -> Self {
        let entity = entity.into();
        let field = field.into();
        let mut err = Self::new(
            ErrorCode::AccessViolation,
            format!(
                "{} instance belongs to tenant {} but the active tenant is {}",
                entity, actual, expected
            ),
        )
        .with_entity(&entity)
        .with_field(&field)
        .with_help("Rows of another tenant must never be loaded or built inside a tenant context");
        err.context.expected = Some(expected);
        err.context.actual = Some(actual);
        err
    }

    /// A tenant context was entered from inside an active one on the same thread.
    pub fn reentrant_context(active: &FilterValue, requested: &FilterValue) -> Self {
        Self::new(
            ErrorCode::ReentrantContext,
            format!(
                "Cannot enter tenant {} while tenant {} is active on this thread",
                requested, active
            ),
        )
        .with_suggestion("Finish the active with_tenant block before switching tenants")
        .with_help("Tenant contexts are flat: one overlay per entity type at a time")
    }

    /// An entity type was registered again with a different tenant key field.
    pub fn duplicate_registration(
        entity: impl Into<String>,
        existing: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        let entity = entity.into();
        let existing = existing.into();
        let requested = requested.into();
        Self::new(
            ErrorCode::DuplicateRegistration,
            format!(
                "{} is already registered with tenant key {}, cannot re-register with {}",
                entity, existing, requested
            ),
        )
        .with_entity(&entity)
        .with_field(&requested)
        .with_suggestion("Register each entity type once, at startup")
        .with_code_suggestion(
            "Allow overwriting registrations",
            "EngineConfig::builder().duplicate_registration(DuplicateRegistration::Overwrite)",
        )
    }

    /// The accessor registered for an entity could not read the given instance.
    pub fn instance_mismatch(entity: impl Into<String>, expected_type: &'static str) -> Self {
        let entity = entity.into();
        Self::new(
            ErrorCode::InstanceMismatch,
            format!(
                "Instance passed for {} is not a {}",
                entity, expected_type
            ),
        )
        .with_entity(&entity)
        .with_suggestion("Register the entity with a TenantKey built for its instance type")
    }

    /// Create an invalid configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidConfiguration,
            format!("Invalid configuration: {}", message.into()),
        )
    }

    /// The persistence collaborator failed to install a filter.
    pub fn catalog(entity: impl Into<String>, message: impl Into<String>) -> Self {
        let entity = entity.into();
        Self::new(
            ErrorCode::CatalogFailure,
            format!("Failed to install filter for {}: {}", entity, message.into()),
        )
        .with_entity(&entity)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::Internal,
            format!("Internal error: {}", message.into()),
        )
        .with_help("This is likely a bug in rowfence - please report it at https://github.com/pegasusheavy/rowfence/issues")
    }

    // ============== Error Checks ==============

    /// Check if this is a tenant access violation.
    pub fn is_access_violation(&self) -> bool {
        self.code == ErrorCode::AccessViolation
    }

    /// Check if this error reports a configuration problem.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::InvalidConfiguration
                | ErrorCode::MissingConfiguration
                | ErrorCode::DuplicateRegistration
                | ErrorCode::ReentrantContext
                | ErrorCode::InstanceMismatch
        )
    }

    /// Expected tenant key value, for access violations.
    pub fn expected(&self) -> Option<&FilterValue> {
        self.context.expected.as_ref()
    }

    /// Actual tenant key value, for access violations.
    pub fn actual(&self) -> Option<&FilterValue> {
        self.context.actual.as_ref()
    }

    // ============== Display Functions ==============

    /// Get the documentation URL for this error.
    pub fn docs_url(&self) -> String {
        self.code.docs_url()
    }

    /// Display the full error with all context and suggestions.
    pub fn display_full(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("Error [{}]: {}\n", self.code.code(), self.message));

        if let Some(ref op) = self.context.operation {
            output.push_str(&format!("  → While: {}\n", op));
        }
        if let Some(ref entity) = self.context.entity {
            output.push_str(&format!("  → Entity: {}\n", entity));
        }
        if let Some(ref field) = self.context.field {
            output.push_str(&format!("  → Field: {}\n", field));
        }
        if let Some(ref expected) = self.context.expected {
            output.push_str(&format!("  → Expected: {}\n", expected));
        }
        if let Some(ref actual) = self.context.actual {
            output.push_str(&format!("  → Actual: {}\n", actual));
        }

        if !self.context.suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for (i, suggestion) in self.context.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion.text));
                if let Some(ref code) = suggestion.code {
                    output.push_str(&format!(
                        "     ```\n     {}\n     ```\n",
                        code.replace('\n', "\n     ")
                    ));
                }
            }
        }

        if let Some(ref help) = self.context.help {
            output.push_str(&format!("\nHelp: {}\n", help));
        }

        output.push_str(&format!("\nMore info: {}\n", self.docs_url()));

        output
    }
}

impl From<toml::de::Error> for TenantError {
    fn from(err: toml::de::Error) -> Self {
        TenantError::configuration(format!("failed to parse TOML: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for TenantError {
    fn from(err: std::io::Error) -> Self {
        TenantError::new(ErrorCode::MissingConfiguration, format!("IO error: {}", err))
            .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::AccessViolation.code(), "R9101");
        assert_eq!(ErrorCode::ReentrantContext.code(), "R7005");
        assert_eq!(ErrorCode::CatalogFailure.code(), "R5005");
    }

    #[test]
    fn test_access_violation_carries_values() {
        let err = TenantError::access_violation("User", "company_id", 1.into(), 2.into());
        assert!(err.is_access_violation());
        assert!(!err.is_configuration_error());
        assert_eq!(err.expected(), Some(&FilterValue::Int(1)));
        assert_eq!(err.actual(), Some(&FilterValue::Int(2)));
        assert_eq!(err.context.entity.as_deref(), Some("User"));
        assert_eq!(err.context.field.as_deref(), Some("company_id"));
    }

    #[test]
    fn test_configuration_errors() {
        assert!(TenantError::reentrant_context(&1.into(), &2.into()).is_configuration_error());
        assert!(
            TenantError::duplicate_registration("User", "company_id", "org_id")
                .is_configuration_error()
        );
        assert!(TenantError::instance_mismatch("User", "Record").is_configuration_error());
        assert!(!TenantError::catalog("User", "offline").is_configuration_error());
    }

    #[test]
    fn test_display_full() {
        let err = TenantError::access_violation("User", "company_id", 1.into(), 2.into())
            .with_context("Loading users");

        let output = err.display_full();
        assert!(output.contains("R9101"));
        assert!(output.contains("Entity: User"));
        assert!(output.contains("Expected: 1"));
        assert!(output.contains("Actual: 2"));
        assert!(output.contains("While: Loading users"));
    }

    #[test]
    fn test_duplicate_registration_suggests_overwrite() {
        let err = TenantError::duplicate_registration("User", "company_id", "org_id");
        assert_eq!(err.context.suggestions.len(), 2);
        assert!(err.context.suggestions[1].code.is_some());
    }

    #[test]
    fn test_docs_url() {
        let err = TenantError::internal("boom");
        assert!(err.docs_url().starts_with(env!("CARGO_PKG_REPOSITORY")));
        assert!(err.docs_url().ends_with("docs/errors.md#r9001"));
    }
}

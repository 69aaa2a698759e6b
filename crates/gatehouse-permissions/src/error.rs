//! Permissions engine error types.
//!
//! This module defines the errors surfaced by the policy service, the
//! migration engine and the storage traits. Compiler-specific failures are
//! defined in [`crate::expression::CompileError`] and convert into
//! [`PermissionsError`] at the service boundary.

use std::fmt;

use serde::Serialize;

use crate::expression::CompileError;

/// A single field-level problem reported back to policy authors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    /// The request field the problem refers to (e.g. `expression`).
    pub field: String,

    /// Human-readable description of the problem.
    pub message: String,

    /// Byte offset inside the field, when the problem has a position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl FieldError {
    /// Create a field error without position information.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            position: None,
        }
    }

    /// Attach a byte offset.
    #[must_use]
    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

/// Errors that can occur in the permissions engine.
#[derive(Debug, thiserror::Error)]
pub enum PermissionsError {
    /// The policy expression failed to parse or type-check.
    #[error("Invalid expression: {message}")]
    InvalidExpression {
        /// Description of the first problem found.
        message: String,
        /// Field-level details for policy authors.
        details: Vec<FieldError>,
    },

    /// The expression's structural cost is above the configured ceiling.
    #[error("Expression complexity {complexity} exceeds maximum {max}")]
    ComplexityExceeded {
        /// Estimated complexity of the expression.
        complexity: u32,
        /// Configured ceiling.
        max: u32,
    },

    /// The entity does not exist, or belongs to another tenant.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (policy, namespace, ...).
        entity: &'static str,
        /// Requested identifier.
        id: String,
    },

    /// The request is malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// A tenant or batch limit would be exceeded.
    #[error("Capacity exceeded: {message}")]
    CapacityExceeded {
        /// Description of the exceeded limit.
        message: String,
    },

    /// The namespace still owns policies and cannot be deleted.
    #[error("Namespace {namespace_id} still owns {policy_count} policies")]
    NamespaceNotEmpty {
        /// Namespace that was targeted.
        namespace_id: String,
        /// Number of policies still attached.
        policy_count: usize,
    },

    /// The entity already exists.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The durable policy store failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The legacy RBAC source failed.
    #[error("Legacy source error: {message}")]
    LegacySource {
        /// Description of the legacy source error.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl PermissionsError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `CapacityExceeded` error.
    #[must_use]
    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `LegacySource` error.
    #[must_use]
    pub fn legacy_source(message: impl Into<String>) -> Self {
        Self::LegacySource {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a caller error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidExpression { .. }
                | Self::ComplexityExceeded { .. }
                | Self::NotFound { .. }
                | Self::InvalidRequest { .. }
                | Self::CapacityExceeded { .. }
                | Self::NamespaceNotEmpty { .. }
                | Self::Conflict { .. }
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::LegacySource { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` for compile-time expression errors.
    #[must_use]
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidExpression { .. } | Self::ComplexityExceeded { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidExpression { .. } | Self::ComplexityExceeded { .. } => {
                ErrorCategory::Compile
            }
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidRequest { .. } => ErrorCategory::Validation,
            Self::CapacityExceeded { .. } => ErrorCategory::Capacity,
            Self::NamespaceNotEmpty { .. } | Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Storage { .. } | Self::LegacySource { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Field-level details for validation endpoints.
    #[must_use]
    pub fn field_errors(&self) -> Vec<FieldError> {
        match self {
            Self::InvalidExpression { details, .. } => details.clone(),
            Self::ComplexityExceeded { .. } => vec![FieldError::new("expression", self.to_string())],
            other => vec![FieldError::new("request", other.to_string())],
        }
    }
}

impl From<CompileError> for PermissionsError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::ComplexityExceeded { complexity, max } => {
                Self::ComplexityExceeded { complexity, max }
            }
            other => {
                let mut detail = FieldError::new("expression", other.to_string());
                if let Some(position) = other.position() {
                    detail = detail.at(position);
                }
                Self::InvalidExpression {
                    message: other.to_string(),
                    details: vec![detail],
                }
            }
        }
    }
}

/// Categories of permissions errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Expression compile errors.
    Compile,
    /// Missing or cross-tenant entities.
    NotFound,
    /// Request validation errors.
    Validation,
    /// Tenant or batch limits.
    Capacity,
    /// Conflicting state.
    Conflict,
    /// Storage/legacy-source errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile => write!(f, "compile"),
            Self::NotFound => write!(f, "not_found"),
            Self::Validation => write!(f, "validation"),
            Self::Capacity => write!(f, "capacity"),
            Self::Conflict => write!(f, "conflict"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

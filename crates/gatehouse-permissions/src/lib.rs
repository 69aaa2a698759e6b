//! # gatehouse-permissions
//!
//! Attribute-based access control engine for multi-tenant applications.
//!
//! This crate provides:
//! - CEL policy expressions with static checking against a fixed
//!   environment and a structural complexity ceiling
//! - A compiled-policy cache keyed by tenant scope, with prefix invalidation
//! - A concurrent evaluator bounded by a per-call deadline
//! - The policy service tying store, cache, compiler and evaluator together
//! - Built-in policy templates
//! - A legacy RBAC to ABAC migration engine
//!
//! ## Modules
//!
//! - [`expression`] - CEL compilation, static checking, complexity scoring and built-ins
//! - [`cache`] - Compiled-policy cache
//! - [`evaluator`] - Allow-if-any evaluation under a deadline
//! - [`service`] - Evaluation and administration API
//! - [`migration`] - RBAC translation and migration runs
//! - [`templates`] - Parameterized policy templates
//! - [`invalidation`] - Cross-instance cache invalidation events
//! - [`audit`] - Audit events and the audit log trait
//! - [`storage`] - Storage traits consumed by the engine
//! - [`config`] - Engine, cache and migration configuration

pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod invalidation;
pub mod migration;
pub mod model;
pub mod service;
pub mod storage;
pub mod templates;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::{AuditAction, AuditEvent, AuditEventBuilder, AuditFilter, AuditLog};
pub use cache::{LoadTicket, PolicyCache, PolicyCacheStats};
pub use config::{
    CacheBackend, CacheConfig, ConfigError, EngineConfig, MigrationConfig, PermissionsConfig,
    TenantOverride,
};
pub use error::{ErrorCategory, FieldError, PermissionsError};
pub use evaluator::PolicyEvaluator;
pub use expression::{CompileError, CompiledPolicy, EvaluationError, PolicyCompiler};
pub use invalidation::{
    CacheInvalidationListener, InvalidationEvent, InvalidationMessage, PolicyChangeNotifier,
};
pub use migration::{
    LegacyPolicy, LegacyRbacSource, LegacyRole, MigrationEngine, MigrationItemError,
    MigrationOptions, MigrationResult, MigrationState, MigrationStatus, PolicyPreview,
    RbacTranslator,
};
pub use model::{
    Decision, EvaluateRequest, EvaluationContext, Policy, PrincipalContext, RequestContext,
    ResourceContext, TenantScope,
};
pub use service::{PolicyService, ValidationResponse};
pub use storage::{PolicyStore, SharedPolicyCache};
pub use templates::{PolicyTemplate, PolicyTemplates, TemplateParams};

/// Type alias for permissions engine results.
pub type PermissionsResult<T> = Result<T, PermissionsError>;

//! Legacy RBAC to ABAC migration.
//!
//! [`RbacTranslator`] turns `(subject, actions, resource, condition)` rules
//! into policy expressions; [`MigrationEngine`] reads rules from a
//! [`LegacyRbacSource`] and commits the translations through the policy
//! service.

mod engine;
mod source;
mod translator;

pub use engine::{
    MigrationEngine, MigrationItemError, MigrationOptions, MigrationResult, MigrationState,
    MigrationStatus,
};
pub use source::{LegacyPolicy, LegacyRbacSource, LegacyRole};
pub use translator::{ConditionRule, MANUAL_REVIEW_RULE, PolicyPreview, RbacTranslator};

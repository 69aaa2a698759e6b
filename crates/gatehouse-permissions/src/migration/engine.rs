//! Migration runs over a legacy RBAC source.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::source::{LegacyPolicy, LegacyRbacSource};
use super::translator::{PolicyPreview, RbacTranslator, ResourcePattern, SubjectPattern};
use crate::PermissionsResult;
use crate::audit::{AuditAction, AuditEventBuilder};
use crate::config::MigrationConfig;
use crate::error::PermissionsError;
use crate::expression::PolicyCompiler;
use crate::model::{
    EvaluationContext, PrincipalContext, ResourceContext, TenantScope, WILDCARD,
};
use crate::service::PolicyService;

/// Placeholder for identifiers a legacy rule leaves open.
const PLACEHOLDER: &str = "migration-check";

/// Per-run switches. Defaults come from [`MigrationConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOptions {
    /// Translate only; persist nothing.
    pub dry_run: bool,

    /// Compile each translation and replay unconditional rules against it.
    pub validate_equivalence: bool,

    /// Append the legacy rule to the policy description.
    pub keep_original: bool,
}

impl From<&MigrationConfig> for MigrationOptions {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            validate_equivalence: config.validate_equivalence,
            keep_original: config.keep_original,
        }
    }
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self::from(&MigrationConfig::default())
    }
}

impl MigrationOptions {
    /// A copy with dry-run switched on.
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Lifecycle of the engine's most recent run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    #[default]
    NotStarted,
    Running,
    Completed,
    /// The legacy source failed before any item was processed.
    Aborted,
}

/// One legacy rule that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationItemError {
    /// Position of the rule in the source listing.
    pub index: usize,
    pub subject: String,
    pub resource: String,
    pub message: String,
}

/// Summary of one migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub total: usize,
    pub migrated: usize,

    /// Rules whose generated policy already existed.
    pub skipped: usize,

    pub failed: usize,
    pub errors: Vec<MigrationItemError>,

    /// Translated policies; filled on dry runs only.
    pub policies: Vec<PolicyPreview>,

    pub dry_run: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

/// Snapshot of the engine state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    pub state: MigrationState,

    /// Identifier of the current or last run.
    #[serde(default)]
    pub run_id: Option<Uuid>,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,

    /// Result of the last completed run.
    #[serde(default)]
    pub last_result: Option<MigrationResult>,

    /// Why the last run aborted.
    #[serde(default)]
    pub error: Option<String>,
}

enum ItemOutcome {
    Migrated(PolicyPreview),
    Skipped(PolicyPreview),
}

/// Translates legacy RBAC rules and commits them through the policy service.
///
/// Only one run may be active per engine; a second concurrent run is
/// rejected with `Conflict`.
pub struct MigrationEngine {
    service: Arc<PolicyService>,
    source: Arc<dyn LegacyRbacSource>,
    translator: RbacTranslator,
    defaults: MigrationOptions,
    status: Mutex<MigrationStatus>,
}

fn lock_status(status: &Mutex<MigrationStatus>) -> MutexGuard<'_, MigrationStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The `Running` claim of one run. Dropping it before [`RunGuard::complete`]
/// or [`RunGuard::abort`] marks the run aborted, so a cancelled or panicked
/// run never leaves the engine stuck.
struct RunGuard<'a> {
    status: &'a Mutex<MigrationStatus>,
    run_id: Uuid,
    started_at: OffsetDateTime,
    finished: bool,
}

impl RunGuard<'_> {
    fn complete(mut self, result: &MigrationResult) {
        let mut status = lock_status(self.status);
        status.state = MigrationState::Completed;
        status.last_result = Some(result.clone());
        self.finished = true;
    }

    fn abort(mut self, error: &PermissionsError) {
        tracing::error!(run_id = %self.run_id, error = %error, "RBAC migration aborted");
        let mut status = lock_status(self.status);
        status.state = MigrationState::Aborted;
        status.error = Some(error.to_string());
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut status = lock_status(self.status);
        if status.run_id == Some(self.run_id) && status.state == MigrationState::Running {
            tracing::warn!(run_id = %self.run_id, "RBAC migration dropped before completion");
            status.state = MigrationState::Aborted;
            status.error = Some("migration run was cancelled before completion".to_string());
        }
    }
}

impl MigrationEngine {
    /// Create an engine with options taken from the service configuration.
    #[must_use]
    pub fn new(service: Arc<PolicyService>, source: Arc<dyn LegacyRbacSource>) -> Self {
        let defaults = MigrationOptions::from(&service.config().migration);
        Self {
            service,
            source,
            translator: RbacTranslator::default(),
            defaults,
            status: Mutex::new(MigrationStatus::default()),
        }
    }

    /// Use a translator with additional condition rules.
    #[must_use]
    pub fn with_translator(mut self, translator: RbacTranslator) -> Self {
        self.translator = translator;
        self
    }

    /// Options derived from configuration.
    #[must_use]
    pub fn default_options(&self) -> MigrationOptions {
        self.defaults
    }

    pub async fn status(&self) -> MigrationStatus {
        lock_status(&self.status).clone()
    }

    /// Translate one legacy rule without side effects.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed subject or resource.
    pub fn preview_conversion(&self, legacy: &LegacyPolicy) -> PermissionsResult<PolicyPreview> {
        self.translator.convert_policy(legacy)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Migrate every legacy policy into `scope`.
    ///
    /// Item failures are recorded in the result and never abort the run.
    ///
    /// # Errors
    ///
    /// - `Conflict` if a run is already in progress
    /// - the source error if the legacy source cannot be read; the run is
    ///   then marked aborted
    ///
    /// Dropping the returned future before it resolves also marks the run
    /// aborted.
    pub async fn migrate_all(
        &self,
        scope: &TenantScope,
        actor: &str,
        options: &MigrationOptions,
    ) -> PermissionsResult<MigrationResult> {
        scope.validate()?;
        let guard = self.begin()?;
        tracing::info!(
            run_id = %guard.run_id,
            scope = %scope,
            dry_run = options.dry_run,
            "Starting RBAC migration"
        );

        let legacy = match self.source.get_all_policies().await {
            Ok(legacy) => legacy,
            Err(e) => {
                guard.abort(&e);
                return Err(e);
            }
        };
        Ok(self.run(guard, scope, actor, &legacy, options).await)
    }

    /// Migrate the role permissions of the scope's application environment.
    /// Each `(role, permission)` pair becomes one policy whose subject is the
    /// role.
    ///
    /// # Errors
    ///
    /// Same as [`MigrationEngine::migrate_all`].
    pub async fn migrate_roles(
        &self,
        scope: &TenantScope,
        actor: &str,
        options: &MigrationOptions,
    ) -> PermissionsResult<MigrationResult> {
        scope.validate()?;
        let guard = self.begin()?;
        tracing::info!(
            run_id = %guard.run_id,
            scope = %scope,
            dry_run = options.dry_run,
            "Starting RBAC role migration"
        );

        let legacy = match self.role_policies(scope).await {
            Ok(legacy) => legacy,
            Err(e) => {
                guard.abort(&e);
                return Err(e);
            }
        };
        Ok(self.run(guard, scope, actor, &legacy, options).await)
    }

    async fn role_policies(&self, scope: &TenantScope) -> PermissionsResult<Vec<LegacyPolicy>> {
        let roles = self
            .source
            .get_roles(&scope.app_id, &scope.environment_id)
            .await?;

        let mut legacy = Vec::new();
        for role in roles {
            let permissions = self.source.get_role_permissions(&role.id).await?;
            tracing::debug!(
                role = %role.name,
                permissions = permissions.len(),
                "Loaded legacy role"
            );
            legacy.extend(permissions.into_iter().map(|permission| LegacyPolicy {
                subject: format!("role:{}", role.name),
                ..permission
            }));
        }
        Ok(legacy)
    }

    fn begin(&self) -> PermissionsResult<RunGuard<'_>> {
        let mut status = lock_status(&self.status);
        if status.state == MigrationState::Running {
            return Err(PermissionsError::conflict("a migration run is already in progress"));
        }
        let run_id = Uuid::new_v4();
        let started_at = OffsetDateTime::now_utc();
        status.state = MigrationState::Running;
        status.run_id = Some(run_id);
        status.started_at = Some(started_at);
        status.error = None;
        Ok(RunGuard {
            status: &self.status,
            run_id,
            started_at,
            finished: false,
        })
    }

    async fn run(
        &self,
        guard: RunGuard<'_>,
        scope: &TenantScope,
        actor: &str,
        legacy: &[LegacyPolicy],
        options: &MigrationOptions,
    ) -> MigrationResult {
        let (run_id, started_at) = (guard.run_id, guard.started_at);
        let compiler = self.service.compiler_for(scope);
        let mut seen = HashSet::new();
        let mut result = MigrationResult {
            total: legacy.len(),
            migrated: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
            policies: Vec::new(),
            dry_run: options.dry_run,
            started_at,
            completed_at: started_at,
        };

        for (index, item) in legacy.iter().enumerate() {
            match self
                .migrate_one(scope, actor, item, options, compiler, &mut seen)
                .await
            {
                Ok(ItemOutcome::Migrated(preview)) => {
                    tracing::debug!(index, policy = %preview.name, "Migrated legacy rule");
                    result.migrated += 1;
                    if options.dry_run {
                        result.policies.push(preview);
                    }
                }
                Ok(ItemOutcome::Skipped(preview)) => {
                    tracing::debug!(index, policy = %preview.name, "Policy exists, skipping");
                    result.skipped += 1;
                    if options.dry_run {
                        result.policies.push(preview);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        index,
                        subject = %item.subject,
                        resource = %item.resource,
                        error = %e,
                        "Failed to migrate legacy rule"
                    );
                    result.failed += 1;
                    result.errors.push(MigrationItemError {
                        index,
                        subject: item.subject.clone(),
                        resource: item.resource.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        result.completed_at = OffsetDateTime::now_utc();

        if !options.dry_run {
            self.service
                .record_audit(
                    AuditEventBuilder::new(scope, actor, AuditAction::MigrationRun, run_id)
                        .new_value(&result)
                        .build(),
                )
                .await;
        }

        tracing::info!(
            run_id = %run_id,
            scope = %scope,
            total = result.total,
            migrated = result.migrated,
            skipped = result.skipped,
            failed = result.failed,
            dry_run = result.dry_run,
            "RBAC migration completed"
        );

        guard.complete(&result);
        result
    }

    async fn migrate_one(
        &self,
        scope: &TenantScope,
        actor: &str,
        legacy: &LegacyPolicy,
        options: &MigrationOptions,
        compiler: PolicyCompiler,
        seen: &mut HashSet<String>,
    ) -> PermissionsResult<ItemOutcome> {
        let preview = self.translator.convert_policy(legacy)?;
        if options.validate_equivalence {
            check_equivalence(legacy, &preview, compiler)?;
        }

        if !seen.insert(preview.name.clone())
            || self
                .service
                .find_policy_by_name(scope, &preview.name)
                .await?
                .is_some()
        {
            return Ok(ItemOutcome::Skipped(preview));
        }

        if !options.dry_run {
            self.service
                .create_policy(scope, actor, preview.to_create_request(options.keep_original))
                .await?;
        }
        Ok(ItemOutcome::Migrated(preview))
    }
}

/// Compile the translation and, for unconditional rules, check that it
/// grants the access the legacy rule granted.
fn check_equivalence(
    legacy: &LegacyPolicy,
    preview: &PolicyPreview,
    compiler: PolicyCompiler,
) -> PermissionsResult<()> {
    let program = compiler.compile_expression(&preview.expression)?;
    if legacy.condition().is_some() {
        return Ok(());
    }

    let context = placeholder_context(legacy)?;
    match program.evaluate(&context.activation(), None) {
        Ok(true) => Ok(()),
        Ok(false) => Err(PermissionsError::invalid_request(format!(
            "translated expression denies the legacy grant: {}",
            preview.expression
        ))),
        Err(e) => Err(PermissionsError::invalid_request(format!(
            "translated expression failed on the legacy grant: {}",
            e
        ))),
    }
}

/// A context that satisfies the legacy subject, resource and action.
fn placeholder_context(legacy: &LegacyPolicy) -> PermissionsResult<EvaluationContext> {
    let principal = match SubjectPattern::parse(&legacy.subject)? {
        SubjectPattern::Any => PrincipalContext::new(PLACEHOLDER),
        SubjectPattern::Role(role) => PrincipalContext::new(PLACEHOLDER).with_roles([role]),
        SubjectPattern::User(user) => PrincipalContext::new(user),
        SubjectPattern::Group(group) => PrincipalContext::new(PLACEHOLDER).with_groups([group]),
        SubjectPattern::Permission(permission) => {
            PrincipalContext::new(PLACEHOLDER).with_permissions([permission])
        }
    };

    let resource = match ResourcePattern::parse(&legacy.resource)? {
        ResourcePattern::Any => ResourceContext::new(PLACEHOLDER).with_id(PLACEHOLDER),
        ResourcePattern::Type(resource_type) => ResourceContext::new(resource_type).with_id(PLACEHOLDER),
        ResourcePattern::Exact { resource_type, id } => {
            ResourceContext::new(resource_type).with_id(id)
        }
        ResourcePattern::Prefix {
            resource_type,
            prefix,
        } => ResourceContext::new(resource_type).with_id(format!("{}{}", prefix, PLACEHOLDER)),
    };

    let action = legacy
        .actions
        .iter()
        .map(|a| a.trim())
        .find(|a| !a.is_empty() && *a != WILDCARD)
        .unwrap_or(PLACEHOLDER);

    Ok(EvaluationContext::new(principal, resource, action))
}

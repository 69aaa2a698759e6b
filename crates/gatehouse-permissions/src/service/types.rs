//! Request and response types of the policy service.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::FieldError;
use crate::model::{Decision, EvaluationContext};

// =============================================================================
// Validation
// =============================================================================

/// Result of checking an expression without persisting anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub valid: bool,

    /// Field-level problems; empty when valid.
    pub errors: Vec<FieldError>,

    /// Non-fatal findings, such as complexity close to the ceiling.
    pub warnings: Vec<String>,

    /// Structural complexity; zero when the expression does not parse.
    pub complexity: u32,

    /// Ceiling applied to the caller's tenant.
    pub max_complexity: u32,
}

// =============================================================================
// Policy testing
// =============================================================================

/// One scenario to run an unsaved policy against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTestCase {
    pub name: String,

    /// Evaluation input.
    pub context: EvaluationContext,

    /// Expected decision.
    pub expected: bool,
}

/// An unsaved policy plus the scenarios to run it against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPolicyRequest {
    pub expression: String,

    pub resource_type: String,

    pub actions: Vec<String>,

    #[serde(default)]
    pub test_cases: Vec<PolicyTestCase>,
}

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub name: String,
    pub passed: bool,
    pub expected: bool,
    pub actual: bool,

    /// Coarse evaluation diagnostic, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: f64,
}

/// Outcome of a policy test run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPolicyResponse {
    /// Whether the policy compiled. When `false`, no case was run.
    pub valid: bool,

    pub errors: Vec<FieldError>,

    pub results: Vec<TestCaseResult>,

    pub passed: usize,

    pub failed: usize,
}

// =============================================================================
// Cache warm-up
// =============================================================================

/// Summary of a warm-up run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupReport {
    /// Scopes visited.
    pub scopes: usize,

    /// `(scope, resource type)` sets loaded.
    pub resource_types: usize,

    /// Enabled policies compiled and cached.
    pub compiled: usize,

    /// Enabled policies that failed to compile and were skipped.
    pub failed: usize,
}

impl WarmupReport {
    pub(crate) fn merge(&mut self, other: &WarmupReport) {
        self.scopes += other.scopes;
        self.resource_types += other.resource_types;
        self.compiled += other.compiled;
        self.failed += other.failed;
    }
}

// =============================================================================
// Analytics
// =============================================================================

/// Snapshot of the process-local evaluation counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationStats {
    /// Evaluation calls that produced a decision.
    pub evaluations: u64,
    pub allowed: u64,
    pub denied: u64,

    /// Decisions that hit the call deadline.
    pub timeouts: u64,

    /// Candidate policies that failed during evaluation.
    pub failed_policies: u64,

    /// Calls rejected before evaluation (invalid request, store failure).
    pub errors: u64,

    /// Mean time spent in the evaluator, in milliseconds.
    pub average_time_ms: f64,
}

/// Lock-free evaluation counters.
#[derive(Debug, Default)]
pub(crate) struct EvaluationCounters {
    evaluations: AtomicU64,
    allowed: AtomicU64,
    timeouts: AtomicU64,
    failed_policies: AtomicU64,
    errors: AtomicU64,
    total_time_us: AtomicU64,
}

impl EvaluationCounters {
    pub(crate) fn record(&self, decision: &Decision) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        if decision.allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        }
        if decision.timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
        self.failed_policies
            .fetch_add(decision.failed_policies as u64, Ordering::Relaxed);
        self.total_time_us.fetch_add(
            (decision.evaluation_time_ms * 1000.0) as u64,
            Ordering::Relaxed,
        );
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EvaluationStats {
        let evaluations = self.evaluations.load(Ordering::Relaxed);
        let allowed = self.allowed.load(Ordering::Relaxed);
        let total_time_us = self.total_time_us.load(Ordering::Relaxed);
        EvaluationStats {
            evaluations,
            allowed,
            denied: evaluations.saturating_sub(allowed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failed_policies: self.failed_policies.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            average_time_ms: if evaluations == 0 {
                0.0
            } else {
                total_time_us as f64 / evaluations as f64 / 1000.0
            },
        }
    }
}

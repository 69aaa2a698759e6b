//! Evaluation results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::EvaluationContext;
use super::scope::TenantScope;

/// The outcome of one evaluation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether any candidate policy granted access.
    pub allowed: bool,

    /// Number of candidate policies dispatched for evaluation.
    pub evaluated_policies: usize,

    /// Wall-clock time spent in the evaluator, in milliseconds.
    pub evaluation_time_ms: f64,

    /// Policies whose predicate evaluated to `true`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_policies: Vec<Uuid>,

    /// Candidates that failed with a runtime error or timed out.
    #[serde(default)]
    pub failed_policies: usize,

    /// Whether the call deadline elapsed before all candidates finished.
    #[serde(default)]
    pub timed_out: bool,

    /// Coarse diagnostic; never carries the details of individual policies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Decision {
    /// A deny decision with nothing evaluated.
    #[must_use]
    pub fn deny() -> Self {
        Self::default()
    }

    /// A deny decision carrying a coarse diagnostic.
    #[must_use]
    pub fn deny_with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// One item of a batch evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    pub scope: TenantScope,

    #[serde(flatten)]
    pub context: EvaluationContext,
}

impl EvaluateRequest {
    #[must_use]
    pub fn new(scope: TenantScope, context: EvaluationContext) -> Self {
        Self { scope, context }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deny_is_default_deny() {
        let decision = Decision::deny();
        assert!(!decision.allowed);
        assert_eq!(decision.evaluated_policies, 0);
        assert!(decision.matched_policies.is_empty());
        assert!(decision.error.is_none());
    }

    #[test]
    fn test_evaluate_request_flattens_context() {
        let request: EvaluateRequest = serde_json::from_value(json!({
            "scope": {"appId": "app", "environmentId": "prod"},
            "principal": {"id": "u1"},
            "resource": {"type": "document"},
            "action": "read"
        }))
        .unwrap();
        assert_eq!(request.scope, TenantScope::new("app", "prod"));
        assert_eq!(request.context.action, "read");
        assert_eq!(request.context.resource.resource_type, "document");
    }
}

//! Policy evaluator.
//!
//! Executes compiled candidate policies against one evaluation context and
//! reduces their results into a single [`Decision`].
//!
//! Aggregation is allow-if-any: policies are additive grants and there is no
//! deny effect. Candidates arrive ordered by priority (highest first) and are
//! dispatched in that order, so priority decides which policy is reported as
//! the match when several would grant access.
//!
//! # Example
//!
//! ```ignore
//! let evaluator = PolicyEvaluator::from_config(&config.engine);
//! let decision = evaluator.evaluate(&candidates, &context).await;
//! if decision.allowed {
//!     // Proceed with request
//! }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::expression::{Activation, CompiledPolicy, EvaluationError};
use crate::model::{Decision, EvaluationContext};

/// Coarse diagnostic returned when the call deadline elapsed.
pub const TIMEOUT_DIAGNOSTIC: &str = "evaluation deadline exceeded";

// =============================================================================
// Policy Evaluator
// =============================================================================

/// Runs candidate predicates under a per-call deadline.
///
/// The evaluator holds no state besides its limits, so it is cheap to build
/// one per call from tenant-specific settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyEvaluator {
    timeout: Duration,
    parallel: bool,
    max_parallel: usize,
}

impl Default for PolicyEvaluator {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl PolicyEvaluator {
    /// Create an evaluator with explicit limits.
    #[must_use]
    pub fn new(timeout: Duration, parallel: bool, max_parallel: usize) -> Self {
        Self {
            timeout,
            parallel,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Create an evaluator from engine settings.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.evaluation_timeout,
            config.parallel_evaluation,
            config.max_parallel_evaluations,
        )
    }

    /// The per-call deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Evaluate `candidates` against `context`.
    ///
    /// # Evaluation Order
    ///
    /// 1. Empty candidate list: deny with nothing evaluated
    /// 2. Dispatch candidates in the given order, sequentially or with a
    ///    bounded fan-out
    /// 3. Stop at the first predicate that returns `true`
    /// 4. On deadline expiry, return the partial result with `timed_out` set
    pub async fn evaluate(
        &self,
        candidates: &[Arc<CompiledPolicy>],
        context: &EvaluationContext,
    ) -> Decision {
        let started = Instant::now();
        if candidates.is_empty() {
            return Decision {
                evaluation_time_ms: elapsed_ms(started),
                ..Decision::deny()
            };
        }

        let deadline = started + self.timeout;
        let activation = Arc::new(context.activation());

        let mut tally = if self.parallel && candidates.len() > 1 {
            self.evaluate_parallel(candidates, activation, deadline).await
        } else {
            evaluate_sequential(candidates, activation, deadline).await
        };

        tally.decision.evaluation_time_ms = elapsed_ms(started);
        tally.decision.error = tally.diagnostic();
        tracing::debug!(
            allowed = tally.decision.allowed,
            evaluated = tally.decision.evaluated_policies,
            failed = tally.decision.failed_policies,
            timed_out = tally.decision.timed_out,
            elapsed_ms = tally.decision.evaluation_time_ms,
            "Policy evaluation completed"
        );
        tally.decision
    }

    async fn evaluate_parallel(
        &self,
        candidates: &[Arc<CompiledPolicy>],
        activation: Arc<Activation>,
        deadline: Instant,
    ) -> Tally {
        let mut tally = Tally::default();
        let mut pending = candidates.iter();
        let mut in_flight = JoinSet::new();
        let wake_at = tokio::time::Instant::from_std(deadline);

        loop {
            // Keep at most `max_parallel` predicates running.
            while !tally.decision.allowed && in_flight.len() < self.max_parallel {
                let Some(candidate) = pending.next() else {
                    break;
                };
                if Instant::now() >= deadline {
                    tally.decision.timed_out = true;
                    break;
                }
                let candidate = Arc::clone(candidate);
                let activation = Arc::clone(&activation);
                in_flight.spawn_blocking(move || {
                    let result = candidate.evaluate(&activation, Some(deadline));
                    (candidate.policy_id, candidate.name.clone(), result)
                });
                tally.decision.evaluated_policies += 1;
            }

            if in_flight.is_empty() || tally.decision.timed_out {
                break;
            }

            match tokio::time::timeout_at(wake_at, in_flight.join_next()).await {
                Err(_) => {
                    tally.decision.timed_out = true;
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok((policy_id, name, result)))) => {
                    tally.record(policy_id, &name, result);
                }
                Ok(Some(Err(e))) => {
                    tally.decision.failed_policies += 1;
                    tracing::warn!(error = %e, "Policy evaluation task failed");
                }
            }

            if tally.decision.allowed {
                break;
            }
        }

        // Queued tasks are cancelled; running predicates stop at the deadline.
        in_flight.abort_all();
        tally
    }
}

/// One candidate at a time, each on the blocking pool so a slow predicate
/// never holds an async worker or outlives the call deadline.
async fn evaluate_sequential(
    candidates: &[Arc<CompiledPolicy>],
    activation: Arc<Activation>,
    deadline: Instant,
) -> Tally {
    let mut tally = Tally::default();
    let wake_at = tokio::time::Instant::from_std(deadline);

    for candidate in candidates {
        if Instant::now() >= deadline {
            tally.decision.timed_out = true;
            break;
        }
        tally.decision.evaluated_policies += 1;

        let task = {
            let candidate = Arc::clone(candidate);
            let activation = Arc::clone(&activation);
            tokio::task::spawn_blocking(move || candidate.evaluate(&activation, Some(deadline)))
        };
        match tokio::time::timeout_at(wake_at, task).await {
            Err(_) => {
                tally.record(
                    candidate.policy_id,
                    &candidate.name,
                    Err(EvaluationError::Timeout),
                );
            }
            Ok(Ok(result)) => tally.record(candidate.policy_id, &candidate.name, result),
            Ok(Err(e)) => {
                tally.decision.failed_policies += 1;
                tracing::warn!(policy_id = %candidate.policy_id, error = %e, "Policy evaluation task failed");
            }
        }

        if tally.decision.allowed || tally.decision.timed_out {
            break;
        }
    }
    tally
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Running reduction of candidate results.
#[derive(Default)]
struct Tally {
    decision: Decision,
}

impl Tally {
    fn record(&mut self, policy_id: Uuid, name: &str, result: Result<bool, EvaluationError>) {
        match result {
            Ok(true) => {
                tracing::debug!(policy_id = %policy_id, policy_name = %name, "Policy allowed access");
                self.decision.allowed = true;
                self.decision.matched_policies.push(policy_id);
            }
            Ok(false) => {
                tracing::trace!(policy_id = %policy_id, policy_name = %name, "Policy did not match");
            }
            Err(EvaluationError::Timeout) => {
                self.decision.failed_policies += 1;
                self.decision.timed_out = true;
                tracing::warn!(policy_id = %policy_id, policy_name = %name, "Policy evaluation timed out");
            }
            Err(e) => {
                self.decision.failed_policies += 1;
                tracing::warn!(
                    policy_id = %policy_id,
                    policy_name = %name,
                    error = %e,
                    "Policy evaluation failed"
                );
            }
        }
    }

    fn diagnostic(&self) -> Option<String> {
        if self.decision.allowed {
            None
        } else if self.decision.timed_out {
            Some(TIMEOUT_DIAGNOSTIC.to_string())
        } else if self.decision.failed_policies > 0 {
            Some(format!(
                "{} candidate policies could not be evaluated",
                self.decision.failed_policies
            ))
        } else {
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use gatehouse_permissions::EvaluationContext;
use gatehouse_permissions::model::CreatePolicyRequest;
use gatehouse_permissions_memory::create_policy_service;

use crate::Session;
use crate::cli::OutputFormat;
use crate::input::read_json;
use crate::output::{print_field, print_json, print_warning, yes_no};

const ACTOR: &str = "cli";

pub async fn evaluate(session: &Session, policies: &Path, context: Option<&Path>) -> Result<()> {
    let requests: Vec<CreatePolicyRequest> = read_json(Some(policies))?;
    let context: EvaluationContext = read_json(context)?;

    let service = create_policy_service(session.config.clone());
    for request in requests {
        let name = request.name.clone();
        service
            .create_policy(&session.scope, ACTOR, request)
            .await
            .with_context(|| format!("Failed to load policy '{name}'"))?;
    }
    tracing::debug!(scope = %session.scope, "Policies loaded");

    let decision = service.evaluate(&session.scope, &context).await?;

    match session.format {
        OutputFormat::Json => print_json(&decision)?,
        OutputFormat::Table => {
            print_field("Allowed", yes_no(decision.allowed));
            print_field("Evaluated", decision.evaluated_policies);
            print_field("Matched", decision.matched_policies.len());
            print_field("Time (ms)", format!("{:.3}", decision.evaluation_time_ms));
            if decision.failed_policies > 0 {
                print_warning(&format!(
                    "{} policy(ies) failed to evaluate",
                    decision.failed_policies
                ));
            }
            if decision.timed_out {
                print_warning("Evaluation timed out");
            }
            if let Some(error) = &decision.error {
                print_warning(error);
            }
        }
    }
    Ok(())
}

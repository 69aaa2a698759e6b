use std::path::Path;

use anyhow::{Result, bail};
use gatehouse_permissions::service::TestPolicyRequest;
use gatehouse_permissions_memory::create_policy_service;

use crate::Session;
use crate::cli::OutputFormat;
use crate::input::read_json;
use crate::output::{print_json, print_success, print_table, yes_no};

pub async fn test(session: &Session, file: Option<&Path>) -> Result<()> {
    let request: TestPolicyRequest = read_json(file)?;
    let service = create_policy_service(session.config.clone());
    let response = service.test_policy(&session.scope, request).await?;

    match session.format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            for error in &response.errors {
                println!("  {}: {}", error.field, error.message);
            }
            let rows = response
                .results
                .iter()
                .map(|r| {
                    [
                        r.name.clone(),
                        yes_no(r.passed),
                        r.expected.to_string(),
                        r.actual.to_string(),
                        format!("{:.3}", r.duration_ms),
                        r.error.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(
                ["Case", "Passed", "Expected", "Actual", "Time (ms)", "Error"],
                rows,
            );
        }
    }

    if !response.valid {
        bail!("Expression is invalid");
    }
    if response.failed > 0 {
        bail!("{} of {} case(s) failed", response.failed, response.results.len());
    }
    if matches!(session.format, OutputFormat::Table) {
        print_success(&format!("{} case(s) passed", response.passed));
    }
    Ok(())
}

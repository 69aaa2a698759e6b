use anyhow::{Result, bail};
use gatehouse_permissions::PolicyCompiler;
use gatehouse_permissions_memory::create_policy_service;
use serde_json::json;

use crate::Session;
use crate::cli::OutputFormat;
use crate::output::{print_field, print_json, print_success, print_warning};

pub fn validate(session: &Session, expression: &str) -> Result<()> {
    let service = create_policy_service(session.config.clone());
    let response = service.validate_policy(&session.scope, expression);

    match session.format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            if response.valid {
                print_success("Expression is valid");
            }
            print_field(
                "Complexity",
                format!("{}/{}", response.complexity, response.max_complexity),
            );
            for warning in &response.warnings {
                print_warning(warning);
            }
            for error in &response.errors {
                match error.position {
                    Some(position) => println!("  {} (at {}): {}", error.field, position, error.message),
                    None => println!("  {}: {}", error.field, error.message),
                }
            }
        }
    }

    if !response.valid {
        bail!("Expression is invalid ({} error(s))", response.errors.len());
    }
    Ok(())
}

pub fn complexity(session: &Session, expression: &str) -> Result<()> {
    let limits = session
        .config
        .for_tenant(&session.scope.app_id, &session.scope.environment_id);
    let compiler = PolicyCompiler::new(limits.max_policy_complexity);
    let info = compiler.analyze(expression)?;
    let within_limit = info.complexity <= compiler.max_complexity();

    match session.format {
        OutputFormat::Json => print_json(&json!({
            "complexity": info.complexity,
            "maxComplexity": compiler.max_complexity(),
            "depth": info.depth,
            "resultType": info.result_type.to_string(),
            "withinLimit": within_limit,
        }))?,
        OutputFormat::Table => {
            print_field("Complexity", info.complexity);
            print_field("Limit", compiler.max_complexity());
            print_field("Depth", info.depth);
            print_field("Result type", info.result_type);
            if !within_limit {
                print_warning("Expression exceeds the complexity limit");
            }
        }
    }
    Ok(())
}

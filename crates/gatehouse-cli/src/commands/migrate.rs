use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use gatehouse_permissions::{MigrationEngine, MigrationOptions, RbacTranslator};
use gatehouse_permissions_memory::{InMemoryLegacySource, create_policy_service};

use crate::Session;
use crate::cli::{MigrateRunArgs, OutputFormat};
use crate::input::read_input;
use crate::output::{print_field, print_json, print_table, print_warning, yes_no};

const ACTOR: &str = "cli";

pub fn preview(session: &Session, file: Option<&Path>) -> Result<()> {
    let source = InMemoryLegacySource::from_json(&read_input(file)?)?;
    let translator = RbacTranslator::new();

    let mut previews = Vec::new();
    let mut failures = Vec::new();
    for legacy in &source.snapshot().policies {
        match translator.convert_policy(legacy) {
            Ok(preview) => previews.push(preview),
            Err(e) => failures.push(format!("{legacy}: {e}")),
        }
    }

    match session.format {
        OutputFormat::Json => print_json(&previews)?,
        OutputFormat::Table => {
            let rows = previews
                .iter()
                .map(|p| {
                    [
                        p.name.clone(),
                        p.resource_type.clone(),
                        p.expression.clone(),
                        yes_no(!p.needs_review),
                    ]
                })
                .collect();
            print_table(["Name", "Resource type", "Expression", "Automatic"], rows);
        }
    }
    for failure in &failures {
        print_warning(failure);
    }
    Ok(())
}

/// Run a migration against a throwaway in-memory store. Nothing is persisted.
pub async fn run(session: &Session, args: &MigrateRunArgs) -> Result<()> {
    let source = InMemoryLegacySource::from_json(&read_input(args.file.as_deref())?)?;
    let service = create_policy_service(session.config.clone());
    let engine = MigrationEngine::new(service, Arc::new(source));

    let options = MigrationOptions {
        dry_run: true,
        validate_equivalence: !args.no_validate,
        ..engine.default_options()
    };
    let result = if args.roles {
        engine.migrate_roles(&session.scope, ACTOR, &options).await?
    } else {
        engine.migrate_all(&session.scope, ACTOR, &options).await?
    };

    match session.format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            print_field("Total", result.total);
            print_field("Migrated", result.migrated);
            print_field("Skipped", result.skipped);
            print_field("Failed", result.failed);
            let rows = result
                .errors
                .iter()
                .map(|e| {
                    [
                        e.index.to_string(),
                        e.subject.clone(),
                        e.resource.clone(),
                        e.message.clone(),
                    ]
                })
                .collect::<Vec<_>>();
            if !rows.is_empty() {
                print_table(["#", "Subject", "Resource", "Error"], rows);
            }
            let review = result.policies.iter().filter(|p| p.needs_review).count();
            if review > 0 {
                print_warning(&format!("{review} policy(ies) need manual review"));
            }
        }
    }
    Ok(())
}

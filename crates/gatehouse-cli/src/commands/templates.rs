use anyhow::{Context, Result, anyhow, bail};
use gatehouse_permissions::templates::{ParameterKind, TemplateParameter};
use gatehouse_permissions::{PolicyTemplates, TemplateParams};
use serde_json::Value;

use crate::Session;
use crate::cli::{OutputFormat, RenderArgs};
use crate::output::{print_field, print_json, print_table};

pub fn list(session: &Session) -> Result<()> {
    let templates = PolicyTemplates.list();
    match session.format {
        OutputFormat::Json => print_json(&templates)?,
        OutputFormat::Table => {
            let rows = templates
                .iter()
                .map(|t| {
                    [
                        t.id.to_string(),
                        t.category.to_string(),
                        t.resource_type.unwrap_or("-").to_string(),
                        t.description.to_string(),
                    ]
                })
                .collect();
            print_table(["Id", "Category", "Resource type", "Description"], rows);
        }
    }
    Ok(())
}

pub fn show(session: &Session, id: &str) -> Result<()> {
    let template = PolicyTemplates
        .get(id)
        .ok_or_else(|| anyhow!("Unknown template '{id}'"))?;

    match session.format {
        OutputFormat::Json => print_json(template)?,
        OutputFormat::Table => {
            print_field("Id", template.id);
            print_field("Name", template.name);
            print_field("Category", template.category);
            print_field("Description", template.description);
            print_field("Resource type", template.resource_type.unwrap_or("(required)"));
            print_field("Actions", template.actions.join(", "));
            print_field("Expression", template.expression);
            let rows = template
                .parameters
                .iter()
                .map(|p| {
                    [
                        p.name.to_string(),
                        kind_label(p.kind).to_string(),
                        p.description.to_string(),
                    ]
                })
                .collect();
            print_table(["Parameter", "Kind", "Description"], rows);
        }
    }
    Ok(())
}

pub fn render(session: &Session, args: &RenderArgs) -> Result<()> {
    let template = PolicyTemplates
        .get(&args.id)
        .ok_or_else(|| anyhow!("Unknown template '{}'", args.id))?;

    let mut params = TemplateParams::new();
    for raw in &args.params {
        let (key, value) = parse_param(template.parameters, raw)?;
        params = params.with_value(key, value);
    }
    if let Some(name) = &args.name {
        params = params.with_name(name);
    }
    if let Some(resource_type) = &args.resource_type {
        params = params.with_resource_type(resource_type);
    }

    let request = PolicyTemplates
        .instantiate(&args.id, &params)
        .with_context(|| format!("Failed to render template '{}'", args.id))?;

    match session.format {
        OutputFormat::Json => print_json(&request)?,
        OutputFormat::Table => {
            print_field("Name", &request.name);
            print_field("Resource type", &request.resource_type);
            print_field("Actions", request.actions.join(", "));
            print_field("Expression", &request.expression);
        }
    }
    Ok(())
}

fn kind_label(kind: ParameterKind) -> &'static str {
    match kind {
        ParameterKind::String => "string",
        ParameterKind::StringList => "list",
    }
}

/// Parse `key=value`; list parameters take comma-separated values.
fn parse_param(parameters: &[TemplateParameter], raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Invalid parameter '{raw}', expected key=value");
    };
    let key = key.trim();

    let value = match parameters.iter().find(|p| p.name == key).map(|p| p.kind) {
        Some(ParameterKind::StringList) => Value::Array(
            value
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| Value::String(v.to_string()))
                .collect(),
        ),
        // Unknown keys are passed through so the template reports them.
        _ => Value::String(value.to_string()),
    };
    Ok((key.to_string(), value))
}

mod cli;
mod commands;
mod input;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use gatehouse_permissions::{PermissionsConfig, TenantScope};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, MigrateCommands, OutputFormat, TemplateCommands};
use output::print_error;

/// Settings shared by every command.
pub struct Session {
    pub config: PermissionsConfig,
    pub scope: TenantScope,
    pub format: OutputFormat,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = match &cli.config {
        Some(path) => PermissionsConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => PermissionsConfig::default(),
    };
    let mut scope = TenantScope::new(&cli.app, &cli.env);
    if let Some(org) = &cli.org {
        scope = scope.with_organization(org);
    }
    let session = Session {
        config,
        scope,
        format: cli.format.unwrap_or_default(),
    };

    match &cli.command {
        Commands::Validate(args) => commands::validate::validate(&session, &args.expression)?,
        Commands::Complexity(args) => commands::validate::complexity(&session, &args.expression)?,
        Commands::Test(args) => commands::test::test(&session, args.file.as_deref()).await?,
        Commands::Evaluate(args) => {
            commands::evaluate::evaluate(&session, &args.policies, args.context.as_deref()).await?
        }
        Commands::Templates(args) => match &args.command {
            TemplateCommands::List => commands::templates::list(&session)?,
            TemplateCommands::Show { id } => commands::templates::show(&session, id)?,
            TemplateCommands::Render(render) => commands::templates::render(&session, render)?,
        },
        Commands::Migrate(args) => match &args.command {
            MigrateCommands::Preview(file) => {
                commands::migrate::preview(&session, file.file.as_deref())?
            }
            MigrateCommands::Run(run) => commands::migrate::run(&session, run).await?,
        },
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&session.config)?);
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    // Prefer RUST_LOG from env, otherwise use the provided level.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Gatehouse policy tooling: validate, test and migrate ABAC policies offline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "GATEHOUSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Application id of the tenant scope
    #[arg(long, global = true, env = "GATEHOUSE_APP", default_value = "local")]
    pub app: String,

    /// Environment id of the tenant scope
    #[arg(long, global = true, env = "GATEHOUSE_ENV", default_value = "dev")]
    pub env: String,

    /// Organization id of the tenant scope
    #[arg(long, global = true, env = "GATEHOUSE_ORG")]
    pub org: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a policy expression
    Validate(ExpressionArgs),
    /// Print the structural complexity of an expression
    Complexity(ExpressionArgs),
    /// Run a policy against test cases (TestPolicyRequest JSON)
    Test(FileArgs),
    /// Evaluate a request against a set of policies
    Evaluate(EvaluateArgs),
    /// Browse and render policy templates
    Templates(TemplatesArgs),
    /// Translate legacy RBAC rules
    Migrate(MigrateArgs),
    /// Show the effective configuration
    Config,
}

#[derive(clap::Args)]
pub struct ExpressionArgs {
    /// Policy expression
    pub expression: String,
}

#[derive(clap::Args)]
pub struct FileArgs {
    /// Path to JSON file (reads from stdin if omitted)
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct EvaluateArgs {
    /// JSON array of policies to load (CreatePolicyRequest objects)
    #[arg(long)]
    pub policies: PathBuf,
    /// JSON evaluation context (reads from stdin if omitted)
    #[arg(long)]
    pub context: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct TemplatesArgs {
    #[command(subcommand)]
    pub command: TemplateCommands,
}

#[derive(Subcommand)]
pub enum TemplateCommands {
    /// List built-in templates
    List,
    /// Show one template
    Show {
        /// Template id
        id: String,
    },
    /// Render a template into a policy
    Render(RenderArgs),
}

#[derive(clap::Args)]
pub struct RenderArgs {
    /// Template id
    pub id: String,
    /// Parameter value as key=value; repeat for several, comma-separate list values
    #[arg(short, long = "param")]
    pub params: Vec<String>,
    /// Resource type of the generated policy
    #[arg(long)]
    pub resource_type: Option<String>,
    /// Name of the generated policy
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(clap::Args)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub command: MigrateCommands,
}

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Translate each legacy rule and print the result
    Preview(FileArgs),
    /// Dry-run a full migration over a legacy export
    Run(MigrateRunArgs),
}

#[derive(clap::Args)]
pub struct MigrateRunArgs {
    /// Legacy export JSON (reads from stdin if omitted)
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Migrate role permissions of the scope instead of top-level rules
    #[arg(long)]
    pub roles: bool,
    /// Skip compiling and probing the translations
    #[arg(long)]
    pub no_validate: bool,
}

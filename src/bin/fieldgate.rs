//! fieldgate command line interface
//!
//! Inspect resolved attribute tables and the groups a request would get.
//!
//! # Usage
//!
//! ```bash
//! # Print every resolved attribute table
//! fieldgate --config fieldgate.yaml tables
//!
//! # Groups for an admin reading one Book
//! fieldgate groups --type 'App\Entity\Book' --operation item \
//!     --direction normalization --object book.json --role ROLE_ADMIN
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::{json, Value};

use fieldgate::{
    AttributeTable, Direction, FieldGateConfig, GroupEvaluator, MappingRegistry, OperationType,
    PathResolver, RoleAuthorizationChecker, SafeExpressionEvaluator, SchemaRegistry,
};

#[derive(Parser)]
#[command(name = "fieldgate")]
#[command(version)]
#[command(about = "Inspect serializer group mappings and evaluate active groups")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to FIELDGATE_CONFIG, then built-in defaults)
    #[arg(long, short, global = true, env = "FIELDGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "text", value_enum)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Print resolved attribute tables
    Tables {
        /// Only this type
        #[arg(long = "type", short)]
        type_id: Option<String>,
    },

    /// Compute the active groups for one request
    Groups {
        /// Resource type
        #[arg(long = "type", short)]
        type_id: String,

        /// Operation type: item, collection, subresource
        #[arg(long, value_parser = parse_operation)]
        operation: OperationType,

        /// normalization or denormalization
        #[arg(long, default_value = "normalization", value_parser = parse_direction)]
        direction: Direction,

        /// JSON file holding the instance being serialized
        #[arg(long)]
        object: Option<PathBuf>,

        /// Caller role (repeatable); no role means an anonymous caller
        #[arg(long = "role")]
        roles: Vec<String>,
    },
}

fn parse_operation(s: &str) -> Result<OperationType, String> {
    s.parse()
}

fn parse_direction(s: &str) -> Result<Direction, String> {
    s.parse()
}

// =============================================================================
// MAIN
// =============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Tables { ref type_id } => {
            cmd_tables(cli.config.as_deref(), type_id.as_deref(), cli.format)
        }
        Commands::Groups {
            ref type_id,
            operation,
            direction,
            ref object,
            ref roles,
        } => cmd_groups(
            cli.config.as_deref(),
            type_id,
            operation,
            direction,
            object.as_deref(),
            roles,
            cli.format,
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.format == OutputFormat::Json {
                println!("{}", json!({ "error": format!("{:#}", e) }));
            } else {
                eprintln!("{}: {:#}", "error".red().bold(), e);
            }
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

fn load_registry(config_path: Option<&Path>) -> Result<(FieldGateConfig, MappingRegistry)> {
    let config = match config_path {
        Some(path) => FieldGateConfig::load(path)?,
        None => FieldGateConfig::from_env()?,
    };

    let schema = match &config.schema_file {
        Some(path) => SchemaRegistry::load(path)?,
        None => SchemaRegistry::new(),
    };
    let resolver = PathResolver::with_config(Arc::new(schema), &config);

    let registry =
        MappingRegistry::load(&config, &resolver, None).context("Failed to load mappings")?;
    Ok((config, registry))
}

fn cmd_tables(config: Option<&Path>, type_id: Option<&str>, format: OutputFormat) -> Result<()> {
    let (_, registry) = load_registry(config)?;

    let tables: Vec<&AttributeTable> = match type_id {
        Some(type_id) => match registry.table(type_id) {
            Some(table) => vec![table],
            None => bail!("no attribute table for \"{}\"", type_id),
        },
        None => registry.tables().collect(),
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&tables)?);
        }
        OutputFormat::Text => {
            for table in tables {
                print_table(table);
            }
        }
    }
    Ok(())
}

fn print_table(table: &AttributeTable) {
    println!("{}", table.type_id().bold());
    for entry in table.attributes() {
        let mut flags = Vec::new();
        if let Some(depth) = entry.max_depth() {
            flags.push(format!("max_depth={}", depth));
        }
        if let Some(name) = entry.serialized_name() {
            flags.push(format!("serialized_name={}", name));
        }
        if entry.ignore() {
            flags.push("ignored".to_string());
        }

        if flags.is_empty() {
            println!("  {}", entry.name().cyan());
        } else {
            println!("  {} ({})", entry.name().cyan(), flags.join(", "));
        }
        for group in entry.groups() {
            println!("    - {}", group);
        }
    }
    if !table.all_groups().is_empty() {
        println!("  {}", "all groups".dimmed());
        for group in table.all_groups() {
            println!("    - {}", group);
        }
    }
    println!();
}

fn cmd_groups(
    config: Option<&Path>,
    type_id: &str,
    operation: OperationType,
    direction: Direction,
    object: Option<&Path>,
    roles: &[String],
    format: OutputFormat,
) -> Result<()> {
    let (config, registry) = load_registry(config)?;
    let table = registry
        .table(type_id)
        .with_context(|| format!("no attribute table for \"{}\"", type_id))?;

    let instance: Option<Value> = match object {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Some(
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?,
            )
        }
        None => None,
    };

    let checker = if roles.is_empty() {
        RoleAuthorizationChecker::anonymous()
    } else {
        RoleAuthorizationChecker::new(json!({ "roles": roles }), roles.iter().cloned())
    };
    let evaluator = SafeExpressionEvaluator::new();

    let groups = GroupEvaluator::new(&evaluator, &checker)
        .with_direction_policy(config.direction_policy)
        .active_groups(table, operation, direction, instance.as_ref())?;

    match format {
        OutputFormat::Json => {
            let output = json!({
                "type": type_id,
                "operation": operation,
                "direction": direction,
                "groups": groups,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!(
                "{} {} active group(s) for {} ({} {})",
                "OK".green(),
                groups.len(),
                type_id.bold(),
                operation,
                direction
            );
            for group in &groups {
                println!("  - {}", group);
            }
            let visible: Vec<&str> = table
                .visible_attributes(&groups[..])
                .map(|entry| entry.name())
                .collect();
            println!("  visible fields: {}", visible.join(", "));
        }
    }
    Ok(())
}

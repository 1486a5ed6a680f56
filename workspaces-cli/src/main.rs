use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};
use workspaces_core::config::Config;
use workspaces_core::core_access::RoleDirectory;
use workspaces_core::core_workspace::storage::CURRENT_WORKSPACE_SCHEMA_VERSION;
use workspaces_core::core_workspace::PruneMode;
use workspaces_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use workspaces_core::{metrics, Workspaces};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Parser, Debug)]
#[command(name = "workspaces")]
#[command(author, version, about = "Administrative tasks for the workspace store", long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path, overriding the configuration
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or update the database schema
    Migrate,

    /// Delete old or expired invitations
    PruneInvitations {
        /// Delete invitations created more than this many days ago
        #[arg(long, default_value_t = 30)]
        days: u64,

        /// Only delete unresolved invitations past their expiry
        #[arg(long)]
        expired_only: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List configured roles and their permissions
    Roles {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a permission against the configured role table
    CheckPermission {
        #[arg(long)]
        role: String,

        #[arg(long)]
        permission: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let log_level = args.log_level.parse::<LogLevel>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', using 'warn'", args.log_level);
        LogLevel::Warn
    });
    init_logging_with_config(LogConfig::new(log_level).json_format(args.json_logs))?;
    metrics::init_metrics();

    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(database) = args.database {
        config.store.database_path = database;
    }

    match args.command {
        Command::Migrate => migrate(config).await,
        Command::PruneInvitations { days, expired_only, yes } => {
            let mode = if expired_only {
                PruneMode::ExpiredOnly
            } else {
                PruneMode::OlderThan(Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY)))
            };
            prune_invitations(config, mode, yes).await
        }
        Command::Roles { json } => list_roles(&config, json),
        Command::CheckPermission { role, permission } => check_permission(&config, &role, &permission),
    }
}

async fn open(config: Config) -> Result<Workspaces> {
    let path = config.store.database_path.clone();
    tokio::task::spawn_blocking(move || Workspaces::open(&config))
        .await?
        .with_context(|| format!("failed to open database {}", path.display()))
}

async fn migrate(config: Config) -> Result<ExitCode> {
    let path = config.store.database_path.clone();
    open(config).await?;
    info!(path = %path.display(), "Migrations complete");
    println!(
        "Database {} is at schema version {}",
        path.display(),
        CURRENT_WORKSPACE_SCHEMA_VERSION
    );
    Ok(ExitCode::SUCCESS)
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn prune_invitations(config: Config, mode: PruneMode, yes: bool) -> Result<ExitCode> {
    let workspaces = open(config).await?;

    let lifecycle = workspaces.invitations().clone();
    let pending = tokio::task::spawn_blocking(move || lifecycle.count_prunable(mode)).await??;
    if pending == 0 {
        println!("No invitations to prune.");
        return Ok(ExitCode::SUCCESS);
    }

    let description = match mode {
        PruneMode::ExpiredOnly => "expired".to_string(),
        PruneMode::OlderThan(age) => format!("older than {} days", age.as_secs() / SECONDS_PER_DAY),
    };
    if !yes && !confirm(&format!("Delete {pending} invitation(s) {description}?"))? {
        warn!("Prune cancelled by user");
        println!("Aborted.");
        return Ok(ExitCode::SUCCESS);
    }

    let lifecycle = workspaces.invitations().clone();
    let removed = tokio::task::spawn_blocking(move || lifecycle.prune(mode)).await??;
    println!("Pruned {removed} invitation(s).");
    Ok(ExitCode::SUCCESS)
}

fn list_roles(config: &Config, json: bool) -> Result<ExitCode> {
    let roles = RoleDirectory::from_config(&config.roles).all_metadata();

    if json {
        println!("{}", serde_json::to_string_pretty(&roles)?);
        return Ok(ExitCode::SUCCESS);
    }

    for role in roles {
        let mut markers = Vec::new();
        if role.key == config.roles.owner_role {
            markers.push("owner");
        }
        if role.key == config.roles.default_role {
            markers.push("default");
        }
        let markers = if markers.is_empty() {
            String::new()
        } else {
            format!(" ({})", markers.join(", "))
        };

        println!("{} - {}{}", role.key, role.name, markers);
        if !role.description.is_empty() {
            println!("    {}", role.description);
        }
        println!("    permissions: {}", role.permissions.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

fn check_permission(config: &Config, role: &str, permission: &str) -> Result<ExitCode> {
    let roles = RoleDirectory::from_config(&config.roles);
    if !roles.contains(role) {
        bail!("unknown role '{role}' (available: {})", roles.role_names().join(", "));
    }

    if roles.role_allows(role, permission) {
        println!("allowed: {role} has {permission}");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("denied: {role} does not have {permission}");
        Ok(ExitCode::FAILURE)
    }
}

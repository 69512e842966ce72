//! Tally CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tally_core::PluginService;
use tally_foundation::{Storage, TallyConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tally - plugin administration for the Tally accounting platform
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Data directory (database and installed plugins)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Manage plugin registries
    Registry {
        #[command(subcommand)]
        action: RegistryCommand,
    },
    /// Search every active registry
    Search {
        /// Case-insensitive text matched against name, description and tags
        query: String,
    },
    /// Manage installed plugins (instance scope)
    Plugin {
        #[command(subcommand)]
        action: PluginCommand,
    },
    /// Manage per-tenant plugin enablement
    Tenant {
        #[command(subcommand)]
        action: TenantCommand,
    },
}

#[derive(Subcommand, Debug)]
pub(crate) enum RegistryCommand {
    /// List registries
    List,
    /// Add a registry
    Add {
        name: String,
        /// https://github.com/<owner>/<repo> or https://gitlab.com/<owner>/<repo>
        url: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove a registry (id or name)
    Remove { registry: String },
    /// Fetch a registry's index and record the sync time
    Sync { registry: String },
}

#[derive(Subcommand, Debug)]
pub(crate) enum PluginCommand {
    /// List installed plugins
    List,
    /// Install a plugin from a repository URL
    Install { url: String },
    /// Uninstall a plugin (id or name)
    Uninstall { plugin: String },
    /// Enable a plugin, granting permissions
    Enable {
        plugin: String,
        /// Permission to grant (repeatable)
        #[arg(short, long = "permission")]
        permissions: Vec<String>,
    },
    /// Disable a plugin for the instance and every tenant
    Disable { plugin: String },
    /// Show requested and required permissions
    Permissions { plugin: String },
}

#[derive(Subcommand, Debug)]
pub(crate) enum TenantCommand {
    /// List a tenant's plugins
    List { tenant: String },
    /// Enable a plugin for a tenant
    Enable {
        tenant: String,
        plugin: String,
        /// Settings as a JSON document
        #[arg(long)]
        settings: Option<String>,
    },
    /// Disable a plugin for a tenant
    Disable { tenant: String, plugin: String },
    /// Show a tenant's plugin settings
    Settings { tenant: String, plugin: String },
    /// Replace a tenant's plugin settings
    SetSettings {
        tenant: String,
        plugin: String,
        /// Settings as a JSON document
        settings: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = TallyConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        TallyConfig::default()
    });
    if let Some(data_dir) = args.data_dir {
        config = config.data_dir(data_dir);
    }

    let storage = Arc::new(Storage::open(&config.resolved_database_path())?);
    let service = PluginService::from_config(&config, storage)?;

    service.ensure_official_registry().await?;
    service.load_enabled_plugins().await?;

    cli::run(&service, args.command).await
}

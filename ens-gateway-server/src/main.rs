//! ENS Gateway server
//!
//! Serves the CCIP-Read gateway over HTTP and offers a few helpers for
//! inspecting its configuration.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use ens_gateway::config::{ConfigError, load_config_from};
use ens_gateway::prelude::*;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Default config file, relative to the working directory.
const DEFAULT_CONFIG: &str = "gateway.toml";

/// ENS off-chain resolution gateway (CCIP-Read / EIP-5559)
#[derive(Parser)]
#[command(name = "ens-gateway")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "GATEWAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve(ServeArgs),

    /// Inspect configuration
    Config(ConfigArgs),

    /// Print the response signer address
    Address,
}

/// Arguments for the serve command
#[derive(Args)]
struct ServeArgs {
    /// Socket address to bind (overrides config)
    #[arg(short, long)]
    listen: Option<String>,
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration, secrets redacted
    Show,
    /// Validate configuration
    Validate,
}

/// Errors surfaced by the binary.
#[derive(Debug, thiserror::Error)]
enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gateway(#[from] Error),
    #[error("invalid configuration:\n{0}")]
    Invalid(String),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

type ServerResult<T> = std::result::Result<T, ServerError>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ens_gateway={level},ens_gateway_server={level},tower_http={},{}",
            if verbosity >= 1 { "debug" } else { "warn" },
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

async fn run(cli: Cli) -> ServerResult<()> {
    let path = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = load_config_from(&path).await?.with_env();

    match cli.command {
        Commands::Serve(args) => cmd_serve(config, args).await,
        Commands::Config(args) => cmd_config(&config, &args),
        Commands::Address => cmd_address(&config),
    }
}

/// Reject configurations with errors; log warnings.
fn check(config: &GatewayConfig) -> ServerResult<()> {
    let issues = config.validate();
    for issue in issues.iter().filter(|i| i.level == IssueLevel::Warning) {
        tracing::warn!("{issue}");
    }
    if config.is_valid() {
        return Ok(());
    }
    let errors: Vec<String> = issues
        .iter()
        .filter(|i| i.level == IssueLevel::Error)
        .map(ToString::to_string)
        .collect();
    Err(ServerError::Invalid(errors.join("\n")))
}

/// Build every component and serve until Ctrl+C.
async fn cmd_serve(mut config: GatewayConfig, args: ServeArgs) -> ServerResult<()> {
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    check(&config)?;

    let repository = config.build_repository()?;
    let ownership = config.build_ownership(Arc::clone(&repository)).await?;
    let authorizer = Authorizer::new(config.build_signing_domain()?, ownership);
    let envelope = config.build_signing_envelope()?;
    let signer = envelope.address();

    let service = Arc::new(
        ResolverService::new(repository, authorizer)
            .with_reserved_keys(config.resolver.reserved_text_keys.iter().cloned()),
    );
    let table = service.handler_table()?;
    let functions = table.len();
    let gateway = Gateway::new(table)
        .with_stage(service.integrity_stage()?)
        .with_stage(SigningStage::new(envelope));
    let app = router(Arc::new(gateway), &config.server);

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        prefix = %config.server.prefix,
        %signer,
        functions,
        storage = ?config.storage.backend,
        ownership = ?config.ownership.mode,
        "gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutting down");
}

/// Configuration management.
fn cmd_config(config: &GatewayConfig, args: &ConfigArgs) -> ServerResult<()> {
    match args.command {
        ConfigCommands::Show => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        ConfigCommands::Validate => {
            let issues = config.validate();
            if issues.is_empty() {
                println!("Configuration is valid");
            }
            for issue in &issues {
                println!("{issue}");
            }
            if !config.is_valid() {
                return Err(ServerError::Invalid(format!(
                    "{} error(s) found",
                    issues
                        .iter()
                        .filter(|i| i.level == IssueLevel::Error)
                        .count()
                )));
            }
        }
    }
    Ok(())
}

/// Print the address resolvers must trust as a signer.
fn cmd_address(config: &GatewayConfig) -> ServerResult<()> {
    let envelope = config.build_signing_envelope()?;
    println!("{}", envelope.address());
    Ok(())
}

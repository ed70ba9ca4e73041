//! LLMGate gateway server.
//!
//! A security-aware gateway between client applications and LLM backends:
//! every request is authenticated, screened for PII and prompt-injection
//! patterns, routed to the cheapest backend able to satisfy its
//! constraints, executed with cascade fallback, and emitted as a
//! structured event into the monitoring pipeline.

use clap::{Parser, Subcommand};
use llmgate_core::{GatewayConfig, Permission, Role};
use llmgate_gateway::audit::AuditLog;
use llmgate_gateway::config;
use llmgate_gateway::gateway::Gateway;
use llmgate_gateway::pipeline::EventPipeline;
use llmgate_gateway::registry::{build_adapters, default_descriptors, BackendRegistry};
use llmgate_gateway::server::{build_router, AppState};
use llmgate_security::{InjectionEngine, PiiEngine};
use llmgate_storage::StorageProfile;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// LLMGate security-aware LLM gateway.
#[derive(Parser)]
#[command(name = "llmgate-gateway", version, about, long_about = None)]
struct Cli {
    /// Path to YAML configuration file.
    #[arg(short, long, global = true, env = "LLMGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override log output format (text, json).
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Subcommand to run. If omitted, starts the gateway server.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print resolved settings.
    Validate,
    /// Mint a bearer token for a subject (operator bootstrap).
    IssueToken {
        /// Token subject (service or user identifier).
        #[arg(long)]
        subject: String,
        /// Role: admin, service, or read_only.
        #[arg(long, default_value = "service")]
        role: String,
        /// Grant PII access on top of the role defaults.
        #[arg(long, default_value_t = false)]
        pii_access: bool,
    },
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_and_merge_config(&cli)?;

    match cli.command {
        Some(Commands::Validate) => run_validate(&config),
        Some(Commands::IssueToken {
            subject,
            role,
            pii_access,
        }) => run_issue_token(&config, &subject, &role, pii_access),
        None => {
            init_logging(&config)?;
            config::validate_config(&config)?;
            run_server(config).await
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration loading
// ---------------------------------------------------------------------------

/// Load configuration from file/defaults, then apply env var and CLI
/// overrides. Precedence (highest wins): CLI flags, environment, file,
/// built-in defaults.
fn load_and_merge_config(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            // Logging isn't initialised yet — use eprintln for early diagnostics.
            eprintln!("Loading configuration from {}", path.display());
            config::load_config(path)?
        }
        None => {
            eprintln!("No config file specified, using defaults");
            GatewayConfig::default()
        }
    };

    config::apply_env_overrides(&mut config);

    if let Some(ref level) = cli.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(ref format) = cli.log_format {
        config.logging.format.clone_from(format);
    }

    Ok(config)
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn run_validate(config: &GatewayConfig) -> anyhow::Result<()> {
    config::validate_config(config)?;
    println!("✓ Configuration is valid.\n");
    println!("Resolved configuration:");
    println!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

fn run_issue_token(
    config: &GatewayConfig,
    subject: &str,
    role: &str,
    pii_access: bool,
) -> anyhow::Result<()> {
    config::validate_config(config)?;

    let role = match role {
        "admin" => Role::Admin,
        "service" => Role::Service,
        "read_only" => Role::ReadOnly,
        other => anyhow::bail!("unknown role '{other}'"),
    };
    let extra: &[Permission] = if pii_access {
        &[Permission::PiiAccess]
    } else {
        &[]
    };

    let tokens = llmgate_security::TokenService::new(
        &config.auth.token_secret,
        Duration::from_secs(config.auth.token_ttl_minutes * 60),
    );
    let token = tokens
        .issue(subject, role, extra)
        .map_err(|e| anyhow::anyhow!("token issuance failed: {e}"))?;
    println!("{token}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

async fn run_server(config: GatewayConfig) -> anyhow::Result<()> {
    info!(
        listen_addr = %config.listen_addr,
        storage_profile = %config.storage.profile,
        "Starting LLMGate gateway"
    );

    let listen_addr = config.listen_addr.clone();
    let pattern_interval = Duration::from_secs(config.pipeline.pattern_interval_secs.max(1));
    let state = build_app_state(config).await?;

    // Periodic pattern-level anomaly pass.
    {
        let pipeline = Arc::clone(state.gateway.pipeline());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pattern_interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                pipeline.run_pattern_analysis().await;
            }
        });
    }

    let app = build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(%listen_addr, "Gateway listening");

    let gateway = Arc::clone(&state.gateway);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received; draining event pipeline");
        })
        .await?;

    gateway.pipeline().shutdown().await;
    info!("Gateway stopped");
    Ok(())
}

/// Build the shared application state from configuration.
async fn build_app_state(config: GatewayConfig) -> anyhow::Result<Arc<AppState>> {
    let profile =
        StorageProfile::from_config(&config.storage.profile, &config.storage.database_path);
    info!(profile = %config.storage.profile, "Initializing event storage");
    let store = profile
        .build()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize storage: {e}"))?;

    let pii = Arc::new(
        PiiEngine::new(&config.pii.patterns)
            .map_err(|e| anyhow::anyhow!("Failed to build PII engine: {e}"))?,
    );
    let injection = Arc::new(
        InjectionEngine::new(&config.injection.patterns)
            .map_err(|e| anyhow::anyhow!("Failed to build injection engine: {e}"))?,
    );

    let descriptors = if config.backends.is_empty() {
        default_descriptors()
    } else {
        config.backends.clone()
    };
    info!(backends = descriptors.len(), "Registering backends");
    let registry = Arc::new(BackendRegistry::new(build_adapters(
        descriptors,
        pii,
        injection,
    )));

    let client = reqwest::Client::new();
    let alerts = llmgate_gateway::alerts::AlertEmitter::from_config(&config.alerts, client)
        .map(Arc::new);
    if alerts.is_some() {
        info!(min_severity = %config.alerts.min_severity, "Alert emitter enabled");
    }

    let pipeline = EventPipeline::start(
        &config.pipeline,
        config.anomaly.clone(),
        Arc::clone(&store),
        alerts,
    );

    let audit = AuditLog::from_config(&config.audit)
        .map_err(|e| anyhow::anyhow!("Failed to open audit sink: {e}"))?;

    let gateway = Arc::new(
        Gateway::new(config, registry, pipeline, audit)
            .map_err(|e| anyhow::anyhow!("Failed to build gateway: {e}"))?,
    );

    Ok(Arc::new(AppState { gateway, store }))
}

// ---------------------------------------------------------------------------
// Structured logging
// ---------------------------------------------------------------------------

/// Initialize structured logging. `RUST_LOG` takes precedence over the
/// configured level.
fn init_logging(config: &GatewayConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }

    Ok(())
}

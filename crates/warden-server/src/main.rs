use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use warden_client::BackendClient;
use warden_server::audit::TracingAuditSink;
use warden_server::auth::{ServiceKeyRegistry, ServiceTokenGenerator, ServiceTokenValidator};
use warden_server::cli::{Cli, Command};
use warden_server::config::{AppConfig, LogFormat};
use warden_server::directory::HttpUserDirectory;
use warden_server::metrics::Metrics;
use warden_server::middleware::{ServiceAuthState, UserIdentityState};
use warden_server::rest::{self, AppState, Backends};

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    let registry = tracing_subscriber::registry().with(filter);

    match config.log.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            registry.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer().pretty();
            registry.with(fmt_layer).init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config);

    match cli.command {
        Some(Command::IssueToken { target }) => run_issue_token(&config, &target),
        Some(Command::CheckConfig) => run_check_config(&config),
        Some(Command::Serve) | None => run_serve(config).await,
    }
}

fn token_generator(config: &AppConfig) -> Result<ServiceTokenGenerator, Box<dyn std::error::Error>> {
    let path = config
        .service
        .private_key_path
        .as_deref()
        .ok_or("service.private_key_path is not configured")?;
    Ok(ServiceTokenGenerator::from_file(config.service.name.as_str(), path)?)
}

fn run_issue_token(config: &AppConfig, target: &str) -> Result<(), Box<dyn std::error::Error>> {
    let token = token_generator(config)?.generate(target)?;
    println!("{token}");
    Ok(())
}

fn run_check_config(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = ServiceKeyRegistry::load(&config.service.trusted_keys)?;
    if config.service.private_key_path.is_some() {
        token_generator(config)?;
    }

    println!("Configuration is valid");
    println!("  Listen:        {}", config.http_addr());
    println!("  Backend read:  {}", config.backend.read_url);
    println!("  Backend write: {}", config.backend.write_url);
    println!("  Identity:      {}", config.identity.admin_url);
    println!("  Service:       {}", config.service.name);
    println!("  Trusted keys:  {}", registry.len());
    Ok(())
}

async fn run_serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        http_addr = %config.http_addr(),
        service = %config.service.name,
        "starting warden server"
    );

    let policy = Arc::new(config.allowlist_policy()?);
    let backend = Arc::new(BackendClient::new(
        &config.backend.read_url,
        &config.backend.write_url,
        &config.client_options(),
    )?);
    let directory = Arc::new(HttpUserDirectory::new(
        &config.identity.admin_url,
        Duration::from_secs(config.backend.timeout_secs),
    )?);

    let registry = ServiceKeyRegistry::load(&config.service.trusted_keys)?;
    if registry.is_empty() {
        tracing::warn!("no trusted service keys configured, internal API will reject every call");
    }
    let validator = Arc::new(
        ServiceTokenValidator::new(config.service.name.as_str(), registry)
            .with_leeway(Duration::from_secs(config.service.leeway_secs)),
    );

    let metrics = Arc::new(Metrics::new());
    let shutdown = CancellationToken::new();

    let state = AppState::new(
        Backends {
            backend,
            directory,
            audit: Arc::new(TracingAuditSink),
            policy,
            authority: Arc::new(config.role_authority()),
            max_concurrent_checks: config.backend.max_concurrent_checks,
        },
        Arc::clone(&metrics),
        shutdown.clone(),
    );
    let router = rest::create_router(
        state,
        ServiceAuthState::new(validator).with_metrics(Arc::clone(&metrics)),
        UserIdentityState::new(&config.identity.user_header)?,
    );

    let http_addr: std::net::SocketAddr = config.http_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(%http_addr, "HTTP server listening");

    tokio::spawn(shutdown_signal(shutdown.clone()));

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => { tracing::info!("received SIGINT"); }
                _ = sigterm.recv() => { tracing::info!("received SIGTERM"); }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler, using SIGINT only");
            let _ = ctrl_c.await;
            tracing::info!("received SIGINT");
        }
    }

    shutdown.cancel();
}

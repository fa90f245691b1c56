use crate::config::{AgentConfig, ServiceConfig};
use crate::discovery::{
    HttpBackend, InstanceLocator, InstancePublisher, LocatorConfig, LocatorEvent, PublisherEvent,
};
use crate::metrics::Metrics;
use crate::selection::policy_from_name;
use crate::server;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub admin_listen: String,
}

/// Agent lifecycle: init → publish → discover → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = Arc::new(AgentConfig::load(&args.config_path)?);
    let metrics = Metrics::install()?;

    let token = config.backend.token.clone().unwrap_or_default();
    let backend = Arc::new(HttpBackend::new(
        &config.backend.url,
        &token,
        config.backend.request_timeout(),
    )?);
    tracing::info!("discovery: backend ready, base_url={}", backend.base_url());

    let (publisher, publisher_events) =
        InstancePublisher::new(backend.clone(), config.publisher.to_publisher_config());
    tokio::spawn(log_publisher_events(publisher_events));

    let policy = policy_from_name(&config.locator.policy).ok_or_else(|| {
        anyhow::anyhow!("unknown selection policy '{}'", config.locator.policy)
    })?;
    let (locator, locator_events) = InstanceLocator::new(
        backend,
        policy,
        LocatorConfig {
            refresh_interval: Duration::from_secs(config.locator.refresh_interval_secs),
        },
    );
    tokio::spawn(log_locator_events(locator_events));

    let host = local_hostname();
    for svc in &config.services {
        publisher.publish(&svc.service_name, &svc.endpoint, service_options(svc, host.as_deref()))?;
    }
    for name in &config.locator.discover {
        locator.discover_instances(name);
    }

    let shutdown = CancellationToken::new();
    let state = server::AgentState {
        config: config.clone(),
        publisher: publisher.clone(),
        locator: locator.clone(),
        metrics,
    };
    let admin_handle = tokio::spawn({
        let listen = args.admin_listen.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = server::run_admin_server(&listen, state, shutdown).await {
                tracing::error!("server: admin failed, error={}", e);
            }
        }
    });

    tracing::info!(
        services = config.services.len(),
        discover = config.locator.discover.len(),
        "server: discovery agent started"
    );

    wait_for_shutdown(&shutdown).await?;

    locator.shutdown();
    publisher.shutdown().await;

    if let Err(e) = admin_handle.await {
        tracing::error!("server: admin task error: {}", e);
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

fn local_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
}

/// Publish options for a configured service. A `hostname` metadata entry is
/// added unless the config already sets one.
fn service_options(svc: &ServiceConfig, host: Option<&str>) -> crate::discovery::PublishOptions {
    let mut options = svc.options();
    if let Some(host) = host {
        options
            .metadata
            .entry("hostname".to_string())
            .or_insert_with(|| host.to_string());
    }
    options
}

async fn log_publisher_events(mut events: mpsc::UnboundedReceiver<PublisherEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            PublisherEvent::Registered(service_name) => {
                tracing::info!("publisher: event registered, service={}", service_name)
            }
            PublisherEvent::Expired(service_name) => {
                tracing::warn!("publisher: event expired, service={}", service_name)
            }
            PublisherEvent::Error {
                service_name,
                error,
            } => tracing::warn!(
                "publisher: event error, service={}, error={}",
                service_name,
                error
            ),
        }
    }
}

async fn log_locator_events(mut events: mpsc::UnboundedReceiver<LocatorEvent>) {
    while let Some(LocatorEvent::Error {
        service_name,
        error,
    }) = events.recv().await
    {
        tracing::warn!(
            "locator: event error, service={}, error={}",
            service_name,
            error
        );
    }
}

async fn wait_for_shutdown(shutdown: &CancellationToken) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = sigterm.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.cancel();
    Ok(())
}

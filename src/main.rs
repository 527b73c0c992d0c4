// src/main.rs
use anyhow::{Context, Result};
use envfleet::config::{self, Config, LoggingConfig};
use envfleet::metrics::MetricsRegistry;
use envfleet::{api, Deployer, Registry};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    let config = config::load_config(&config_path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    init_tracing(&config.logging)?;
    info!("Loaded configuration from: {}", config_path);

    let metrics_registry = MetricsRegistry::new()?;
    let metrics = metrics_registry.collector();

    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, config.metrics.path.clone()).await?;
    }

    let registry = envfleet::registry::registry();
    let deployer = Deployer::local_with(config.executor.clone())
        .with_registry(registry.clone())
        .with_health_check(config.health_check.clone())
        .with_metrics(metrics);

    if let Err(e) = deploy_all(&deployer, &config).await {
        error!("Deployment failed: {:#}", e);
        registry.cleanup_all().await;
        return Err(e);
    }

    api::shutdown_signal().await;
    shutdown(&registry).await;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?
        .add_directive("hyper=info".parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn deploy_all(deployer: &Deployer, config: &Config) -> Result<()> {
    if config.environments.is_empty() {
        warn!("No environments configured");
    }

    for load in &config.environments {
        let env = deployer
            .load(load)
            .await
            .with_context(|| format!("Failed to load {}", load.image))?;

        info!("Environment ready: {}", env);
        match env.describe_methods().await {
            Ok(methods) => info!(environment = %env.name(), "Available methods:\n{}", methods),
            Err(e) => warn!(environment = %env.name(), "Could not list methods: {}", e),
        }
    }
    Ok(())
}

async fn shutdown(registry: &Arc<Registry>) {
    let names = registry.list();
    info!("Shutting down {} environments: {:?}", names.len(), names);
    registry.cleanup_all().await;
}

async fn start_metrics_server(addr: SocketAddr, registry: MetricsRegistry, path: String) -> Result<()> {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    let response = if req.uri().path() == path.as_str() {
                        let mut response = Response::new(Body::from(registry.gather()));
                        response.headers_mut().insert(
                            CONTENT_TYPE,
                            HeaderValue::from_static("text/plain; version=0.0.4"),
                        );
                        response
                    } else {
                        let mut response = Response::new(Body::from("Not Found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        response
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?
        .serve(make_service);

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

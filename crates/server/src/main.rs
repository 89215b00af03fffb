//! Process entry point: loads configuration, wires the conversation engine
//! and (optional) persistence layer, then serves the webhook/metrics HTTP
//! surface alongside the softswitch and audio-bridge TCP listeners.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use phone_agent_config::{load_settings, Settings};
use phone_agent_persistence::ScyllaConfig;
use phone_agent_server::{metrics, softswitch, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("PHONE_AGENT_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&config);
    tracing::info!(
        environment = ?config.environment,
        config_env = env.as_deref().unwrap_or("default"),
        "starting phone agent server"
    );

    let metrics_handle = metrics::init_metrics();

    let mut state = AppState::new(config.clone())?;
    if config.persistence.enabled {
        tracing::info!(hosts = ?config.persistence.scylla_hosts, "initializing ScyllaDB persistence");
        let scylla_config = ScyllaConfig {
            hosts: config.persistence.scylla_hosts.clone(),
            keyspace: config.persistence.keyspace.clone(),
            replication_factor: config.persistence.replication_factor,
        };
        match phone_agent_persistence::init(scylla_config).await {
            Ok(persistence) => state = state.with_persistence(Arc::new(persistence)),
            Err(e) => tracing::error!(error = %e, "failed to initialize persistence, continuing without it"),
        }
    }
    let state = Arc::new(state);

    let app = phone_agent_server::http::router(state.clone()).merge(metrics::router(metrics_handle));

    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(%http_addr, "webhook surface listening");

    let bridge_addr = SocketAddr::from(([0, 0, 0, 0], config.server.audio_bridge_port));
    let bridge_listener = tokio::net::TcpListener::bind(bridge_addr).await?;
    tracing::info!(%bridge_addr, "audio bridge listening");
    tokio::spawn(phone_agent_server::bridge::serve(
        bridge_listener,
        state.clone(),
        config.pipeline.bridge_frame_samples,
    ));

    let softswitch_addr = SocketAddr::from(([0, 0, 0, 0], config.server.softswitch_port));
    let softswitch_listener = tokio::net::TcpListener::bind(softswitch_addr).await?;
    tracing::info!(%softswitch_addr, "softswitch event socket listening");
    tokio::spawn(softswitch::serve(softswitch_listener, state.clone()));

    axum::serve(http_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("phone_agent={level},tower_http=debug").into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}

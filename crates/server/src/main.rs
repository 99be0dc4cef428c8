//! Process entry point: load settings, wire the shared clients and
//! admission controller, start the capacity leak sweep, and serve the
//! webhook/media-stream router.
//!
//! `anyhow` is used here and only here in this crate — library code
//! returns `ServerError`/`ConfigError`/etc, never `anyhow::Error`
//! (spec SPEC_FULL.md §10.2).

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use voice_agent_capacity::AdmissionController;
use voice_agent_clients::brain::BrainClientConfig;
use voice_agent_clients::carrier::CarrierClientConfig;
use voice_agent_clients::control_plane::ControlPlaneConfig;
use voice_agent_clients::{CarrierCallControlClient, ControlPlaneClient, HttpBrainClient};
use voice_agent_config::{load_settings, TenantResolver, TenantResolverConfig};
use voice_agent_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = Arc::new(load_settings()?);
    tracing::info!(port = settings.server.port, "voice call runtime starting");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus recorder: {e}"))?;

    let kv = Arc::new(voice_agent_capacity::RedisKvStore::connect(&settings.redis.url).await?);

    let tenant_resolver = Arc::new(TenantResolver::new(kv.clone(), TenantResolverConfig::default()));

    let admission = AdmissionController::new(
        kv,
        settings.capacity.capacity_ttl_seconds,
        Duration::from_millis(settings.capacity.call_ttl_ms),
        settings.capacity.global_concurrency_cap,
    );
    let _leak_sweep_shutdown = admission.start_leak_sweep();

    let brain = Arc::new(HttpBrainClient::new(BrainClientConfig {
        base_url: settings.brain.url.clone(),
        non_streaming_timeout: Duration::from_millis(settings.brain.non_streaming_timeout_ms),
        streaming_first_audio_timeout: Duration::from_millis(settings.brain.streaming_first_audio_timeout_ms),
        streaming_ping_timeout: Duration::from_millis(settings.brain.streaming_ping_timeout_ms),
    }));

    let control_plane = Arc::new(ControlPlaneClient::new(ControlPlaneConfig {
        base_url: settings.control_plane.url.clone(),
        timeout: Duration::from_millis(settings.control_plane.timeout_ms),
    }));

    let carrier = Arc::new(CarrierCallControlClient::new(CarrierClientConfig {
        base_url: settings.telnyx.call_control_base_url.clone(),
        api_key: settings.telnyx.call_control_api_key.clone(),
        timeout: Duration::from_secs(10),
    }));

    let state = AppState::new(settings.clone(), tenant_resolver, admission, brain, control_plane, carrier, metrics_handle);

    let router = voice_agent_server::create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var("LOG_FORMAT").unwrap_or_default();

    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}

use anyhow::{Context, Result};
use rumqttc::MqttOptions;
use std::{env, sync::Arc, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sproutlink_client::config;
use sproutlink_client::engine::Engine;
use sproutlink_client::transport::{client_id, MqttTransport};
use sproutlink_client::web;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config (file, then env) ─────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "sproutlink.toml".to_string());
    let mut cfg = config::load_or_default(&config_path)?;
    cfg.apply_env(|key| env::var(key).ok())?;
    cfg.validate().context("invalid configuration after env overrides")?;
    let options = cfg.engine_options()?;

    // ── Transport ───────────────────────────────────────────────────
    let id = client_id(&cfg.broker.client_id_prefix);
    let mut mqttoptions = MqttOptions::new(&id, &cfg.broker.host, cfg.broker.port);
    mqttoptions.set_keep_alive(Duration::from_secs(cfg.broker.keep_alive_secs));
    let (transport, events) = MqttTransport::new(mqttoptions);

    info!(
        client_id = %id,
        broker = %format!("{}:{}", cfg.broker.host, cfg.broker.port),
        root = options.registry.root(),
        "starting"
    );

    // ── Engine ──────────────────────────────────────────────────────
    let engine = Arc::new(Engine::start(options, Arc::new(transport), events));
    engine.connect();

    // ── Control API ─────────────────────────────────────────────────
    let server = tokio::spawn(web::serve(Arc::clone(&engine), cfg.web.port));

    tokio::select! {
        result = server => match result {
            Ok(Err(e)) => error!("{e:#}"),
            Err(e) => error!("web server task failed: {e}"),
            Ok(Ok(())) => {}
        },
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
    }

    engine.shutdown().await;
    Ok(())
}

//! `rcc serve` — wire the components together and run the gateway.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use rcc_audit::FileAuditLog;
use rcc_auth::TokenVerifier;
use rcc_config::AppConfig;
use rcc_gateway::AppState;
use rcc_hub::TelemetryHub;
use rcc_orchestrator::Orchestrator;
use rcc_radio::{RadioManager, RegistrationOptions, SimulatedAdapter, StatusMonitor};

pub async fn run(addr_override: Option<String>) -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    let addr = addr_override.unwrap_or_else(|| config.gateway.addr.clone());

    let audit = Arc::new(
        FileAuditLog::open(&config.audit.log_path).with_context(|| {
            format!("opening audit log at {}", config.audit.log_path.display())
        })?,
    );

    let manager = Arc::new(RadioManager::new(config.timing.channel_plan.clone()));
    if config.radios.is_empty() {
        warn!("no radios configured; the inventory starts empty");
    }
    for radio in &config.radios {
        let initial_frequency = config
            .timing
            .channel_plan
            .channels_for_model(&radio.model)
            .first()
            .map(|c| c.frequency_mhz)
            .unwrap_or(2412.0);
        let adapter = Arc::new(SimulatedAdapter::new(initial_frequency));
        manager
            .register(
                &radio.id,
                &radio.model,
                adapter,
                RegistrationOptions {
                    min_power_dbm: radio.min_power_dbm,
                    max_power_dbm: radio.max_power_dbm,
                },
                config.timing.command_timeouts.get_state,
            )
            .await
            .with_context(|| format!("registering radio '{}'", radio.id))?;
    }

    let hub = TelemetryHub::new(&config.timing, manager.clone());
    let verifier = Arc::new(TokenVerifier::from_settings(&config.auth)?);
    let orchestrator = Arc::new(Orchestrator::new(
        manager.clone(),
        hub.clone(),
        audit.clone(),
        config.timing.command_timeouts.clone(),
    ));
    let monitor = StatusMonitor::spawn(manager.clone(), hub.clone(), &config.timing);

    let state = Arc::new(AppState {
        verifier,
        orchestrator,
        manager,
        hub: hub.clone(),
        timing: config.timing.clone(),
    });

    info!(radios = config.radios.len(), "radio control container starting");
    rcc_gateway::serve(&addr, rcc_gateway::build_router(state), shutdown_signal()).await?;

    monitor.stop();
    hub.stop().await;
    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}

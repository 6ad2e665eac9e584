mod config;
mod engine;
mod ledger;
mod model;
mod notify;
mod payment;
mod tron;

use anyhow::Result;
use config::Config;
use engine::{EngineSettings, WatchEngine};
use ledger::RewardLedger;
use notify::{Notifier, SmtpNotifier};
use payment::TrxPayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tron::TronClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting TRON wallet watcher");

    let config = Config::from_env()?;
    info!(
        wallets = config.targets.len(),
        api_keys = config.api_keys.len(),
        tokens = config.token_contracts.len(),
        "Configuration loaded"
    );
    for target in &config.targets {
        info!(wallet = %target.monitored_address, "Monitoring wallet");
    }

    let ledger = RewardLedger::load(config.reward_ledger_path.clone())?;

    let client = TronClient::new(&config)?;
    let payer = TrxPayer::new(client.clone());
    let notifier = SmtpNotifier::new(&config.smtp)?;

    if config.startup_test_email {
        let body = notify::startup_body(&config.targets);
        if let Err(e) = notifier.send("Wallet monitor started", &body).await {
            warn!("startup test email failed: {e:#}");
        }
    }

    let settings = EngineSettings::from(&config);
    let mut engine = WatchEngine::new(
        config.targets,
        config.token_contracts,
        config.avoid_addresses,
        settings,
        ledger,
        client.clone(),
        client,
        payer,
        notifier,
    );

    if let Err(e) = engine.run().await {
        error!("Watch loop error: {e:#}");
        return Err(e);
    }

    Ok(())
}

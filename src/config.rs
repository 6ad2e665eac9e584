use crate::model::{WatchTarget, validate_tron_address};
use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// TRON mainnet USDT (TRC20) contract.
pub const USDT_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

#[derive(Debug, Clone)]
pub struct Config {
    pub targets: Vec<WatchTarget>,
    pub api_keys: Vec<String>,
    pub token_contracts: Vec<String>,
    pub avoid_addresses: Vec<String>,
    pub poll_interval: Duration,
    pub request_delay: Duration,
    pub http_timeout: Duration,
    pub token_decimals: u32,
    pub min_token_amount: f64,
    pub reward_amount_trx: f64,
    pub reward_cooldown: Duration,
    pub reward_memo: String,
    pub notify_on_ineligible: bool,
    pub record_cooldown_on_failure: bool,
    pub startup_test_email: bool,
    pub reward_ledger_path: Option<PathBuf>,
    pub trongrid_url: String,
    pub tronscan_url: String,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub relay: String,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let monitored = list_var("WALLET_ADDRESSES")?;
        let reward_sources = list_var("REWARD_WALLET_ADDRESSES")?;
        let reward_keys = list_var("REWARD_WALLET_KEYS")?;
        let targets = build_targets(monitored, reward_sources, reward_keys)?;

        let api_keys = list_var("TRON_API_KEYS")?;

        let token_contracts = list_var_or("TOKEN_CONTRACTS", &[USDT_CONTRACT]);
        for contract in &token_contracts {
            validate_tron_address(contract)
                .with_context(|| format!("invalid TOKEN_CONTRACTS entry '{contract}'"))?;
        }

        let avoid_addresses = list_var_or("AVOID_ADDRESSES", &[]);
        for address in &avoid_addresses {
            validate_tron_address(address)
                .with_context(|| format!("invalid AVOID_ADDRESSES entry '{address}'"))?;
        }

        let min_token_amount: f64 = parsed_var_or("MIN_TOKEN_AMOUNT", 1.0)?;
        if min_token_amount < 0.0 {
            bail!("MIN_TOKEN_AMOUNT must not be negative");
        }

        let reward_amount_trx: f64 = parsed_var_or("REWARD_AMOUNT_TRX", 0.1)?;
        if reward_amount_trx <= 0.0 {
            bail!("REWARD_AMOUNT_TRX must be positive");
        }

        let smtp = SmtpConfig {
            relay: required_var("SMTP_RELAY")?,
            username: required_var("SMTP_USERNAME")?,
            password: required_var("SMTP_PASSWORD")?,
            from: required_var("NOTIFY_FROM")?,
            to: required_var("NOTIFY_TO")?,
        };

        Ok(Config {
            targets,
            api_keys,
            token_contracts,
            avoid_addresses,
            poll_interval: Duration::from_secs(parsed_var_or("POLL_INTERVAL_SECS", 30)?),
            request_delay: Duration::from_millis(parsed_var_or("REQUEST_DELAY_MS", 500)?),
            http_timeout: Duration::from_secs(parsed_var_or("HTTP_TIMEOUT_SECS", 15)?),
            token_decimals: parsed_var_or("TOKEN_DECIMALS", 6)?,
            min_token_amount,
            reward_amount_trx,
            reward_cooldown: Duration::from_secs(parsed_var_or("REWARD_COOLDOWN_SECS", 1800)?),
            reward_memo: std::env::var("REWARD_MEMO").unwrap_or_else(|_| "thanks".to_string()),
            notify_on_ineligible: bool_var_or("NOTIFY_ON_INELIGIBLE", true)?,
            record_cooldown_on_failure: bool_var_or("RECORD_COOLDOWN_ON_FAILURE", false)?,
            startup_test_email: bool_var_or("STARTUP_TEST_EMAIL", false)?,
            reward_ledger_path: std::env::var("REWARD_LEDGER_PATH").ok().map(PathBuf::from),
            trongrid_url: var_or("TRONGRID_URL", "https://api.trongrid.io"),
            tronscan_url: var_or("TRONSCAN_URL", "https://apilist.tronscanapi.com"),
            smtp,
        })
    }
}

/// Pair up the three parallel lists into watch targets. The lists must be the
/// same length and every address must be valid base58check.
pub fn build_targets(
    monitored: Vec<String>,
    reward_sources: Vec<String>,
    reward_keys: Vec<String>,
) -> Result<Vec<WatchTarget>> {
    if monitored.len() != reward_sources.len() || monitored.len() != reward_keys.len() {
        bail!(
            "WALLET_ADDRESSES ({}), REWARD_WALLET_ADDRESSES ({}) and REWARD_WALLET_KEYS ({}) must have the same length",
            monitored.len(),
            reward_sources.len(),
            reward_keys.len()
        );
    }

    let mut targets = Vec::with_capacity(monitored.len());
    for ((monitored_address, reward_source_address), reward_source_key) in
        monitored.into_iter().zip(reward_sources).zip(reward_keys)
    {
        validate_tron_address(&monitored_address)
            .with_context(|| format!("invalid WALLET_ADDRESSES entry '{monitored_address}'"))?;
        validate_tron_address(&reward_source_address).with_context(|| {
            format!("invalid REWARD_WALLET_ADDRESSES entry '{reward_source_address}'")
        })?;

        let key = reward_source_key
            .strip_prefix("0x")
            .unwrap_or(&reward_source_key);
        if key.len() != 64 || hex::decode(key).is_err() {
            bail!(
                "reward key for {} is not a 32-byte hex private key",
                monitored_address
            );
        }

        targets.push(WatchTarget {
            monitored_address,
            reward_source_address,
            reward_source_key: key.to_string(),
        });
    }

    Ok(targets)
}

/// Split a comma-separated value into trimmed, non-empty entries.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set in the environment or .env"))
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn list_var(name: &str) -> Result<Vec<String>> {
    let entries = parse_list(&required_var(name)?);
    if entries.is_empty() {
        bail!("{name} is set but contains no entries");
    }
    Ok(entries)
}

fn list_var_or(name: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(name) {
        Ok(raw) => parse_list(&raw),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn parsed_var_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{name} has an unparseable value '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn bool_var_or(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => bail!("{name} must be a boolean, got '{other}'"),
        },
        Err(_) => Ok(default),
    }
}

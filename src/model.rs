use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// One monitored wallet paired with the wallet that funds its reward payouts.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub monitored_address: String,
    pub reward_source_address: String,
    pub reward_source_key: String,
}

/// The latest TRC20 transfer touching a monitored address, as reported by the
/// chain-data provider. Fetched fresh every cycle, never stored beyond the
/// last-seen comparison.
#[derive(Debug, Clone)]
pub struct ObservedTransfer {
    pub transaction_id: String,
    pub from_address: String,
    pub to_address: String,
    pub token_contract: String,
    pub token_symbol: String,
    pub raw_amount: u64,
    pub block_timestamp_ms: i64,
    pub observed_at: DateTime<Utc>,
}

impl ObservedTransfer {
    pub fn human_amount(&self, decimals: u32) -> f64 {
        self.raw_amount as f64 / 10f64.powi(decimals as i32)
    }
}

const TRON_ADDRESS_PREFIX: u8 = 0x41;

/// Strict base58check validation for a TRON mainnet address: 0x41 version
/// byte, 20-byte payload, 4-byte double-SHA256 checksum.
pub fn validate_tron_address(address: &str) -> Result<()> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| anyhow::anyhow!("'{}' is not valid base58", address))?;

    if decoded.len() != 25 {
        bail!(
            "'{}' decodes to {} bytes, expected 25",
            address,
            decoded.len()
        );
    }

    let (body, checksum) = decoded.split_at(21);
    let first = Sha256::digest(body);
    let second = Sha256::digest(first);
    if &second[..4] != checksum {
        bail!("'{}' has a bad base58check checksum", address);
    }

    if body[0] != TRON_ADDRESS_PREFIX {
        bail!("'{}' is not a mainnet (0x41) address", address);
    }

    Ok(())
}

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

/// Flat-file record of counterparties that have already been paid a reward,
/// one address per line. Addresses in the ledger are never rewarded again.
/// With no path configured the ledger is inert and the cooldown table alone
/// throttles repeat rewards.
pub struct RewardLedger {
    path: Option<PathBuf>,
    rewarded: HashSet<String>,
}

impl RewardLedger {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut rewarded = HashSet::new();

        if let Some(ref path) = path {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    rewarded.extend(
                        contents
                            .lines()
                            .map(str::trim)
                            .filter(|l| !l.is_empty())
                            .map(str::to_string),
                    );
                    info!(
                        addresses = rewarded.len(),
                        "Loaded reward ledger from {}",
                        path.display()
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!("Reward ledger {} not found, starting empty", path.display());
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to read ledger {}", path.display()));
                }
            }
        }

        Ok(RewardLedger { path, rewarded })
    }

    pub fn contains(&self, address: &str) -> bool {
        self.path.is_some() && self.rewarded.contains(address)
    }

    /// Record a paid counterparty and append it to the file. No-op when the
    /// ledger is disabled or the address is already present.
    pub fn record(&mut self, address: &str) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        if !self.rewarded.insert(address.to_string()) {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open ledger {}", path.display()))?;
        writeln!(file, "{address}")
            .with_context(|| format!("failed to append to ledger {}", path.display()))?;
        Ok(())
    }
}

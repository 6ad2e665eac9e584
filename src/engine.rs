use crate::config::Config;
use crate::ledger::RewardLedger;
use crate::model::{ObservedTransfer, WatchTarget};
use crate::notify::{self, Notifier};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Kept in the reward wallet on top of the payout so a send never drains the
/// balance needed for bandwidth and fees.
const FEE_MARGIN_SUN: u64 = 1_000_000;

#[async_trait]
pub trait TransferSource: Send + Sync {
    /// Latest qualifying TRC20 transfer touching `address`, or `None` when
    /// the address has no such activity yet.
    async fn latest_transfer(&self, address: &str) -> Result<Option<ObservedTransfer>>;
}

#[derive(Debug, Clone, Default)]
pub struct AddressKind {
    pub is_contract: bool,
    pub public_tag: Option<String>,
}

#[async_trait]
pub trait AddressClassifier: Send + Sync {
    async fn classify(&self, address: &str) -> Result<AddressKind>;
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn native_balance(&self, address: &str) -> Result<u64>;

    /// Returns the transaction id of the broadcast payout.
    async fn send_native(
        &self,
        from: &str,
        signing_key: &str,
        to: &str,
        amount_sun: u64,
        memo: &str,
    ) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub token_decimals: u32,
    pub min_token_amount: f64,
    pub reward_amount_sun: u64,
    pub reward_cooldown: Duration,
    pub reward_memo: String,
    pub notify_on_ineligible: bool,
    pub record_cooldown_on_failure: bool,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        EngineSettings {
            poll_interval: config.poll_interval,
            token_decimals: config.token_decimals,
            min_token_amount: config.min_token_amount,
            reward_amount_sun: (config.reward_amount_trx * 1_000_000.0).round() as u64,
            reward_cooldown: config.reward_cooldown,
            reward_memo: config.reward_memo.clone(),
            notify_on_ineligible: config.notify_on_ineligible,
            record_cooldown_on_failure: config.record_cooldown_on_failure,
        }
    }
}

struct LastSeen {
    transaction_id: String,
    block_timestamp_ms: i64,
}

/// Drives the poll-dedup-classify-act sequence for every configured wallet,
/// once per cycle, forever. All state the loop needs lives here: the
/// last-seen table, the reward cooldown table, the static skip set and the
/// optional reward ledger.
pub struct WatchEngine<S, C, P, N> {
    source: S,
    classifier: C,
    payments: P,
    notifier: N,
    targets: Vec<WatchTarget>,
    settings: EngineSettings,
    skip_set: HashSet<String>,
    last_seen: HashMap<String, LastSeen>,
    cooldowns: HashMap<String, Instant>,
    ledger: RewardLedger,
}

impl<S, C, P, N> WatchEngine<S, C, P, N>
where
    S: TransferSource,
    C: AddressClassifier,
    P: PaymentProvider,
    N: Notifier,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        targets: Vec<WatchTarget>,
        token_contracts: Vec<String>,
        avoid_addresses: Vec<String>,
        settings: EngineSettings,
        ledger: RewardLedger,
        source: S,
        classifier: C,
        payments: P,
        notifier: N,
    ) -> Self {
        let mut skip_set = HashSet::new();
        for target in &targets {
            skip_set.insert(target.monitored_address.clone());
            skip_set.insert(target.reward_source_address.clone());
        }
        skip_set.extend(token_contracts);
        skip_set.extend(avoid_addresses);

        WatchEngine {
            source,
            classifier,
            payments,
            notifier,
            targets,
            settings,
            skip_set,
            last_seen: HashMap::new(),
            cooldowns: HashMap::new(),
            ledger,
        }
    }

    /// The process's entire purpose: cycle over every wallet, sleep, repeat.
    /// Returns only if the task is cancelled from outside.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            wallets = self.targets.len(),
            interval_secs = self.settings.poll_interval.as_secs(),
            "Watch loop started"
        );

        loop {
            self.run_cycle().await;
            sleep(self.settings.poll_interval).await;
        }
    }

    /// One full pass over the configured targets, in configuration order. A
    /// failure on one wallet never stops the others.
    pub async fn run_cycle(&mut self) {
        let targets = self.targets.clone();
        for target in &targets {
            if let Err(e) = self.process_target(target).await {
                warn!(
                    wallet = %target.monitored_address,
                    "skipping wallet this cycle: {e:#}"
                );
            }
        }
    }

    async fn process_target(&mut self, target: &WatchTarget) -> Result<()> {
        let wallet = &target.monitored_address;

        let Some(transfer) = self.source.latest_transfer(wallet).await? else {
            debug!(%wallet, "no qualifying transfer");
            return Ok(());
        };

        match self.last_seen.get(wallet) {
            Some(prev) if prev.transaction_id == transfer.transaction_id => {
                debug!(%wallet, "no new transaction");
                return Ok(());
            }
            Some(prev) if transfer.block_timestamp_ms <= prev.block_timestamp_ms => {
                // Eventual consistency on the provider side can surface an
                // older transfer under a different id; never re-fire on it.
                debug!(
                    %wallet,
                    txid = %transfer.transaction_id,
                    "stale transfer from provider, ignoring"
                );
                return Ok(());
            }
            _ => {}
        }

        // Overwrite before any side effect so a failed notification cannot
        // make the same transfer fire again next cycle.
        self.last_seen.insert(
            wallet.clone(),
            LastSeen {
                transaction_id: transfer.transaction_id.clone(),
                block_timestamp_ms: transfer.block_timestamp_ms,
            },
        );

        let amount = transfer.human_amount(self.settings.token_decimals);
        if amount < self.settings.min_token_amount {
            debug!(%wallet, amount, txid = %transfer.transaction_id, "dust transfer ignored");
            return Ok(());
        }

        let Some(counterparty) = counterparty(wallet, &transfer) else {
            debug!(%wallet, "transfer has no counterparty, skipping");
            return Ok(());
        };

        info!(
            %wallet,
            amount,
            %counterparty,
            txid = %transfer.transaction_id,
            "New transfer detected"
        );

        let eligible = self.reward_eligible(&counterparty).await;

        if eligible || self.settings.notify_on_ineligible {
            let subject = notify::transfer_subject(&transfer, amount);
            let body = notify::transfer_body(target, &transfer, amount);
            if let Err(e) = self.notifier.send(&subject, &body).await {
                warn!(%wallet, "notification failed: {e:#}");
            }
        }

        if eligible {
            self.issue_reward(target, &counterparty).await;
        }

        Ok(())
    }

    /// Any single failed check excludes the counterparty from a reward.
    async fn reward_eligible(&self, counterparty: &str) -> bool {
        if self.skip_set.contains(counterparty) {
            debug!(%counterparty, "counterparty is a monitored/system address");
            return false;
        }
        if self.ledger.contains(counterparty) {
            debug!(%counterparty, "counterparty already in reward ledger");
            return false;
        }

        match self.classifier.classify(counterparty).await {
            Ok(kind) if kind.is_contract => {
                info!(%counterparty, "counterparty is a contract account");
                false
            }
            Ok(kind) => match kind.public_tag {
                Some(tag) => {
                    info!(%counterparty, tag, "counterparty is publicly tagged");
                    false
                }
                None => true,
            },
            Err(e) => {
                warn!(%counterparty, "classification failed, withholding reward: {e:#}");
                false
            }
        }
    }

    async fn issue_reward(&mut self, target: &WatchTarget, counterparty: &str) {
        if let Some(stamp) = self.cooldowns.get(counterparty)
            && stamp.elapsed() < self.settings.reward_cooldown
        {
            info!(%counterparty, "reward cooldown active, skipping payout");
            return;
        }

        let amount = self.settings.reward_amount_sun;
        match self
            .payments
            .native_balance(&target.reward_source_address)
            .await
        {
            Ok(balance) if balance < amount + FEE_MARGIN_SUN => {
                warn!(
                    source = %target.reward_source_address,
                    balance,
                    "reward wallet underfunded, skipping payout"
                );
                self.note_reward_failure(counterparty);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    source = %target.reward_source_address,
                    "balance lookup failed, skipping payout: {e:#}"
                );
                return;
            }
        }

        match self
            .payments
            .send_native(
                &target.reward_source_address,
                &target.reward_source_key,
                counterparty,
                amount,
                &self.settings.reward_memo,
            )
            .await
        {
            Ok(txid) => {
                info!(%counterparty, %txid, amount_sun = amount, "Reward sent");
                self.cooldowns
                    .insert(counterparty.to_string(), Instant::now());
                if let Err(e) = self.ledger.record(counterparty) {
                    warn!(%counterparty, "failed to persist reward ledger: {e:#}");
                }
            }
            Err(e) => {
                warn!(%counterparty, "reward transfer failed: {e:#}");
                self.note_reward_failure(counterparty);
            }
        }
    }

    fn note_reward_failure(&mut self, counterparty: &str) {
        if self.settings.record_cooldown_on_failure {
            self.cooldowns
                .insert(counterparty.to_string(), Instant::now());
        }
    }
}

/// The side of the transfer that is not the monitored wallet. A transfer
/// from the wallet to itself has no counterparty.
fn counterparty(wallet: &str, transfer: &ObservedTransfer) -> Option<String> {
    let from_is_wallet = transfer.from_address == wallet;
    let to_is_wallet = transfer.to_address == wallet;
    match (from_is_wallet, to_is_wallet) {
        (true, true) => None,
        (true, false) => Some(transfer.to_address.clone()),
        _ => Some(transfer.from_address.clone()),
    }
}

use crate::config::SmtpConfig;
use crate::model::{ObservedTransfer, WatchTarget};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Email notifier over an authenticated SMTP relay.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.relay)
            .with_context(|| format!("invalid SMTP relay '{}'", config.relay))?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(SmtpNotifier {
            transport,
            from: config
                .from
                .parse()
                .with_context(|| format!("invalid NOTIFY_FROM address '{}'", config.from))?,
            to: config
                .to
                .parse()
                .with_context(|| format!("invalid NOTIFY_TO address '{}'", config.to))?,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .body(body.to_string())
            .context("failed to build email")?;

        self.transport
            .send(message)
            .await
            .context("SMTP send failed")?;
        Ok(())
    }
}

pub fn transfer_subject(transfer: &ObservedTransfer, amount: f64) -> String {
    let symbol = if transfer.token_symbol.is_empty() {
        "token"
    } else {
        &transfer.token_symbol
    };
    format!("New {symbol} transfer: {amount}")
}

pub fn transfer_body(target: &WatchTarget, transfer: &ObservedTransfer, amount: f64) -> String {
    format!(
        "New transaction detected!\n\n\
         Wallet: {}\n\
         Amount: {} {}\n\
         From: {}\n\
         To: {}\n\
         TxID: {}\n\
         Observed: {}\n\
         https://tronscan.org/#/transaction/{}\n",
        target.monitored_address,
        amount,
        transfer.token_symbol,
        transfer.from_address,
        transfer.to_address,
        transfer.transaction_id,
        transfer.observed_at.to_rfc3339(),
        transfer.transaction_id,
    )
}

pub fn startup_body(targets: &[WatchTarget]) -> String {
    let wallets: Vec<&str> = targets
        .iter()
        .map(|t| t.monitored_address.as_str())
        .collect();
    format!(
        "Wallet monitor started.\n\nMonitoring {} wallet(s):\n{}\n",
        wallets.len(),
        wallets.join("\n")
    )
}

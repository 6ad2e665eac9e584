use crate::engine::PaymentProvider;
use crate::tron::TronClient;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use serde_json::{Value, json};
use tracing::debug;

/// Sends native TRX through the node wallet API: create a `TransferContract`,
/// sign the returned transaction id locally, broadcast. The private key never
/// leaves the process.
pub struct TrxPayer {
    client: TronClient,
}

impl TrxPayer {
    pub fn new(client: TronClient) -> Self {
        TrxPayer { client }
    }
}

#[async_trait]
impl PaymentProvider for TrxPayer {
    async fn native_balance(&self, address: &str) -> Result<u64> {
        self.client.native_balance(address).await
    }

    async fn send_native(
        &self,
        from: &str,
        signing_key: &str,
        to: &str,
        amount_sun: u64,
        memo: &str,
    ) -> Result<String> {
        let mut body = json!({
            "owner_address": from,
            "to_address": to,
            "amount": amount_sun,
            "visible": true,
        });
        if !memo.is_empty() {
            body["extra_data"] = Value::String(hex::encode(memo));
        }

        let mut created = self
            .client
            .wallet_post_once("/wallet/createtransaction", body)
            .await?;
        if let Some(error) = created.get("Error") {
            bail!("create transaction rejected: {error}");
        }
        let txid = created
            .get("txID")
            .and_then(Value::as_str)
            .context("create transaction response missing txID")?
            .to_string();

        // The txID is the SHA256 of the raw transaction, so signing it signs
        // the transaction itself.
        let signature = sign_txid(&txid, signing_key)?;
        created["signature"] = json!([signature]);

        let receipt = self
            .client
            .wallet_post_once("/wallet/broadcasttransaction", created)
            .await?;
        if receipt.get("result").and_then(Value::as_bool) != Some(true) {
            bail!("broadcast rejected: {}", broadcast_error(&receipt));
        }

        debug!(%txid, %to, amount_sun, "TRX transfer broadcast");
        Ok(txid)
    }
}

/// Recoverable secp256k1 signature over the 32-byte transaction id, encoded
/// as the 65-byte r || s || v hex string TRON expects.
fn sign_txid(txid_hex: &str, key_hex: &str) -> Result<String> {
    let digest = hex::decode(txid_hex).context("txID is not hex")?;
    if digest.len() != 32 {
        bail!("txID must be 32 bytes, got {}", digest.len());
    }

    let key_bytes =
        hex::decode(key_hex.strip_prefix("0x").unwrap_or(key_hex)).context("key is not hex")?;
    let key = SigningKey::from_slice(&key_bytes).context("invalid secp256k1 private key")?;

    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&digest)
        .context("signing failed")?;

    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte());
    Ok(hex::encode(bytes))
}

/// Broadcast failures carry a code plus a hex-encoded ASCII message.
fn broadcast_error(receipt: &Value) -> String {
    let code = receipt
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN");
    let message = receipt
        .get("message")
        .and_then(Value::as_str)
        .and_then(|m| hex::decode(m).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default();
    format!("{code} {message}").trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn signature_is_65_bytes_with_sane_recovery_id() {
        let txid = "aa".repeat(32);
        let signature = sign_txid(&txid, KEY).unwrap();
        let bytes = hex::decode(&signature).unwrap();
        assert_eq!(bytes.len(), 65);
        assert!(bytes[64] <= 3);
    }

    #[test]
    fn signing_is_deterministic() {
        let txid = "bb".repeat(32);
        assert_eq!(sign_txid(&txid, KEY).unwrap(), sign_txid(&txid, KEY).unwrap());
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(sign_txid("zz", KEY).is_err());
        assert!(sign_txid(&"aa".repeat(16), KEY).is_err());
        assert!(sign_txid(&"aa".repeat(32), "deadbeef").is_err());
        // zero is not a valid scalar
        assert!(sign_txid(&"aa".repeat(32), &"00".repeat(32)).is_err());
    }

    #[test]
    fn decodes_hex_broadcast_messages() {
        let receipt = json!({
            "result": false,
            "code": "CONTRACT_VALIDATE_ERROR",
            // "balance is not sufficient."
            "message": "62616c616e6365206973206e6f742073756666696369656e742e"
        });
        assert_eq!(
            broadcast_error(&receipt),
            "CONTRACT_VALIDATE_ERROR balance is not sufficient."
        );
    }

    #[test]
    fn tolerates_missing_error_fields() {
        assert_eq!(broadcast_error(&json!({ "result": false })), "UNKNOWN");
    }
}

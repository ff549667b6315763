use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Signature, U256};
use perp_guard_core::GatewayError;
use serde_json::json;

/// Sign an `/exchange` action payload together with its nonce.
///
/// # Errors
/// Returns error if signing fails
pub async fn sign_action(
    wallet: &LocalWallet,
    action: &serde_json::Value,
    nonce: u64,
) -> Result<Signature, GatewayError> {
    let message = json!({
        "action": action,
        "nonce": nonce,
    });

    let message_str =
        serde_json::to_string(&message).map_err(|e| GatewayError::Parse(e.to_string()))?;

    wallet
        .sign_message(message_str.as_bytes())
        .await
        .map_err(|e| GatewayError::Auth(format!("signing failed: {e}")))
}

/// Signature in the `{r, s, v}` shape the exchange endpoint expects.
#[must_use]
pub fn signature_to_json(signature: &Signature) -> serde_json::Value {
    json!({
        "r": word_to_hex(signature.r),
        "s": word_to_hex(signature.s),
        "v": signature.v,
    })
}

fn word_to_hex(word: U256) -> String {
    let mut buf = [0u8; 32];
    word.to_big_endian(&mut buf);
    format!("0x{}", hex::encode(buf))
}

/// Convert signature to a single 0x-prefixed hex string.
#[must_use]
pub fn signature_to_hex(signature: &Signature) -> String {
    format!("0x{}", hex::encode(signature.to_vec()))
}

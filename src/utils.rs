use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Verifies a `sha256=<hex>` HMAC signature of the webhook body.
pub fn verify_webhook_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(hex_signature) = signature_header.trim().strip_prefix("sha256=") else {
        debug!("Signature header without sha256= prefix");
        return false;
    };

    let Ok(signature) = hex_decode(hex_signature) else {
        debug!("Signature is not valid hex");
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    // Constant-time comparison
    mac.verify_slice(&signature).is_ok()
}

/// Computes the header value a sender would attach for `payload`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

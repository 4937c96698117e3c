use anyhow::Result;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Generate HMAC-SHA256 signature for a signed REST request
///
/// The exchange signs the canonical query string (including the timestamp
/// parameter) and expects the digest hex-encoded.
pub fn generate_signature(secret: &str, query_string: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(query_string.as_bytes());

    let digest = mac.finalize().into_bytes();
    let mut signature = String::with_capacity(digest.len() * 2);
    for byte in digest {
        signature.push_str(&format!("{:02x}", byte));
    }

    Ok(signature)
}

/// Current timestamp in milliseconds, as the signed `timestamp` parameter
pub fn get_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis()
        .to_string()
}

/// Append timestamp, recvWindow and signature to a query string
pub fn sign_query(secret: &str, query: &str) -> Result<String> {
    let timestamp = get_timestamp();
    let unsigned = if query.is_empty() {
        format!("timestamp={}&recvWindow=5000", timestamp)
    } else {
        format!("{}&timestamp={}&recvWindow=5000", query, timestamp)
    };

    let signature = generate_signature(secret, &unsigned)?;
    Ok(format!("{}&signature={}", unsigned, signature))
}

//! HMAC-SHA256 webhook signatures.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::GatewayError;

type HmacSha256 = Hmac<Sha256>;

fn keyed(secret: &str, body: &[u8]) -> Result<HmacSha256, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
    mac.update(body);
    Ok(mac)
}

/// Signs `body` with `secret`, returning the lowercase hex digest.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, GatewayError> {
    Ok(hex::encode(keyed(secret, body)?.finalize().into_bytes()))
}

/// Verifies a hex signature (optionally prefixed with `sha256=`) over `body`.
///
/// The digest comparison runs in constant time.
pub fn verify(secret: &str, signature: Option<&str>, body: &[u8]) -> Result<(), GatewayError> {
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(GatewayError::InvalidSignature)?;
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex::decode(signature).map_err(|_| GatewayError::InvalidSignature)?;

    keyed(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| GatewayError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_signature() {
        let body = br#"{"event_type":"payment.update"}"#;
        let signature = sign("whsec", body).unwrap();
        assert!(verify("whsec", Some(&signature), body).is_ok());
        assert!(verify("whsec", Some(&format!("sha256={signature}")), body).is_ok());
    }

    #[test]
    fn rejects_missing_or_wrong_signature() {
        let body = b"{}";
        assert!(matches!(
            verify("whsec", None, body),
            Err(GatewayError::InvalidSignature)
        ));
        assert!(verify("whsec", Some(""), body).is_err());
        assert!(verify("whsec", Some("not-hex"), body).is_err());
        assert!(verify("whsec", Some(&sign("other", body).unwrap()), body).is_err());
        assert!(verify("whsec", Some(&sign("whsec", b"{ }").unwrap()), body).is_err());
    }
}

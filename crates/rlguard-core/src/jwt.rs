//! Unverified JWT payload extraction.
//!
//! The access token is issued to this process by a trusted endpoint, so
//! signature verification is intentionally skipped (spec.md §4.2, §9):
//! only the `sub` and `exp` payload fields are ever read.

use base64::Engine;
use serde::Deserialize;

use crate::error::{Result, RlguardError};

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

fn decode_payload(token: &str) -> Result<Claims> {
    let payload_segment = token
        .split('.')
        .nth(1)
        .ok_or_else(|| RlguardError::MalformedToken("token has no payload segment".into()))?;

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_segment)
        .map_err(|e| RlguardError::MalformedToken(format!("invalid base64 payload: {e}")))?;

    serde_json::from_slice(&bytes).map_err(RlguardError::Decode)
}

/// Extract the `sub` claim (the upstream user id used for statistics
/// lookups).
pub fn extract_user_id(token: &str) -> Result<String> {
    Ok(decode_payload(token)?.sub)
}

/// Extract the `exp` claim, in epoch seconds.
pub fn extract_expiration_time(token: &str) -> Result<i64> {
    Ok(decode_payload(token)?.exp)
}

/// True if the token expires within `exp_margin_s` seconds of now.
pub fn will_soon_expire(token: &str, now_epoch_s: i64, exp_margin_s: i64) -> Result<bool> {
    Ok(extract_expiration_time(token)? <= now_epoch_s + exp_margin_s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_token(sub: &str, exp: i64) -> String {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(format!(r#"{{"sub":"{sub}","exp":{exp}}}"#));
        format!("{header}.{payload}.unsigned")
    }

    #[test]
    fn extracts_subject_and_expiry() {
        let token = make_token("user-42", 1_700_000_000);
        assert_eq!(extract_user_id(&token).unwrap(), "user-42");
        assert_eq!(extract_expiration_time(&token).unwrap(), 1_700_000_000);
    }

    #[test]
    fn will_soon_expire_honours_margin() {
        let token = make_token("u", 1000);
        assert!(will_soon_expire(&token, 800, 300).unwrap());
        assert!(!will_soon_expire(&token, 600, 300).unwrap());
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(extract_user_id("not-a-jwt").is_err());
    }
}

use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use super::encoding::base64url_decode;

/// Seconds an access token is treated as expired ahead of its real `exp`,
/// so a request issued "just in time" does not race the backend clock.
const EXPIRY_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Clone, Deserialize)]
struct AccessClaims {
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    sub: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub subject: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

/// Decodes the claims segment of a JWT access token without verifying the
/// signature. The backend is the authority on token validity; this is only
/// used client-side to decide when a proactive refresh is worthwhile.
pub fn inspect(token: &str) -> Result<TokenInfo, String> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err("invalid token format".to_string());
    }

    let payload_bytes = base64url_decode(parts[1])?;
    let claims: AccessClaims = serde_json::from_slice(&payload_bytes)
        .map_err(|e| format!("invalid token payload json: {e}"))?;

    let expires_at = match claims.exp {
        Some(ts) => Some(
            OffsetDateTime::from_unix_timestamp(ts)
                .map_err(|e| format!("invalid token expiry: {e}"))?,
        ),
        None => None,
    };

    Ok(TokenInfo {
        subject: claims.sub,
        expires_at,
    })
}

/// A token that cannot be parsed counts as expired; a token without an `exp`
/// claim never expires client-side.
pub fn is_expired(token: &str, now: OffsetDateTime) -> bool {
    match inspect(token) {
        Ok(info) => match info.expires_at {
            Some(exp) => now + Duration::seconds(EXPIRY_LEEWAY_SECS) >= exp,
            None => false,
        },
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::encoding::base64url_encode;
    use time::format_description::well_known::Rfc3339;

    fn token_with_claims(claims_json: &str) -> String {
        let header = base64url_encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = base64url_encode(claims_json.as_bytes());
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn inspect_reads_subject_and_expiry() {
        // 2025-01-01T00:00:00Z
        let token = token_with_claims(r#"{"sub":"user-42","exp":1735689600}"#);
        let info = inspect(&token).unwrap();
        assert_eq!(info.subject.as_deref(), Some("user-42"));
        assert_eq!(
            info.expires_at.unwrap(),
            OffsetDateTime::parse("2025-01-01T00:00:00Z", &Rfc3339).unwrap()
        );
    }

    #[test]
    fn fresh_token_is_not_expired() {
        let token = token_with_claims(r#"{"exp":1735689600}"#);
        let now = OffsetDateTime::parse("2024-12-31T23:00:00Z", &Rfc3339).unwrap();
        assert!(!is_expired(&token, now));
    }

    #[test]
    fn token_inside_leeway_window_counts_as_expired() {
        let token = token_with_claims(r#"{"exp":1735689600}"#);
        let now = OffsetDateTime::parse("2024-12-31T23:59:45Z", &Rfc3339).unwrap();
        assert!(is_expired(&token, now));
    }

    #[test]
    fn token_past_expiry_is_expired() {
        let token = token_with_claims(r#"{"exp":1735689600}"#);
        let now = OffsetDateTime::parse("2025-01-01T00:00:01Z", &Rfc3339).unwrap();
        assert!(is_expired(&token, now));
    }

    #[test]
    fn token_without_exp_never_expires_client_side() {
        let token = token_with_claims(r#"{"sub":"user-42"}"#);
        let now = OffsetDateTime::parse("2099-01-01T00:00:00Z", &Rfc3339).unwrap();
        assert!(!is_expired(&token, now));
    }

    #[test]
    fn malformed_token_counts_as_expired() {
        let now = OffsetDateTime::parse("2025-01-01T00:00:00Z", &Rfc3339).unwrap();
        assert!(is_expired("not-a-jwt", now));
        assert!(is_expired("a.b", now));

        let bad_payload = format!("{}.{}.sig", base64url_encode(b"{}"), "!!!");
        assert!(is_expired(&bad_payload, now));
    }
}

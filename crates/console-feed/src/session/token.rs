//! Bearer token structure and claims decoding.
//!
//! Tokens are JWT-shaped: `header.claims.signature`. Only the claims segment
//! is interpreted here; signature verification is the API's concern.

use std::fmt;

use base64::{
    Engine as _,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Console role carried in the token claims.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// National operations; holds short-lived elevated tokens.
    SuperAdmin,
    HospitalAdmin,
    CollectionCenter,
    Rider,
    Other(String),
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(&self) -> &str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::HospitalAdmin => "hospital_admin",
            Self::CollectionCenter => "collection_center",
            Self::Rider => "rider",
            Self::Other(name) => name,
        }
    }

    /// Whether sessions of this role use short-lived elevated tokens that
    /// must be refreshed proactively.
    pub fn requires_elevated_refresh(&self) -> bool {
        matches!(self, Self::SuperAdmin)
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "super_admin" => Self::SuperAdmin,
            "hospital_admin" => Self::HospitalAdmin,
            "collection_center" => Self::CollectionCenter,
            "rider" => Self::Rider,
            _ => Self::Other(s),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded token claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Issued-at, seconds since the Unix epoch.
    #[serde(default)]
    pub iat: Option<i64>,
}

impl Claims {
    /// Expiry as a timestamp. Out-of-range values clamp to the epoch, which
    /// is always in the past.
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Whether the claims are expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }

    /// Remaining lifetime at `now`, zero when expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> std::time::Duration {
        let secs = self.exp.saturating_sub(now.timestamp());
        std::time::Duration::from_secs(u64::try_from(secs).unwrap_or(0))
    }
}

/// Decode the claims segment of a token.
///
/// Returns `None` unless the token has exactly three dot-separated segments
/// and the middle one is base64url JSON with an `exp` claim.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let segments: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = segments.as_slice() else {
        return None;
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Validate token structure and expiry at `now`. Fails closed.
pub fn validate_at(token: &str, now: DateTime<Utc>) -> bool {
    decode_claims(token).is_some_and(|claims| !claims.is_expired_at(now))
}

/// Validate token structure and expiry against the current time.
pub fn validate(token: &str) -> bool {
    validate_at(token, Utc::now())
}

/// Build an unsigned token carrying `claims`. Used by tests and demos.
pub fn encode_unsigned(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn token_expiring_in(secs: i64) -> String {
        encode_unsigned(&json!({
            "sub": "u-1",
            "role": "super_admin",
            "exp": Utc::now().timestamp() + secs,
        }))
    }

    #[test]
    fn test_expired_token_is_invalid() {
        assert!(!validate(&token_expiring_in(-10)));
    }

    #[test]
    fn test_future_token_is_valid() {
        assert!(validate(&token_expiring_in(7200)));
    }

    #[test]
    fn test_segment_count_must_be_three() {
        let valid = token_expiring_in(7200);
        let mut parts = valid.split('.');
        let header = parts.next().unwrap_or_default();
        let payload = parts.next().unwrap_or_default();

        assert!(!validate(&format!("{header}.{payload}")));
        assert!(!validate(&format!("{valid}.extra")));
        assert!(!validate(""));
        assert!(!validate("no-dots-at-all"));
    }

    #[test]
    fn test_garbage_payload_fails_closed() {
        assert!(!validate("a.!!!not-base64!!!.c"));
        let not_json = URL_SAFE_NO_PAD.encode("not json");
        assert!(!validate(&format!("a.{not_json}.c")));
    }

    #[test]
    fn test_missing_expiry_is_invalid() {
        let token = encode_unsigned(&json!({ "sub": "u-1" }));
        assert!(decode_claims(&token).is_none());
        assert!(!validate(&token));
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let claims = json!({ "exp": Utc::now().timestamp() + 60 });
        let payload = URL_SAFE.encode(claims.to_string());
        assert!(validate(&format!("h.{payload}.s")));
    }

    #[test]
    fn test_role_decoding() {
        let claims = decode_claims(&token_expiring_in(60)).expect("claims");
        assert_eq!(claims.role, Some(Role::SuperAdmin));
        assert!(claims.role.as_ref().is_some_and(Role::requires_elevated_refresh));

        let role: Role = "dispatcher".to_string().into();
        assert_eq!(role, Role::Other("dispatcher".to_string()));
        assert!(!role.requires_elevated_refresh());
        assert_eq!(role.to_string(), "dispatcher");
    }

    #[test]
    fn test_remaining_lifetime() {
        let now = Utc::now();
        let claims = Claims {
            sub: None,
            role: None,
            exp: now.timestamp() + 90,
            iat: None,
        };
        assert_eq!(claims.remaining_at(now).as_secs(), 90);

        let expired = Claims {
            exp: now.timestamp() - 5,
            ..claims
        };
        assert_eq!(expired.remaining_at(now).as_secs(), 0);
        assert!(expired.is_expired_at(now));
    }
}

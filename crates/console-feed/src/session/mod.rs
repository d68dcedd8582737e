//! Authenticated session and its token lifecycle.

mod manager;
mod store;
mod token;

use std::fmt;

use chrono::{DateTime, Utc};

pub use manager::{RefreshPlan, SessionManager};
pub use store::{FileTokenStore, MemoryTokenStore, TOKEN_KEY, TokenStore};
pub use token::{Claims, Role, decode_claims, encode_unsigned, validate, validate_at};

use crate::{api::UserProfile, error::AuthError};

/// An authenticated identity: bearer token, decoded claims and (when known)
/// the user record.
#[derive(Clone, PartialEq)]
pub struct Session {
    token: String,
    claims: Claims,
    user: Option<UserProfile>,
}

impl Session {
    /// Build a session from a token, validating it at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the claims cannot be decoded
    /// and [`AuthError::Expired`] if the token has already expired.
    pub fn from_token(
        token: impl Into<String>,
        user: Option<UserProfile>,
    ) -> Result<Self, AuthError> {
        Self::from_token_at(token, user, Utc::now())
    }

    /// Same as [`from_token`](Self::from_token), validating at `now`.
    pub fn from_token_at(
        token: impl Into<String>,
        user: Option<UserProfile>,
        now: DateTime<Utc>,
    ) -> Result<Self, AuthError> {
        let token = token.into();
        let claims = decode_claims(&token).ok_or(AuthError::MalformedToken)?;
        if claims.is_expired_at(now) {
            return Err(AuthError::Expired);
        }
        Ok(Self {
            token,
            claims,
            user,
        })
    }

    /// The bearer token.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    /// Role from the token claims, falling back to the user record.
    pub fn role(&self) -> Option<&Role> {
        self.claims
            .role
            .as_ref()
            .or_else(|| self.user.as_ref().and_then(|u| u.role.as_ref()))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expires_at()
    }

    /// Validity flag: the token has not expired yet.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.claims.is_expired_at(now)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .field("user", &self.user)
            .finish()
    }
}

//! JWT token generation and validation.
//!
//! Access and refresh tokens are signed with separate secrets so that a leaked
//! access key cannot be used to mint refresh tokens (and the other way around).

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::clock::unix_now;
use crate::db::UserRole;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Stateless bearer token, never stored server-side
    Access,
    /// Tracked in the database by its JTI
    Refresh,
}

/// Which secret a token is signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Access,
    Refresh,
}

/// JWT claims for access tokens (stateless, no JTI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (principal UUID)
    pub sub: String,
    pub login: String,
    pub role: UserRole,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// JWT claims for refresh tokens (tracked with JTI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// JWT ID, the refresh session's primary key
    pub jti: String,
    /// Subject (principal UUID)
    pub sub: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iat: u64,
    pub exp: u64,
}

/// Claims of a verified token, tagged by class.
#[derive(Debug, Clone)]
pub enum VerifiedClaims {
    Access(AccessClaims),
    Refresh(RefreshClaims),
}

trait TypedClaims: DeserializeOwned {
    fn token_type(&self) -> TokenType;
}

impl TypedClaims for AccessClaims {
    fn token_type(&self) -> TokenType {
        self.token_type
    }
}

impl TypedClaims for RefreshClaims {
    fn token_type(&self) -> TokenType {
        self.token_type
    }
}

/// Upper bound (and default) for the access token lifetime: 7 days.
pub const MAX_ACCESS_TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Refresh token duration: 30 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Signing keys for both token classes.
#[derive(Clone)]
pub struct TokenCodec {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_duration: u64,
}

/// Result of generating an access token.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub expires_at: u64,
    pub duration: u64,
}

/// Result of generating a refresh token (with JTI for tracking).
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub jti: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub duration: u64,
}

impl TokenCodec {
    /// Create a codec with the default (maximum) access token lifetime.
    pub fn new(access_secret: &[u8], refresh_secret: &[u8]) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
            access_duration: MAX_ACCESS_TOKEN_DURATION_SECS,
        }
    }

    /// Shorten the access token lifetime. Values above the 7 day maximum are
    /// clamped, zero is raised to one second.
    pub fn with_access_duration(mut self, secs: u64) -> Self {
        self.access_duration = secs.clamp(1, MAX_ACCESS_TOKEN_DURATION_SECS);
        self
    }

    pub fn access_duration(&self) -> u64 {
        self.access_duration
    }

    pub fn issue_access_token(
        &self,
        principal_uuid: &str,
        login: &str,
        role: UserRole,
    ) -> Result<IssuedAccessToken, CodecError> {
        let now = unix_now();
        let exp = now + self.access_duration;

        let claims = AccessClaims {
            sub: principal_uuid.to_string(),
            login: login.to_string(),
            role,
            token_type: TokenType::Access,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.access_encoding)
            .map_err(CodecError::Encoding)?;

        Ok(IssuedAccessToken {
            token,
            expires_at: exp,
            duration: self.access_duration,
        })
    }

    /// Generate a refresh token with a fresh JTI.
    pub fn issue_refresh_token(
        &self,
        principal_uuid: &str,
    ) -> Result<IssuedRefreshToken, CodecError> {
        let now = unix_now();
        let jti = uuid::Uuid::new_v4().to_string();
        let exp = now + REFRESH_TOKEN_DURATION_SECS;

        let claims = RefreshClaims {
            jti: jti.clone(),
            sub: principal_uuid.to_string(),
            token_type: TokenType::Refresh,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.refresh_encoding)
            .map_err(CodecError::Encoding)?;

        Ok(IssuedRefreshToken {
            token,
            jti,
            issued_at: now,
            expires_at: exp,
            duration: REFRESH_TOKEN_DURATION_SECS,
        })
    }

    /// Check signature and expiry with the key of the given class.
    /// Never consults the session store.
    pub fn verify(&self, token: &str, class: KeyClass) -> Result<VerifiedClaims, CodecError> {
        match class {
            KeyClass::Access => self.verify_access(token).map(VerifiedClaims::Access),
            KeyClass::Refresh => self.verify_refresh(token).map(VerifiedClaims::Refresh),
        }
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, CodecError> {
        decode_typed(token, &self.access_decoding, TokenType::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, CodecError> {
        decode_typed(token, &self.refresh_decoding, TokenType::Refresh)
    }
}

fn decode_typed<C: TypedClaims>(
    token: &str,
    key: &DecodingKey,
    expected: TokenType,
) -> Result<C, CodecError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let token_data = jsonwebtoken::decode::<C>(token, key, &validation).map_err(|e| {
        match e.kind() {
            ErrorKind::ExpiredSignature => CodecError::Expired,
            _ => CodecError::InvalidSignature,
        }
    })?;

    if token_data.claims.token_type() != expected {
        return Err(CodecError::InvalidSignature);
    }

    Ok(token_data.claims)
}

/// Errors that can occur during JWT operations.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    /// Bad signature, malformed token or wrong token class
    #[error("invalid token")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

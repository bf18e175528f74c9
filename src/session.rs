use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::config::Config;
use crate::store::UserRecord;

type HmacSha256 = Hmac<Sha256>;

/// The one symmetric signing secret for the deployment. Issuer and
/// verifier share a handle so a future rotation is a construction-site
/// change only.
#[derive(Debug, Clone)]
pub struct SigningSecret(String);

impl SigningSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// The authenticated caller recovered from a verified session credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub user_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{message}")]
    Unavailable { message: String },
    #[error("session credential is malformed or carries an invalid signature")]
    Invalid,
    #[error("session credential has expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    name: String,
    #[serde(rename = "avatarUrl")]
    avatar_url: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints stateless signed session credentials. Claims carry only public
/// display fields; the provider access token and any email never enter
/// the credential.
#[derive(Debug, Clone)]
pub struct SessionIssuer {
    secret: Option<SigningSecret>,
    ttl_seconds: u64,
}

impl SessionIssuer {
    pub fn from_config(config: &Config) -> Self {
        Self {
            secret: config
                .session_signing_secret
                .as_deref()
                .map(SigningSecret::new),
            ttl_seconds: config.session_ttl_seconds,
        }
    }

    pub fn issue(&self, user: &UserRecord) -> Result<IssuedSession, SessionError> {
        self.issue_at(user, Utc::now())
    }

    fn issue_at(&self, user: &UserRecord, issued_at: DateTime<Utc>) -> Result<IssuedSession, SessionError> {
        let secret = self.secret.as_ref().ok_or_else(|| SessionError::Unavailable {
            message: "session signing secret is not configured".to_string(),
        })?;

        let expires_at = issued_at + Duration::seconds(self.ttl_seconds as i64);
        let claims = SessionClaims {
            sub: user.id.to_string(),
            name: user.name.clone(),
            avatar_url: user.avatar_url.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode_hs256_token(&claims, secret)?;
        Ok(IssuedSession { token, expires_at })
    }
}

/// Validates a session credential without any server-side lookup:
/// signature first, then expiry, then subject extraction.
#[derive(Debug, Clone)]
pub struct SessionVerifier {
    secret: Option<SigningSecret>,
}

impl SessionVerifier {
    pub fn from_config(config: &Config) -> Self {
        Self {
            secret: config
                .session_signing_secret
                .as_deref()
                .map(SigningSecret::new),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Subject, SessionError> {
        self.verify_at(token, Utc::now())
    }

    fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Subject, SessionError> {
        let secret = self.secret.as_ref().ok_or_else(|| SessionError::Unavailable {
            message: "session signing secret is not configured".to_string(),
        })?;

        let mut segments = token.split('.');
        let (header_segment, claims_segment, signature_segment) =
            match (segments.next(), segments.next(), segments.next(), segments.next()) {
                (Some(header), Some(claims), Some(signature), None) => (header, claims, signature),
                _ => return Err(SessionError::Invalid),
            };

        let signature = URL_SAFE_NO_PAD
            .decode(signature_segment)
            .map_err(|_| SessionError::Invalid)?;

        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SessionError::Invalid)?;
        mac.update(header_segment.as_bytes());
        mac.update(b".");
        mac.update(claims_segment.as_bytes());
        mac.verify_slice(&signature).map_err(|_| SessionError::Invalid)?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_segment)
            .map_err(|_| SessionError::Invalid)?;
        let claims: SessionClaims =
            serde_json::from_slice(&claims_bytes).map_err(|_| SessionError::Invalid)?;

        if claims.exp <= now.timestamp() {
            return Err(SessionError::Expired);
        }

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| SessionError::Invalid)?;
        Ok(Subject { user_id })
    }
}

fn encode_hs256_token(
    claims: &SessionClaims,
    secret: &SigningSecret,
) -> Result<String, SessionError> {
    let header = serde_json::json!({
        "alg": "HS256",
        "typ": "JWT",
    });

    let header_bytes = serde_json::to_vec(&header).map_err(|error| SessionError::Unavailable {
        message: format!("failed to encode session token header: {error}"),
    })?;
    let claims_bytes = serde_json::to_vec(claims).map_err(|error| SessionError::Unavailable {
        message: format!("failed to encode session token claims: {error}"),
    })?;

    let header_segment = URL_SAFE_NO_PAD.encode(header_bytes);
    let claims_segment = URL_SAFE_NO_PAD.encode(claims_bytes);
    let signing_input = format!("{header_segment}.{claims_segment}");

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|error| SessionError::Unavailable {
            message: format!("failed to initialize session token signer: {error}"),
        })?;
    mac.update(signing_input.as_bytes());
    let signature_segment = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature_segment}"))
}

//! JWT token generation and verification.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{info, warn};

use super::{AuthError, Role, TokenClaims};

/// Default access token lifetime: 12 hours (one duty shift).
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 12 * 60 * 60;

/// Generate a signed JWT access token (HS256).
pub fn generate_access_token(
    subject: &str,
    email: &str,
    roles: &[Role],
    lifetime: Duration,
    secret: &[u8],
) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = TokenClaims {
        sub: subject.to_string(),
        email: email.to_string(),
        roles: roles.iter().map(|r| r.as_str().to_string()).collect(),
        exp: (now + lifetime).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| AuthError::TokenError(format!("jwt encode: {e}")))
}

/// Verify a JWT access token, returning the claims on success.
pub fn verify_access_token(token: &str, secret: &[u8]) -> Option<TokenClaims> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::default();
    validation.validate_exp = true;
    decode::<TokenClaims>(token, &key, &validation)
        .ok()
        .map(|data| data.claims)
}

/// Length of a generated signing secret.
const GENERATED_SECRET_LEN: usize = 64;

/// Resolve the HS256 signing secret shared by the server and the CLI.
///
/// `JWT_SECRET` wins over `AUTH_SECRET`. Without either, a secret persisted
/// under the user data dir is reused, or a new one is generated there.
pub fn resolve_jwt_secret() -> String {
    ["JWT_SECRET", "AUTH_SECRET"]
        .into_iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|secret| !secret.is_empty())
        .unwrap_or_else(|| load_or_create_secret(&signing_secret_path()))
}

/// Read the secret at `path`, generating and persisting one if it is absent.
///
/// A secret that cannot be persisted is still returned, but tokens signed
/// with it stop verifying once the process exits.
fn load_or_create_secret(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LEN)
        .map(char::from)
        .collect();
    match persist_secret(path, &secret) {
        Ok(()) => info!(path = %path.display(), "generated signing secret"),
        Err(err) => warn!(
            path = %path.display(),
            error = %err,
            "signing secret not persisted; tokens will not survive a restart"
        ),
    }
    secret
}

/// Write `secret` to `path`, owner-readable only on unix.
fn persist_secret(path: &Path, secret: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(secret.as_bytes())
}

fn signing_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gatepass")
        .join("jwt-secret")
}

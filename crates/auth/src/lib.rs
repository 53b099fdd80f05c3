//! Bearer token verification.
//!
//! One algorithm is configured at a time: HS256 with a shared secret,
//! or RS256 with a public key supplied directly or looked up in a
//! remote key set. A token whose header names any other algorithm is
//! rejected before signature work begins.

pub mod keyset;

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use rcc_config::AuthSettings;
use rcc_core::{Claims, Role, Scope};

pub use keyset::KeySetCache;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token algorithm {got:?} does not match configured {expected:?}")]
    AlgorithmMismatch { expected: Algorithm, got: Algorithm },

    #[error("token expired")]
    Expired,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("missing claim: {0}")]
    MissingClaim(String),

    #[error("invalid {claim} claim: {value}")]
    InvalidClaim { claim: &'static str, value: String },

    #[error("unknown signing key '{0}'")]
    UnknownKey(String),

    #[error("key set fetch failed: {0}")]
    KeySetFetch(String),

    #[error("verifier misconfigured: {0}")]
    Misconfigured(String),
}

enum KeySource {
    /// Development mode: no verification, fixed anonymous claims.
    Disabled,
    /// Shared secret or directly configured public key.
    Static(DecodingKey),
    /// Remote key set, with an optional fallback key for tokens that
    /// carry no `kid`.
    KeySet {
        cache: KeySetCache,
        default_key: Option<DecodingKey>,
    },
}

pub struct TokenVerifier {
    algorithm: Algorithm,
    source: KeySource,
}

impl TokenVerifier {
    /// No verification; every request gets the anonymous claim set.
    /// For development only.
    pub fn disabled() -> Self {
        Self {
            algorithm: Algorithm::HS256,
            source: KeySource::Disabled,
        }
    }

    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            source: KeySource::Static(DecodingKey::from_secret(secret)),
        }
    }

    pub fn rs256_public_key(pem: &[u8]) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| AuthError::Misconfigured(format!("rs256 public key: {e}")))?;
        Ok(Self {
            algorithm: Algorithm::RS256,
            source: KeySource::Static(key),
        })
    }

    pub fn rs256_key_set(
        url: impl Into<String>,
        refresh_interval: Duration,
        cache_ttl: Duration,
        default_key: Option<DecodingKey>,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            algorithm: Algorithm::RS256,
            source: KeySource::KeySet {
                cache: KeySetCache::new(url, Algorithm::RS256, refresh_interval, cache_ttl)?,
                default_key,
            },
        })
    }

    /// Build a verifier from the loaded configuration.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, AuthError> {
        match settings.mode.as_str() {
            "none" => {
                warn!("auth mode \"none\": all requests run with anonymous full access");
                Ok(Self::disabled())
            }
            "hs256" => {
                let secret = settings.hs256_secret.as_deref().ok_or_else(|| {
                    AuthError::Misconfigured("hs256 mode requires a secret".into())
                })?;
                Ok(Self::hs256(secret.as_bytes()))
            }
            "rs256" => {
                let default_key = settings
                    .rs256_public_key_file
                    .as_ref()
                    .map(|path| {
                        let pem = std::fs::read(path).map_err(|e| {
                            AuthError::Misconfigured(format!(
                                "cannot read {}: {e}",
                                path.display()
                            ))
                        })?;
                        DecodingKey::from_rsa_pem(&pem)
                            .map_err(|e| AuthError::Misconfigured(format!("rs256 key: {e}")))
                    })
                    .transpose()?;

                match (&settings.jwks_url, default_key) {
                    (Some(url), default_key) => Self::rs256_key_set(
                        url.clone(),
                        settings.jwks_refresh_interval,
                        settings.jwks_cache_ttl,
                        default_key,
                    ),
                    (None, Some(key)) => Ok(Self {
                        algorithm: Algorithm::RS256,
                        source: KeySource::Static(key),
                    }),
                    (None, None) => Err(AuthError::Misconfigured(
                        "rs256 mode requires a public key file or a jwks url".into(),
                    )),
                }
            }
            other => Err(AuthError::Misconfigured(format!("unknown auth mode '{other}'"))),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.source, KeySource::Disabled)
    }

    /// The claim set granted when verification is disabled.
    pub fn anonymous_claims() -> Claims {
        Claims {
            subject: "anonymous".into(),
            roles: vec![Role::Viewer, Role::Controller],
            scopes: vec![Scope::Read, Scope::Control, Scope::Telemetry],
        }
    }

    /// Verify a bearer token and extract its claims.
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if self.is_disabled() {
            return Ok(Self::anonymous_claims());
        }

        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;
        if header.alg != self.algorithm {
            return Err(AuthError::AlgorithmMismatch {
                expected: self.algorithm,
                got: header.alg,
            });
        }

        let key = match &self.source {
            KeySource::Disabled => unreachable!("handled above"),
            KeySource::Static(key) => key.clone(),
            KeySource::KeySet { cache, default_key } => match &header.kid {
                Some(kid) => cache.get(kid).await?,
                None => default_key
                    .clone()
                    .ok_or_else(|| AuthError::MissingClaim("kid".into()))?,
            },
        };

        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<RawClaims>(token, &key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind::*;
            match e.kind() {
                ExpiredSignature => AuthError::Expired,
                InvalidSignature => AuthError::InvalidSignature,
                MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
                _ => AuthError::Malformed(e.to_string()),
            }
        })?;

        extract_claims(data.claims)
    }
}

/// The raw claim shape before domain validation.
#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    roles: Option<Vec<String>>,
    #[serde(default)]
    scopes: Option<Vec<String>>,
}

/// Enforce the claim domain: non-empty subject, non-empty role and
/// scope sets drawn only from the known values.
fn extract_claims(raw: RawClaims) -> Result<Claims, AuthError> {
    let subject = raw
        .sub
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::MissingClaim("sub".into()))?;

    let raw_roles = raw
        .roles
        .ok_or_else(|| AuthError::MissingClaim("roles".into()))?;
    if raw_roles.is_empty() {
        return Err(AuthError::InvalidClaim {
            claim: "roles",
            value: "empty".into(),
        });
    }
    let roles = raw_roles
        .iter()
        .map(|r| match r.as_str() {
            "viewer" => Ok(Role::Viewer),
            "controller" => Ok(Role::Controller),
            other => Err(AuthError::InvalidClaim {
                claim: "roles",
                value: other.to_string(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let raw_scopes = raw
        .scopes
        .ok_or_else(|| AuthError::MissingClaim("scopes".into()))?;
    if raw_scopes.is_empty() {
        return Err(AuthError::InvalidClaim {
            claim: "scopes",
            value: "empty".into(),
        });
    }
    let scopes = raw_scopes
        .iter()
        .map(|s| match s.as_str() {
            "read" => Ok(Scope::Read),
            "control" => Ok(Scope::Control),
            "telemetry" => Ok(Scope::Telemetry),
            other => Err(AuthError::InvalidClaim {
                claim: "scopes",
                value: other.to_string(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Claims {
        subject,
        roles,
        scopes,
    })
}

//! Host-token and OIDC identity checks
//!
//! Token verification proper is an external concern; the engine only needs
//! two things here: a constant-time host-token comparison gating meeting
//! termination, and an optional verified identity extracted from a Bearer
//! token when an OIDC issuer is configured.

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::OidcConfig;

use super::{ApiError, AppState};

/// Constant-time equality for host tokens.
pub fn host_tokens_match(provided: &str, stored: &str) -> bool {
    ring::constant_time::verify_slices_are_equal(provided.as_bytes(), stored.as_bytes()).is_ok()
}

/// Verified end-user identity.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    n: String,
    e: String,
}

/// Verifies RS256 bearer tokens against a JWKS endpoint. Keys are fetched
/// on first use and cached; an unknown `kid` triggers one refetch.
pub struct OidcVerifier {
    issuer: String,
    jwks_url: String,
    audience: String,
    client: reqwest::Client,
    keys: RwLock<HashMap<String, Arc<DecodingKey>>>,
}

impl OidcVerifier {
    pub fn new(config: &OidcConfig) -> Result<Self> {
        let issuer = config.issuer.clone().context("OIDC issuer missing")?;
        let jwks_url = config.jwks_url.clone().context("OIDC JWKS URL missing")?;
        let audience = config.audience.clone().context("OIDC audience missing")?;
        // Sanity-check the JWKS URL up front so misconfiguration fails at startup.
        url::Url::parse(&jwks_url).context("OIDC JWKS URL is not a valid URL")?;

        Ok(Self {
            issuer,
            jwks_url,
            audience,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()?,
            keys: RwLock::new(HashMap::new()),
        })
    }

    async fn refresh_keys(&self) -> Result<()> {
        let jwks: Jwks = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .context("JWKS fetch failed")?
            .json()
            .await
            .context("JWKS response was not valid JSON")?;

        let mut keys = self.keys.write().await;
        keys.clear();
        for jwk in jwks.keys {
            let kid = jwk.kid.unwrap_or_default();
            if let Ok(key) = DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                keys.insert(kid, Arc::new(key));
            }
        }
        debug!("loaded {} JWKS keys", keys.len());
        Ok(())
    }

    async fn key_for(&self, kid: &str) -> Result<Arc<DecodingKey>> {
        if let Some(key) = self.keys.read().await.get(kid) {
            return Ok(key.clone());
        }
        self.refresh_keys().await?;
        self.keys
            .read()
            .await
            .get(kid)
            .cloned()
            .context("token key id not present in JWKS")
    }

    pub async fn verify(&self, token: &str) -> Result<Identity> {
        let header = decode_header(token).context("malformed token header")?;
        let kid = header.kid.unwrap_or_default();
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let data = decode::<Claims>(token, &key, &validation).context("token rejected")?;
        Ok(Identity {
            user_id: data.claims.sub,
        })
    }
}

/// Extract the caller's identity from an Authorization header, if any.
///
/// No header means anonymous access. A Bearer token with no configured
/// verifier answers 503 (credentials were presented that this deployment
/// cannot check); an invalid token answers 401.
pub async fn optional_identity(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<Identity>, ApiError> {
    let Some(raw) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    let token = raw
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::BadRequest("malformed Authorization header".into()))?;

    let Some(verifier) = &state.oidc else {
        return Err(ApiError::ServiceUnavailable(
            "authentication is not configured on this deployment".into(),
        ));
    };
    match verifier.verify(token).await {
        Ok(identity) => Ok(Some(identity)),
        Err(e) => Err(ApiError::Unauthorized(format!("invalid token: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_token_comparison() {
        assert!(host_tokens_match("aabbcc", "aabbcc"));
        assert!(!host_tokens_match("aabbcc", "aabbcd"));
        assert!(!host_tokens_match("aabbcc", "aabbc"));
        assert!(!host_tokens_match("", "aabbcc"));
    }

    #[test]
    fn verifier_requires_complete_config() {
        let partial = OidcConfig {
            issuer: Some("https://issuer.example".into()),
            jwks_url: None,
            audience: Some("babelroom".into()),
        };
        assert!(OidcVerifier::new(&partial).is_err());

        let bad_url = OidcConfig {
            issuer: Some("https://issuer.example".into()),
            jwks_url: Some("not a url".into()),
            audience: Some("babelroom".into()),
        };
        assert!(OidcVerifier::new(&bad_url).is_err());
    }
}

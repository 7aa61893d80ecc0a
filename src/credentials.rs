use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::client::api::format_sdk_error;
use crate::models::RegistryAuth;

/// How much validity a cached credential must have left to be served.
/// Anything closer to expiry than this triggers a fresh token exchange.
const CACHE_FRESHNESS_MARGIN_MINUTES: i64 = 10;

/// Provider of short-lived registry credentials
///
/// Exchanges the ambient AWS identity for a Basic-auth triple scoped to a
/// registry, keyed either by the registry's endpoint URI or its registry ID
/// (AWS account ID).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Get credentials for the registry behind the given endpoint URI.
    async fn get_credentials(&self, registry_uri: &str) -> Result<RegistryAuth>;

    /// Get credentials for the registry with the given registry ID.
    async fn get_credentials_by_registry_id(&self, registry_id: &str) -> Result<RegistryAuth>;
}

/// Credential provider backed by ECR `GetAuthorizationToken`
///
/// Decodes the base64 `user:password` token from the service response and
/// optionally caches the decoded credentials on disk until shortly before
/// they expire (ECR tokens are valid for 12 hours).
pub struct EcrCredentialProvider {
    client: aws_sdk_ecr::Client,
    cache: Option<TokenCache>,
}

impl EcrCredentialProvider {
    pub fn new(client: aws_sdk_ecr::Client, cache_dir: Option<PathBuf>) -> Self {
        Self {
            client,
            cache: cache_dir.map(TokenCache::new),
        }
    }

    /// Perform the token exchange against the service, optionally scoped to
    /// a registry ID.
    #[allow(deprecated)] // registry_ids is deprecated upstream but is the only ID-scoped path
    async fn exchange(&self, registry_id: Option<&str>) -> Result<RegistryAuth> {
        let mut request = self.client.get_authorization_token();
        if let Some(id) = registry_id {
            request = request.registry_ids(id);
        }

        let response = request.send().await.map_err(|e| {
            anyhow!("failed to get authorization token: {}", format_sdk_error(&e))
        })?;

        let auth_data = response
            .authorization_data()
            .first()
            .context("no authorization data returned from ECR")?;

        let token = auth_data
            .authorization_token()
            .context("no authorization token in response")?;
        let (username, password) = decode_token(token)?;

        let proxy_endpoint = auth_data
            .proxy_endpoint()
            .context("no proxy endpoint in response")?
            .to_string();

        let expires_at = auth_data
            .expires_at()
            .and_then(|t| DateTime::from_timestamp(t.secs(), 0));

        Ok(RegistryAuth {
            username,
            password,
            proxy_endpoint,
            expires_at,
        })
    }

    /// Serve from the cache when possible, otherwise exchange and cache.
    async fn cached_exchange(&self, cache_key: &str, registry_id: Option<&str>) -> Result<RegistryAuth> {
        if let Some(cache) = &self.cache {
            if let Some(auth) = cache.get(cache_key) {
                debug!("Using cached registry credentials for {}", cache_key);
                return Ok(auth);
            }
        }

        debug!("Getting authorization token...");
        let auth = self.exchange(registry_id).await?;
        debug!(
            "Retrieved authorization token via endpoint: {}",
            auth.proxy_endpoint
        );

        if let Some(cache) = &self.cache {
            cache.put(cache_key, &auth);
        }

        Ok(auth)
    }
}

#[async_trait]
impl CredentialProvider for EcrCredentialProvider {
    async fn get_credentials(&self, registry_uri: &str) -> Result<RegistryAuth> {
        // ECR endpoint URIs carry the registry ID as the leading host label
        // ("123456789012.dkr.ecr.us-east-1.amazonaws.com"); scope the token
        // request to it when present, otherwise use the default registry.
        let registry_id = registry_id_from_uri(registry_uri);
        self.cached_exchange(registry_uri, registry_id.as_deref())
            .await
    }

    async fn get_credentials_by_registry_id(&self, registry_id: &str) -> Result<RegistryAuth> {
        self.cached_exchange(registry_id, Some(registry_id)).await
    }
}

/// Decode the base64 `user:password` authorization token
fn decode_token(token: &str) -> Result<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token)
        .context("failed to decode authorization token")?;
    let decoded_str = String::from_utf8(decoded).context("authorization token is not valid UTF-8")?;

    let parts: Vec<&str> = decoded_str.splitn(2, ':').collect();
    if parts.len() != 2 {
        bail!("invalid authorization token format");
    }

    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Extract the registry ID (account ID) from an ECR endpoint URI, if present
fn registry_id_from_uri(registry_uri: &str) -> Option<String> {
    let host = registry_uri
        .strip_prefix("https://")
        .unwrap_or(registry_uri);
    let label = host.split('.').next()?;
    if !label.is_empty() && label.chars().all(|c| c.is_ascii_digit()) {
        Some(label.to_string())
    } else {
        None
    }
}

/// On-disk cache for decoded registry credentials
///
/// Entries are JSON files named by the SHA-256 of the cache key. Reads fall
/// through to a fresh exchange on any problem (missing, unparseable, expired,
/// or missing expiry); writes are best-effort and only logged on failure.
struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let name = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        self.dir.join(format!("{}.json", name))
    }

    fn get(&self, key: &str) -> Option<RegistryAuth> {
        let path = self.path_for(key);
        let contents = std::fs::read_to_string(&path).ok()?;
        let auth: RegistryAuth = match serde_json::from_str(&contents) {
            Ok(auth) => auth,
            Err(e) => {
                debug!("Ignoring unreadable credential cache entry {:?}: {}", path, e);
                return None;
            }
        };

        let expires_at = auth.expires_at?;
        if expires_at < Utc::now() + Duration::minutes(CACHE_FRESHNESS_MARGIN_MINUTES) {
            debug!("Cached credentials for {} have expired", key);
            return None;
        }

        Some(auth)
    }

    fn put(&self, key: &str, auth: &RegistryAuth) {
        if let Err(e) = self.try_put(key, auth) {
            warn!("Failed to cache registry credentials: {}", e);
        }
    }

    fn try_put(&self, key: &str, auth: &RegistryAuth) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create cache directory {:?}", self.dir))?;
        let contents = serde_json::to_string(auth).context("failed to serialize credentials")?;
        let path = self.path_for(key);
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write cache entry {:?}", path))?;
        Ok(())
    }
}

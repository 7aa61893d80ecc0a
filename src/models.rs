use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Registry authorization for docker-style Basic auth
///
/// Returned by the token operations on [`crate::EcrClient`]. The `registry`
/// field is the proxy endpoint with its `https://` scheme stripped, suitable
/// as a credentials map key or `docker login` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    /// Full proxy endpoint URL (e.g., "https://123456789012.dkr.ecr.us-east-1.amazonaws.com")
    pub proxy_endpoint: String,
    /// Registry host without the scheme
    pub registry: String,
    /// Username for authentication (ECR issues "AWS")
    pub username: String,
    /// Password or token for authentication
    pub password: String,
}

impl Auth {
    /// Build an `Auth` from a decoded credential triple, deriving the
    /// registry host from the proxy endpoint.
    pub fn from_registry_auth(auth: RegistryAuth) -> Self {
        let registry = auth
            .proxy_endpoint
            .strip_prefix("https://")
            .unwrap_or(&auth.proxy_endpoint)
            .to_string();

        Self {
            proxy_endpoint: auth.proxy_endpoint,
            registry,
            username: auth.username,
            password: auth.password,
        }
    }
}

/// Decoded ECR credential triple plus its expiry
///
/// This is what the credential provider hands back before the facade derives
/// the registry host. ECR tokens are valid for 12 hours; `expires_at` records
/// the service-reported expiry so cached credentials can be aged out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryAuth {
    /// Username for authentication
    pub username: String,
    /// Password or token for authentication
    pub password: String,
    /// Proxy endpoint URL the credentials are valid for
    pub proxy_endpoint: String,
    /// When the credentials expire, if reported by the service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Configuration for the ECR client
#[derive(Debug, Clone, Deserialize)]
pub struct EcrConfig {
    /// AWS region (e.g., "us-east-1")
    pub region: String,
    /// Optional: AWS access key ID (if not using IAM role)
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Optional: AWS secret access key (if not using IAM role)
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Optional: directory for the on-disk credential cache.
    /// When unset, every token request goes to the service.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

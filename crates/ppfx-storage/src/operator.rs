//! Remote client construction from the `[storage]` config section.

use std::fmt;

use anyhow::{Context, Result};
use opendal::Operator;
use ppfx_core::config::StorageConfig;

use crate::client::OpendalClient;

/// S3 credentials for the remote store.
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Credentials {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    /// Read `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let access_key_id = lookup("AWS_ACCESS_KEY_ID").context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.",
        )?;
        let secret_access_key = lookup("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        Ok(Self::new(access_key_id, secret_access_key))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Operator for the S3-compatible store that remote routes fall through to.
///
/// Plaintext endpoints are refused when `enforce_tls` is set and logged
/// otherwise. Retries live in OpenDAL's `RetryLayer`; the redirector
/// itself never retries a backend call.
pub fn s3_operator(storage: &StorageConfig, creds: &Credentials) -> Result<Operator> {
    if storage.bucket.is_empty() {
        anyhow::bail!("storage.bucket is empty");
    }
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted"
        );
    }

    let builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(&creds.secret_access_key);

    Ok(Operator::new(builder)
        .with_context(|| format!("creating S3 operator for bucket {}", storage.bucket))?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish())
}

/// Remote client for the configured store.
pub fn connect(storage: &StorageConfig, creds: &Credentials) -> Result<OpendalClient> {
    let op = s3_operator(storage, creds)?;
    tracing::debug!(
        endpoint = %storage.endpoint,
        bucket = %storage.bucket,
        "remote client ready"
    );
    Ok(OpendalClient::new(op))
}

/// In-process operator, used by tests and dry runs.
pub fn memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish())
}

/// Remote client that never leaves the process; routing-only commands use it.
pub fn memory_client() -> Result<OpendalClient> {
    Ok(OpendalClient::new(memory_operator()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(endpoint: &str, enforce_tls: bool) -> StorageConfig {
        StorageConfig {
            endpoint: endpoint.into(),
            enforce_tls,
            ..Default::default()
        }
    }

    fn creds() -> Credentials {
        Credentials::new("key", "secret")
    }

    #[test]
    fn plaintext_endpoint_allowed_without_tls_enforcement() {
        assert!(connect(&storage("http://localhost:8333", false), &creds()).is_ok());
    }

    #[test]
    fn plaintext_endpoint_refused_with_tls_enforcement() {
        let err = s3_operator(&storage("http://insecure:8333", true), &creds()).unwrap_err();
        assert!(err.to_string().contains("enforce_tls"));
    }

    #[test]
    fn https_endpoint_with_tls_enforcement() {
        assert!(s3_operator(&storage("https://s3.example.com", true), &creds()).is_ok());
    }

    #[test]
    fn empty_bucket_is_rejected() {
        let mut cfg = storage("https://s3.example.com", true);
        cfg.bucket.clear();
        assert!(s3_operator(&cfg, &creds()).is_err());
    }

    #[test]
    fn credentials_from_lookup() {
        let creds = Credentials::from_lookup(|name| match name {
            "AWS_ACCESS_KEY_ID" => Some("AKIA".into()),
            "AWS_SECRET_ACCESS_KEY" => Some("s3cr3t".into()),
            _ => None,
        })
        .unwrap();
        let shown = format!("{creds:?}");
        assert!(shown.contains("AKIA"));
        assert!(!shown.contains("s3cr3t"));

        let err = Credentials::from_lookup(|name| {
            (name == "AWS_ACCESS_KEY_ID").then(|| "AKIA".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("AWS_SECRET_ACCESS_KEY"));
    }

    #[test]
    fn memory_client_is_usable() {
        let client = memory_client().unwrap();
        assert!(client.operator().info().scheme().to_string().contains("memory"));
    }
}

//! Backend configuration value objects.
//!
//! Every backend is configured by one plain serde struct. The structs carry
//! no behavior beyond defaults and env fallbacks; adapters derive all of
//! their state from them at construction time.

use std::{collections::HashMap, env, fmt, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::{RetryPolicy, StorageError, StorageResult};

/// Env var consulted when [`AzureConfig::account_name`] is empty.
pub const AZURE_STORAGE_ACCOUNT_ENV: &str = "AZURE_STORAGE_ACCOUNT";
/// Env var consulted when [`AzureConfig::account_key`] is empty.
pub const AZURE_STORAGE_KEY_ENV: &str = "AZURE_STORAGE_KEY";
/// Env var naming a credentials file, read when
/// [`GcpConfig::credentials_json`] is empty.
pub const GOOGLE_APPLICATION_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Prefix for env overrides of YAML values, e.g. `OBJECT_STORAGE_S3__REGION`.
const ENV_OVERRIDE_PREFIX: &str = "OBJECT_STORAGE_";

/// Proxy used for all requests of a backend.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// S3 and S3-compatible stores.
#[serde_as]
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub access_key: String,
    pub secret: String,
    pub session_token: String,
    /// Role assumed through STS with the base credentials before any
    /// transfer.
    pub assume_role_arn: String,
    pub assume_role_external_id: String,
    /// Left empty together with `endpoint`, the region is looked up from the
    /// bucket location.
    pub region: String,
    pub endpoint: String,
    pub bucket: String,
    pub force_path_style: bool,
    pub proxy_config: Option<ProxyConfig>,

    /// Total attempts per request. Zero uses the SDK default.
    pub max_retries: u32,
    /// Upper bound of the retry backoff, in milliseconds.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub max_retry_delay: Option<Duration>,
    /// Initial retry backoff, in milliseconds.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub min_retry_delay: Option<Duration>,

    /// User metadata attached to every upload.
    pub metadata: HashMap<String, String>,
    /// URL-encoded tag set attached to every upload.
    pub tagging: String,
    /// Defaults to `inline`.
    pub content_disposition: String,
}

impl S3Config {
    /// Retry policy applied to every S3 request.
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::S3_DEFAULT;
        RetryPolicy {
            max_attempts: if self.max_retries > 0 {
                self.max_retries
            } else {
                defaults.max_attempts
            },
            initial_delay: self.min_retry_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_retry_delay.unwrap_or(defaults.max_delay),
            multiplier: defaults.multiplier,
        }
    }
}

/// Source of Azure AD bearer tokens for the storage resource.
///
/// Only needed for presigned URLs, which are signed with a user delegation
/// key that can only be requested with an AD token.
#[async_trait]
pub trait TokenCredential: Send + Sync + fmt::Debug {
    /// Returns a bearer token valid for `https://storage.azure.com/`.
    async fn token(&self) -> StorageResult<String>;
}

/// A token obtained out of band.
#[derive(Clone)]
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticTokenCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenCredential")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn token(&self) -> StorageResult<String> {
        Ok(self.token.clone())
    }
}

/// Azure Blob storage.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// Falls back to `AZURE_STORAGE_ACCOUNT`.
    pub account_name: String,
    /// Falls back to `AZURE_STORAGE_KEY`.
    pub account_key: String,
    pub container_name: String,
    /// Required for presigned URL generation.
    #[serde(skip)]
    pub token_credential: Option<Arc<dyn TokenCredential>>,
}

/// Google Cloud Storage.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    /// Service account key JSON. Empty means ambient credentials, unless
    /// `GOOGLE_APPLICATION_CREDENTIALS` names a file to read it from.
    pub credentials_json: String,
    pub bucket: String,
    pub proxy_config: Option<ProxyConfig>,
}

/// Alibaba Cloud OSS.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliOssConfig {
    pub access_key: String,
    pub secret: String,
    /// Region endpoint, e.g. `oss-cn-hangzhou.aliyuncs.com`.
    pub endpoint: String,
    pub bucket: String,
}

/// Local filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Root of all storage paths. Relative roots resolve against the
    /// current directory.
    pub storage_dir: String,
}

/// Stand-in for secrets in `Debug` output. Empty values stay visible so a
/// missing credential is still obvious in logs.
fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "<redacted>" }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .finish()
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("access_key", &self.access_key)
            .field("secret", &redact(&self.secret))
            .field("session_token", &redact(&self.session_token))
            .field("assume_role_arn", &self.assume_role_arn)
            .field("assume_role_external_id", &redact(&self.assume_role_external_id))
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("force_path_style", &self.force_path_style)
            .field("proxy_config", &self.proxy_config)
            .field("max_retries", &self.max_retries)
            .field("max_retry_delay", &self.max_retry_delay)
            .field("min_retry_delay", &self.min_retry_delay)
            .field("metadata", &self.metadata)
            .field("tagging", &self.tagging)
            .field("content_disposition", &self.content_disposition)
            .finish()
    }
}

impl fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfig")
            .field("account_name", &self.account_name)
            .field("account_key", &redact(&self.account_key))
            .field("container_name", &self.container_name)
            .field("token_credential", &self.token_credential)
            .finish()
    }
}

impl fmt::Debug for GcpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpConfig")
            .field("credentials_json", &redact(&self.credentials_json))
            .field("bucket", &self.bucket)
            .field("proxy_config", &self.proxy_config)
            .finish()
    }
}

impl fmt::Debug for AliOssConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliOssConfig")
            .field("access_key", &self.access_key)
            .field("secret", &redact(&self.secret))
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Configuration of exactly one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageConfig {
    S3(S3Config),
    Azure(AzureConfig),
    Gcp(GcpConfig),
    #[serde(rename = "alioss")]
    AliOss(AliOssConfig),
    Local(LocalConfig),
}

impl StorageConfig {
    /// Name of the configured backend.
    pub fn backend_name(&self) -> &'static str {
        match self {
            StorageConfig::S3(_) => "s3",
            StorageConfig::Azure(_) => "azure",
            StorageConfig::Gcp(_) => "gcp",
            StorageConfig::AliOss(_) => "alioss",
            StorageConfig::Local(_) => "local",
        }
    }

    /// Parses a YAML document, applies `OBJECT_STORAGE_` env overrides and
    /// the per-field env fallbacks.
    pub fn from_yaml_str(yaml: &str) -> StorageResult<Self> {
        let config: StorageConfig = Figment::new()
            .merge(Yaml::string(yaml))
            .merge(Env::prefixed(ENV_OVERRIDE_PREFIX).split("__"))
            .extract()?;
        config.with_env_fallbacks()
    }

    /// Reads and parses a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> StorageResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Fills empty fields that have a documented env var fallback.
    pub fn with_env_fallbacks(mut self) -> StorageResult<Self> {
        match &mut self {
            StorageConfig::Azure(azure) => {
                fill_from_env(&mut azure.account_name, AZURE_STORAGE_ACCOUNT_ENV);
                fill_from_env(&mut azure.account_key, AZURE_STORAGE_KEY_ENV);
            }
            StorageConfig::Gcp(gcp) => {
                if gcp.credentials_json.is_empty() &&
                    let Ok(path) = env::var(GOOGLE_APPLICATION_CREDENTIALS_ENV) &&
                    !path.is_empty()
                {
                    gcp.credentials_json = std::fs::read_to_string(&path).map_err(|e| {
                        StorageError::config(format!(
                            "failed to read {} ({}): {}",
                            GOOGLE_APPLICATION_CREDENTIALS_ENV, path, e
                        ))
                    })?;
                }
            }
            _ => {}
        }
        Ok(self)
    }
}

fn fill_from_env(field: &mut String, var: &str) {
    if field.is_empty() &&
        let Ok(value) = env::var(var)
    {
        *field = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_yaml() {
        let yaml = r#"
s3:
  access_key: AKIA
  secret: shh
  region: eu-west-1
  bucket: recordings
  force_path_style: true
  max_retries: 5
  min_retry_delay: 200
  max_retry_delay: 3000
  metadata:
    team: media
  tagging: "env=prod"
  proxy_config:
    url: http://proxy.local:3128
    username: u
    password: p
"#;
        let config = StorageConfig::from_yaml_str(yaml).unwrap();
        let StorageConfig::S3(s3) = config else {
            panic!("expected s3 config");
        };
        assert_eq!(s3.bucket, "recordings");
        assert!(s3.force_path_style);
        assert_eq!(s3.metadata.get("team").map(String::as_str), Some("media"));
        assert_eq!(s3.proxy_config.as_ref().unwrap().username, "u");

        let policy = s3.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(200));
        assert_eq!(policy.max_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_s3_retry_defaults() {
        let policy = S3Config::default().retry_policy();
        assert_eq!(policy, RetryPolicy::S3_DEFAULT);
    }

    #[test]
    fn test_parse_local_and_alioss() {
        let local = StorageConfig::from_yaml_str("local:\n  storage_dir: /tmp/objects\n").unwrap();
        assert_eq!(local.backend_name(), "local");

        let oss = StorageConfig::from_yaml_str(
            "alioss:\n  access_key: a\n  secret: b\n  endpoint: oss-cn-hangzhou.aliyuncs.com\n  bucket: c\n",
        )
        .unwrap();
        let StorageConfig::AliOss(oss) = oss else {
            panic!("expected alioss config");
        };
        assert_eq!(oss.endpoint, "oss-cn-hangzhou.aliyuncs.com");
    }

    #[test]
    fn test_unknown_backend_is_configuration_error() {
        let err = StorageConfig::from_yaml_str("ftp:\n  host: x\n").unwrap_err();
        assert!(matches!(err, StorageError::Configuration { .. }));
    }

    #[test]
    fn test_fill_from_env_keeps_explicit_value() {
        let mut value = "explicit".to_string();
        fill_from_env(&mut value, "PATH");
        assert_eq!(value, "explicit");

        let mut empty = String::new();
        fill_from_env(&mut empty, "OBJECT_STORAGE_TEST_SURELY_UNSET_VAR");
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_static_token_credential_redacts_debug() {
        let cred = StaticTokenCredential::new("secret-token");
        assert_eq!(cred.token().await.unwrap(), "secret-token");
        assert!(!format!("{:?}", cred).contains("secret-token"));
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let s3 = S3Config {
            access_key: "AKIAVISIBLE".to_string(),
            secret: "s3-secret-value".to_string(),
            session_token: "session-token-value".to_string(),
            proxy_config: Some(ProxyConfig {
                url: "http://proxy.local:3128".to_string(),
                username: "u".to_string(),
                password: "proxy-password-value".to_string(),
            }),
            ..Default::default()
        };
        let azure = AzureConfig {
            account_name: "media".to_string(),
            account_key: "azure-key-value".to_string(),
            container_name: "rooms".to_string(),
            token_credential: Some(Arc::new(StaticTokenCredential::new("token-value"))),
        };
        let gcp = GcpConfig {
            credentials_json: "{\"private_key\": \"gcp-key-value\"}".to_string(),
            ..Default::default()
        };
        let oss = AliOssConfig {
            secret: "oss-secret-value".to_string(),
            ..Default::default()
        };

        let printed = format!(
            "{:?} {:?} {:?} {:?}",
            StorageConfig::S3(s3),
            azure,
            gcp,
            oss
        );
        for secret in [
            "s3-secret-value",
            "session-token-value",
            "proxy-password-value",
            "azure-key-value",
            "token-value",
            "gcp-key-value",
            "oss-secret-value",
        ] {
            assert!(!printed.contains(secret), "{} leaked", secret);
        }
        assert!(printed.contains("AKIAVISIBLE"));
        assert!(printed.contains("<redacted>"));
    }
}

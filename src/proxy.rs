//! Proxy settings in the shape each transport expects.

use url::Url;

use crate::{ProxyConfig, StorageError, StorageResult};

impl ProxyConfig {
    /// Parses the proxy URL, rejecting anything but http(s).
    pub fn parsed_url(&self) -> StorageResult<Url> {
        let url = Url::parse(&self.url).map_err(|e| {
            StorageError::config(format!("invalid proxy url '{}': {}", self.url, e))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(StorageError::config(format!(
                "unsupported proxy scheme '{}'",
                scheme
            ))),
        }
    }

    /// Username and password, when both are set.
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        if !self.username.is_empty() && !self.password.is_empty() {
            Some((self.username.as_str(), self.password.as_str()))
        } else {
            None
        }
    }

    /// Proxy URL carrying the credentials as userinfo.
    ///
    /// HTTP clients that only accept a proxy URL turn the userinfo into a
    /// `Proxy-Authorization: Basic` header on CONNECT.
    pub fn url_with_credentials(&self) -> StorageResult<String> {
        let mut url = self.parsed_url()?;
        if let Some((username, password)) = self.basic_auth() {
            url.set_username(username)
                .and_then(|_| url.set_password(Some(password)))
                .map_err(|_| {
                    StorageError::config(format!("proxy url '{}' cannot carry credentials", self.url))
                })?;
        }
        Ok(url.to_string())
    }

    #[cfg(feature = "aws")]
    pub(crate) fn to_smithy(&self) -> StorageResult<aws_smithy_http_client::proxy::ProxyConfig> {
        let url = self.parsed_url()?;
        let proxy = aws_smithy_http_client::proxy::ProxyConfig::all(url.as_str())
            .map_err(|e| StorageError::config(format!("invalid proxy url '{}': {}", self.url, e)))?;
        Ok(match self.basic_auth() {
            Some((username, password)) => proxy.with_basic_auth(username, password),
            None => proxy,
        })
    }

    #[cfg(feature = "gcp")]
    pub(crate) fn to_reqwest(&self) -> StorageResult<reqwest::Proxy> {
        let url = self.parsed_url()?;
        let proxy = reqwest::Proxy::all(url.as_str())
            .map_err(|e| StorageError::config(format!("invalid proxy url '{}': {}", self.url, e)))?;
        Ok(match self.basic_auth() {
            Some((username, password)) => proxy.basic_auth(username, password),
            None => proxy,
        })
    }
}

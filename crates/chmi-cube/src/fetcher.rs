use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::WINDOWS_1250;
use reqwest::Client;

use crate::types::DataKind;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Connectivity lost: probe of {0} failed")]
    ConnectivityLost(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl FetchError {
    /// Failure class used in log lines; callers treat every class alike.
    pub fn category(&self) -> &'static str {
        match self {
            FetchError::ConnectivityLost(_) => "connectivity",
            FetchError::Http(e) if e.is_status() => "http status",
            FetchError::Http(e) if e.is_timeout() => "timeout",
            FetchError::Http(e) if e.is_connect() => "connection",
            FetchError::Http(_) => "request",
        }
    }
}

/// Where the upstream pages live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub base_url: String,
    pub probe_url: String,
    pub timeout: Duration,
}

impl SourceConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            probe_url: format!("{}{}", base_url, DataKind::Temperature.index_path()),
            base_url,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn index_url(&self, kind: DataKind) -> String {
        format!("{}{}", self.base_url, kind.index_path())
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::with_base_url(crate::BASE_URL)
    }
}

/// A fetched page tagged with the batch position it was requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub index: usize,
    pub html: String,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    /// Succeeds when `url` answers with a success status.
    async fn probe(&self, url: &str) -> Result<(), FetchError>;

    async fn fetch_page(&self, url: &str, index: usize) -> Result<FetchedPage, FetchError>;
}

pub fn decode_windows_1250(bytes: &[u8]) -> String {
    let (text, had_errors) = WINDOWS_1250.decode_without_bom_handling(bytes);
    if had_errors {
        log::debug!("Replaced malformed windows-1250 sequences");
    }
    text.into_owned()
}

#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    config: SourceConfig,
}

impl PageFetcher {
    pub fn new(config: SourceConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

#[async_trait]
impl PageSource for PageFetcher {
    async fn probe(&self, url: &str) -> Result<(), FetchError> {
        self.client
            .get(url)
            .send()
            .await
            .inspect_err(|e| log::error!("Probe of {url} failed: {e}"))?
            .error_for_status()
            .inspect_err(|e| log::error!("Probe of {url} failed: {e}"))?;
        Ok(())
    }

    async fn fetch_page(&self, url: &str, index: usize) -> Result<FetchedPage, FetchError> {
        if self.probe(&self.config.probe_url).await.is_err() {
            log::error!(
                "Connection to {} lost while fetching part {} (timeout {}s)",
                self.config.probe_url,
                index,
                self.config.timeout.as_secs()
            );
            return Err(FetchError::ConnectivityLost(self.config.probe_url.clone()));
        }

        log::debug!("Fetching part {}: {}", index, url);
        let bytes = async { self.client.get(url).send().await?.error_for_status()?.bytes().await }
            .await
            .map_err(FetchError::from)
            .inspect_err(|e| log::error!("{} error fetching {url}: {e}", e.category()))?;

        Ok(FetchedPage {
            index,
            html: decode_windows_1250(&bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_windows_1250() {
        let (bytes, _, _) = WINDOWS_1250.encode("Kraj Vysočina, Plzeňský, Ústecký");
        assert_ne!(bytes.as_ref(), "Kraj Vysočina, Plzeňský, Ústecký".as_bytes());
        assert_eq!(
            decode_windows_1250(&bytes),
            "Kraj Vysočina, Plzeňský, Ústecký"
        );
    }

    #[test]
    fn test_source_config_urls() {
        let config = SourceConfig::with_base_url("http://localhost:8080/meteo/");
        assert_eq!(config.base_url, "http://localhost:8080/meteo");
        assert_eq!(
            config.index_url(DataKind::Precipitation),
            "http://localhost:8080/meteo/uzemni_srazky_cs.html"
        );
        assert_eq!(
            config.probe_url,
            "http://localhost:8080/meteo/uzemni_teploty_cs.html"
        );
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_connectivity_category() {
        let err = FetchError::ConnectivityLost("http://example.invalid".into());
        assert_eq!(err.category(), "connectivity");
    }
}

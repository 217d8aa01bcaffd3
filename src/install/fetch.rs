//! Archive Downloads
//!
//! Release archives are fetched with a bounded timeout and no retry; any
//! failure is terminal for the calling stage.

use std::fs::File;
use std::time::Duration;

use log::{debug, info};
use reqwest::blocking::Client;

use crate::error::{ProvisionError, Result};
use crate::{APP_NAME, VERSION};

/// Source of release archives.
pub trait ArchiveFetcher {
    /// Writes the archive found at `url` into `dest`.
    fn fetch(&self, url: &str, dest: &mut File) -> Result<()>;
}

/// Fetches archives over HTTP(S).
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("{}/{}", APP_NAME, VERSION))
            .timeout(timeout)
            .build()
            .map_err(|e| ProvisionError::NetworkFetchFailed {
                url: String::new(),
                detail: format!("failed to build http client: {}", e),
            })?;

        Ok(Self { client })
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut File) -> Result<()> {
        info!("Downloading {}", url);

        let failed = |detail: String| ProvisionError::NetworkFetchFailed {
            url: url.to_string(),
            detail,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                if e.is_timeout() {
                    failed("request timed out".to_string())
                } else {
                    failed(e.to_string())
                }
            })?;

        let bytes = response
            .copy_to(dest)
            .map_err(|e| failed(format!("reading response body: {}", e)))?;

        debug!("Downloaded {} bytes from {}", bytes, url);
        Ok(())
    }
}

use crate::config::{FetchConfig, FetchPolicy};
use crate::error::EtlError;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded { bytes: usize, sha256: String },
    Skipped,
}

impl FetchOutcome {
    pub fn was_downloaded(&self) -> bool {
        matches!(self, FetchOutcome::Downloaded { .. })
    }
}

/// Downloads raw dataset payloads. One client is shared across every dataset of a run.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, EtlError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|err| EtlError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self { client })
    }

    /// Downloads `url` into `dest` verbatim. Nothing is written unless the whole body
    /// arrived with a success status.
    pub fn fetch(
        &self,
        url: &Url,
        dest: &Path,
        policy: FetchPolicy,
    ) -> Result<FetchOutcome, EtlError> {
        if policy == FetchPolicy::SkipExisting && dest.exists() {
            info!(file = %dest.display(), "raw file already present; skipping download");
            return Ok(FetchOutcome::Skipped);
        }

        let transfer_error = |status: Option<u16>, message: String| EtlError::Transfer {
            url: url.to_string(),
            status,
            message,
        };

        let resp = self
            .client
            .get(url.as_str())
            .send()
            .map_err(|err| transfer_error(err.status().map(|s| s.as_u16()), err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(transfer_error(
                Some(status.as_u16()),
                format!("request failed with status {status}"),
            ));
        }

        let body = resp
            .bytes()
            .map_err(|err| transfer_error(Some(status.as_u16()), err.to_string()))?;

        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| {
                transfer_error(
                    None,
                    format!("failed to create directory {}: {err}", parent.display()),
                )
            })?;
        }
        std::fs::write(dest, &body).map_err(|err| {
            transfer_error(None, format!("failed to write {}: {err}", dest.display()))
        })?;

        let sha256 = hex::encode(Sha256::digest(&body));
        info!(
            %url,
            file = %dest.display(),
            bytes = body.len(),
            sha256 = %sha256,
            "downloaded raw file"
        );

        Ok(FetchOutcome::Downloaded {
            bytes: body.len(),
            sha256,
        })
    }
}

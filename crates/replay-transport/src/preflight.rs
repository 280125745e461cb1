use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::{CollectorConfig, PROBE_TIMEOUT};

/// One unmet prerequisite for streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightProblem {
    MissingArchive(PathBuf),
    MissingApiKey,
    UnreachableEndpoint { endpoint: String, reason: String },
}

impl fmt::Display for PreflightProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingArchive(path) => write!(f, "{} not found", path.display()),
            Self::MissingApiKey => f.write_str("API key is empty"),
            Self::UnreachableEndpoint { endpoint, reason } => {
                write!(f, "cannot reach OTLP endpoint at {endpoint}: {reason}")
            }
        }
    }
}

/// Every problem found by [`preflight`], in check order.
#[derive(Debug, Error)]
#[error("preflight failed with {} problem(s)", .problems.len())]
pub struct PreflightError {
    pub problems: Vec<PreflightProblem>,
}

/// Check the archive, the credential, and collector reachability.
///
/// All checks run; failures are accumulated. Any HTTP response from the
/// collector, whatever its status, counts as reachable.
pub async fn preflight(archive: &Path, config: &CollectorConfig) -> Result<(), PreflightError> {
    let mut problems = Vec::new();

    if !archive.is_file() {
        problems.push(PreflightProblem::MissingArchive(archive.to_path_buf()));
    }
    if config.api_key.is_empty() {
        problems.push(PreflightProblem::MissingApiKey);
    }
    if let Err(reason) = check_reachable(&config.endpoint).await {
        problems.push(PreflightProblem::UnreachableEndpoint {
            endpoint: config.endpoint.clone(),
            reason,
        });
    }

    if problems.is_empty() {
        info!(endpoint = %config.endpoint, "preflight passed");
        Ok(())
    } else {
        Err(PreflightError { problems })
    }
}

async fn check_reachable(endpoint: &str) -> Result<(), String> {
    let client = Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|err| err.to_string())?;
    let url = format!("{endpoint}/");
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|err| err.to_string())?;
    debug!(url = %url, status = response.status().as_u16(), "collector answered reachability check");
    Ok(())
}

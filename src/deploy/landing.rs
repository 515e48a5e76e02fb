//! Landing AI agentic document analysis over HTTP.

use std::{path::Path, time::Duration};

use reqwest::{StatusCode, multipart};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    job::storage::extract::{self, Understanding},
    retry::Transient,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

pub struct Client {
    http: reqwest::Client,
    endpoint: url::Url,
    api_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read staged file {path:?}: {error}")]
    ReadStaged {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    #[error("Failed to build http client: {0}")]
    Build(reqwest::Error),
    #[error("Request failed: {0}")]
    Transport(reqwest::Error),
    #[error("Service returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Failed to parse service response: {0}")]
    ParseJson(serde_json::Error),
    #[error("Service returned no result: {0}")]
    EmptyResult(String),
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Transport(error) => error.is_timeout() || error.is_connect() || error.is_request(),
            Error::Status { status, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
            }
            _ => false,
        }
    }
}

#[derive(Deserialize)]
struct Response {
    data: Option<Understanding>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

/// Multipart field the service expects for this file.
fn field_name(file_name: &str) -> &'static str {
    if file_name.to_ascii_lowercase().ends_with(".pdf") {
        "pdf"
    } else {
        "image"
    }
}

fn parse_response(body: &str) -> Result<Understanding, Error> {
    let response: Response = serde_json::from_str(body).map_err(Error::ParseJson)?;
    if !response.errors.is_empty() {
        warn!(errors = ?response.errors, "service reported partial errors");
    }
    response.data.ok_or_else(|| {
        Error::EmptyResult(
            serde_json::to_string(&response.errors).unwrap_or_else(|_| "no data".into()),
        )
    })
}

impl Client {
    pub fn new(endpoint: url::Url, api_key: String, timeout: Option<Duration>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(Error::Build)?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }
}

impl extract::Client for Client {
    type Error = Error;

    fn name(&self) -> &str {
        "landing-ai"
    }

    fn is_unsupported(error: &Self::Error) -> bool {
        matches!(
            error,
            Error::Status { status, .. }
                if *status == StatusCode::PAYLOAD_TOO_LARGE
                    || *status == StatusCode::UNSUPPORTED_MEDIA_TYPE
                    || *status == StatusCode::UNPROCESSABLE_ENTITY
        )
    }

    async fn understand(&self, staged: &Path, file_name: &str) -> Result<Understanding, Self::Error> {
        let bytes = tokio::fs::read(staged).await.map_err(|error| Error::ReadStaged {
            path: staged.to_path_buf(),
            error,
        })?;
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime.essence_str())
            .map_err(Error::Transport)?;
        let form = multipart::Form::new().part(field_name(file_name), part);

        debug!(file_name, endpoint = %self.endpoint, "calling document analysis");
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(Error::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(Error::Transport)?;
        if !status.is_success() {
            return Err(Error::Status { status, body });
        }
        parse_response(&body)
    }
}

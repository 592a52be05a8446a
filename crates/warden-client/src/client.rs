use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use warden_core::tuple::{PermissionCheck, RelationTuple};

use crate::config::ClientOptions;
use crate::conversions::{self, CheckResponse};
use crate::error::ClientError;
use crate::traits::{PermissionChecker, RelationManager};

const CHECK_PATH: &str = "/relation-tuples/check";
const ADMIN_TUPLES_PATH: &str = "/admin/relation-tuples";

/// Client for a Keto-style relationship backend.
///
/// Checks go to the read API, tuple mutations to the write API.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    read_url: String,
    write_url: String,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("read_url", &self.read_url)
            .field("write_url", &self.write_url)
            .finish()
    }
}

impl BackendClient {
    pub fn new(
        read_url: &str,
        write_url: &str,
        options: &ClientOptions,
    ) -> Result<Self, ClientError> {
        let read_url = normalize_base_url(read_url)?;
        let write_url = normalize_base_url(write_url)?;

        let mut headers = HeaderMap::new();
        if let Some(ref key) = options.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| ClientError::InvalidEndpoint("invalid api key format".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        Ok(Self {
            http,
            read_url,
            write_url,
        })
    }

    pub fn read_url(&self) -> &str {
        &self.read_url
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), ClientError> {
        if response.status().is_success() {
            return Ok(());
        }
        Err(error_from_response(response).await)
    }
}

impl PermissionChecker for BackendClient {
    async fn check_permission(&self, check: &PermissionCheck) -> Result<bool, ClientError> {
        let response = self
            .http
            .post(format!("{}{CHECK_PATH}", self.read_url))
            .json(&conversions::check_to_wire(check))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body: CheckResponse = response.json().await?;
                Ok(body.allowed)
            }
            // The read API answers a denial with 403; that is a result, not a failure.
            StatusCode::FORBIDDEN => Ok(false),
            _ => Err(error_from_response(response).await),
        }
    }
}

impl RelationManager for BackendClient {
    async fn add_relation(&self, tuple: &RelationTuple) -> Result<(), ClientError> {
        let response = self
            .http
            .put(format!("{}{ADMIN_TUPLES_PATH}", self.write_url))
            .json(&conversions::tuple_to_wire(tuple))
            .send()
            .await?;

        Self::expect_success(response).await
    }

    async fn delete_relation(&self, tuple: &RelationTuple) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(format!("{}{ADMIN_TUPLES_PATH}", self.write_url))
            .query(&conversions::tuple_to_query(tuple))
            .send()
            .await?;

        Self::expect_success(response).await
    }
}

async fn error_from_response(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = status.as_u16(), body = %body, "relationship backend returned an error");
    ClientError::from_status(status, &body)
}

fn normalize_base_url(raw: &str) -> Result<String, ClientError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| ClientError::InvalidEndpoint(format!("{raw}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::InvalidEndpoint(format!(
            "{raw}: unsupported scheme '{}'",
            url.scheme()
        )));
    }

    Ok(raw.trim_end_matches('/').to_string())
}

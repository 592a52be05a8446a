use std::future::Future;
use std::time::Duration;

use reqwest::{StatusCode, Url};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("invalid identity admin url '{0}'")]
    InvalidUrl(String),

    #[error("identity directory request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("identity directory returned status {0}")]
    UnexpectedStatus(u16),
}

/// Answers whether a subject id names a real user.
pub trait UserDirectory: Send + Sync {
    fn exists(&self, subject_id: &str) -> impl Future<Output = Result<bool, DirectoryError>> + Send;
}

/// Looks users up through the identity provider's admin API.
#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    http: reqwest::Client,
    admin_url: Url,
}

impl HttpUserDirectory {
    pub fn new(admin_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let admin_url =
            Url::parse(admin_url).map_err(|_| DirectoryError::InvalidUrl(admin_url.to_string()))?;
        if admin_url.cannot_be_a_base() {
            return Err(DirectoryError::InvalidUrl(admin_url.to_string()));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, admin_url })
    }

    fn identity_url(&self, subject_id: &str) -> Result<Url, DirectoryError> {
        let mut url = self.admin_url.clone();
        url.path_segments_mut()
            .map_err(|_| DirectoryError::InvalidUrl(self.admin_url.to_string()))?
            .pop_if_empty()
            .extend(["admin", "identities", subject_id]);
        Ok(url)
    }
}

/// Ids that would not address a single identity once placed in a url path.
fn is_addressable(subject_id: &str) -> bool {
    !subject_id.is_empty() && !matches!(subject_id, "." | "..") && !subject_id.contains('/')
}

impl UserDirectory for HttpUserDirectory {
    async fn exists(&self, subject_id: &str) -> Result<bool, DirectoryError> {
        if !is_addressable(subject_id) {
            tracing::debug!(subject_id, "identity lookup skipped for unaddressable id");
            return Ok(false);
        }

        let response = self.http.get(self.identity_url(subject_id)?).send().await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(DirectoryError::UnexpectedStatus(other.as_u16())),
        }
    }
}

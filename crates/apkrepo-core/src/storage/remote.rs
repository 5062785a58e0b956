//! Repository proxied to a remote HTTP file store.
//!
//! Objects are read with `GET <base>/<key>` and written with
//! `PUT <base>/<key>`, optionally with basic auth.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tracing::instrument;

use super::{StorageDriver, StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct RemoteStorage {
    client: reqwest::Client,
    base_url: String,
    auth: Option<(String, String)>,
}

impl RemoteStorage {
    /// Talk to the file store at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, auth: Option<(String, String)>) -> StorageResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }
}

#[async_trait]
impl StorageDriver for RemoteStorage {
    fn name(&self) -> &'static str {
        "remote"
    }

    #[instrument(skip(self), fields(driver = "remote"))]
    async fn fetch(&self, key: &str) -> StorageResult<Bytes> {
        let response = self.authorize(self.client.get(self.url(key))).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(key.to_string())),
            status if status.is_success() => Ok(response.bytes().await?),
            status => Err(StorageError::Remote {
                key: key.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    #[instrument(skip(self, data), fields(driver = "remote", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let response = self
            .authorize(self.client.put(self.url(key)))
            .body(data)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Remote {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

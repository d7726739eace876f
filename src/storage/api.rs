use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::model::drug::DrugRecord;
use crate::model::user::UserAccount;

use super::{DrugStore, StorageError, UserStore};

/// Client for the authoritative REST API. User writes are conditional on
/// the record version (HTTP 409 signals a lost race), which is how the
/// ledger's compare-and-set contract crosses the wire.
#[derive(Clone)]
pub struct ApiStore {
    client: Client,
    base_url: String,
    token: String,
    max_retries: u32,
}

impl ApiStore {
    pub fn new(base_url: &str, token: &str, max_retries: u32) -> Result<Self, StorageError> {
        info!("Initializing ApiStore...");
        Url::parse(base_url).map_err(|e| StorageError::Other(format!("invalid API base url: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(&self.token)
    }

    fn put<T: serde::Serialize>(&self, path: &str, body: &T) -> RequestBuilder {
        self.client.put(self.url(path)).bearer_auth(&self.token).json(body)
    }

    fn post<T: serde::Serialize>(&self, path: &str, body: &T) -> RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(&self.token).json(body)
    }

    /// Sends the request, retrying connect/timeout failures and 5xx
    /// responses with jittered linear backoff up to `max_retries`.
    async fn execute(&self, request: RequestBuilder) -> Result<Response, StorageError> {
        let mut attempt: u32 = 0;
        loop {
            let cloned = request
                .try_clone()
                .ok_or_else(|| StorageError::Other("request body is not replayable".to_string()))?;

            match cloned.send().await {
                Ok(response) if response.status().is_server_error() && attempt < self.max_retries => {
                    warn!("API returned {}, retrying (attempt {})", response.status(), attempt + 1);
                }
                Ok(response) => return Ok(response),
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.max_retries => {
                    warn!("API request failed: {}, retrying (attempt {})", e, attempt + 1);
                }
                Err(e) => return Err(e.into()),
            }

            attempt += 1;
            let jitter = rand::thread_rng().gen_range(0..50);
            tokio::time::sleep(Duration::from_millis(50 * attempt as u64 + jitter)).await;
        }
    }

    async fn optional_json<T: DeserializeOwned>(&self, response: Response) -> Result<Option<T>, StorageError> {
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<T>().await?)),
            status => Err(StorageError::Upstream(format!("unexpected status {}", status))),
        }
    }
}

#[async_trait]
impl UserStore for ApiStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<UserAccount>, StorageError> {
        let response = self.execute(self.get(&format!("users/{}", id))).await?;
        self.optional_json(response).await
    }

    async fn find_by_telegram(&self, telegram_user_id: u64) -> Result<Option<UserAccount>, StorageError> {
        let response = self
            .execute(self.get(&format!("users/telegram/{}", telegram_user_id)))
            .await?;
        self.optional_json(response).await
    }

    async fn upsert_by_telegram(&self, account: UserAccount) -> Result<UserAccount, StorageError> {
        let response = self
            .execute(self.post(&format!("users/telegram/{}", account.telegram_user_id), &account))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Upstream(format!("upsert failed with status {}", status)));
        }
        Ok(response.json::<UserAccount>().await?)
    }

    async fn update_user(&self, account: &UserAccount) -> Result<bool, StorageError> {
        let response = self.execute(self.put(&format!("users/{}", account.id), account)).await?;
        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StorageError::Upstream(format!("update failed with status {}", status))),
        }
    }
}

#[async_trait]
impl DrugStore for ApiStore {
    async fn get_drug(&self, name_key: &str) -> Result<Option<DrugRecord>, StorageError> {
        let response = self.execute(self.get(&format!("drugs/{}", name_key))).await?;
        self.optional_json(response).await
    }

    async fn upsert_drug(&self, record: &DrugRecord) -> Result<(), StorageError> {
        let response = self
            .execute(self.put(&format!("drugs/{}", record.name_key), record))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Upstream(format!("drug upsert failed with status {}", status)));
        }
        Ok(())
    }
}

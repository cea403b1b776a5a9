//! QingLong panel "open API" env store.

use crate::store::{disabled, CredentialStore, EnvRecord};
use async_trait::async_trait;
use clawkeeper_core::config::StoreConfig;
use clawkeeper_core::{Error, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: String,
}

pub struct QingLongStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl QingLongStore {
    /// Exchange the client id/secret for a bearer token once. Missing
    /// credentials or a failed exchange leave the store disabled.
    pub async fn connect(config: &StoreConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        let mut store = Self {
            client,
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            token: None,
        };

        if !config.is_configured() {
            info!("QingLong store not configured, credential persistence disabled");
            return store;
        }
        let id = config.client_id.as_deref().unwrap_or_default().trim();
        let secret = config.client_secret.as_deref().unwrap_or_default().trim();

        match store.fetch_token(id, secret).await {
            Ok(token) => {
                info!(url = %store.base_url, "QingLong API token acquired");
                store.token = Some(token);
            }
            Err(e) => warn!(error = %e, "QingLong token request failed, store disabled"),
        }
        store
    }

    async fn fetch_token(&self, client_id: &str, client_secret: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/open/auth/token", self.base_url))
            .query(&[("client_id", client_id), ("client_secret", client_secret)])
            .send()
            .await
            .map_err(|e| Error::Storage(format!("token request failed: {}", e)))?;
        let data: TokenData = decode(response)
            .await?
            .ok_or_else(|| Error::Storage("token response without data".to_string()))?;
        Ok(data.token)
    }

    fn envs_url(&self) -> String {
        format!("{}/open/envs", self.base_url)
    }

    fn bearer(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(disabled)
    }
}

/// Every endpoint answers `{code, data}`; anything but `code == 200` is a failure.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>> {
    let body: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| Error::Storage(format!("unexpected QingLong response: {}", e)))?;
    if body.code != 200 {
        return Err(Error::Storage(format!(
            "QingLong returned code {}: {}",
            body.code,
            body.message.unwrap_or_default()
        )));
    }
    Ok(body.data)
}

#[async_trait]
impl CredentialStore for QingLongStore {
    fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    async fn get(&self, name: &str) -> Result<Option<EnvRecord>> {
        let token = self.bearer()?;
        let response = self
            .client
            .get(self.envs_url())
            .bearer_auth(token)
            .query(&[("searchValue", name)])
            .send()
            .await
            .map_err(|e| Error::Storage(format!("env lookup failed: {}", e)))?;
        let records: Vec<EnvRecord> = decode(response).await?.unwrap_or_default();
        // searchValue is a substring match on name and value
        Ok(records.into_iter().find(|r| r.name == name))
    }

    async fn put(&self, name: &str, value: &str, remarks: Option<&str>) -> Result<()> {
        let token = self.bearer()?;
        let request = match self.get(name).await? {
            Some(existing) => {
                let remarks = remarks.map(str::to_string).unwrap_or(existing.remarks);
                self.client.put(self.envs_url()).json(&json!({
                    "id": existing.id,
                    "name": name,
                    "value": value,
                    "remarks": remarks,
                }))
            }
            None => self.client.post(self.envs_url()).json(&json!([{
                "name": name,
                "value": value,
                "remarks": remarks.unwrap_or_default(),
            }])),
        };

        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("env update failed: {}", e)))?;
        decode::<serde_json::Value>(response).await?;
        info!(name = %name, "Stored credential in QingLong");
        Ok(())
    }
}

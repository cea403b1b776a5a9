use async_trait::async_trait;
use clawkeeper_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// One named secret as the remote store returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvRecord {
    #[serde(alias = "_id")]
    pub id: serde_json::Value,
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub remarks: String,
}

/// Remote key-value store holding the persisted session credential.
///
/// The store does not deduplicate: callers compare against what they already
/// know before calling `put`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn get(&self, name: &str) -> Result<Option<EnvRecord>>;

    /// Upsert. `remarks: None` keeps whatever remarks an existing record has.
    async fn put(&self, name: &str, value: &str, remarks: Option<&str>) -> Result<()>;
}

pub(crate) fn disabled() -> Error {
    Error::Storage("credential store disabled".to_string())
}

/// Stand-in when no store credentials are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledStore;

#[async_trait]
impl CredentialStore for DisabledStore {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn get(&self, _name: &str) -> Result<Option<EnvRecord>> {
        Err(disabled())
    }

    async fn put(&self, _name: &str, _value: &str, _remarks: Option<&str>) -> Result<()> {
        Err(disabled())
    }
}

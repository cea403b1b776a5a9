use crate::relay::{match_code, VerificationRelay};
use async_trait::async_trait;
use clawkeeper_core::config::TelegramConfig;
use clawkeeper_core::{Error, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Proxy};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound for one getUpdates long-poll.
const LONG_POLL_SECS: u64 = 20;
/// Fixed pause between polls and after a failed poll.
const POLL_PAUSE: Duration = Duration::from_secs(2);
const CAPTION_LIMIT: usize = 1024;

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// The three Bot API calls the relay needs.
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()>;
    async fn send_photo(&self, chat_id: &str, path: &Path, caption: &str) -> Result<()>;
    async fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>>;
}

pub struct HttpBotApi {
    client: Client,
    api_base: String,
    token: String,
}

impl HttpBotApi {
    pub fn new(config: &TelegramConfig) -> Self {
        let mut builder = Client::builder().timeout(Duration::from_secs(60));

        if let Some(proxy) = config.proxy.as_deref() {
            match Proxy::all(proxy) {
                Ok(p) => {
                    builder = builder.proxy(p);
                    info!(proxy = %proxy, "Telegram proxy configured");
                }
                Err(e) => {
                    warn!(error = %e, proxy = %proxy, "Invalid Telegram proxy, ignoring");
                }
            }
        }

        Self {
            client: builder.build().unwrap_or_else(|_| Client::new()),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.trim().to_string(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn check<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>> {
        let body: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("Failed to parse Telegram response: {}", e)))?;
        if !body.ok {
            return Err(Error::Channel(
                body.description.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }
        Ok(body.result)
    }
}

#[async_trait]
impl BotApi for HttpBotApi {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .form(&[("chat_id", chat_id), ("text", text), ("parse_mode", "HTML")])
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Failed to send Telegram message: {}", e)))?;
        Self::check::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: &str, path: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "screenshot.png".to_string());
        let photo = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/png")
            .map_err(|e| Error::Channel(e.to_string()))?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", truncate_caption(caption))
            .part("photo", photo);

        let response = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Failed to send Telegram photo: {}", e)))?;
        Self::check::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>> {
        let mut params = vec![("timeout", timeout_secs.to_string())];
        if let Some(off) = offset {
            params.push(("offset", off.to_string()));
        }

        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&params)
            .timeout(Duration::from_secs(timeout_secs + 10))
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram request failed: {}", e)))?;

        Ok(Self::check::<Vec<Update>>(response).await?.unwrap_or_default())
    }
}

/// Caption limit is counted in characters, not bytes.
fn truncate_caption(caption: &str) -> String {
    caption.chars().take(CAPTION_LIMIT).collect()
}

/// Telegram-backed relay bound to a single recipient chat.
pub struct TelegramRelay<A: BotApi = HttpBotApi> {
    api: A,
    chat_id: String,
}

impl TelegramRelay<HttpBotApi> {
    /// `None` when token or recipient is missing, which disables alerting.
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        Some(Self::new(HttpBotApi::new(config), config.chat_id.trim()))
    }
}

impl<A: BotApi> TelegramRelay<A> {
    pub fn new(api: A, chat_id: &str) -> Self {
        Self {
            api,
            chat_id: chat_id.to_string(),
        }
    }

    /// Offset just past the newest pending update, so replies sent before
    /// the request are never read as answers. Retries until the backlog is
    /// read; the caller bounds it with the request deadline.
    async fn flush_backlog(&self) -> Option<i64> {
        loop {
            match self.api.get_updates(None, 0).await {
                Ok(updates) => return updates.last().map(|u| u.update_id + 1),
                Err(e) => {
                    warn!(error = %e, "Failed to flush Telegram backlog, retrying");
                    tokio::time::sleep(POLL_PAUSE).await;
                }
            }
        }
    }

    fn code_from(&self, update: &Update) -> Option<String> {
        let message = update.message.as_ref()?;
        if message.chat.id.to_string() != self.chat_id {
            debug!(chat_id = message.chat.id, "Ignoring reply from another chat");
            return None;
        }
        let text = message.text.as_deref()?;
        let code = match_code(text);
        if code.is_none() {
            debug!("Reply does not look like a code, still waiting");
        }
        code
    }
}

#[async_trait]
impl<A: BotApi> VerificationRelay for TelegramRelay<A> {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.api.send_message(&self.chat_id, text).await {
            warn!(error = %e, "Telegram notification failed");
        }
    }

    async fn notify_with_image(&self, path: &Path, caption: &str) {
        if !path.exists() {
            debug!(path = %path.display(), "Screenshot missing, skipping photo");
            return;
        }
        if let Err(e) = self.api.send_photo(&self.chat_id, path, caption).await {
            warn!(error = %e, "Telegram photo failed");
        }
    }

    async fn request_code(&self, deadline: Instant) -> Option<String> {
        let mut offset = match tokio::time::timeout_at(deadline, self.flush_backlog()).await {
            Ok(offset) => offset,
            Err(_) => {
                info!("Timed out before the Telegram backlog could be cleared");
                return None;
            }
        };

        loop {
            let now = Instant::now();
            if now >= deadline {
                info!("Timed out waiting for verification code");
                return None;
            }
            let poll_secs = (deadline - now).as_secs().min(LONG_POLL_SECS);

            match tokio::time::timeout_at(deadline, self.api.get_updates(offset, poll_secs)).await {
                Err(_) => {
                    info!("Timed out waiting for verification code");
                    return None;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Polling for verification code failed, retrying");
                }
                Ok(Ok(updates)) => {
                    for update in &updates {
                        offset = Some(update.update_id + 1);
                        if let Some(code) = self.code_from(update) {
                            info!("Verification code received");
                            return Some(code);
                        }
                    }
                }
            }

            let pause = POLL_PAUSE.min(deadline.saturating_duration_since(Instant::now()));
            tokio::time::sleep(pause).await;
        }
    }
}

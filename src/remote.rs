use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::models::RecordKind;
use crate::sync::SyncConfig;

/// Ошибка удалённой записи. Per-record и не фатальная: запись остаётся
/// pending в очереди и уходит в счётчик failed текущего pass.
#[derive(Debug)]
pub enum RemoteError {
    Network(String),
    Http { status: u16, message: String },
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Network(s) => write!(f, "Network: {}", s),
            RemoteError::Http { status, message } => write!(f, "HTTP {}: {}", status, message),
        }
    }
}

/// Remote entity API — внешний коллаборатор, через который реплеится очередь.
#[async_trait]
pub trait RemoteEntityApi: Send + Sync {
    /// Создать запись remote-сущности. Повтор вызова после неоднозначного
    /// сбоя безопасен: передаётся тот же idempotency key.
    async fn create(
        &self,
        kind: RecordKind,
        payload: &serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<serde_json::Value, RemoteError>;
}

/// HTTP-реализация поверх backend entity API
pub struct HttpEntityApi {
    client: reqwest::Client,
    api_base_url: String,
    /// App version sent in X-App-Version header for debugging version skew
    app_version: String,
}

impl HttpEntityApi {
    pub fn new(config: &SyncConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base_url: config.api_base_url.clone(),
            app_version: config.app_version.clone(),
        }
    }
}

#[async_trait]
impl RemoteEntityApi for HttpEntityApi {
    async fn create(
        &self,
        kind: RecordKind,
        payload: &serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<serde_json::Value, RemoteError> {
        let url = format!("{}/entities/{}", self.api_base_url, kind.entity_name());

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-App-Version", &self.app_version);
        if let Some(key) = idempotency_key {
            request = request.header("X-Idempotency-Key", key);
        }

        let response = request
            .json(payload)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            // Backend возвращает созданную запись; пустое тело тоже допустимо
            return Ok(response
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null));
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("Unknown").into()
        } else {
            body
        };
        Err(RemoteError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

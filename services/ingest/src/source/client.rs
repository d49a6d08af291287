use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::models::{Chat, ChatCustomer, ChatMessage, ChatPage, ChatsResponse, CustomerResponse};
use super::{ChatSource, SourceError};

#[derive(Debug, Clone)]
pub struct SourceClientConfig {
    pub base_url: String,
    pub api_token: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl SourceClientConfig {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SOURCE_BASE_URL").ok()?;
        let api_token = std::env::var("SOURCE_API_TOKEN").ok()?;
        let max_retries = std::env::var("SOURCE_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);
        let timeout_secs = std::env::var("SOURCE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            max_retries,
            timeout_secs,
        })
    }
}

/// Chat API over HTTP. Each page lists chats with a customer id; the
/// customer record is fetched separately and cached for the client's life.
pub struct HttpChatSource {
    client: Client,
    config: SourceClientConfig,
    customers: Mutex<HashMap<String, ChatCustomer>>,
}

impl HttpChatSource {
    pub fn new(config: SourceClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            customers: Mutex::new(HashMap::new()),
        })
    }

    pub async fn get_customer(&self, customer_id: &str) -> Result<ChatCustomer, SourceError> {
        if let Some(cached) = self
            .customers
            .lock()
            .ok()
            .and_then(|c| c.get(customer_id).cloned())
        {
            return Ok(cached);
        }

        let url = format!("{}/api/v1/customers/{}", self.config.base_url, customer_id);
        let customer: ChatCustomer = self
            .request_with_retry::<CustomerResponse>(&url, &[])
            .await?
            .into();

        if let Ok(mut cache) = self.customers.lock() {
            cache.insert(customer_id.to_string(), customer.clone());
        }
        Ok(customer)
    }

    async fn request_with_retry<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_secs = std::cmp::min(1u64 << attempt, 30);
                tracing::warn!(attempt, backoff_secs, url, "retrying after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let response = match self
                .client
                .get(url)
                .query(query)
                .bearer_auth(&self.config.api_token)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(SourceError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return response.json::<T>().await.map_err(SourceError::RequestError);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, 60);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::HttpError { status, body });
        }

        Err(SourceError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}

#[async_trait]
impl ChatSource for HttpChatSource {
    async fn get_page(&self, cursor: &str) -> Result<ChatPage, SourceError> {
        let url = format!("{}/api/v1/chats", self.config.base_url);
        let query: Vec<(&str, &str)> = if cursor.is_empty() {
            Vec::new()
        } else {
            vec![("cursor", cursor)]
        };

        let response: ChatsResponse = self.request_with_retry(&url, &query).await?;
        let has_more = response.has_more();

        let mut chats = Vec::with_capacity(response.items.len());
        for item in response.items {
            let customer = self.get_customer(&item.customer_id).await?;
            chats.push(Chat {
                external_id: item.id,
                customer,
                last_message: ChatMessage {
                    message_id: item.last_message.id,
                    text: item.last_message.text,
                    created_at: item.last_message.created_at,
                },
            });
        }

        tracing::debug!(count = chats.len(), has_more, "fetched chat page");

        Ok(ChatPage {
            chats,
            next_cursor: response.next_cursor.filter(|c| !c.is_empty()),
            has_more,
        })
    }
}

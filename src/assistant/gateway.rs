//! HTTP adapter for the remote assistant service.
//!
//! This is the only place that talks to the vendor API. Every call is a
//! single outbound request; nothing is retried here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::assistant::sessions::SessionHandle;
use crate::config::AssistantConfig;
use crate::error::AssistantError;

/// Operations the conversation layer needs from the remote assistant.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Open a new remote session and return its identifier.
    async fn create_session(&self) -> Result<String, AssistantError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), AssistantError>;

    /// Forward one message through an existing session.
    async fn send(&self, session: &SessionHandle, message: &str) -> Result<Reply, AssistantError>;
}

/// Parsed assistant answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    /// All text items joined by newlines.
    pub text: String,
    pub items: Vec<ReplyItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyItem {
    pub response_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    input: MessageInput<'a>,
}

#[derive(Debug, Serialize)]
struct MessageInput<'a> {
    message_type: &'static str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    output: MessageOutput,
}

#[derive(Debug, Default, Deserialize)]
struct MessageOutput {
    #[serde(default)]
    generic: Vec<ReplyItem>,
}

impl From<MessageResponse> for Reply {
    fn from(response: MessageResponse) -> Self {
        let items = response.output.generic;
        let text = items
            .iter()
            .filter_map(|item| item.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        Reply { text, items }
    }
}

pub struct AssistantGateway {
    client: reqwest::Client,
    service_url: String,
    assistant_id: String,
    version: String,
    api_key: String,
}

impl AssistantGateway {
    pub fn new(config: &AssistantConfig, timeout_secs: u64) -> Result<Self, AssistantError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        tracing::info!(
            assistant_id = %config.assistant_id,
            version = %config.version,
            service_url = %config.service_url,
            "Assistant gateway configured"
        );

        Ok(Self {
            client,
            service_url: config.service_url.trim_end_matches('/').to_string(),
            assistant_id: config.assistant_id.clone(),
            version: config.version.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn sessions_url(&self) -> String {
        format!("{}/v2/assistants/{}/sessions", self.service_url, self.assistant_id)
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .query(&[("version", self.version.as_str())])
            .basic_auth("apikey", Some(&self.api_key))
    }
}

#[async_trait]
impl AssistantApi for AssistantGateway {
    async fn create_session(&self) -> Result<String, AssistantError> {
        let response = self
            .post(self.sessions_url())
            .send()
            .await
            .map_err(|e| AssistantError::SessionCreationFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::SessionCreationFailed(format!("{}: {}", status, body)));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::SessionCreationFailed(format!("Invalid session response: {}", e)))?;

        tracing::debug!(session_id = %session.session_id, "Remote session created");
        Ok(session.session_id)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), AssistantError> {
        let response = self
            .client
            .delete(format!("{}/{}", self.sessions_url(), session_id))
            .query(&[("version", self.version.as_str())])
            .basic_auth("apikey", Some(&self.api_key))
            .send()
            .await?;

        match response.status() {
            // Already gone remotely
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => {
                tracing::debug!(session_id, "Remote session deleted");
                Ok(())
            }
            status => Err(AssistantError::RemoteUnavailable(format!(
                "Session delete returned {}",
                status
            ))),
        }
    }

    async fn send(&self, session: &SessionHandle, message: &str) -> Result<Reply, AssistantError> {
        tracing::debug!(user_id = %session.user_id, session_id = %session.session_id, "Sending message to assistant");

        let response = self
            .post(format!("{}/{}/message", self.sessions_url(), session.session_id))
            .json(&MessageRequest {
                input: MessageInput {
                    message_type: "text",
                    text: message,
                },
            })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AssistantError::InvalidSession(session.session_id.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::RemoteUnavailable(format!("{}: {}", status, body)));
        }

        let parsed: MessageResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::UnexpectedResponse(e.to_string()))?;

        Ok(parsed.into())
    }
}

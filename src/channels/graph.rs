use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::config::GraphConfig;
use crate::db::ChannelRecord;
use crate::types::ChannelKind;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("graph api rate limited ({status}): {body}")]
    RateLimited { status: u16, body: String },
    #[error("graph api rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("graph api request timed out")]
    Timeout,
    #[error("graph api transport error: {0}")]
    Transport(String),
    #[error("channel has no access token")]
    MissingCredentials,
    #[error("unexpected graph api response: {0}")]
    Decode(String),
    #[error("{0} is not supported on this channel")]
    Unsupported(&'static str),
    #[error("unknown channel kind: {0}")]
    UnknownKind(String),
}

impl ChannelError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "upstream_rate_limited",
            Self::Rejected { .. } => "upstream_rejected",
            Self::Timeout => "upstream_timeout",
            Self::Transport(_) => "upstream_unreachable",
            Self::MissingCredentials => "channel_credentials_missing",
            Self::Decode(_) => "upstream_bad_response",
            Self::Unsupported(_) => "channel_unsupported",
            Self::UnknownKind(_) => "channel_kind_unknown",
        }
    }

    /// Only HTTP 429 is worth retrying.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { status, .. } | Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// What the client needs to address one connected channel.
#[derive(Debug, Clone)]
pub struct ChannelCredentials {
    pub kind: ChannelKind,
    pub external_id: String,
    pub access_token: Option<String>,
}

impl ChannelCredentials {
    pub fn from_record(record: &ChannelRecord) -> Result<Self, ChannelError> {
        let kind = ChannelKind::parse(&record.kind)
            .ok_or_else(|| ChannelError::UnknownKind(record.kind.clone()))?;
        Ok(Self {
            kind,
            external_id: record.external_id.clone(),
            access_token: record.access_token.clone(),
        })
    }

    fn token(&self) -> Result<&str, ChannelError> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ChannelError::MissingCredentials)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStatus {
    pub id: String,
    pub name: Option<String>,
    pub status: String,
    pub language: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GraphClient {
    http: Client,
    base_url: String,
    api_version: String,
}

impl GraphClient {
    pub fn new(cfg: &GraphConfig) -> Result<Self, ChannelError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_version: cfg.api_version.clone(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, path)
    }

    pub async fn send_text(
        &self,
        channel: &ChannelCredentials,
        to: &str,
        body: &str,
    ) -> Result<SendReceipt, ChannelError> {
        let payload = match channel.kind {
            ChannelKind::Whatsapp => json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "text",
                "text": {"preview_url": false, "body": body},
            }),
            ChannelKind::Messenger => json!({
                "recipient": {"id": to},
                "messaging_type": "RESPONSE",
                "message": {"text": body},
            }),
        };
        self.post_message(channel, &payload).await
    }

    pub async fn send_template(
        &self,
        channel: &ChannelCredentials,
        to: &str,
        name: &str,
        language: &str,
    ) -> Result<SendReceipt, ChannelError> {
        if channel.kind != ChannelKind::Whatsapp {
            return Err(ChannelError::Unsupported("template messages"));
        }
        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "template",
            "template": {"name": name, "language": {"code": language}},
        });
        self.post_message(channel, &payload).await
    }

    pub async fn get_template_status(
        &self,
        channel: &ChannelCredentials,
        template_id: &str,
    ) -> Result<TemplateStatus, ChannelError> {
        let token = channel.token()?;
        let encoded = utf8_percent_encode(template_id, NON_ALPHANUMERIC).to_string();
        let resp = self
            .http
            .get(self.endpoint(&encoded))
            .query(&[("fields", "name,status,language,category")])
            .bearer_auth(token)
            .send()
            .await?;
        let value = read_json(resp).await?;
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Decode("template status missing".to_string()))?;
        Ok(TemplateStatus {
            id: value
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(template_id)
                .to_string(),
            name: value.get("name").and_then(Value::as_str).map(String::from),
            status: status.to_string(),
            language: value.get("language").and_then(Value::as_str).map(String::from),
            category: value.get("category").and_then(Value::as_str).map(String::from),
        })
    }

    async fn post_message(
        &self,
        channel: &ChannelCredentials,
        payload: &Value,
    ) -> Result<SendReceipt, ChannelError> {
        let token = channel.token()?;
        let url = self.endpoint(&format!("{}/messages", channel.external_id));
        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;
        let value = read_json(resp).await?;
        let provider_message_id = extract_message_id(channel.kind, &value)
            .ok_or_else(|| ChannelError::Decode("message id missing".to_string()))?;
        Ok(SendReceipt {
            provider_message_id,
        })
    }
}

async fn read_json(resp: Response) -> Result<Value, ChannelError> {
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let body = resp.text().await.unwrap_or_default();
        return Err(ChannelError::RateLimited {
            status: status.as_u16(),
            body,
        });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ChannelError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    resp.json::<Value>()
        .await
        .map_err(|e| ChannelError::Decode(e.to_string()))
}

/// WhatsApp answers `{"messages":[{"id":..}]}`, Messenger `{"message_id":..}`.
pub fn extract_message_id(kind: ChannelKind, value: &Value) -> Option<String> {
    let id = match kind {
        ChannelKind::Whatsapp => value
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|m| m.first())
            .and_then(|m| m.get("id")),
        ChannelKind::Messenger => value.get("message_id"),
    };
    id.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

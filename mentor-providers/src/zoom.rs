use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mentor_core::config::ZoomConfig;
use mentor_core::{MentorError, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::{Meeting, MeetingProvider, MeetingRequest};

struct Credentials {
    account_id: String,
    client_id: String,
    client_secret: String,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct MeetingResponse {
    id: serde_json::Value,
    join_url: String,
}

/// Zoom server-to-server OAuth client.
///
/// Without credentials the client is disabled and `create_meeting`
/// returns `Ok(None)`.
pub struct ZoomClient {
    client: reqwest::Client,
    credentials: Option<Credentials>,
    api_base: String,
    oauth_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl ZoomClient {
    pub fn new(config: &ZoomConfig) -> anyhow::Result<Self> {
        let credentials = match (&config.account_id, &config.client_id, &config.client_secret) {
            (Some(account_id), Some(client_id), Some(client_secret)) => Some(Credentials {
                account_id: account_id.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => {
                tracing::warn!("Zoom credentials not configured; meetings will not be created");
                None
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            credentials,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            oauth_url: config.oauth_url.clone(),
            token: Mutex::new(None),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    async fn access_token(&self, credentials: &Credentials) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .client
            .post(&self.oauth_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[
                ("grant_type", "account_credentials"),
                ("account_id", credentials.account_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| unavailable("token request failed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Zoom token request returned {}: {}", status, body);
            return Err(MentorError::ProviderUnavailable(
                "Meeting provider authentication failed".to_string(),
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| unavailable("token response unreadable", e))?;

        // Refresh a minute early so a token never expires mid-request.
        let expires_at = Utc::now() + ChronoDuration::seconds((token.expires_in - 60).max(0));
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> MentorError {
    tracing::warn!("Zoom {}: {}", context, err);
    MentorError::ProviderUnavailable("Meeting provider is unavailable".to_string())
}

fn meeting_body(request: &MeetingRequest) -> serde_json::Value {
    json!({
        "topic": request.topic,
        "type": 2,
        "start_time": request.start_time.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        "duration": request.duration_minutes,
        "timezone": request.timezone,
        "agenda": request.agenda,
        "settings": {
            "join_before_host": false,
            "waiting_room": true
        }
    })
}

fn meeting_id_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl MeetingProvider for ZoomClient {
    async fn create_meeting(&self, request: &MeetingRequest) -> Result<Option<Meeting>> {
        let Some(credentials) = self.credentials.as_ref() else {
            return Ok(None);
        };

        let token = self.access_token(credentials).await?;
        let url = format!("{}/users/me/meetings", self.api_base);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&meeting_body(request))
            .send()
            .await
            .map_err(|e| unavailable("meeting request failed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Zoom meeting creation returned {}: {}", status, body);
            return Err(MentorError::ProviderUnavailable(
                "Could not create meeting".to_string(),
            ));
        }

        let meeting: MeetingResponse = response
            .json()
            .await
            .map_err(|e| unavailable("meeting response unreadable", e))?;

        let id = meeting_id_string(&meeting.id);
        tracing::info!("Created meeting {} starting at {}", id, request.start_time);

        Ok(Some(Meeting {
            id,
            join_url: meeting.join_url,
        }))
    }
}

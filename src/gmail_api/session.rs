use super::auth::{Credential, CredentialStore};
use super::client::{ListQuery, MailTransport, MessageFormat};
use crate::error::{GmailError, Result};
use crate::types::{Message, MessagesResponse, RawMessage, SentMessage};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Response, StatusCode, Url};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Authenticated handle to the Gmail REST API.
///
/// The credential sits behind a mutex so a refresh completes before any
/// other call can read the token.
pub struct Session {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
    scopes: Vec<String>,
    current: Mutex<Credential>,
}

impl Session {
    pub fn new(
        client: reqwest::Client,
        credentials: Arc<CredentialStore>,
        scopes: Vec<String>,
        credential: Credential,
    ) -> Self {
        Self {
            client,
            base_url: GMAIL_API_BASE.to_string(),
            credentials,
            scopes,
            current: Mutex::new(credential),
        }
    }

    /// Loads (or obtains) a credential and opens a session with it.
    pub async fn connect(credentials: Arc<CredentialStore>, scopes: Vec<String>) -> Result<Self> {
        let credential = credentials.load_or_authenticate(&scopes).await?;
        Ok(Self::new(
            reqwest::Client::new(),
            credentials,
            scopes,
            credential,
        ))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        if !current.is_valid(Utc::now()) {
            debug!("Access token expired, refreshing before request");
            let fresh = self.credentials.refresh(&current, &self.scopes).await?;
            *current = fresh;
        }
        Ok(current.token.clone())
    }

    fn user_url(&self, path: &str) -> String {
        format!("{}/users/me/{}", self.base_url, path)
    }

    /// URL of a single message, with `id` as exactly one path segment.
    fn message_url(&self, id: &str) -> Result<Url> {
        // Gmail ids are short hex strings; anything else can't name a message.
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(GmailError::NotFound(id.to_string()));
        }
        let mut url = Url::parse(&self.user_url("messages"))
            .map_err(|e| GmailError::remote(None, format!("bad API base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| GmailError::remote(None, "API base URL cannot take a path"))?
            .push(id);
        Ok(url)
    }
}

async fn error_text(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string())
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(GmailError::remote(
            Some(status.as_u16()),
            error_text(response).await,
        ))
    }
}

#[async_trait]
impl MailTransport for Session {
    async fn list_messages(&self, query: &ListQuery) -> Result<MessagesResponse> {
        let token = self.access_token().await?;

        let mut request = self
            .client
            .get(self.user_url("messages"))
            .bearer_auth(&token)
            .query(&[("maxResults", query.max_results.to_string())]);
        for label in &query.label_ids {
            request = request.query(&[("labelIds", label)]);
        }
        if let Some(q) = &query.q {
            request = request.query(&[("q", q)]);
        }
        if let Some(page_token) = &query.page_token {
            request = request.query(&[("pageToken", page_token)]);
        }

        let response = check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn get_message(&self, id: &str, format: MessageFormat) -> Result<Message> {
        let url = self.message_url(id)?;
        let token = self.access_token().await?;

        let mut request = self
            .client
            .get(url)
            .bearer_auth(&token)
            .query(&[("format", format.as_str())]);
        if format == MessageFormat::Metadata {
            request = request.query(&[("metadataHeaders", "From"), ("metadataHeaders", "Subject")]);
        }

        let response = request.send().await?;
        match response.status() {
            // Gmail answers 400 "Invalid id value" for ids it could never have issued.
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                debug!("Message {} not found: {}", id, error_text(response).await);
                Err(GmailError::NotFound(id.to_string()))
            }
            _ => Ok(check_status(response).await?.json().await?),
        }
    }

    async fn send_message(&self, message: &RawMessage) -> Result<SentMessage> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.user_url("messages/send"))
            .bearer_auth(&token)
            .json(message)
            .send()
            .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            return Err(GmailError::validation("to", error_text(response).await));
        }
        Ok(check_status(response).await?.json().await?)
    }
}

//! HTTP gateway - reqwest client for the REST API

use crate::api::models::{
    Conversation, Id, Message, NotificationFeed, OutgoingMessage, SentMessage, User,
};
use crate::api::session::Session;
use crate::api::{ApiError, RemoteGateway};
use async_trait::async_trait;
use reqwest::{multipart, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Remote gateway backed by the REST API
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    session: Arc<Session>,
}

impl HttpGateway {
    /// Create a gateway rooted at `base_url` (e.g. `http://localhost:8000/api`)
    pub fn new(base_url: &str, timeout: Duration, session: Arc<Session>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("xclone-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: normalize_base(base_url)?,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint(path)?;
        let mut builder = self.client.request(method, url);
        if let Some(token) = self.session.token() {
            builder = builder.header(reqwest::header::AUTHORIZATION, format!("Token {}", token));
        }
        Ok(builder)
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED {
            self.session.expire();
            return Err(ApiError::Unauthorized);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!("Request failed with {}: {}", status, body);
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn fetch_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = self.execute(builder).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn fire(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        self.execute(builder).await.map(|_| ())
    }
}

/// Ensure the base ends with a slash so relative joins append instead of replace
fn normalize_base(base_url: &str) -> Result<Url, ApiError> {
    let trimmed = base_url.trim();
    if trimmed.ends_with('/') {
        Ok(Url::parse(trimmed)?)
    } else {
        Ok(Url::parse(&format!("{}/", trimmed))?)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn current_user(&self) -> Result<User, ApiError> {
        self.fetch_json(self.request(Method::GET, "user/")?).await
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.fetch_json(self.request(Method::GET, "chats/conversations/")?)
            .await
    }

    async fn delete_conversation(&self, id: &Id) -> Result<(), ApiError> {
        let path = format!("chats/conversations/{}/", id);
        self.fire(self.request(Method::DELETE, &path)?).await
    }

    async fn mark_conversation_read(&self, id: &Id) -> Result<(), ApiError> {
        let path = format!("chats/conversations/{}/read/", id);
        self.fire(self.request(Method::POST, &path)?).await
    }

    async fn list_messages(&self, conversation_id: &Id) -> Result<Vec<Message>, ApiError> {
        let path = format!("chats/conversations/{}/messages/", conversation_id);
        self.fetch_json(self.request(Method::GET, &path)?).await
    }

    async fn send_message(&self, message: OutgoingMessage) -> Result<SentMessage, ApiError> {
        let builder = self.request(Method::POST, "chats/send/")?;

        let builder = match message.attachment {
            Some(attachment) => {
                let part = multipart::Part::bytes(attachment.data)
                    .file_name(attachment.file_name)
                    .mime_str(&attachment.content_type)?;
                let form = multipart::Form::new()
                    .text("recipient_id", message.recipient_id.to_string())
                    .text("content", message.content)
                    .part("attachment", part);
                builder.multipart(form)
            }
            None => builder.json(&json!({
                "recipient_id": message.recipient_id,
                "content": message.content,
            })),
        };

        self.fetch_json(builder).await
    }

    async fn delete_message(&self, id: &Id) -> Result<(), ApiError> {
        let path = format!("chats/messages/{}/", id);
        self.fire(self.request(Method::DELETE, &path)?).await
    }

    async fn list_notifications(&self) -> Result<NotificationFeed, ApiError> {
        self.fetch_json(self.request(Method::GET, "notifications/")?)
            .await
    }

    async fn mark_notification_read(&self, id: &Id) -> Result<(), ApiError> {
        let builder = self
            .request(Method::POST, "notifications/mark-read/")?
            .json(&json!({ "notification_id": id }));
        self.fire(builder).await
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.fire(self.request(Method::POST, "notifications/mark-all-read/")?)
            .await
    }
}

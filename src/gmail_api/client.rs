use crate::error::Result;
use crate::types::{Message, MessagesResponse, RawMessage, SentMessage};
use async_trait::async_trait;

/// Parameters of a `messages.list` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub label_ids: Vec<String>,
    pub q: Option<String>,
    pub max_results: u32,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    /// Headers, labels and snippet only.
    Metadata,
    /// The whole payload tree with body data.
    Full,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Metadata => "metadata",
            MessageFormat::Full => "full",
        }
    }
}

/// The three remote calls the mail client is built on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn list_messages(&self, query: &ListQuery) -> Result<MessagesResponse>;
    async fn get_message(&self, id: &str, format: MessageFormat) -> Result<Message>;
    async fn send_message(&self, message: &RawMessage) -> Result<SentMessage>;
}

/// Mailbox operations over an authenticated transport.
pub struct MailClient<T> {
    pub(crate) transport: T,
}

impl<T: MailTransport> MailClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

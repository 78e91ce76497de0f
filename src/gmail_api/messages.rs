use super::client::{ListQuery, MailClient, MailTransport, MessageFormat};
use crate::email_content::{extract_plain_text, PayloadNode};
use crate::error::{GmailError, Result};
use crate::types::MessageSummary;
use tracing::debug;

pub const INBOX_LABEL: &str = "INBOX";
pub const UNREAD_LABEL: &str = "UNREAD";

/// Upper bound on ids collected for a search, the provider's default page size.
pub const SEARCH_RESULT_LIMIT: usize = 100;

const MAX_PAGE_SIZE: usize = 500;

impl<T: MailTransport> MailClient<T> {
    /// The `max_results` most recent inbox messages, newest first.
    ///
    /// Metadata for each message is fetched one at a time; if any fetch fails
    /// the whole listing fails.
    pub async fn list_inbox(&self, max_results: usize) -> Result<Vec<MessageSummary>> {
        if max_results == 0 {
            return Err(GmailError::validation("max_results", "must be at least 1"));
        }

        let ids = self
            .collect_message_ids(vec![INBOX_LABEL.to_string()], None, max_results)
            .await?;
        debug!("Listing {} inbox message(s)", ids.len());

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            let message = self
                .transport
                .get_message(&id, MessageFormat::Metadata)
                .await?;
            summaries.push(MessageSummary {
                from: message.header("From").unwrap_or("(Unknown Sender)").to_string(),
                subject: message.header("Subject").unwrap_or("(No Subject)").to_string(),
                snippet: Some(message.snippet.clone().unwrap_or_default()),
                unread: Some(message.has_label(UNREAD_LABEL)),
                id,
            });
        }
        Ok(summaries)
    }

    /// Messages matching a Gmail search expression (`from:boss`, `has:attachment`, ...).
    ///
    /// Results carry only id, sender and subject. A blank query matches nothing.
    pub async fn search_emails(&self, query: &str) -> Result<Vec<MessageSummary>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let ids = self
            .collect_message_ids(Vec::new(), Some(query.to_string()), SEARCH_RESULT_LIMIT)
            .await?;
        debug!("Search {:?} matched {} message(s)", query, ids.len());

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            let message = self
                .transport
                .get_message(&id, MessageFormat::Metadata)
                .await?;
            summaries.push(MessageSummary {
                from: message.header("From").unwrap_or_default().to_string(),
                subject: message.header("Subject").unwrap_or_default().to_string(),
                snippet: None,
                unread: None,
                id,
            });
        }
        Ok(summaries)
    }

    /// Plain-text body of message `id`.
    pub async fn read_email(&self, id: &str) -> Result<String> {
        if id.trim().is_empty() {
            return Err(GmailError::NotFound(id.to_string()));
        }
        let message = self.transport.get_message(id, MessageFormat::Full).await?;
        Ok(message
            .payload
            .as_ref()
            .map(|payload| extract_plain_text(&PayloadNode::from(payload)))
            .unwrap_or_default())
    }

    async fn collect_message_ids(
        &self,
        label_ids: Vec<String>,
        q: Option<String>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        let mut page_token = None;

        loop {
            let query = ListQuery {
                label_ids: label_ids.clone(),
                q: q.clone(),
                max_results: (limit - ids.len()).min(MAX_PAGE_SIZE) as u32,
                page_token: page_token.take(),
            };
            let page = self.transport.list_messages(&query).await?;
            ids.extend(page.messages.unwrap_or_default().into_iter().map(|m| m.id));

            match page.next_page_token {
                Some(token) if ids.len() < limit => page_token = Some(token),
                _ => break,
            }
        }

        ids.truncate(limit);
        Ok(ids)
    }
}

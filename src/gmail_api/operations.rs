use super::client::{MailClient, MailTransport};
use crate::error::{GmailError, Result};
use crate::types::{OutboundMessage, RawMessage};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::engine::Engine;
use tracing::info;

impl<T: MailTransport> MailClient<T> {
    /// Sends a plain-text message and returns the id Gmail assigned to it.
    pub async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<String> {
        validate_recipient(to)?;

        let raw = build_raw_message(&OutboundMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        let sent = self.transport.send_message(&raw).await?;
        info!("Sent message {}", sent.id);
        Ok(sent.id)
    }
}

/// Checks that `to` is a comma-separated list of `addr@domain` or
/// `Name <addr@domain>` entries.
pub fn validate_recipient(to: &str) -> Result<()> {
    if to.trim().is_empty() {
        return Err(GmailError::validation("to", "recipient is required"));
    }
    if to.chars().any(|c| c.is_control()) {
        return Err(GmailError::validation("to", "recipient contains control characters"));
    }

    for entry in to.split(',') {
        let entry = entry.trim();
        let address = match (entry.rfind('<'), entry.rfind('>')) {
            (Some(open), Some(close)) if open < close => &entry[open + 1..close],
            (None, None) => entry,
            _ => {
                return Err(GmailError::validation(
                    "to",
                    format!("unbalanced brackets in {:?}", entry),
                ))
            }
        };
        let address = address.trim();
        let valid = match address.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@')
                    && !address.contains(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            return Err(GmailError::validation(
                "to",
                format!("{:?} is not an email address", entry),
            ));
        }
    }
    Ok(())
}

// Raw UTF-8 bytes per encoded word; 45 bytes is 60 base64 chars, which keeps
// each word under the 75-char limit.
const ENCODED_WORD_BYTES: usize = 45;

/// Encodes a header value as RFC 2047 `B` words when it is not plain ASCII.
///
/// Words are split on character boundaries and folded onto continuation lines.
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (idx, ch) in value.char_indices() {
        let next = idx + ch.len_utf8();
        if next - start > ENCODED_WORD_BYTES && end > start {
            words.push(&value[start..end]);
            start = end;
        }
        end = next;
    }
    words.push(&value[start..end]);

    words
        .iter()
        .map(|word| format!("=?utf-8?B?{}?=", STANDARD.encode(word.as_bytes())))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

/// Builds the `messages.send` body for a single-part text message.
///
/// `To` is written as given; `Subject` goes through [`encode_header_value`].
pub fn build_raw_message(message: &OutboundMessage) -> RawMessage {
    let mut email_content = String::new();

    email_content.push_str(&format!("To: {}\r\n", message.to));
    email_content.push_str(&format!(
        "Subject: {}\r\n",
        encode_header_value(&message.subject)
    ));
    email_content.push_str("MIME-Version: 1.0\r\n");
    email_content.push_str("Content-Type: text/plain; charset=\"utf-8\"\r\n");
    email_content.push_str("Content-Transfer-Encoding: 8bit\r\n");
    email_content.push_str("\r\n");
    email_content.push_str(&message.body);

    RawMessage {
        raw: URL_SAFE.encode(email_content.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail_api::client::MockMailTransport;
    use crate::types::SentMessage;

    fn decode(raw: &RawMessage) -> String {
        String::from_utf8(URL_SAFE.decode(&raw.raw).unwrap()).unwrap()
    }

    #[test]
    fn test_build_raw_message_layout() {
        let raw = build_raw_message(&OutboundMessage {
            to: "user@example.com".to_string(),
            subject: "Hi".to_string(),
            body: "Body".to_string(),
        });
        let text = decode(&raw);
        assert!(text.starts_with("To: user@example.com\r\nSubject: Hi\r\n"));
        assert!(text.contains("Content-Type: text/plain; charset=\"utf-8\"\r\n"));
        assert!(text.ends_with("\r\n\r\nBody"));
        assert!(!raw.raw.contains('+') && !raw.raw.contains('/'));
    }

    #[test]
    fn test_raw_message_wire_shape() {
        let raw = build_raw_message(&OutboundMessage {
            to: "a@b.c".to_string(),
            subject: String::new(),
            body: String::new(),
        });
        let value = serde_json::to_value(&raw).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 1);
        assert!(value["raw"].is_string());
    }

    // Reverses `encode_header_value` for the words it produces.
    fn decode_words(value: &str) -> String {
        let mut bytes = Vec::new();
        for word in value.split("\r\n ") {
            let payload = word
                .strip_prefix("=?utf-8?B?")
                .and_then(|w| w.strip_suffix("?="))
                .unwrap();
            bytes.extend(STANDARD.decode(payload).unwrap());
        }
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_non_ascii_subject_is_encoded_word() {
        let raw = build_raw_message(&OutboundMessage {
            to: "a@b.c".to_string(),
            subject: "Grüße ✉".to_string(),
            body: "naïve".to_string(),
        });
        let text = decode(&raw);
        let (headers, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(headers.is_ascii());
        assert_eq!(body, "naïve");

        let subject = headers
            .split("\r\nMIME-Version")
            .next()
            .and_then(|h| h.split_once("Subject: "))
            .map(|(_, s)| s)
            .unwrap();
        assert!(subject.starts_with("=?utf-8?B?"));
        assert_eq!(decode_words(subject), "Grüße ✉");
    }

    #[test]
    fn test_encode_header_value() {
        assert_eq!(encode_header_value("Plain subject"), "Plain subject");
        assert_eq!(encode_header_value(""), "");
        assert_eq!(encode_header_value("café"), "=?utf-8?B?Y2Fmw6k=?=");

        let long = "Überweisung für die Rechnung Nr. 4711 vom März, bitte prüfen ✓".repeat(3);
        let encoded = encode_header_value(&long);
        assert!(encoded.contains("\r\n "));
        for word in encoded.split("\r\n ") {
            assert!(word.len() <= 75, "{} is too long", word);
        }
        assert_eq!(decode_words(&encoded), long);
    }

    #[test]
    fn test_validate_recipient() {
        assert!(validate_recipient("user@example.com").is_ok());
        assert!(validate_recipient("Jane Doe <jane@example.com>").is_ok());
        assert!(validate_recipient("a@example.com, b@example.org").is_ok());

        for bad in [
            "",
            "   ",
            "not-an-address",
            "@example.com",
            "user@",
            "Jane <jane@example.com",
            "a@b@c",
            "user@example.com\r\nBcc: x@y.z",
            "a@example.com,",
        ] {
            let err = validate_recipient(bad).unwrap_err();
            assert!(
                matches!(err, GmailError::Validation { ref field, .. } if field == "to"),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_send_email_returns_provider_id() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_send_message()
            .withf(|raw| decode(raw).ends_with("\r\n\r\nBody"))
            .times(1)
            .returning(|_| {
                Ok(SentMessage {
                    id: "18c0ffee".to_string(),
                    thread_id: Some("18c0ffee".to_string()),
                })
            });

        let client = MailClient::new(transport);
        let id = client
            .send_email("user@example.com", "Hi", "Body")
            .await
            .unwrap();
        assert_eq!(id, "18c0ffee");
    }

    #[tokio::test]
    async fn test_send_email_rejects_bad_recipient_locally() {
        let mut transport = MockMailTransport::new();
        transport.expect_send_message().never();

        let client = MailClient::new(transport);
        let err = client.send_email("nobody", "Hi", "Body").await.unwrap_err();
        assert!(matches!(err, GmailError::Validation { .. }));
    }
}

use crate::types::MessagePart;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, Engine};
use tracing::debug;

// Gmail sends body data both with and without trailing '='.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const TEXT_PLAIN: &str = "text/plain";

/// A node of a message's MIME tree.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadNode {
    Leaf {
        mime_type: String,
        data: Option<String>,
    },
    Container {
        mime_type: String,
        parts: Vec<PayloadNode>,
    },
}

impl From<&MessagePart> for PayloadNode {
    fn from(part: &MessagePart) -> Self {
        let mime_type = part.mime_type.clone().unwrap_or_default();
        match &part.parts {
            Some(parts) if !parts.is_empty() => PayloadNode::Container {
                mime_type,
                parts: parts.iter().map(PayloadNode::from).collect(),
            },
            _ => PayloadNode::Leaf {
                mime_type,
                data: part.body.as_ref().and_then(|b| b.data.clone()),
            },
        }
    }
}

/// Plain-text body of a message.
///
/// A single-part message yields its own body whatever its type. For a
/// multipart message every `text/plain` leaf is decoded and concatenated in
/// order; other leaves are skipped and nested containers are walked. Returns
/// an empty string when there is no text at all.
pub fn extract_plain_text(payload: &PayloadNode) -> String {
    let mut text = String::new();
    match payload {
        PayloadNode::Leaf { data, .. } => {
            if let Some(data) = data {
                text.push_str(&decode_body_data(data));
            }
        }
        PayloadNode::Container { parts, .. } => collect_plain_text(parts, &mut text),
    }
    text.trim().to_string()
}

fn collect_plain_text(parts: &[PayloadNode], out: &mut String) {
    for part in parts {
        match part {
            PayloadNode::Leaf {
                mime_type,
                data: Some(data),
            } if mime_type == TEXT_PLAIN => out.push_str(&decode_body_data(data)),
            PayloadNode::Leaf { .. } => {}
            PayloadNode::Container { parts, .. } => collect_plain_text(parts, out),
        }
    }
}

/// Decodes a base64url body segment. Anything undecodable becomes "".
pub fn decode_body_data(data: &str) -> String {
    let decoded = match URL_SAFE_LENIENT.decode(data.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Discarding undecodable body segment: {}", e);
            return String::new();
        }
    };
    String::from_utf8(decoded).unwrap_or_else(|e| {
        debug!("Discarding non UTF-8 body segment: {}", e);
        String::new()
    })
}

use serde_json::{Map, Value};

use crate::errors::RemoteCapabilityError;
use crate::media::EncodedImage;

const DEFAULT_INLINE_MIME: &str = "image/png";

/// One content part of a `generateContent` candidate.
///
/// The image model mixes shapes freely, so each observed shape gets its
/// own case and decoding checks the discriminating key explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Text(String),
    InlineImage(EncodedImage),
    FileReference {
        uri: String,
        media_type: Option<String>,
    },
    Unrecognized,
}

impl ResponsePart {
    pub fn decode(value: &Value) -> Self {
        let Some(part) = value.as_object() else {
            return Self::Unrecognized;
        };
        if let Some(inline) = field(part, "inlineData", "inline_data").and_then(Value::as_object) {
            return decode_inline(inline);
        }
        if let Some(file) = field(part, "fileData", "file_data").and_then(Value::as_object) {
            let uri = field(file, "fileUri", "file_uri")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if uri.is_empty() {
                return Self::Unrecognized;
            }
            return Self::FileReference {
                uri: uri.to_string(),
                media_type: field(file, "mimeType", "mime_type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
        }
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            return Self::Text(text.to_string());
        }
        if part.get("data").and_then(Value::as_str).is_some() {
            return decode_inline(part);
        }
        Self::Unrecognized
    }
}

fn decode_inline(inline: &Map<String, Value>) -> ResponsePart {
    let data = inline
        .get("data")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if data.is_empty() {
        return ResponsePart::Unrecognized;
    }
    let mime = field(inline, "mimeType", "mime_type")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_INLINE_MIME);
    ResponsePart::InlineImage(EncodedImage::new(mime, data))
}

fn field<'a>(object: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    object.get(camel).or_else(|| object.get(snake))
}

/// Decodes the parts of the first candidate. Each missing layer of the
/// `candidates[0].content.parts` path maps to its own error.
pub fn decode_candidate_parts(
    response: &Value,
) -> Result<Vec<ResponsePart>, RemoteCapabilityError> {
    let Some(candidate) = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
    else {
        return Err(RemoteCapabilityError::NoCandidates {
            block_reason: response
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    };
    let Some(parts) = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
    else {
        return Err(RemoteCapabilityError::NoContentParts {
            finish_reason: candidate
                .get("finishReason")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    };
    if parts.is_empty() {
        return Err(RemoteCapabilityError::EmptyParts);
    }
    Ok(parts.iter().map(ResponsePart::decode).collect())
}

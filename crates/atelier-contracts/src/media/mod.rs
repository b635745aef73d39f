mod references;
mod sniff;

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use references::ImageReference;
pub use sniff::{classify_payload, looks_like_markup, sniff_media_type, MARKUP_PREVIEW_BYTES};

/// Raster formats accepted anywhere in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl MediaType {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    /// Parses a `Content-Type`-style value. Parameters after `;` are ignored.
    pub fn from_mime(raw: &str) -> Option<Self> {
        let normalized = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Self-describing image: a declared media type plus a base64 payload.
///
/// Renders as a `data:` URL. The media type is whatever the producer
/// declared; only [`CanonicalImage`] guarantees it matches the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub media_type: String,
    pub data: String,
}

impl EncodedImage {
    pub fn new(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    /// Parses `data:<mime>;base64,<payload>`. Anything else yields `None`.
    pub fn parse_data_url(raw: &str) -> Option<Self> {
        let rest = raw.trim().strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let media_type = header.strip_suffix(";base64")?.trim();
        if media_type.is_empty() || media_type.contains(';') || payload.trim().is_empty() {
            return None;
        }
        Some(Self::new(media_type, payload.trim()))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.data.as_bytes())
    }

    pub fn digest(&self) -> String {
        short_digest(self.data.as_bytes())
    }
}

impl fmt::Display for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.media_type, self.data)
    }
}

/// Validated, size-bounded image ready to send to the image model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImage {
    media_type: MediaType,
    data: String,
}

impl CanonicalImage {
    /// `media_type` must come from sniffing `bytes`, never from metadata.
    pub fn from_bytes(media_type: MediaType, bytes: &[u8]) -> Self {
        Self {
            media_type,
            data: BASE64.encode(bytes),
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.data.as_bytes())
    }

    pub fn to_encoded(&self) -> EncodedImage {
        EncodedImage::new(self.media_type.mime(), self.data.clone())
    }
}

/// First 12 hex chars of the SHA-256 of `bytes`; used to identify images in logs.
pub fn short_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..6])
}

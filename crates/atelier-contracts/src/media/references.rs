use std::fmt;
use std::path::PathBuf;

use super::EncodedImage;
use crate::errors::ImageAcquisitionError;

/// Where an image comes from. Produced by callers, consumed once by acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Inline(EncodedImage),
    /// Path below the trusted asset root, e.g. `/models/front.jpg`.
    LocalPath(PathBuf),
    RemoteUrl(String),
}

impl ImageReference {
    /// Classifies the string forms accepted from callers:
    /// `data:` URLs, asset paths starting with `/`, and `http(s)://` URLs.
    pub fn parse(raw: &str) -> Result<Self, ImageAcquisitionError> {
        let trimmed = raw.trim();
        if trimmed.starts_with("data:") {
            return EncodedImage::parse_data_url(trimmed)
                .map(Self::Inline)
                .ok_or_else(|| {
                    ImageAcquisitionError::InvalidReference("malformed data URL".to_string())
                });
        }
        if trimmed.starts_with('/') {
            return Ok(Self::LocalPath(PathBuf::from(trimmed)));
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(Self::RemoteUrl(trimmed.to_string()));
        }
        Err(ImageAcquisitionError::InvalidReference(format!(
            "unsupported image reference: {}",
            crate::text::truncate_text(trimmed, 60)
        )))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inline(_) => "inline",
            Self::LocalPath(_) => "local_path",
            Self::RemoteUrl(_) => "remote_url",
        }
    }

    /// Short description for logs; never includes inline payload bytes.
    pub fn label(&self) -> String {
        match self {
            Self::Inline(image) => format!("inline {} ({})", image.media_type, image.digest()),
            Self::LocalPath(path) => path.display().to_string(),
            Self::RemoteUrl(url) => crate::text::truncate_text(url, 96),
        }
    }
}

impl From<EncodedImage> for ImageReference {
    fn from(image: EncodedImage) -> Self {
        Self::Inline(image)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(image) => write!(f, "{image}"),
            Self::LocalPath(path) => write!(f, "{}", path.display()),
            Self::RemoteUrl(url) => f.write_str(url),
        }
    }
}

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn an image reference into a usable image.
#[derive(Debug, Error)]
pub enum ImageAcquisitionError {
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    #[error("failed to fetch image from {source_label}: {detail}")]
    FetchFailed { source_label: String, detail: String },

    #[error("failed to read image file {}: {error}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("received empty image data from {0}")]
    EmptyPayload(String),

    #[error("{}", unsupported_message(.source_label, .advertised))]
    Unsupported {
        source_label: String,
        advertised: Option<String>,
    },

    #[error("got a web page instead of an image from {0} (the link is likely dead or redirected)")]
    HtmlInsteadOfImage(String),
}

fn unsupported_message(source_label: &str, advertised: &Option<String>) -> String {
    match advertised.as_deref() {
        Some(content_type) if content_type.to_ascii_lowercase().starts_with("image/") => format!(
            "unsupported or corrupt image from {source_label}: content type claims {content_type} but the bytes are not JPEG, PNG, GIF or WebP"
        ),
        Some(content_type) => format!(
            "unsupported or corrupt image from {source_label}: expected JPEG, PNG, GIF or WebP, content type {content_type}"
        ),
        None => format!(
            "unsupported or corrupt image from {source_label}: expected JPEG, PNG, GIF or WebP, content type unknown"
        ),
    }
}

/// Failure reported by, or while talking to, the image model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteCapabilityError {
    #[error(
        "no candidates received from the image model{}",
        detail_suffix("prompt blocked", .block_reason)
    )]
    NoCandidates { block_reason: Option<String> },

    #[error(
        "no content parts in response candidate{}",
        detail_suffix("finish reason", .finish_reason)
    )]
    NoContentParts { finish_reason: Option<String> },

    #[error("empty parts array in response candidate")]
    EmptyParts,

    #[error("image model request failed: {0}")]
    NetworkFailure(String),

    #[error("image model returned an invalid payload: {0}")]
    MalformedResponse(String),
}

fn detail_suffix(label: &str, detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|value| format!(" ({label}: {value})"))
        .unwrap_or_default()
}

/// The model answered, twice, without producing an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationFailure {
    #[error("no image generated; the model returned only text: \"{excerpt}\"")]
    TextOnly { excerpt: String },

    #[error("no image generated; the response contained no recognizable image or text")]
    Unparseable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Garment,
    BasePhoto,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Garment => f.write_str("garment"),
            Self::BasePhoto => f.write_str("base photo"),
        }
    }
}

/// Terminal failure of one single-garment try-on.
#[derive(Debug, Error)]
pub enum TryOnError {
    #[error("failed to acquire {role} image: {source}")]
    Acquisition {
        role: ImageRole,
        source: ImageAcquisitionError,
    },

    #[error(transparent)]
    Remote(#[from] RemoteCapabilityError),

    #[error(transparent)]
    Generation(#[from] GenerationFailure),
}

impl TryOnError {
    pub fn acquisition(role: ImageRole, source: ImageAcquisitionError) -> Self {
        Self::Acquisition { role, source }
    }

    /// True when a product link served a web page; callers message this differently.
    pub fn is_dead_image_link(&self) -> bool {
        matches!(
            self,
            Self::Acquisition {
                source: ImageAcquisitionError::HtmlInsteadOfImage(_),
                ..
            }
        )
    }
}

/// Failure of a whole layering run. Only raised when nothing was applied.
#[derive(Debug, Error)]
pub enum LayeringFailure {
    #[error("failed to apply {item_name}: {cause}")]
    FirstItemFailed {
        item_name: String,
        #[source]
        cause: TryOnError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_message_distinguishes_claimed_images() {
        let claimed = ImageAcquisitionError::Unsupported {
            source_label: "https://shop.example/a.jpg".to_string(),
            advertised: Some("image/jpeg".to_string()),
        };
        assert!(claimed.to_string().contains("claims image/jpeg"));

        let unknown = ImageAcquisitionError::Unsupported {
            source_label: "inline image data".to_string(),
            advertised: None,
        };
        assert!(unknown.to_string().ends_with("content type unknown"));
    }

    #[test]
    fn remote_errors_include_optional_details() {
        let blocked = RemoteCapabilityError::NoCandidates {
            block_reason: Some("SAFETY".to_string()),
        };
        assert_eq!(
            blocked.to_string(),
            "no candidates received from the image model (prompt blocked: SAFETY)"
        );
        let plain = RemoteCapabilityError::NoContentParts {
            finish_reason: None,
        };
        assert_eq!(plain.to_string(), "no content parts in response candidate");
    }

    #[test]
    fn dead_link_detection_only_matches_html_acquisition() {
        let html = TryOnError::acquisition(
            ImageRole::Garment,
            ImageAcquisitionError::HtmlInsteadOfImage("u".to_string()),
        );
        assert!(html.is_dead_image_link());
        assert!(html.to_string().starts_with("failed to acquire garment image"));

        let remote = TryOnError::from(RemoteCapabilityError::EmptyParts);
        assert!(!remote.is_dead_image_link());
    }
}

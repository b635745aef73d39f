use crate::errors::ImageAcquisitionError;

use super::MediaType;

/// How much of a non-image payload is inspected for markup.
pub const MARKUP_PREVIEW_BYTES: usize = 200;

/// Identifies the format from its magic number. Declared types are never consulted.
pub fn sniff_media_type(bytes: &[u8]) -> Option<MediaType> {
    match bytes {
        [0xFF, 0xD8, ..] => Some(MediaType::Jpeg),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some(MediaType::Png),
        [0x47, 0x49, 0x46, 0x38, ..] => Some(MediaType::Gif),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(MediaType::Webp),
        _ => None,
    }
}

/// True when the leading bytes read like an HTML page.
pub fn looks_like_markup(bytes: &[u8]) -> bool {
    let preview_len = bytes.len().min(MARKUP_PREVIEW_BYTES);
    let preview = String::from_utf8_lossy(&bytes[..preview_len]);
    if preview.trim_start().starts_with('<') {
        return true;
    }
    let lowered = preview.to_ascii_lowercase();
    ["<!doctype", "<html", "<body"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Validates a fetched payload and returns its sniffed media type.
///
/// `advertised` is the declared type (header or data URL), used only for
/// error reporting; when the signature matches, the sniffed type wins.
pub fn classify_payload(
    bytes: &[u8],
    advertised: Option<&str>,
    source_label: &str,
) -> Result<MediaType, ImageAcquisitionError> {
    if bytes.is_empty() {
        return Err(ImageAcquisitionError::EmptyPayload(source_label.to_string()));
    }
    if let Some(media_type) = sniff_media_type(bytes) {
        return Ok(media_type);
    }
    if looks_like_markup(bytes) {
        return Err(ImageAcquisitionError::HtmlInsteadOfImage(
            source_label.to_string(),
        ));
    }
    Err(ImageAcquisitionError::Unsupported {
        source_label: source_label.to_string(),
        advertised: advertised
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string),
    })
}

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::garments::GarmentItem;
use crate::media::{CanonicalImage, ImageReference};

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// Appended to the instruction when the first attempt produced no image.
pub const IMAGE_ONLY_DIRECTIVE: &str =
    "IMPORTANT: Respond with the generated image only. Do not return any text.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVersion {
    Standard,
    ImageOnly,
}

/// One single-garment try-on. The original attempt and its retry share both
/// images and differ only in `prompt_version`.
#[derive(Debug, Clone, PartialEq)]
pub struct TryOnRequest {
    pub base_photo: ImageReference,
    pub garment_image: ImageReference,
    pub garment_name: String,
    pub garment_description: Option<String>,
    pub prompt_version: PromptVersion,
}

impl TryOnRequest {
    pub fn new(
        base_photo: ImageReference,
        garment_image: ImageReference,
        garment_name: impl Into<String>,
    ) -> Self {
        Self {
            base_photo,
            garment_image,
            garment_name: garment_name.into(),
            garment_description: None,
            prompt_version: PromptVersion::Standard,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.garment_description = description.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn for_item(
        base_photo: ImageReference,
        garment_image: ImageReference,
        item: &GarmentItem,
    ) -> Self {
        Self::new(base_photo, garment_image, item.name.clone())
            .with_description(item.description())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    InlineImage(CanonicalImage),
    Text(String),
}

impl RequestPart {
    pub fn to_json(&self) -> Value {
        match self {
            Self::InlineImage(image) => json!({
                "inlineData": {
                    "mimeType": image.media_type().mime(),
                    "data": image.data(),
                }
            }),
            Self::Text(text) => json!({ "text": text }),
        }
    }
}

/// Ordered parts sent to the image model: garment, subject, instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPayload {
    parts: Vec<RequestPart>,
}

impl GenerationPayload {
    pub fn parts(&self) -> &[RequestPart] {
        &self.parts
    }

    pub fn parts_json(&self) -> Vec<Value> {
        self.parts.iter().map(RequestPart::to_json).collect()
    }

    /// Same images, with the image-only directive appended to the first text
    /// part (or added as a new part when there is none). Text that already
    /// ends with the directive is left as is.
    pub fn with_image_only_directive(&self) -> Self {
        let mut parts = self.parts.clone();
        let first_text = parts.iter_mut().find_map(|part| match part {
            RequestPart::Text(text) => Some(text),
            RequestPart::InlineImage(_) => None,
        });
        match first_text {
            Some(text) if text.trim_end().ends_with(IMAGE_ONLY_DIRECTIVE) => {}
            Some(text) => {
                text.push_str("\n\n");
                text.push_str(IMAGE_ONLY_DIRECTIVE);
            }
            None => parts.push(RequestPart::Text(IMAGE_ONLY_DIRECTIVE.to_string())),
        }
        Self { parts }
    }

    pub fn text(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            RequestPart::Text(text) => Some(text.as_str()),
            RequestPart::InlineImage(_) => None,
        })
    }
}

/// Assembles the payload. Garment precedes subject; the image model's
/// contract depends on that order.
pub fn build_payload(
    request: &TryOnRequest,
    garment: CanonicalImage,
    base_photo: CanonicalImage,
) -> GenerationPayload {
    GenerationPayload {
        parts: vec![
            RequestPart::InlineImage(garment),
            RequestPart::InlineImage(base_photo),
            RequestPart::Text(instruction_text(
                &request.garment_name,
                request.garment_description.as_deref(),
                request.prompt_version,
            )),
        ],
    }
}

pub fn instruction_text(name: &str, description: Option<&str>, version: PromptVersion) -> String {
    let item = match description.map(str::trim).filter(|value| !value.is_empty()) {
        Some(description) => format!("{}: {description}", name.trim()),
        None => name.trim().to_string(),
    };
    let mut text = format!(
        "You are a professional virtual try-on system. The first image contains a clothing item ({item}). The second image contains a person (model/user).

Task: Generate a realistic virtual try-on image where the person from the second image is wearing the clothing item from the first image.

Requirements:
1. Preserve the person's identity: facial features, body proportions, and pose from the second image.
2. Apply the clothing item from the first image onto the person, keeping any garments they already wear unless the new item replaces them.
3. Make the clothing fit realistically with proper draping, folds, and fit.
4. Match lighting and shadows so the item looks naturally photographed on the person.
5. Produce a high-quality, professional e-commerce style photo.
6. Output a full-body or appropriately cropped image showing the person wearing the item.

Generate the virtual try-on image now."
    );
    if version == PromptVersion::ImageOnly {
        text.push_str("\n\n");
        text.push_str(IMAGE_ONLY_DIRECTIVE);
    }
    text
}

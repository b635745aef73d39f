use serde::{Deserialize, Serialize};

use crate::errors::ImageAcquisitionError;
use crate::media::ImageReference;

/// A retail product as handed over by product search. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GarmentItem {
    pub name: String,
    /// Product thumbnail or full image, in any form `ImageReference::parse` accepts.
    pub image_url: String,
    pub product_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retailer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl GarmentItem {
    pub fn image_reference(&self) -> Result<ImageReference, ImageAcquisitionError> {
        ImageReference::parse(&self.image_url)
    }

    /// "<brand> <category>", or `None` when both are blank.
    pub fn description(&self) -> Option<String> {
        let joined = format!(
            "{} {}",
            self.brand.as_deref().unwrap_or_default().trim(),
            self.category.as_deref().unwrap_or_default().trim()
        );
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Brand if known, else retailer.
    pub fn seller(&self) -> Option<&str> {
        self.brand
            .as_deref()
            .or(self.retailer.as_deref())
            .filter(|value| !value.trim().is_empty())
    }
}

use crate::errors::{LayeringFailure, TryOnError};
use crate::media::{EncodedImage, ImageReference};

/// Terminal value of one single-garment try-on.
#[derive(Debug)]
pub enum TryOnResult {
    Success { image: EncodedImage },
    Failure(TryOnError),
}

impl TryOnResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn image(&self) -> Option<&EncodedImage> {
        match self {
            Self::Success { image } => Some(image),
            Self::Failure(_) => None,
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(err) => Some(err.to_string()),
        }
    }

    pub fn into_result(self) -> Result<EncodedImage, TryOnError> {
        match self {
            Self::Success { image } => Ok(image),
            Self::Failure(err) => Err(err),
        }
    }
}

impl From<Result<EncodedImage, TryOnError>> for TryOnResult {
    fn from(result: Result<EncodedImage, TryOnError>) -> Self {
        match result {
            Ok(image) => Self::Success { image },
            Err(err) => Self::Failure(err),
        }
    }
}

/// A tolerated failure that stopped layering after at least one success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedLayer {
    pub index: usize,
    pub item_name: String,
    pub reason: String,
}

/// Terminal value of a layering run.
///
/// On success `final_image` is the untouched base photo when no garment was
/// applied, otherwise the output of the last garment that was applied.
#[derive(Debug)]
pub enum OutfitResult {
    Success {
        final_image: ImageReference,
        applied: Vec<String>,
        dropped: Option<DroppedLayer>,
    },
    Failure(LayeringFailure),
}

impl OutfitResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn final_image(&self) -> Option<&ImageReference> {
        match self {
            Self::Success { final_image, .. } => Some(final_image),
            Self::Failure(_) => None,
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(err) => Some(err.to_string()),
        }
    }
}

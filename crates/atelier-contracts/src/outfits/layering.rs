use std::ops::ControlFlow;

use super::{DroppedLayer, OutfitResult, TryOnResult};
use crate::errors::{LayeringFailure, TryOnError};
use crate::garments::GarmentItem;
use crate::media::ImageReference;

/// Whether a failed step may be swallowed in favour of the result so far.
///
/// Only a step after at least one applied garment is tolerated; a failing
/// first garment leaves nothing worth showing.
pub fn should_tolerate_failure(step_index: usize, any_prior_success: bool) -> bool {
    step_index > 0 && any_prior_success
}

struct Layers {
    base: ImageReference,
    applied: Vec<String>,
}

struct Halt {
    layers: Layers,
    index: usize,
    item_name: String,
    cause: TryOnError,
}

/// Folds `items` over `base_photo`, feeding each step's output image to the
/// next step. Stops at the first failure and applies the tolerance policy.
///
/// `apply` receives the step index, the garment, and the current base.
pub fn fold_layers<F>(
    base_photo: ImageReference,
    items: &[GarmentItem],
    mut apply: F,
) -> OutfitResult
where
    F: FnMut(usize, &GarmentItem, &ImageReference) -> TryOnResult,
{
    let start = Layers {
        base: base_photo,
        applied: Vec::new(),
    };
    let folded = items
        .iter()
        .enumerate()
        .try_fold(start, |mut layers, (index, item)| {
            match apply(index, item, &layers.base) {
                TryOnResult::Success { image } => {
                    layers.base = ImageReference::Inline(image);
                    layers.applied.push(item.name.clone());
                    ControlFlow::Continue(layers)
                }
                TryOnResult::Failure(cause) => ControlFlow::Break(Halt {
                    layers,
                    index,
                    item_name: item.name.clone(),
                    cause,
                }),
            }
        });

    match folded {
        ControlFlow::Continue(layers) => OutfitResult::Success {
            final_image: layers.base,
            applied: layers.applied,
            dropped: None,
        },
        ControlFlow::Break(halt) => {
            if should_tolerate_failure(halt.index, !halt.layers.applied.is_empty()) {
                OutfitResult::Success {
                    final_image: halt.layers.base,
                    applied: halt.layers.applied,
                    dropped: Some(DroppedLayer {
                        index: halt.index,
                        item_name: halt.item_name,
                        reason: halt.cause.to_string(),
                    }),
                }
            } else {
                OutfitResult::Failure(LayeringFailure::FirstItemFailed {
                    item_name: halt.item_name,
                    cause: halt.cause,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{GenerationFailure, RemoteCapabilityError};
    use crate::media::EncodedImage;

    fn garment(name: &str) -> GarmentItem {
        GarmentItem {
            name: name.to_string(),
            image_url: format!("https://cdn.example.com/{name}.jpg"),
            product_url: format!("https://shop.example.com/{name}"),
            price: None,
            currency: None,
            brand: None,
            retailer: None,
            category: None,
        }
    }

    fn photo() -> ImageReference {
        ImageReference::RemoteUrl("https://cdn.example.com/me.jpg".to_string())
    }

    fn layered(name: &str) -> EncodedImage {
        EncodedImage::new("image/png", format!("out-{name}"))
    }

    #[test]
    fn tolerance_requires_a_prior_success_after_the_first_step() {
        assert!(!should_tolerate_failure(0, false));
        assert!(!should_tolerate_failure(0, true));
        assert!(!should_tolerate_failure(3, false));
        assert!(should_tolerate_failure(1, true));
    }

    #[test]
    fn empty_outfit_returns_base_photo_unchanged() {
        let mut calls = 0;
        let result = fold_layers(photo(), &[], |_, _, _| {
            calls += 1;
            TryOnResult::Failure(RemoteCapabilityError::EmptyParts.into())
        });
        assert_eq!(calls, 0);
        match result {
            OutfitResult::Success {
                final_image,
                applied,
                dropped,
            } => {
                assert_eq!(final_image, photo());
                assert!(applied.is_empty());
                assert_eq!(dropped, None);
            }
            OutfitResult::Failure(err) => panic!("unexpected failure: {err}"),
        }
    }

    #[test]
    fn each_step_receives_previous_output_as_base() {
        let items = [garment("shirt"), garment("jacket"), garment("hat")];
        let mut seen = Vec::new();
        let result = fold_layers(photo(), &items, |index, item, base| {
            seen.push((index, base.clone()));
            TryOnResult::Success {
                image: layered(&item.name),
            }
        });

        assert_eq!(
            seen,
            vec![
                (0, photo()),
                (1, ImageReference::Inline(layered("shirt"))),
                (2, ImageReference::Inline(layered("jacket"))),
            ]
        );
        assert_eq!(
            result.final_image(),
            Some(&ImageReference::Inline(layered("hat")))
        );
    }

    #[test]
    fn later_failure_returns_last_successful_layer() {
        let items = [garment("shirt"), garment("jacket"), garment("hat")];
        let mut calls = 0;
        let result = fold_layers(photo(), &items, |index, item, _| {
            calls += 1;
            if index == 1 {
                TryOnResult::Failure(GenerationFailure::Unparseable.into())
            } else {
                TryOnResult::Success {
                    image: layered(&item.name),
                }
            }
        });

        assert_eq!(calls, 2);
        match result {
            OutfitResult::Success {
                final_image,
                applied,
                dropped,
            } => {
                assert_eq!(final_image, ImageReference::Inline(layered("shirt")));
                assert_eq!(applied, vec!["shirt".to_string()]);
                let dropped = dropped.unwrap();
                assert_eq!(dropped.index, 1);
                assert_eq!(dropped.item_name, "jacket");
                assert!(dropped.reason.contains("no recognizable image"));
            }
            OutfitResult::Failure(err) => panic!("unexpected failure: {err}"),
        }
    }

    #[test]
    fn first_failure_fails_the_whole_run() {
        let items = [garment("shirt"), garment("jacket")];
        let result = fold_layers(photo(), &items, |_, _, _| {
            let err = RemoteCapabilityError::NetworkFailure("timed out".to_string());
            TryOnResult::Failure(err.into())
        });
        match result {
            OutfitResult::Failure(LayeringFailure::FirstItemFailed { item_name, cause }) => {
                assert_eq!(item_name, "shirt");
                assert!(matches!(cause, TryOnError::Remote(_)));
            }
            OutfitResult::Success { .. } => panic!("first-item failure must not succeed"),
        }
    }
}

mod layering;
mod outcomes;

pub use layering::{fold_layers, should_tolerate_failure};
pub use outcomes::{DroppedLayer, OutfitResult, TryOnResult};

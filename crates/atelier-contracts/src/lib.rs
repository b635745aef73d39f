pub mod errors;
pub mod events;
pub mod garments;
pub mod generation;
pub mod media;
pub mod outfits;
pub mod text;

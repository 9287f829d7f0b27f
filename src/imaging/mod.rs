pub mod composite;
pub mod mask;
pub mod normalize;

pub use composite::composite;
pub use mask::{GeometricMaskGenerator, MaskGenerator, MaskLayout};
pub use normalize::{normalize_image, NormalizedImage};

//! AssetBundle voice and portrait extraction.
//!
//! A streaming reader for the game's AssetBundle containers, whose blocks are
//! recompressed with the LZ4AK codec, plus the extraction front-ends that turn
//! bundles into per-character audio clips and composited portraits.

pub mod audio;
pub mod container;
pub mod image;
pub mod lz4ak;

pub use audio::{extract_audio_from_bundle, extract_voice_folder, extract_voice_tree, ExtractStats};
pub use container::{Bundle, BundleHeader, BundleObject, DirectoryNode};
pub use image::{extract_image_folder, extract_images_from_bundle};

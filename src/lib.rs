//! layermix
//! ========
//!
//! Rewrite container image layers while keeping the config history aligned
//! with the layer sequence:
//!
//! - [pipeline::repack] decompresses every layer and keeps zstd only where it
//!   actually saves space.
//! - [pipeline::affix] and [pipeline::remix] append a model-weights layer,
//!   tagged through its history comment.
//! - [pipeline::extract] streams weight files back out of a tagged layer.
//!
//! Images are pulled and pushed through the [image::ImageSource] and
//! [image::ImageSink] traits; [oci_archive] implements both for local
//! oci-archive tarballs.

pub mod align;
pub mod error;
pub mod image;
pub mod oci_archive;
pub mod pipeline;
pub mod rewrite;
pub mod transcode;

mod digest;
mod image_name;
mod layer;

pub use digest::Digest;
pub use image::Image;
pub use image_name::{ImageName, Reference};
pub use layer::{Compression, Layer};

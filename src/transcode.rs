//! Per-layer compression selection.

use crate::{
    error::{Error, Result},
    layer::{Compression, Layer},
};
use std::io::Read;

/// Default zstd level. zstd accepts 1-22; this trades a little ratio for
/// throughput on multi-gigabyte weight layers.
pub const DEFAULT_ZSTD_LEVEL: i32 = 11;

/// Recompression must save at least 10% to be worth shipping.
pub const RECOMPRESS_RATIO: f64 = 0.9;

/// How [select_compression] repacks a layer.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Always store the layer uncompressed, skipping the zstd attempt.
    pub no_compression: bool,
    /// zstd compression level (1-22).
    pub level: i32,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        TranscodeConfig {
            no_compression: false,
            level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

/// Repack a single layer, choosing between no compression and zstd.
///
/// The uncompressed candidate is always produced first; zstd is only kept
/// when it shrinks the layer below [RECOMPRESS_RATIO] of its raw size.
/// Already-compressed content (e.g. model weight formats) barely shrinks, so
/// paying decompression cost at pull time for it is not worth it.
///
/// Returns a new [Layer]; the input is never modified. Deterministic for a
/// fixed input stream and level.
pub fn select_compression(layer: &Layer, config: &TranscodeConfig) -> Result<Layer> {
    let mut diff = Vec::with_capacity(layer.diff_size() as usize);
    layer
        .uncompressed()?
        .read_to_end(&mut diff)
        .map_err(Error::LayerRead)?;

    if config.no_compression {
        return Layer::from_diff(diff, Compression::None, 0);
    }

    let recompressed = Layer::from_diff(diff.clone(), Compression::Zstd, config.level)?;
    let ratio = recompressed.size() as f64 / diff.len() as f64;
    log::info!(
        "zstd ratio for layer {}: {:.3} ({} -> {})",
        layer.digest(),
        ratio,
        diff.len(),
        recompressed.size(),
    );
    if saves_enough(recompressed.size(), diff.len() as i64) {
        Ok(recompressed)
    } else {
        Layer::from_diff(diff, Compression::None, 0)
    }
}

/// Whether a recompressed size is worth shipping over the raw one.
///
/// Strictly below [RECOMPRESS_RATIO]: a layer that shrinks to exactly 90%
/// still stays uncompressed.
fn saves_enough(recompressed: i64, uncompressed: i64) -> bool {
    (recompressed as f64 / uncompressed as f64) < RECOMPRESS_RATIO
}

//! Align config history entries with the layer sequence.
//!
//! An image config carries one history entry per build step, but only steps
//! that produced a filesystem diff have a layer behind them. Everything that
//! rewrites layers needs the 1:1 mapping between non-empty entries and layers,
//! so it is built in one place with an explicit invariant check instead of
//! being re-derived with index cursors at each call site.

use crate::error::{Error, Result};
use oci_spec::image::History;

/// A history entry paired with the layer it produced, if any.
#[derive(Debug, Clone)]
pub struct AlignedEntry<L> {
    pub history: History,
    pub layer: Option<L>,
}

/// True when the entry produced no filesystem diff.
///
/// An absent `empty_layer` field means false per the OCI image spec.
pub fn is_empty_layer(history: &History) -> bool {
    history.empty_layer().unwrap_or(false)
}

/// Pair each history entry with the layer it produced, preserving order.
///
/// The number of non-empty history entries must equal the number of layers;
/// otherwise the config no longer describes the layer list and the whole
/// operation must fail with [Error::ManifestInconsistent] rather than guess a
/// mapping. Trailing empty entries after the last layer are kept, so the
/// output always has exactly one element per history entry.
pub fn align<L>(history: &[History], layers: Vec<L>) -> Result<Vec<AlignedEntry<L>>> {
    let non_empty_history = history.iter().filter(|h| !is_empty_layer(h)).count();
    if non_empty_history != layers.len() {
        return Err(Error::ManifestInconsistent {
            non_empty_history,
            layers: layers.len(),
        });
    }

    let mut layers = layers.into_iter();
    Ok(history
        .iter()
        .map(|h| AlignedEntry {
            history: h.clone(),
            layer: if is_empty_layer(h) {
                None
            } else {
                // Cannot be exhausted: counts are checked above
                layers.next()
            },
        })
        .collect())
}

//! Streaming tar rewriter for weight extraction.

use crate::error::{Error, Result};
use std::io::{Read, Write};

/// Whiteout marker used by layered filesystems to hide paths from lower
/// layers. Entries carrying it are deletion markers, not content, and must
/// never appear in extracted output.
pub const WHITEOUT_MARKER: &str = ".wh..wh..";

/// Entry name prefix under which cog images store model weights.
pub const WEIGHTS_PREFIX: &str = "src/weights/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteMode {
    /// Emit only entries under the prefix, renamed with the prefix stripped.
    Extract,
    /// Emit every entry; those under the prefix are renamed, the rest pass
    /// through unchanged.
    CopyThrough,
}

/// Stream a tar archive from `src` to `dst`, one entry at a time.
///
/// Whiteout entries are dropped in both modes. An entry whose stripped name
/// would be empty (the prefix directory itself) is dropped as well. Returns
/// whether at least one regular file was found under the prefix; callers
/// decide whether `false` is an error.
///
/// Any read or write failure aborts with [Error::TarStream] before the
/// current entry is finished, so a truncated entry is never followed by an
/// archive terminator.
pub fn rewrite_tar<R: Read, W: Write>(
    src: R,
    dst: W,
    prefix: &str,
    mode: RewriteMode,
) -> Result<bool> {
    let mut archive = tar::Archive::new(src);
    let mut builder = tar::Builder::new(dst);
    let mut weights_found = false;

    for entry in archive.entries().map_err(Error::TarStream)? {
        let mut entry = entry.map_err(Error::TarStream)?;
        let name = entry
            .path()
            .map_err(Error::TarStream)?
            .to_string_lossy()
            .into_owned();

        if name.contains(WHITEOUT_MARKER) {
            continue;
        }

        let mut header = entry.header().clone();
        if let Some(stripped) = name.strip_prefix(prefix) {
            if stripped.is_empty() {
                continue;
            }
            if header.entry_type().is_file() {
                weights_found = true;
            }
            log::debug!("{}", stripped);
            builder
                .append_data(&mut header, stripped.to_owned(), &mut entry)
                .map_err(Error::TarStream)?;
        } else if mode == RewriteMode::CopyThrough {
            builder
                .append_data(&mut header, name, &mut entry)
                .map_err(Error::TarStream)?;
        }
    }

    builder.finish().map_err(Error::TarStream)?;
    Ok(weights_found)
}

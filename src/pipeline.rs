//! Image-level operations: repack, affix, remix, extract.
//!
//! Every operation is a pure pull → transform → push step over in-memory
//! [Image] values with no state between calls. Failures abort before
//! anything is pushed.

use crate::{
    align::{align, is_empty_layer},
    error::{Error, Result},
    rewrite::{rewrite_tar, RewriteMode},
    transcode::{select_compression, TranscodeConfig},
    Digest, Image, Layer,
};
use chrono::{SecondsFormat, Utc};
use oci_spec::image::{
    History, HistoryBuilder, ImageConfigurationBuilder, MediaType, RootFsBuilder,
};
use std::io::Write;

/// History comment marking the model-weights layer.
///
/// The comment is the canonical tag; `created_by` also ends in `# weights`
/// for humans reading the history but is never matched on.
pub const WEIGHTS_TAG: &str = "weights";

/// Options for [repack].
#[derive(Debug, Clone, Default)]
pub struct RepackOptions {
    pub transcode: TranscodeConfig,
    /// Normalize the config and per-entry creation timestamps to this
    /// RFC 3339 value for reproducible digests. Timestamps are kept when
    /// unset.
    pub created: Option<String>,
}

/// Repack every layer of `base`, choosing per layer between no compression
/// and zstd, and rebuild the config around the new layer list.
///
/// History keeps its full length and order, empty-layer entries included.
/// Architecture, OS, OS version and the runtime config block are restored
/// from the base config; the `author` of every history entry is dropped
/// since it only hinders reproducibility, while `created_by` is preserved.
pub fn repack(base: &Image, options: &RepackOptions) -> Result<Image> {
    let base_config = base.config_file();
    let aligned = align(base_config.history(), base.layers().to_vec())?;

    let mut layers = Vec::with_capacity(base.layers().len());
    let mut history = Vec::with_capacity(aligned.len());
    for entry in aligned {
        if let Some(layer) = entry.layer {
            log::info!(
                "repacking layer {} created by {}",
                layers.len(),
                entry.history.created_by().as_deref().unwrap_or("<unknown>"),
            );
            layers.push(select_compression(&layer, &options.transcode)?);
        }
        history.push(restored_history(&entry.history, options.created.as_deref())?);
    }

    let mut builder = ImageConfigurationBuilder::default()
        .architecture(base_config.architecture().clone())
        .os(base_config.os().clone())
        .rootfs(
            RootFsBuilder::default()
                .typ("layers")
                .diff_ids(
                    layers
                        .iter()
                        .map(|l| l.diff_id().to_string())
                        .collect::<Vec<_>>(),
                )
                .build()?,
        )
        .history(history);
    if let Some(os_version) = base_config.os_version() {
        builder = builder.os_version(os_version.clone());
    }
    if let Some(config) = base_config.config() {
        builder = builder.config(config.clone());
    }
    if let Some(created) = options
        .created
        .clone()
        .or_else(|| base_config.created().clone())
    {
        builder = builder.created(created);
    }
    Image::new(builder.build()?, layers)
}

/// Copy of a history entry with `author` dropped and `created` optionally
/// overridden.
fn restored_history(history: &History, created: Option<&str>) -> Result<History> {
    let mut builder = HistoryBuilder::default();
    if let Some(created) = created.map(str::to_owned).or_else(|| history.created().clone()) {
        builder = builder.created(created);
    }
    if let Some(created_by) = history.created_by() {
        builder = builder.created_by(created_by.clone());
    }
    if let Some(comment) = history.comment() {
        builder = builder.comment(comment.clone());
    }
    if let Some(empty_layer) = history.empty_layer() {
        builder = builder.empty_layer(empty_layer);
    }
    Ok(builder.build()?)
}

/// Append one layer to `base` with a synthesized history entry tagged
/// `comment`.
pub fn affix(base: &Image, layer: Layer, comment: &str) -> Result<Image> {
    let history = HistoryBuilder::default()
        .created(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
        .created_by(format!("cp . /src/{} # {}", comment, comment))
        .comment(comment)
        .empty_layer(false)
        .build()?;
    base.append_layers(vec![(layer, history)])
}

/// Find the layer whose history entry's comment equals `tag`.
///
/// Walks the history in order, advancing a layer cursor past each non-empty
/// entry, so the match maps to the correct element of the layer sequence.
pub fn find_tagged_layer<'a>(image: &'a Image, tag: &str) -> Result<&'a Layer> {
    let mut cursor = 0;
    for history in image.config_file().history() {
        if is_empty_layer(history) {
            continue;
        }
        if history.comment().as_deref() == Some(tag) {
            return image.layers().get(cursor).ok_or(Error::ManifestInconsistent {
                non_empty_history: cursor + 1,
                layers: image.layers().len(),
            });
        }
        cursor += 1;
    }
    Err(Error::LayerNotFound(tag.to_string()))
}

/// Take the layer tagged `tag` from `weights` and append it onto `base`.
pub fn remix(base: &Image, weights: &Image, tag: &str) -> Result<Image> {
    let layer = find_tagged_layer(weights, tag)?;
    log::info!(
        "remixing layer {} ({} bytes) onto base",
        layer.digest(),
        layer.size(),
    );
    affix(base, layer.clone(), tag)
}

/// Extract weight files from the layer tagged `tag` into `dest` as a tar
/// stream, stripping `prefix` from entry names.
///
/// In [RewriteMode::Extract] a tagged layer that contains no regular file
/// under `prefix` is an error; an empty extraction must not look like a
/// successful one. [RewriteMode::CopyThrough] keeps the whole layer (minus
/// whiteouts) and is allowed to match nothing.
pub fn extract<W: Write>(
    image: &Image,
    tag: &str,
    prefix: &str,
    mode: RewriteMode,
    dest: W,
) -> Result<()> {
    let layer = find_tagged_layer(image, tag)?;
    let found = rewrite_tar(layer.uncompressed()?, dest, prefix, mode)?;
    if !found && mode == RewriteMode::Extract {
        return Err(Error::WeightsNotFound(prefix.to_string()));
    }
    Ok(())
}

/// One row of `layermix layers` output.
#[derive(Debug, Clone)]
pub struct LayerSummary {
    pub digest: Digest,
    pub size: i64,
    pub media_type: MediaType,
    pub command: String,
}

/// Per-layer digest, size, media type and the trimmed command that produced
/// it.
pub fn summaries(image: &Image) -> Result<Vec<LayerSummary>> {
    let aligned = align(image.config_file().history(), image.layers().to_vec())?;
    Ok(aligned
        .into_iter()
        .filter_map(|entry| {
            let layer = entry.layer?;
            Some(LayerSummary {
                digest: layer.digest().clone(),
                size: layer.size(),
                media_type: layer.media_type().clone(),
                command: trim_command(entry.history.created_by().as_deref().unwrap_or("")),
            })
        })
        .collect())
}

/// Strip shell and buildkit noise from a `created_by` command and cap its
/// length for one-line display.
fn trim_command(created_by: &str) -> String {
    created_by
        .trim_start_matches("/bin/sh -c ")
        .trim_start_matches("#(nop) ")
        .chars()
        .take(40)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Compression;
    use oci_spec::image::{Arch, Config, ConfigBuilder, ImageConfiguration, Os};

    fn history(comment: &str, created_by: &str, empty: bool, author: Option<&str>) -> History {
        let mut builder = HistoryBuilder::default()
            .created_by(created_by)
            .comment(comment)
            .empty_layer(empty);
        if let Some(author) = author {
            builder = builder.author(author);
        }
        builder.build().unwrap()
    }

    fn runtime_config() -> Config {
        ConfigBuilder::default()
            .cmd(vec!["python".to_string(), "predict.py".to_string()])
            .build()
            .unwrap()
    }

    fn image(layers: Vec<Layer>, history: Vec<History>) -> Image {
        let config = ImageConfigurationBuilder::default()
            .created("2023-06-01T00:00:00Z")
            .architecture(Arch::Amd64)
            .os(Os::Linux)
            .os_version("6.1")
            .config(runtime_config())
            .rootfs(
                RootFsBuilder::default()
                    .typ("layers")
                    .diff_ids(
                        layers
                            .iter()
                            .map(|l| l.diff_id().to_string())
                            .collect::<Vec<_>>(),
                    )
                    .build()
                    .unwrap(),
            )
            .history(history)
            .build()
            .unwrap();
        Image::new(config, layers).unwrap()
    }

    fn base_image() -> Image {
        image(
            vec![
                Layer::from_diff(vec![0; 32 * 1024], Compression::Gzip, 0).unwrap(),
                Layer::from_diff(b"config files".to_vec(), Compression::Gzip, 0).unwrap(),
            ],
            vec![
                history("", "ENV PATH=/usr/bin", true, None),
                history("", "RUN apt-get install python", false, Some("builder")),
                history("", "COPY . /src", false, Some("builder")),
                history("", "CMD [\"python\"]", true, None),
            ],
        )
    }

    fn weights_image() -> Image {
        let mut tar = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        tar.append_data(&mut header, "src/weights/model.bin", &b"8888"[..])
            .unwrap();
        let diff = tar.into_inner().unwrap();

        image(
            vec![Layer::from_diff(diff, Compression::Gzip, 0).unwrap()],
            vec![
                history("", "FROM scratch", true, None),
                history(WEIGHTS_TAG, "cp . /src/weights # weights", false, None),
            ],
        )
    }

    fn non_empty(config: &ImageConfiguration) -> Vec<&History> {
        config
            .history()
            .iter()
            .filter(|h| !is_empty_layer(h))
            .collect()
    }

    #[test]
    fn repack_preserves_history_shape() -> Result<()> {
        let base = base_image();
        let repacked = repack(&base, &RepackOptions::default())?;

        let config = repacked.config_file();
        assert_eq!(config.history().len(), 4);
        for (original, restored) in base.config_file().history().iter().zip(config.history()) {
            assert_eq!(original.created_by(), restored.created_by());
            assert_eq!(original.empty_layer(), restored.empty_layer());
            assert_eq!(restored.author(), &None, "author must be dropped");
        }
        assert_eq!(repacked.layers().len(), 2);
        assert_eq!(non_empty(config).len(), 2);

        // zeros recompress well, text stays raw
        assert_eq!(
            repacked.layers()[0].media_type(),
            &MediaType::ImageLayerZstd
        );
        assert_eq!(repacked.layers()[1].media_type(), &MediaType::ImageLayer);

        // diff ids survive recompression
        for (original, repacked) in base.layers().iter().zip(repacked.layers()) {
            assert_eq!(original.diff_id(), repacked.diff_id());
        }
        Ok(())
    }

    #[test]
    fn repack_restores_base_config() -> Result<()> {
        let base = base_image();
        let repacked = repack(&base, &RepackOptions::default())?;
        let config = repacked.config_file();
        assert_eq!(config.architecture(), &Arch::Amd64);
        assert_eq!(config.os(), &Os::Linux);
        assert_eq!(config.os_version(), &Some("6.1".to_string()));
        assert_eq!(config.config(), &Some(runtime_config()));
        assert_eq!(config.created(), &Some("2023-06-01T00:00:00Z".to_string()));
        Ok(())
    }

    #[test]
    fn repack_normalizes_created_when_asked() -> Result<()> {
        let options = RepackOptions {
            created: Some("1970-01-01T00:00:00Z".to_string()),
            ..RepackOptions::default()
        };
        let repacked = repack(&base_image(), &options)?;
        let config = repacked.config_file();
        assert_eq!(config.created(), &Some("1970-01-01T00:00:00Z".to_string()));
        for entry in config.history() {
            assert_eq!(entry.created(), &Some("1970-01-01T00:00:00Z".to_string()));
        }
        // identical inputs now give identical digests
        assert_eq!(repack(&base_image(), &options)?.digest()?, repacked.digest()?);
        Ok(())
    }

    #[test]
    fn repack_no_compression() -> Result<()> {
        let options = RepackOptions {
            transcode: TranscodeConfig {
                no_compression: true,
                ..TranscodeConfig::default()
            },
            ..RepackOptions::default()
        };
        let repacked = repack(&base_image(), &options)?;
        for layer in repacked.layers() {
            assert_eq!(layer.media_type(), &MediaType::ImageLayer);
            assert_eq!(layer.digest(), layer.diff_id());
        }
        Ok(())
    }

    #[test]
    fn find_tagged_layer_uses_comment() -> Result<()> {
        let weights = weights_image();
        let layer = find_tagged_layer(&weights, WEIGHTS_TAG)?;
        assert_eq!(layer.digest(), weights.layers()[0].digest());

        let err = find_tagged_layer(&base_image(), WEIGHTS_TAG).unwrap_err();
        assert!(matches!(err, Error::LayerNotFound(_)));
        Ok(())
    }

    #[test]
    fn remix_appends_tagged_layer() -> Result<()> {
        let base = base_image();
        let weights = weights_image();
        let remixed = remix(&base, &weights, WEIGHTS_TAG)?;

        assert_eq!(remixed.layers().len(), base.layers().len() + 1);
        assert_eq!(
            remixed.layers().last().unwrap().digest(),
            weights.layers()[0].digest(),
            "weights blob must be carried over unchanged"
        );
        let appended = remixed.config_file().history().last().unwrap();
        assert_eq!(appended.comment(), &Some(WEIGHTS_TAG.to_string()));
        assert_eq!(appended.empty_layer(), Some(false));
        Ok(())
    }

    #[test]
    fn extract_writes_renamed_weights() -> Result<()> {
        let weights = weights_image();
        let mut out = Vec::new();
        extract(
            &weights,
            WEIGHTS_TAG,
            "src/weights/",
            RewriteMode::Extract,
            &mut out,
        )?;

        let mut archive = tar::Archive::new(&out[..]);
        let entry = archive.entries()?.next().unwrap()?;
        assert_eq!(entry.path()?.to_string_lossy(), "model.bin");
        Ok(())
    }

    #[test]
    fn extract_without_weight_files_fails() {
        // tagged layer exists but holds nothing under the prefix
        let mut tar = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o644);
        tar.append_data(&mut header, "src/server.py", &b""[..])
            .unwrap();
        let diff = tar.into_inner().unwrap();

        let image = image(
            vec![Layer::from_diff(diff, Compression::None, 0).unwrap()],
            vec![history(WEIGHTS_TAG, "cp . /src/weights # weights", false, None)],
        );
        let err = extract(
            &image,
            WEIGHTS_TAG,
            "src/weights/",
            RewriteMode::Extract,
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::WeightsNotFound(_)));

        // copy-through keeps the layer as-is and tolerates zero matches
        let mut out = Vec::new();
        extract(
            &image,
            WEIGHTS_TAG,
            "src/weights/",
            RewriteMode::CopyThrough,
            &mut out,
        )
        .unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn remix_through_archives() -> Result<()> {
        use crate::oci_archive::{OciArchive, OciArchiveBuilder};

        let tmp = tempfile::tempdir()?;
        let base_path = tmp.path().join("base.tar");
        let weights_path = tmp.path().join("weights.tar");
        let out_path = tmp.path().join("remixed.tar");

        base_image().push(OciArchiveBuilder::new(base_path.clone())?)?;
        weights_image().push(OciArchiveBuilder::new(weights_path.clone())?)?;

        let base = Image::from_source(&mut OciArchive::new(&base_path)?)?;
        let weights = Image::from_source(&mut OciArchive::new(&weights_path)?)?;
        let pushed = remix(&base, &weights, WEIGHTS_TAG)?
            .push(OciArchiveBuilder::new(out_path.clone())?)?;

        let remixed = Image::from_source(&mut OciArchive::new(&out_path)?)?;
        assert_eq!(remixed.digest()?, pushed);
        assert_eq!(remixed.layers().len(), 3);
        let layer = find_tagged_layer(&remixed, WEIGHTS_TAG)?;
        assert_eq!(layer.diff_id(), weights.layers()[0].diff_id());

        let mut out = Vec::new();
        extract(
            &remixed,
            WEIGHTS_TAG,
            "src/weights/",
            RewriteMode::Extract,
            &mut out,
        )?;
        let mut archive = tar::Archive::new(&out[..]);
        assert_eq!(
            archive.entries()?.next().unwrap()?.path()?.to_string_lossy(),
            "model.bin"
        );
        Ok(())
    }

    #[test]
    fn summaries_trim_commands() -> Result<()> {
        let image = image(
            vec![Layer::from_diff(b"diff".to_vec(), Compression::Gzip, 0).unwrap()],
            vec![history(
                "",
                "/bin/sh -c #(nop) COPY a-very-long-build-instruction-that-keeps-going .",
                false,
                None,
            )],
        );
        let rows = summaries(&image)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].command.len(), 40);
        assert!(rows[0].command.starts_with("COPY "));
        assert_eq!(&rows[0].digest, image.layers()[0].digest());
        Ok(())
    }
}

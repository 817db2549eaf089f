use crate::{
    error::{Error, Result},
    Digest,
};
use flate2::{read::GzDecoder, write::GzEncoder};
use oci_spec::image::MediaType;
use std::io::{Read, Write};

/// Compression applied to a layer blob as stored in a registry or archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Detect compression from the layer descriptor's media type.
    ///
    /// Both OCI and Docker layer media types are accepted since pulled images
    /// commonly carry the Docker variants.
    pub fn from_media_type(media_type: &MediaType) -> Result<Self> {
        match media_type {
            MediaType::ImageLayer => Ok(Compression::None),
            MediaType::ImageLayerGzip => Ok(Compression::Gzip),
            MediaType::ImageLayerZstd => Ok(Compression::Zstd),
            MediaType::Other(s) if s.ends_with(".tar.gzip") => Ok(Compression::Gzip),
            MediaType::Other(s) if s.ends_with(".tar.zstd") => Ok(Compression::Zstd),
            MediaType::Other(s) if s.ends_with(".tar") => Ok(Compression::None),
            other => Err(Error::UnsupportedMediaType(other.to_string())),
        }
    }

    /// OCI media type for layers repacked with this compression.
    pub fn media_type(&self) -> MediaType {
        match self {
            Compression::None => MediaType::ImageLayer,
            Compression::Gzip => MediaType::ImageLayerGzip,
            Compression::Zstd => MediaType::ImageLayerZstd,
        }
    }
}

/// Content-addressed layer blob.
///
/// A layer is immutable; repacking produces a new [Layer] and never mutates
/// the original. `digest` identifies the blob as stored, `diff_id` the
/// uncompressed tar stream, so the same filesystem diff keeps its identity
/// across compression changes.
#[derive(Debug, Clone)]
pub struct Layer {
    blob: Vec<u8>,
    compression: Compression,
    media_type: MediaType,
    digest: Digest,
    diff_id: Digest,
    diff_size: i64,
}

fn decode<'a>(blob: &'a [u8], compression: Compression) -> Result<Box<dyn Read + 'a>> {
    Ok(match compression {
        Compression::None => Box::new(blob),
        Compression::Gzip => Box::new(GzDecoder::new(blob)),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(blob).map_err(Error::LayerRead)?),
    })
}

impl Layer {
    /// Wrap a blob pulled from a registry or archive, keeping its media type.
    ///
    /// The blob is decoded once to compute `diff_id`; a broken stream is
    /// reported as [Error::LayerRead].
    pub fn from_blob(blob: Vec<u8>, media_type: &MediaType) -> Result<Self> {
        let compression = Compression::from_media_type(media_type)?;
        let mut diff = Vec::new();
        decode(&blob, compression)?
            .read_to_end(&mut diff)
            .map_err(Error::LayerRead)?;
        Ok(Layer {
            digest: Digest::from_buf_sha256(&blob),
            diff_id: Digest::from_buf_sha256(&diff),
            diff_size: diff.len() as i64,
            media_type: media_type.clone(),
            blob,
            compression,
        })
    }

    /// Build a layer from an uncompressed tar stream.
    ///
    /// `level` is only meaningful for zstd (1-22); gzip uses the flate2
    /// default and `Compression::None` stores the bytes as-is.
    pub fn from_diff(diff: Vec<u8>, compression: Compression, level: i32) -> Result<Self> {
        let diff_id = Digest::from_buf_sha256(&diff);
        let diff_size = diff.len() as i64;
        let blob = match compression {
            Compression::None => diff,
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&diff)?;
                encoder.finish()?
            }
            Compression::Zstd => zstd::stream::encode_all(&diff[..], level)?,
        };
        Ok(Layer {
            digest: Digest::from_buf_sha256(&blob),
            diff_id,
            diff_size,
            media_type: compression.media_type(),
            blob,
            compression,
        })
    }

    /// Digest of the blob as stored.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Digest of the uncompressed tar stream.
    pub fn diff_id(&self) -> &Digest {
        &self.diff_id
    }

    /// Size of the blob as stored.
    pub fn size(&self) -> i64 {
        self.blob.len() as i64
    }

    /// Size of the uncompressed tar stream.
    pub fn diff_size(&self) -> i64 {
        self.diff_size
    }

    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Blob bytes as stored.
    pub fn compressed(&self) -> &[u8] {
        &self.blob
    }

    /// Streaming reader over the uncompressed tar stream.
    pub fn uncompressed(&self) -> Result<Box<dyn Read + '_>> {
        decode(&self.blob, self.compression)
    }
}

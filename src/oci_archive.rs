//! oci-archive files as image source and sink.
//!
//! An oci-archive is a tarball of a directory in the form of
//! [OCI Image Layout](https://github.com/opencontainers/image-spec/blob/v1.1.0/image-layout.md):
//! `index.json`, `oci-layout` and content-addressed blobs under `blobs/`.

use crate::{
    error::{Error, Result},
    image::{ImageSink, ImageSource},
    Digest, ImageName,
};
use chrono::Utc;
use oci_spec::image::{
    DescriptorBuilder, ImageIndex, ImageIndexBuilder, ImageManifest, MediaType,
};
use std::{
    collections::HashMap,
    fs,
    io::{Read, Seek},
    path::{Path, PathBuf},
};

const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// Read side of an oci-archive.
pub struct OciArchive {
    archive: Option<tar::Archive<fs::File>>,
}

impl OciArchive {
    pub fn new(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotAFile(path.to_owned()));
        }
        let f = fs::File::open(path)?;
        Ok(Self {
            archive: Some(tar::Archive::new(f)),
        })
    }

    // A tar archive can only be iterated front to back, so every lookup
    // rewinds the file and rebuilds the reader.
    fn entries(&mut self) -> Result<tar::Entries<'_, fs::File>> {
        let raw = self
            .archive
            .take()
            .expect("This never becomes None except in this function");
        let mut inner = raw.into_inner();
        inner.rewind()?;
        self.archive = Some(tar::Archive::new(inner));
        Ok(self
            .archive
            .as_mut()
            .expect("This never becomes None except in this function")
            .entries_with_seek()?)
    }

    fn get_index(&mut self) -> Result<ImageIndex> {
        for entry in self.entries()? {
            let entry = entry?;
            if entry.path()?.as_os_str() == "index.json" {
                return Ok(serde_json::from_reader(entry)?);
            }
        }
        Err(Error::MissingIndex)
    }
}

impl ImageSource for OciArchive {
    fn get_manifest(&mut self) -> Result<ImageManifest> {
        let index = self.get_index()?;
        let descriptor = index.manifests().first().ok_or(Error::MissingManifest)?;
        let digest = Digest::from_descriptor(descriptor)?;
        let blob = self.get_blob(&digest)?;
        Ok(serde_json::from_slice(&blob)?)
    }

    fn get_blob(&mut self, digest: &Digest) -> Result<Vec<u8>> {
        for entry in self.entries()? {
            let mut entry = entry?;
            if entry.path()? == digest.as_path() {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf).map_err(Error::LayerRead)?;
                return Ok(buf);
            }
        }
        Err(Error::MissingBlob(digest.clone()))
    }

    fn get_name(&mut self) -> Result<Option<ImageName>> {
        let index = self.get_index()?;
        let Some(descriptor) = index.manifests().first() else {
            return Ok(None);
        };
        let Some(annotations) = descriptor.annotations() else {
            return Ok(None);
        };
        match annotations.get(REF_NAME_ANNOTATION) {
            Some(name) => Ok(Some(ImageName::parse(name)?)),
            None => Ok(None),
        }
    }
}

/// Write side of an oci-archive. Refuses to overwrite an existing file.
pub struct OciArchiveBuilder {
    ar: tar::Builder<fs::File>,
}

impl OciArchiveBuilder {
    pub fn new(out: PathBuf) -> Result<Self> {
        if out.exists() {
            return Err(Error::FileAlreadyExists(out));
        }
        let f = fs::File::create(&out)?;
        let ar = tar::Builder::new(f);
        Ok(Self { ar })
    }

    fn append(&mut self, path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
        self.ar
            .append_data(&mut create_file_header(data.len()), path, data)?;
        Ok(())
    }
}

impl ImageSink for OciArchiveBuilder {
    fn add_blob(&mut self, data: &[u8]) -> Result<(Digest, i64)> {
        let digest = Digest::from_buf_sha256(data);
        self.append(digest.as_path(), data)?;
        Ok((digest, data.len() as i64))
    }

    fn finish(mut self, manifest: &ImageManifest, name: Option<&ImageName>) -> Result<Digest> {
        let manifest_json = serde_json::to_string(manifest)?;
        let (digest, size) = self.add_blob(manifest_json.as_bytes())?;

        let mut descriptor = DescriptorBuilder::default()
            .media_type(MediaType::ImageManifest)
            .size(size)
            .digest(digest.to_string());
        if let Some(name) = name {
            descriptor = descriptor.annotations(HashMap::from([(
                REF_NAME_ANNOTATION.to_string(),
                name.to_string(),
            )]));
        }
        let index = ImageIndexBuilder::default()
            .schema_version(2_u32)
            .manifests(vec![descriptor.build()?])
            .build()?;

        self.append("oci-layout", br#"{"imageLayoutVersion":"1.0.0"}"#)?;
        let index_json = serde_json::to_string(&index)?;
        self.append("index.json", index_json.as_bytes())?;

        self.ar.finish()?;
        Ok(digest)
    }
}

fn create_file_header(size: usize) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_size(size as u64);
    header.set_cksum();
    header.set_mode(0o644);
    header.set_mtime(Utc::now().timestamp() as u64);
    header
}

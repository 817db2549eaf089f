//! In-memory image model and the pull/push seam.

use crate::{
    error::{Error, Result},
    Digest, ImageName, Layer,
};
use oci_spec::image::{
    DescriptorBuilder, History, ImageConfiguration, ImageConfigurationBuilder, ImageManifest,
    ImageManifestBuilder, MediaType, RootFsBuilder,
};

/// Where a manifest and its blobs are pulled from.
///
/// Implementations own transport concerns (archives here, registries
/// elsewhere); the pipeline never sees more than this.
pub trait ImageSource {
    fn get_manifest(&mut self) -> Result<ImageManifest>;
    fn get_blob(&mut self, digest: &Digest) -> Result<Vec<u8>>;
    fn get_name(&mut self) -> Result<Option<ImageName>>;
}

/// Where a fully assembled image is pushed to.
pub trait ImageSink {
    fn add_blob(&mut self, data: &[u8]) -> Result<(Digest, i64)>;
    /// Store the manifest and return its digest. Called exactly once, last.
    fn finish(self, manifest: &ImageManifest, name: Option<&ImageName>) -> Result<Digest>;
}

/// An ordered layer sequence plus its config.
///
/// Immutable; every rewrite produces a new [Image]. The config's
/// `rootfs.diff_ids` always match the layer sequence, checked at
/// construction so a half-rewritten image can never be pushed.
#[derive(Debug)]
pub struct Image {
    config: ImageConfiguration,
    layers: Vec<Layer>,
    name: Option<ImageName>,
}

impl Image {
    pub fn new(config: ImageConfiguration, layers: Vec<Layer>) -> Result<Self> {
        let diff_ids = config.rootfs().diff_ids();
        if diff_ids.len() != layers.len() {
            return Err(Error::RootFsInconsistent {
                diff_ids: diff_ids.len(),
                layers: layers.len(),
            });
        }
        Ok(Image {
            config,
            layers,
            name: None,
        })
    }

    pub fn with_name(mut self, name: ImageName) -> Self {
        self.name = Some(name);
        self
    }

    pub fn name(&self) -> Option<&ImageName> {
        self.name.as_ref()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn config_file(&self) -> &ImageConfiguration {
        &self.config
    }

    /// Fetch manifest, config and all layer blobs from a source.
    pub fn from_source(source: &mut impl ImageSource) -> Result<Self> {
        let manifest = source.get_manifest()?;
        let config_digest = Digest::from_descriptor(manifest.config())?;
        let config = serde_json::from_slice(&source.get_blob(&config_digest)?)?;

        let mut layers = Vec::with_capacity(manifest.layers().len());
        for descriptor in manifest.layers() {
            let blob = source.get_blob(&Digest::from_descriptor(descriptor)?)?;
            layers.push(Layer::from_blob(blob, descriptor.media_type())?);
        }

        let name = source.get_name()?;
        let mut image = Image::new(config, layers)?;
        image.name = name;
        Ok(image)
    }

    fn assemble_manifest(&self) -> Result<(String, ImageManifest)> {
        let config_json = serde_json::to_string(&self.config)?;
        let config_descriptor = DescriptorBuilder::default()
            .media_type(MediaType::ImageConfig)
            .digest(Digest::from_buf_sha256(config_json.as_bytes()).to_string())
            .size(config_json.len() as i64)
            .build()?;

        let mut layer_descriptors = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            layer_descriptors.push(
                DescriptorBuilder::default()
                    .media_type(layer.media_type().clone())
                    .digest(layer.digest().to_string())
                    .size(layer.size())
                    .build()?,
            );
        }

        let manifest = ImageManifestBuilder::default()
            .schema_version(2_u32)
            .media_type(MediaType::ImageManifest)
            .config(config_descriptor)
            .layers(layer_descriptors)
            .build()?;
        Ok((config_json, manifest))
    }

    pub fn manifest(&self) -> Result<ImageManifest> {
        Ok(self.assemble_manifest()?.1)
    }

    /// Digest the image would get when pushed.
    pub fn digest(&self) -> Result<Digest> {
        let (_, manifest) = self.assemble_manifest()?;
        Ok(Digest::from_buf_sha256(
            serde_json::to_string(&manifest)?.as_bytes(),
        ))
    }

    /// Upload config, layers and manifest. Blobs are only written once the
    /// whole image is assembled in memory, so a failed rewrite never leaves a
    /// pushed half-image behind.
    pub fn push<S: ImageSink>(&self, mut sink: S) -> Result<Digest> {
        let (config_json, manifest) = self.assemble_manifest()?;
        sink.add_blob(config_json.as_bytes())?;
        for layer in &self.layers {
            sink.add_blob(layer.compressed())?;
        }
        sink.finish(&manifest, self.name.as_ref())
    }

    /// New image with `additions` appended, keeping rootfs diff_ids and
    /// history in step with the layer sequence.
    pub fn append_layers(&self, additions: Vec<(Layer, History)>) -> Result<Image> {
        let mut layers = self.layers.clone();
        let mut history = self.config.history().clone();
        let mut diff_ids = self.config.rootfs().diff_ids().clone();
        for (layer, entry) in additions {
            diff_ids.push(layer.diff_id().to_string());
            history.push(entry);
            layers.push(layer);
        }

        let mut builder = ImageConfigurationBuilder::default()
            .architecture(self.config.architecture().clone())
            .os(self.config.os().clone())
            .rootfs(
                RootFsBuilder::default()
                    .typ("layers")
                    .diff_ids(diff_ids)
                    .build()?,
            )
            .history(history);
        if let Some(created) = self.config.created() {
            builder = builder.created(created.clone());
        }
        if let Some(author) = self.config.author() {
            builder = builder.author(author.clone());
        }
        if let Some(os_version) = self.config.os_version() {
            builder = builder.os_version(os_version.clone());
        }
        if let Some(config) = self.config.config() {
            builder = builder.config(config.clone());
        }
        Image::new(builder.build()?, layers)
    }
}

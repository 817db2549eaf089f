use crate::Digest;
use oci_spec::OciSpecError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    //
    // Invalid user input
    //
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),
    #[error("Invalid name for image: {0}")]
    InvalidImageName(String),
    #[error("Not a file, or not exist: {0}")]
    NotAFile(PathBuf),
    #[error("Output already exists: {0}")]
    FileAlreadyExists(PathBuf),

    //
    // Invalid container image
    //
    #[error(
        "Number of non-empty history entries ({non_empty_history}) \
         is different from number of layers ({layers})"
    )]
    ManifestInconsistent {
        non_empty_history: usize,
        layers: usize,
    },
    #[error("Number of rootfs diff_ids ({diff_ids}) is different from number of layers ({layers})")]
    RootFsInconsistent { diff_ids: usize, layers: usize },
    #[error("No layer tagged {0:?} found in image history")]
    LayerNotFound(String),
    #[error("No entries under {0:?} found in weights layer")]
    WeightsNotFound(String),
    #[error("No index.json is included in oci-archive")]
    MissingIndex,
    #[error("No manifest found in image index")]
    MissingManifest,
    #[error("Unknown digest in oci-archive: {0}")]
    MissingBlob(Digest),
    #[error("Unsupported layer media type: {0}")]
    UnsupportedMediaType(String),
    #[error(transparent)]
    InvalidJson(#[from] serde_json::error::Error),

    //
    // Stream failure
    //
    #[error("Reading layer contents: {0}")]
    LayerRead(#[source] std::io::Error),
    #[error("Tar stream broken: {0}")]
    TarStream(#[source] std::io::Error),

    //
    // System error
    //
    #[error(transparent)]
    UnknownIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<OciSpecError> for Error {
    fn from(e: OciSpecError) -> Self {
        match e {
            OciSpecError::SerDe(e) => Error::InvalidJson(e),
            OciSpecError::Io(e) => Error::UnknownIo(e),
            OciSpecError::Builder(_) => unreachable!(),
            OciSpecError::Other(e) => panic!("Unknown error within oci_spec: {}", e),
        }
    }
}

use clap::Parser;
use layermix::{
    error::*,
    oci_archive::{OciArchive, OciArchiveBuilder},
    pipeline,
    pipeline::RepackOptions,
    rewrite::{RewriteMode, WEIGHTS_PREFIX},
    transcode::{TranscodeConfig, DEFAULT_ZSTD_LEVEL},
    Compression, Image, ImageName, Layer,
};
use std::{
    fs,
    io::{Read, Write},
    path::PathBuf,
};

#[derive(Debug, Parser)]
#[command(version, about = "Rewrite container image layers in oci-archive files")]
enum Opt {
    /// List layers of an image with the commands that produced them
    Layers {
        /// Input oci-archive
        image: PathBuf,
    },

    /// Repack all layers, keeping zstd only where it saves at least 10%
    Repack {
        /// Input oci-archive
        image: PathBuf,

        /// Output oci-archive
        output: PathBuf,

        /// Store every layer uncompressed, skipping the zstd attempt
        #[arg(long)]
        no_compression: bool,

        /// zstd compression level (1-22)
        #[arg(long, default_value_t = DEFAULT_ZSTD_LEVEL)]
        level: i32,

        /// Normalize creation timestamps to this RFC 3339 value
        #[arg(long)]
        created: Option<String>,

        /// Name to record in the output archive, e.g. r8im/faster:latest
        #[arg(short = 't', long = "tag")]
        tag: Option<String>,
    },

    /// Append a tar file as a new weights layer
    Affix {
        /// Input oci-archive
        image: PathBuf,

        /// Uncompressed tar file with the new layer contents, or - for stdin
        layer: PathBuf,

        /// Output oci-archive
        output: PathBuf,

        /// History comment tagging the new layer
        #[arg(long, default_value = pipeline::WEIGHTS_TAG)]
        comment: String,

        /// Name to record in the output archive
        #[arg(short = 't', long = "tag")]
        tag: Option<String>,
    },

    /// Append the weights layer of one image onto another
    Remix {
        /// Base image oci-archive
        base: PathBuf,

        /// Image carrying the tagged weights layer
        weights: PathBuf,

        /// Output oci-archive
        output: PathBuf,

        /// History comment identifying the weights layer
        #[arg(long, default_value = pipeline::WEIGHTS_TAG)]
        comment: String,

        /// Name to record in the output archive
        #[arg(short = 't', long = "tag")]
        tag: Option<String>,
    },

    /// Extract weight files from the tagged layer as a tar stream
    Extract {
        /// Input oci-archive
        image: PathBuf,

        /// Destination tar file, stdout if not set
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Entry name prefix to strip
        #[arg(long, default_value = WEIGHTS_PREFIX)]
        prefix: String,

        /// History comment identifying the weights layer
        #[arg(long, default_value = pipeline::WEIGHTS_TAG)]
        comment: String,

        /// Keep every entry instead of only those under the prefix
        #[arg(long)]
        all: bool,
    },
}

fn pull(path: &PathBuf) -> Result<Image> {
    log::info!("fetching {}", path.display());
    Image::from_source(&mut OciArchive::new(path)?)
}

fn push(image: Image, output: PathBuf, tag: Option<String>) -> Result<()> {
    let image = match tag {
        Some(tag) => image.with_name(ImageName::parse(&tag)?),
        None => image,
    };
    let digest = image.push(OciArchiveBuilder::new(output.clone())?)?;
    log::info!("pushed {}", output.display());
    println!("{}@{}", output.display(), digest);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    match Opt::parse() {
        Opt::Layers { image } => {
            let image = pull(&image)?;
            for row in pipeline::summaries(&image)? {
                println!(
                    "{}\t{}\t{}\t{}",
                    row.digest, row.size, row.media_type, row.command
                );
            }
        }

        Opt::Repack {
            image,
            output,
            no_compression,
            level,
            created,
            tag,
        } => {
            let base = pull(&image)?;
            let options = RepackOptions {
                transcode: TranscodeConfig {
                    no_compression,
                    level,
                },
                created,
            };
            push(pipeline::repack(&base, &options)?, output, tag)?;
        }

        Opt::Affix {
            image,
            layer,
            output,
            comment,
            tag,
        } => {
            let base = pull(&image)?;
            let diff = if layer.as_os_str() == "-" {
                let mut buf = Vec::new();
                std::io::stdin().read_to_end(&mut buf)?;
                buf
            } else {
                fs::read(&layer)?
            };
            let layer = Layer::from_diff(diff, Compression::Gzip, 0)?;
            push(pipeline::affix(&base, layer, &comment)?, output, tag)?;
        }

        Opt::Remix {
            base,
            weights,
            output,
            comment,
            tag,
        } => {
            let base = pull(&base)?;
            let weights = pull(&weights)?;
            push(pipeline::remix(&base, &weights, &comment)?, output, tag)?;
        }

        Opt::Extract {
            image,
            output,
            prefix,
            comment,
            all,
        } => {
            let image = pull(&image)?;
            let mode = if all {
                RewriteMode::CopyThrough
            } else {
                RewriteMode::Extract
            };
            match output {
                Some(path) => {
                    let file = fs::File::create(path)?;
                    pipeline::extract(&image, &comment, &prefix, mode, file)?;
                }
                None => {
                    let stdout = std::io::stdout();
                    pipeline::extract(&image, &comment, &prefix, mode, stdout.lock())?;
                    stdout.lock().flush()?;
                }
            }
        }
    }
    Ok(())
}

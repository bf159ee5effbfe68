use std::{
    io::Write,
    path::{Path, PathBuf},
};

use image::{codecs::jpeg::JpegEncoder, DynamicImage, GenericImageView, ImageFormat};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Longest edge of the image submitted to the classifier.
pub const MAX_EDGE: u32 = 1024;
pub const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum ImageProcessingError {
    #[error("Upload is not a decodable image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Failed to encode JPEG: {0}")]
    Encode(#[source] image::ImageError),
    #[error("Scratch file error in {path}: {source}")]
    Scratch {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Image worker stopped: {0}")]
    Worker(String),
}

/// Upload types the service accepts. A missing or generic content type falls back to sniffing the bytes.
pub fn accepted_format(content_type: Option<&str>, bytes: &[u8]) -> Option<ImageFormat> {
    let declared = content_type.map(|ct| ct.trim().to_ascii_lowercase());
    match declared.as_deref() {
        Some("image/jpeg") | Some("image/jpg") => Some(ImageFormat::Jpeg),
        Some("image/png") => Some(ImageFormat::Png),
        None | Some("application/octet-stream") => match image::guess_format(bytes) {
            Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png)) => Some(format),
            _ => None,
        },
        Some(_) => None,
    }
}

/// An upload and its re-encoded copy, both living in the scratch directory.
///
/// Both files are removed when this value is dropped; `cleanup` does the same
/// but reports removal failures.
#[derive(Debug)]
pub struct NormalizedImage {
    original: NamedTempFile,
    processed: NamedTempFile,
    jpeg: Vec<u8>,
    dimensions: (u32, u32),
}

impl NormalizedImage {
    pub fn jpeg_bytes(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn processed_path(&self) -> &Path {
        self.processed.path()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    pub fn cleanup(self) {
        for file in [self.original, self.processed] {
            let path = file.path().to_path_buf();
            if let Err(err) = file.close() {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove scratch image");
            }
        }
    }
}

/// Writes the upload to `scratch_dir`, downsizes it so neither edge exceeds
/// [`MAX_EDGE`] and re-encodes it as a JPEG next to it.
///
/// `format` is the type accepted by [`accepted_format`]; bytes of any other
/// type fail with [`ImageProcessingError::Decode`].
pub fn normalize_upload(
    scratch_dir: &Path,
    upload: &[u8],
    format: ImageFormat,
) -> Result<NormalizedImage, ImageProcessingError> {
    let original = scratch_file(scratch_dir, "upload_", "")?;
    write_scratch(&original, upload)?;

    let image = image::load_from_memory_with_format(upload, format)
        .map_err(ImageProcessingError::Decode)?;
    let image = fit_within(image, MAX_EDGE);
    let dimensions = image.dimensions();
    let jpeg = encode_jpeg(&image)?;

    let processed = scratch_file(scratch_dir, "processed_", ".jpg")?;
    write_scratch(&processed, &jpeg)?;

    Ok(NormalizedImage {
        original,
        processed,
        jpeg,
        dimensions,
    })
}

/// Runs [`normalize_upload`] on the blocking pool.
pub async fn normalize_upload_blocking(
    scratch_dir: PathBuf,
    upload: Vec<u8>,
    format: ImageFormat,
) -> Result<NormalizedImage, ImageProcessingError> {
    tokio::task::spawn_blocking(move || normalize_upload(&scratch_dir, &upload, format))
        .await
        .map_err(|err| ImageProcessingError::Worker(err.to_string()))?
}

fn fit_within(image: DynamicImage, max_edge: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= max_edge && height <= max_edge {
        return image;
    }
    // resize keeps the aspect ratio and fits inside the box
    image.resize(max_edge, max_edge, image::imageops::FilterType::Lanczos3)
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, ImageProcessingError> {
    let rgb = image.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(ImageProcessingError::Encode)?;
    Ok(jpeg)
}

fn scratch_file(dir: &Path, prefix: &str, suffix: &str) -> Result<NamedTempFile, ImageProcessingError> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|source| ImageProcessingError::Scratch {
            path: dir.to_path_buf(),
            source,
        })
}

fn write_scratch(file: &NamedTempFile, bytes: &[u8]) -> Result<(), ImageProcessingError> {
    let mut handle = file.as_file();
    handle
        .write_all(bytes)
        .and_then(|_| handle.flush())
        .map_err(|source| ImageProcessingError::Scratch {
            path: file.path().to_path_buf(),
            source,
        })
}

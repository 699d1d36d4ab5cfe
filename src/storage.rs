//! On-disk image storage for originals and generated art.

use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use regex::Regex;
use tracing::{debug, warn};

use crate::constants::PLACEHOLDER_SIZE;
use crate::error::SkygramError;
use crate::session::SessionId;

#[allow(clippy::expect_used)]
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\W+").expect("literal pattern compiles"));

/// An uploaded image that passed validation.
#[derive(Clone, Debug)]
pub struct ValidImage {
    /// Raw bytes as uploaded
    pub bytes: Vec<u8>,
    /// Format sniffed from the bytes
    pub format: ImageFormat,
}

impl ValidImage {
    /// Checks the declared content type and sniffs the bytes.
    pub fn from_upload(content_type: Option<&str>, bytes: Vec<u8>) -> Result<Self, SkygramError> {
        let declared = content_type.unwrap_or_default().to_ascii_lowercase();
        if !declared.starts_with("image/") {
            return Err(SkygramError::InvalidInput(
                "File must be an image".to_string(),
            ));
        }
        let format = sniff_image(&bytes)?;
        Ok(Self { bytes, format })
    }

    /// Content type to serve the image with.
    pub fn mime(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

/// Works out what kind of image the bytes hold from their magic number.
pub fn sniff_image(bytes: &[u8]) -> Result<ImageFormat, SkygramError> {
    if bytes.len() < 4 {
        debug!("Image is too short");
        return Err(SkygramError::InvalidInput(
            "File must be an image".to_string(),
        ));
    }
    image::guess_format(bytes).map_err(|err| {
        debug!("Failed to guess image format: {}", err);
        SkygramError::InvalidInput("File must be an image".to_string())
    })
}

/// Makes a label safe to use in a filename: runs of non-word characters
/// become `_`, everything is lowercased.
pub fn slugify(label: &str) -> String {
    let slug = NON_WORD
        .replace_all(label.trim(), "_")
        .trim_matches('_')
        .to_lowercase();
    if slug.is_empty() {
        "cloud".to_string()
    } else {
        slug
    }
}

/// Filename of the generated art for a session and label.
pub fn generated_filename(id: &SessionId, label: &str) -> String {
    format!("{}_{}.png", id, slugify(label))
}

/// Ensures upstream image bytes are a valid PNG, converting if possible.
pub fn normalize_to_png(bytes: &[u8]) -> Result<Vec<u8>, SkygramError> {
    let format = sniff_image(bytes)
        .map_err(|_| SkygramError::Upstream("generated output is not an image".to_string()))?;
    let image = image::load_from_memory_with_format(bytes, format).map_err(|err| {
        debug!("Failed to decode generated image: {}", err);
        SkygramError::Upstream(format!("generated {format:?} image could not be decoded"))
    })?;

    if format == ImageFormat::Png {
        return Ok(bytes.to_vec());
    }
    encode_png(&image)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, SkygramError> {
    let mut output = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|err| SkygramError::InternalServerError(err.to_string()))?;
    Ok(output)
}

/// Renders the stand-in art used when generation fails: a blue sky fading
/// towards the horizon with a soft white cloud in the middle.
pub fn placeholder_png() -> Result<Vec<u8>, SkygramError> {
    let size = PLACEHOLDER_SIZE as f32;
    let image = RgbImage::from_fn(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, |x, y| {
        let fy = y as f32 / size;
        let sky = [
            (70.0 + 120.0 * fy) as u8,
            (140.0 + 80.0 * fy) as u8,
            (230.0 + 20.0 * fy) as u8,
        ];
        let dx = (x as f32 - size / 2.0) / (size * 0.32);
        let dy = (y as f32 - size / 2.0) / (size * 0.16);
        let cloud = (1.0 - (dx * dx + dy * dy)).clamp(0.0, 1.0);
        let mix = |channel: u8| (channel as f32 + (255.0 - channel as f32) * cloud) as u8;
        Rgb([mix(sky[0]), mix(sky[1]), mix(sky[2])])
    });
    encode_png(&DynamicImage::ImageRgb8(image))
}

/// The two directories images are written to.
#[derive(Clone, Debug)]
pub struct ImageStore {
    upload_dir: PathBuf,
    generated_dir: PathBuf,
}

impl ImageStore {
    /// Store rooted at the given directories.
    pub fn new(upload_dir: impl Into<PathBuf>, generated_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            generated_dir: generated_dir.into(),
        }
    }

    /// Directory holding originals.
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Directory holding generated art.
    pub fn generated_dir(&self) -> &Path {
        &self.generated_dir
    }

    /// Creates both directories if needed.
    pub async fn ensure_dirs(&self) -> Result<(), SkygramError> {
        for dir in [&self.upload_dir, &self.generated_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|err| {
                SkygramError::Storage(format!("Failed to create {}: {err}", dir.display()))
            })?;
        }
        Ok(())
    }

    /// Writes the original upload, returning where it went.
    pub async fn save_original(
        &self,
        id: &SessionId,
        image: &ValidImage,
    ) -> Result<PathBuf, SkygramError> {
        let ext = image.format.extensions_str().first().copied().unwrap_or("img");
        let path = self.upload_dir.join(format!("{id}_original.{ext}"));
        write_file(&path, &image.bytes).await?;
        Ok(path)
    }

    /// Writes generated art under its derived filename.
    pub async fn save_generated(
        &self,
        id: &SessionId,
        label: &str,
        png_bytes: &[u8],
    ) -> Result<PathBuf, SkygramError> {
        let path = self.generated_dir.join(generated_filename(id, label));
        write_file(&path, png_bytes).await?;
        Ok(path)
    }

    /// Best-effort removal of session files; missing files are fine.
    pub async fn remove_files(&self, paths: &[PathBuf]) {
        for path in paths {
            if let Err(err) = tokio::fs::remove_file(path).await
                && err.kind() != ErrorKind::NotFound
            {
                warn!("Failed to remove {}: {}", path.display(), err);
            }
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), SkygramError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|err| SkygramError::Storage(format!("Failed to write {}: {err}", path.display())))
}

/// Reads a stored file along with its metadata, mapping a missing file to 404.
pub async fn read_file(path: &Path) -> Result<(Vec<u8>, std::fs::Metadata), SkygramError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(SkygramError::NotFound(path.display().to_string())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(SkygramError::NotFound(path.display().to_string()));
        }
        Err(err) => return Err(SkygramError::Storage(err.to_string())),
    };
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok((bytes, metadata)),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            Err(SkygramError::NotFound(path.display().to_string()))
        }
        Err(err) => Err(SkygramError::Storage(err.to_string())),
    }
}

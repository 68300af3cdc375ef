use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use lifelike_contracts::ConversionError;

pub const PDF_MIME_TYPE: &str = "application/pdf";
pub const PNG_MIME_TYPE: &str = "image/png";

/// Image types the generation service accepts as-is.
pub const NATIVE_IMAGE_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/heic",
    "image/heif",
];

/// A file the user picked, as raw bytes plus its declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Reads a file from disk, guessing its MIME type from the extension.
    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(Self::new(name, guess_mime_type(path), bytes))
    }

    /// Only images and PDFs can be brought to life.
    pub fn is_accepted(&self) -> bool {
        let mime = self.mime_type.to_ascii_lowercase();
        mime.starts_with("image/") || mime == PDF_MIME_TYPE
    }
}

/// Base64 payload plus the MIME type that describes it after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMedia {
    pub base64: String,
    pub mime_type: String,
}

impl NormalizedMedia {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

pub fn is_passthrough(mime_type: &str) -> bool {
    mime_type.eq_ignore_ascii_case(PDF_MIME_TYPE)
        || NATIVE_IMAGE_MIME_TYPES
            .iter()
            .any(|native| native.eq_ignore_ascii_case(mime_type))
}

/// Turns an upload into something the generation service accepts.
///
/// PDFs and natively supported images pass through byte-for-byte. Anything
/// else is decoded, drawn onto an RGBA surface of the same pixel size and
/// re-encoded as PNG. Decoding runs on the blocking pool; the intermediate
/// buffers are dropped there on both the success and the failure path.
pub async fn normalize(file: &UploadedFile) -> Result<NormalizedMedia, ConversionError> {
    if is_passthrough(&file.mime_type) {
        return Ok(NormalizedMedia {
            base64: BASE64.encode(&file.bytes),
            mime_type: file.mime_type.to_ascii_lowercase(),
        });
    }

    let bytes = file.bytes.clone();
    let mime_type = file.mime_type.clone();
    let png = tokio::task::spawn_blocking(move || reencode_as_png(&bytes, &mime_type))
        .await
        .map_err(|err| ConversionError::Task(err.to_string()))??;
    tracing::debug!(
        file = %file.name,
        from = %file.mime_type,
        bytes_in = file.bytes.len(),
        bytes_out = png.len(),
        "re-encoded upload as png"
    );
    Ok(NormalizedMedia {
        base64: BASE64.encode(png),
        mime_type: PNG_MIME_TYPE.to_string(),
    })
}

fn reencode_as_png(bytes: &[u8], mime_type: &str) -> Result<Vec<u8>, ConversionError> {
    let decoded = image::load_from_memory(bytes).map_err(|err| ConversionError::Decode {
        mime_type: mime_type.to_string(),
        source: Box::new(err),
    })?;
    let surface = DynamicImage::ImageRgba8(decoded.to_rgba8());
    let mut out = Vec::new();
    surface
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|err| ConversionError::Encode(Box::new(err)))?;
    Ok(out)
}

pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => PDF_MIME_TYPE,
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "ico" => "image/x-icon",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

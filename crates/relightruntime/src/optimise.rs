//! Output collection and re-encoding to the requested format

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::DynamicImage;
use relightcore::{OutputFormat, OutputQuality, RelightError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions re-encoded by [`optimise_image_files`]
pub const IMAGE_FILE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Every regular file below `dir`, sorted by path
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, RelightError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| RelightError::Output(format!("failed to list {}: {}", dir.display(), e)))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

pub fn should_optimise(format: OutputFormat, quality: OutputQuality) -> bool {
    quality < OutputQuality::MAX || matches!(format, OutputFormat::Webp | OutputFormat::Jpg)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_FILE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Re-encode image outputs; everything else passes through unchanged
pub fn optimise_image_files(
    format: OutputFormat,
    quality: OutputQuality,
    files: Vec<PathBuf>,
) -> Result<Vec<PathBuf>, RelightError> {
    if !should_optimise(format, quality) {
        return Ok(files);
    }

    files
        .into_iter()
        .map(|file| {
            if file.is_file() && is_image_file(&file) {
                optimise_image(&file, format, quality)
            } else {
                Ok(file)
            }
        })
        .collect()
}

fn optimise_image(path: &Path, format: OutputFormat, quality: OutputQuality) -> Result<PathBuf, RelightError> {
    let image = image::open(path)
        .map_err(|e| RelightError::Output(format!("failed to decode {}: {}", path.display(), e)))?;
    let target = path.with_extension(format.extension());

    let file = File::create(&target)?;
    let mut writer = BufWriter::new(file);
    let encoded = match format {
        OutputFormat::Jpg => {
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality.get().clamp(1, 100)))
        }
        OutputFormat::Png => image.write_with_encoder(PngEncoder::new_with_quality(
            &mut writer,
            CompressionType::Best,
            FilterType::Adaptive,
        )),
        OutputFormat::Webp => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            let encoder = webp::Encoder::from_image(&rgba)
                .map_err(|e| RelightError::Output(format!("failed to encode {}: {}", target.display(), e)))?;
            writer.write_all(&encoder.encode(quality.get() as f32))?;
            Ok(())
        }
    };
    encoded.map_err(|e| RelightError::Output(format!("failed to encode {}: {}", target.display(), e)))?;
    writer.flush()?;

    tracing::debug!("Optimised {} -> {}", path.display(), target.display());
    Ok(target)
}

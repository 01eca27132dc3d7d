//! Local file helpers: reading templates and images, saving results.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::{DynamicImage, ImageFormat};

/// Read a workflow template as text. Seed substitution happens later.
pub async fn read_workflow_template(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read workflow {}", path.display()))
}

pub async fn read_image(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))
}

/// Paths for `count` images: `base` itself, then `<stem>_<n>.<ext>` in
/// the same directory for n = 1, 2, ...
pub fn output_paths(base: &Path, count: usize) -> Vec<PathBuf> {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = base.extension().map(|e| e.to_string_lossy().into_owned());

    (0..count)
        .map(|n| {
            if n == 0 {
                return base.to_path_buf();
            }
            let name = match &ext {
                Some(ext) => format!("{stem}_{n}.{ext}"),
                None => format!("{stem}_{n}"),
            };
            base.with_file_name(name)
        })
        .collect()
}

/// Encode `images` in the format implied by `base`'s extension and write
/// them to [`output_paths`]. Returns the paths written.
pub async fn save_images(images: &[DynamicImage], base: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let format = ImageFormat::from_path(base)
        .with_context(|| format!("Unsupported output image format: {}", base.display()))?;

    let paths = output_paths(base, images.len());
    for (image, path) in images.iter().zip(&paths) {
        let bytes = encode(image, format)
            .with_context(|| format!("Failed to encode {}", path.display()))?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(paths)
}

fn encode(image: &DynamicImage, format: ImageFormat) -> image::ImageResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buf, format)?,
        _ => image.write_to(&mut buf, format)?,
    }
    Ok(buf.into_inner())
}

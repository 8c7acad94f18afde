//! PNG output. The file appears at its final path only once fully written.

use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::debug;

use shotcopy_platform::frame::RgbImage;
use shotcopy_platform::CaptureError;

pub fn write_png(image: &RgbImage, path: &Path) -> Result<(), CaptureError> {
    let expected = image.width as usize * image.height as usize * 3;
    if image.data.len() != expected {
        return Err(CaptureError::Encode(format!(
            "image data is {} bytes, expected {} for {}x{}",
            image.data.len(),
            expected,
            image.width,
            image.height
        )));
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = tempfile::Builder::new()
        .prefix(".shotcopy-")
        .suffix(".png.tmp")
        .tempfile_in(dir)
        .map_err(|e| {
            CaptureError::Encode(format!("failed to create file in {}: {}", dir.display(), e))
        })?;

    {
        let mut writer = BufWriter::new(tmp.as_file());
        PngEncoder::new(&mut writer)
            .write_image(&image.data, image.width, image.height, ExtendedColorType::Rgb8)
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
    }

    tmp.persist(path).map_err(|e| {
        CaptureError::Encode(format!("failed to write {}: {}", path.display(), e.error))
    })?;
    debug!("wrote {}x{} png to {}", image.width, image.height, path.display());
    Ok(())
}

//! Pixel normalization from mapped 32-bit shm pixels to packed RGB rows.

use shotcopy_platform::frame::{FrameDescriptor, PixelFamily, RgbImage, BYTES_PER_PIXEL};
use shotcopy_platform::CaptureError;

/// Convert a mapped frame into a top-down RGB image.
///
/// Reads at most `stride * height` bytes of `raw` and `width * 4` bytes of
/// each row; padding past the visible row is never touched.
pub fn convert(raw: &[u8], descriptor: &FrameDescriptor) -> Result<RgbImage, CaptureError> {
    let family = PixelFamily::from_format(descriptor.format)
        .ok_or(CaptureError::FormatUnsupported(descriptor.format))?;

    let width = descriptor.width as usize;
    let height = descriptor.height as usize;
    let stride = descriptor.stride as usize;
    let row_bytes = width * BYTES_PER_PIXEL as usize;

    if stride < row_bytes {
        return Err(CaptureError::Convert(format!(
            "stride {} shorter than a {}-pixel row",
            stride, width
        )));
    }

    let total = descriptor
        .byte_size()
        .ok_or_else(|| CaptureError::Convert("frame size overflows".to_string()))?;
    if raw.len() < total {
        return Err(CaptureError::Convert(format!(
            "mapped frame is {} bytes, expected {}",
            raw.len(),
            total
        )));
    }
    let raw = &raw[..total];

    let [r, g, b] = family.rgb_offsets();
    let mut data = Vec::with_capacity(width * height * 3);

    for y in 0..height {
        let src_y = if descriptor.y_invert { height - 1 - y } else { y };
        let row_start = src_y * stride;
        let row = &raw[row_start..row_start + row_bytes];

        for px in row.chunks_exact(BYTES_PER_PIXEL as usize) {
            data.extend_from_slice(&[px[r], px[g], px[b]]);
        }
    }

    Ok(RgbImage {
        width: descriptor.width,
        height: descriptor.height,
        data,
    })
}

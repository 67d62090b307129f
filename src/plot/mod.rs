//! Result images: clustered heatmap and volcano plot, encoded as PNG
//!
//! Both plots are drawn with plotters into an in-memory RGB buffer, which is then
//! encoded with the image crate.

mod cluster;
mod colormap;
mod heatmap;
mod volcano;

use std::io::Cursor;

use image::{ImageFormat, RgbImage};

use crate::error::{DeaError, Result};

pub use cluster::{average_linkage, Dendrogram, Merge};
pub use colormap::{diverging, rdylbu_r};
pub use heatmap::{heatmap_features, render_heatmap, z_scores};
pub use volcano::{neg_log10_padj, render_volcano};

/// PNG signature every encoded image starts with
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Zeroed RGB buffer for a `width` x `height` bitmap backend
fn rgb_buffer(width: u32, height: u32) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(DeaError::Render {
            reason: format!("image size {}x{} has no pixels", width, height),
        });
    }
    Ok(vec![0u8; width as usize * height as usize * 3])
}

/// Drawing errors from plotters
fn render_error(e: impl std::fmt::Display) -> DeaError {
    DeaError::Render { reason: e.to_string() }
}

/// Encode a filled RGB buffer as PNG
fn encode_png(width: u32, height: u32, buffer: Vec<u8>) -> Result<Vec<u8>> {
    let image = RgbImage::from_raw(width, height, buffer).ok_or_else(|| DeaError::Render {
        reason: format!("pixel buffer does not match {}x{}", width, height),
    })?;
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_png() {
        let mut buffer = rgb_buffer(4, 2).unwrap();
        buffer[..3].copy_from_slice(&[214, 39, 40]);
        let png = encode_png(4, 2, buffer).unwrap();
        assert_eq!(&png[..8], &PNG_SIGNATURE);

        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (4, 2));
        assert_eq!(decoded.get_pixel(0, 0).0, [214, 39, 40]);
        assert_eq!(decoded.get_pixel(3, 1).0, [0, 0, 0]);
    }

    #[test]
    fn test_bad_sizes_are_render_errors() {
        assert!(matches!(rgb_buffer(0, 5), Err(DeaError::Render { .. })));
        assert!(matches!(encode_png(4, 4, vec![0; 10]), Err(DeaError::Render { .. })));
    }
}

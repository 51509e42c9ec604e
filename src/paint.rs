//! The trivial pixel fills the demos draw with.
//!
//! Pixels are 32-bit XRGB/ARGB, little endian, row major. Nothing here is
//! protocol-aware; each function just fills a canvas of `width * height * 4`
//! bytes.

use crate::shm::Dimensions;

/// A red disc centered on a white background.
pub fn disc(canvas: &mut [u8], dim: Dimensions, radius: u32) {
    let width = dim.width() as i64;
    let height = dim.height() as i64;
    let (cx, cy) = (width / 2, height / 2);
    let radius_sq = (radius as i64) * (radius as i64);

    for (index, chunk) in canvas.chunks_exact_mut(4).enumerate() {
        let x = index as i64 % width;
        let y = index as i64 / width;
        let (dx, dy) = (cx - x, cy - y);
        let color: u32 = if dx * dx + dy * dy < radius_sq {
            0xffff0000
        } else {
            0xffffffff
        };
        chunk.copy_from_slice(&color.to_le_bytes());
    }
}

/// A diagonal color gradient, shifted horizontally by `shift` pixels.
///
/// Bumping `shift` every frame gives a cheap scrolling animation.
pub fn gradient(canvas: &mut [u8], dim: Dimensions, shift: u32) {
    let width = dim.width();
    let height = dim.height();

    for (index, chunk) in canvas.chunks_exact_mut(4).enumerate() {
        let x = (index as u32 + shift) % width;
        let y = index as u32 / width;

        let a = 0xFF;
        let r = u32::min(((width - x) * 0xFF) / width, ((height - y) * 0xFF) / height);
        let g = u32::min((x * 0xFF) / width, ((height - y) * 0xFF) / height);
        let b = u32::min(((width - x) * 0xFF) / width, (y * 0xFF) / height);
        let color = (a << 24) + (r << 16) + (g << 8) + b;

        chunk.copy_from_slice(&color.to_le_bytes());
    }
}

/// A single opaque color.
pub fn solid(canvas: &mut [u8], color: u32) {
    for chunk in canvas.chunks_exact_mut(4) {
        chunk.copy_from_slice(&color.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disc_paints_center_and_corners_differently() {
        let dim = Dimensions::new(64, 64).unwrap();
        let mut canvas = vec![0u8; dim.byte_len()];
        disc(&mut canvas, dim, 16);

        let pixel = |x: usize, y: usize| {
            let offset = (y * 64 + x) * 4;
            u32::from_le_bytes(canvas[offset..offset + 4].try_into().unwrap())
        };
        assert_eq!(pixel(32, 32), 0xffff0000);
        assert_eq!(pixel(0, 0), 0xffffffff);
    }

    #[test]
    fn gradient_covers_the_whole_canvas() {
        let dim = Dimensions::new(16, 16).unwrap();
        let mut canvas = vec![0u8; dim.byte_len()];
        gradient(&mut canvas, dim, 3);
        // Fully opaque everywhere.
        assert!(canvas.chunks_exact(4).all(|chunk| chunk[3] == 0xFF));
    }
}

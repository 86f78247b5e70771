//! Background removal for product photos.

use super::CompositeError;
use image::{Rgba, RgbaImage};
use std::collections::VecDeque;

/// Turns the background of a product image transparent.
pub trait BackgroundRemover: Send + Sync {
    fn remove(&self, image: RgbaImage) -> Result<RgbaImage, CompositeError>;
}

/// Keys out the background by flood-filling from the image border.
///
/// The key colour is the per-channel median of the border pixels. Every
/// pixel connected to the border whose channels all lie within
/// `tolerance` of the key becomes fully transparent. Images that already
/// carry transparency are returned unchanged.
#[derive(Debug, Clone, Copy)]
pub struct BorderKeyRemover {
    tolerance: u8,
}

impl BorderKeyRemover {
    pub const fn new(tolerance: u8) -> Self {
        Self { tolerance }
    }

    fn matches(&self, pixel: &Rgba<u8>, key: [u8; 3]) -> bool {
        pixel.0[..3]
            .iter()
            .zip(key)
            .all(|(&c, k)| c.abs_diff(k) <= self.tolerance)
    }
}

impl Default for BorderKeyRemover {
    fn default() -> Self {
        Self::new(40)
    }
}

impl BackgroundRemover for BorderKeyRemover {
    fn remove(&self, mut image: RgbaImage) -> Result<RgbaImage, CompositeError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(CompositeError::Background("empty image".into()));
        }

        if image.pixels().any(|p| p.0[3] < u8::MAX) {
            return Ok(image);
        }

        let border = border_coords(width, height);
        let key = median_color(border.iter().map(|&(x, y)| image.get_pixel(x, y)));

        let mut visited = vec![false; width as usize * height as usize];
        let mut queue: VecDeque<(u32, u32)> = VecDeque::new();
        for (x, y) in border {
            let idx = y as usize * width as usize + x as usize;
            if !visited[idx] && self.matches(image.get_pixel(x, y), key) {
                visited[idx] = true;
                queue.push_back((x, y));
            }
        }

        while let Some((x, y)) = queue.pop_front() {
            image.get_pixel_mut(x, y).0[3] = 0;

            let neighbours = [
                (x.checked_sub(1), Some(y)),
                (x.checked_add(1).filter(|&nx| nx < width), Some(y)),
                (Some(x), y.checked_sub(1)),
                (Some(x), y.checked_add(1).filter(|&ny| ny < height)),
            ];
            for (nx, ny) in neighbours {
                let (Some(nx), Some(ny)) = (nx, ny) else {
                    continue;
                };
                let idx = ny as usize * width as usize + nx as usize;
                if !visited[idx] && self.matches(image.get_pixel(nx, ny), key) {
                    visited[idx] = true;
                    queue.push_back((nx, ny));
                }
            }
        }

        Ok(image)
    }
}

fn border_coords(width: u32, height: u32) -> Vec<(u32, u32)> {
    let mut coords = Vec::with_capacity(2 * (width + height) as usize);
    for x in 0..width {
        coords.push((x, 0));
        if height > 1 {
            coords.push((x, height - 1));
        }
    }
    for y in 1..height.saturating_sub(1) {
        coords.push((0, y));
        if width > 1 {
            coords.push((width - 1, y));
        }
    }
    coords
}

fn median_color<'a>(pixels: impl Iterator<Item = &'a Rgba<u8>>) -> [u8; 3] {
    let mut channels: [Vec<u8>; 3] = Default::default();
    for pixel in pixels {
        for (channel, value) in channels.iter_mut().zip(pixel.0) {
            channel.push(value);
        }
    }

    let mut key = [0u8; 3];
    for (slot, channel) in key.iter_mut().zip(channels.iter_mut()) {
        channel.sort_unstable();
        *slot = channel.get(channel.len() / 2).copied().unwrap_or(0);
    }
    key
}
